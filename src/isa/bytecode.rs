// AVM Core: content-addressed execution core of a verifiable stack virtual machine
//
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//        http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

use core::fmt::{self, Display, Formatter};
use std::collections::HashMap;
use std::sync::Arc;

use super::{Opcode, Operation};
use crate::hash::Hasher;
use crate::value::{read_array, read_u64, CODEPOINT};
use crate::{DecodeError, Slot, Value, ValueHash};

/// Position in the code segment carrying the operation found there and the hash of the code point
/// which follows it.
///
/// The hash of a code point covers its operation and `next_hash`, but not `pc`, which makes each
/// code point commit to the whole remaining code sequence. Execution never looks at `pc`: the
/// successor is found by `next_hash`, so `pc` is informational only.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CodePoint {
    pub pc: u64,
    pub op: Operation,
    pub next_hash: ValueHash,
}

impl Display for CodePoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CodePoint({}: {})", self.pc, self.op)
    }
}

impl CodePoint {
    /// Sentinel code point meaning "no error handler installed".
    pub fn error() -> Self {
        CodePoint {
            pc: u64::MAX,
            op: Operation::basic(Opcode::Error),
            next_hash: ValueHash::zero(),
        }
    }

    pub fn hash(&self) -> ValueHash {
        let mut hasher = Hasher::new();
        hasher.update([CODEPOINT, self.op.opcode.byte()]);
        if let Some(imm) = &self.op.immediate {
            hasher.update(imm.hash().to_byte_array());
        }
        hasher.update(self.next_hash.to_byte_array());
        hasher.finish()
    }

    pub fn marshal(&self, buf: &mut Vec<u8>) {
        buf.push(CODEPOINT);
        buf.extend_from_slice(&self.pc.to_be_bytes());
        self.op.marshal(buf);
        buf.extend_from_slice(&self.next_hash.to_byte_array());
    }

    /// Reads the code point body following the type tag.
    pub(crate) fn decode(data: &mut &[u8], depth: usize) -> Result<Self, DecodeError> {
        let pc = read_u64(data)?;
        let op = Operation::decode(data, depth)?;
        let next_hash = ValueHash::from_byte_array(read_array(data)?);
        Ok(CodePoint { pc, op, next_hash })
    }
}

/// Immutable code segment: a hash-chained sequence of code points starting at `pc = 0`.
///
/// A segment reconstructed from a one-step proof holds the single code point being executed, at
/// its original `pc`.
#[derive(Clone, Debug, Default)]
pub struct Code {
    points: Arc<[CodePoint]>,
    hashes: Arc<[ValueHash]>,
    index: Arc<HashMap<ValueHash, usize>>,
    offset: u64,
}

impl Code {
    /// Links the operations into a code segment. The last code point terminates the chain with the
    /// zero hash.
    pub fn new(ops: impl IntoIterator<Item = Operation>) -> Self {
        let ops = ops.into_iter().collect::<Vec<_>>();
        let mut points = Vec::with_capacity(ops.len());
        let mut hashes = Vec::with_capacity(ops.len());
        let mut next_hash = ValueHash::zero();
        for (pc, op) in ops.into_iter().enumerate().rev() {
            let point = CodePoint { pc: pc as u64, op, next_hash };
            next_hash = point.hash();
            points.push(point);
            hashes.push(next_hash);
        }
        points.reverse();
        hashes.reverse();
        // equal hashes mean equal remaining code, so any of the positions will do
        let index = hashes.iter().enumerate().map(|(no, hash)| (*hash, no)).collect();
        Code {
            points: Arc::from(points),
            hashes: Arc::from(hashes),
            index: Arc::new(index),
            offset: 0,
        }
    }

    pub(crate) fn with_point(point: CodePoint) -> Self {
        let offset = point.pc;
        let hash = point.hash();
        Code {
            points: Arc::from([point]),
            hashes: Arc::from([hash]),
            index: Arc::new(HashMap::from([(hash, 0)])),
            offset,
        }
    }

    pub fn len(&self) -> usize { self.points.len() }

    pub fn is_empty(&self) -> bool { self.points.is_empty() }

    pub fn get(&self, pc: u64) -> Option<&CodePoint> {
        let index = pc.checked_sub(self.offset)?;
        self.points.get(usize::try_from(index).ok()?)
    }

    pub fn hash_at(&self, pc: u64) -> Option<ValueHash> {
        let index = pc.checked_sub(self.offset)?;
        self.hashes.get(usize::try_from(index).ok()?).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CodePoint> { self.points.iter() }

    /// Whether the segment holds a code point with the given hash.
    pub fn contains(&self, hash: &ValueHash) -> bool { self.index.contains_key(hash) }

    /// Checks a value supplied from outside of the segment (a message, the static value or an
    /// immediate) before it enters the machine state.
    ///
    /// The value must be fully materialized, and every code point inside it must be either a code
    /// point of this segment or the [`CodePoint::error`] sentinel. This keeps a running machine
    /// from ever reaching a code point whose successor is neither in the segment nor the end of
    /// the code.
    pub fn admit(&self, value: &Value) -> Result<(), DecodeError> {
        let error = CodePoint::error().hash();
        let mut todo = vec![value];
        while let Some(value) = todo.pop() {
            match value {
                Value::Tuple(tuple) => {
                    for slot in tuple.slots() {
                        todo.push(slot.value().ok_or(DecodeError::UnexpectedHashOnly)?);
                    }
                }
                Value::CodePoint(point) => {
                    let hash = point.hash();
                    if hash != error && !self.contains(&hash) {
                        return Err(DecodeError::ForeignCodePoint(hash));
                    }
                    todo.extend(point.op.immediate.as_deref());
                }
                Value::Int(_) | Value::Buffer(_) => {}
            }
        }
        Ok(())
    }

    /// Slot of the entry code point; hash-only with the zero hash for an empty segment.
    pub fn entry(&self) -> Slot {
        match self.points.first() {
            Some(point) => Slot::from(Value::CodePoint(point.clone())),
            None => Slot::HashOnly(ValueHash::zero()),
        }
    }

    /// Slot of the code point following `point`.
    ///
    /// The successor is looked up by `point.next_hash` and materialized if the segment has it;
    /// otherwise the hash-only placeholder is returned, and executing it faults. `point.pc` plays
    /// no role in the lookup.
    pub fn successor(&self, point: &CodePoint) -> Slot {
        match self.index.get(&point.next_hash).and_then(|no| self.points.get(*no)) {
            Some(next) => Slot::from(Value::CodePoint(next.clone())),
            None => Slot::HashOnly(point.next_hash),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Code {
        Code::new([
            Operation::with_immediate(Opcode::Nop, 1u64),
            Operation::basic(Opcode::Dup0),
            Operation::basic(Opcode::Halt),
        ])
    }

    #[test]
    fn hash_chain() {
        let code = sample();
        assert_eq!(code.len(), 3);
        let last = code.get(2).unwrap();
        assert_eq!(last.next_hash, ValueHash::zero());
        for pc in 0..2 {
            assert_eq!(code.get(pc).unwrap().next_hash, code.get(pc + 1).unwrap().hash());
            assert_eq!(code.hash_at(pc).unwrap(), code.get(pc).unwrap().hash());
        }
        assert!(code.get(3).is_none());
    }

    #[test]
    fn hash_ignores_pc() {
        let mut point = sample().get(1).unwrap().clone();
        let hash = point.hash();
        point.pc = 42;
        assert_eq!(point.hash(), hash);
    }

    #[test]
    fn immediate_changes_hash() {
        let a = Code::new([Operation::with_immediate(Opcode::Nop, 1u64)]);
        let b = Code::new([Operation::with_immediate(Opcode::Nop, 2u64)]);
        let c = Code::new([Operation::basic(Opcode::Nop)]);
        assert_ne!(a.hash_at(0), b.hash_at(0));
        assert_ne!(a.hash_at(0), c.hash_at(0));
    }

    #[test]
    fn codepoint_encoding() {
        let point = sample().get(0).unwrap().clone();
        let value = Value::CodePoint(point.clone());
        let bytes = value.to_bytes();
        assert_eq!(bytes[0], CODEPOINT);
        assert_eq!(&bytes[1..9], &[0u8; 8]);
        assert_eq!(&bytes[9..11], &[1, Opcode::Nop.byte()]);
        assert_eq!(bytes.len(), 1 + 8 + 2 + 33 + 32);
        let decoded = Value::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.as_code_point(), Some(&point));
    }

    #[test]
    fn successor() {
        let code = sample();
        let first = code.get(0).unwrap();
        assert_eq!(code.successor(first).value().and_then(Value::as_code_point), code.get(1));
        let last = code.get(2).unwrap();
        assert_eq!(code.successor(last), Slot::HashOnly(ValueHash::zero()));

        let mut forged = first.clone();
        forged.next_hash = ValueHash::empty_tuple();
        assert!(code.successor(&forged).is_hash_only());
    }

    #[test]
    fn successor_ignores_pc() {
        let code = sample();
        let mut moved = code.get(0).unwrap().clone();
        moved.pc = 1000;
        assert_eq!(code.successor(&moved), code.successor(code.get(0).unwrap()));
        assert_eq!(code.successor(&moved).value().and_then(Value::as_code_point), code.get(1));
    }

    #[test]
    fn admit() {
        let code = sample();
        let mut moved = code.get(1).unwrap().clone();
        moved.pc = 1000;
        let genuine = Value::Tuple(
            crate::Tuple::with_values([
                Value::from(5u64),
                Value::CodePoint(moved),
                Value::CodePoint(CodePoint::error()),
            ])
            .unwrap(),
        );
        assert_eq!(code.admit(&genuine), Ok(()));

        let mut foreign = code.get(1).unwrap().clone();
        foreign.next_hash = ValueHash::empty_tuple();
        let hash = foreign.hash();
        assert_eq!(
            code.admit(&Value::CodePoint(foreign)),
            Err(DecodeError::ForeignCodePoint(hash))
        );

        let shallow = crate::Tuple::with_values([Value::from(1u64)]).unwrap().clone_shallow();
        assert_eq!(code.admit(&Value::Tuple(shallow)), Err(DecodeError::UnexpectedHashOnly));
    }

    #[test]
    fn single_point_segment() {
        let point = sample().get(1).unwrap().clone();
        let code = Code::with_point(point.clone());
        assert_eq!(code.get(1), Some(&point));
        assert!(code.get(0).is_none());
        assert_eq!(code.successor(&point), Slot::HashOnly(point.next_hash));
    }

    #[test]
    fn error_sentinel() {
        let error = CodePoint::error();
        assert_eq!(error.op.opcode, Opcode::Error);
        assert_ne!(error.hash(), sample().hash_at(0).unwrap());
    }
}

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
use std::sync::Arc;

use amplify::num::u256;

use crate::hash::{keccak, Hasher};
use crate::{CodePoint, ResolveError, Tuple, ValuePool, ValueHash, MAX_ARITY};

/// Type tag of a 256-bit unsigned integer.
pub const INT: u8 = 0;
/// Type tag of a code point.
pub const CODEPOINT: u8 = 1;
/// Type tag of a hash-only placeholder.
pub const HASH_ONLY: u8 = 2;
/// Type tag of the empty tuple; a tuple of arity `A` is tagged `TUPLE_BASE + A`.
pub const TUPLE_BASE: u8 = 3;
/// Type tag of the largest tuple.
pub const TUPLE_MAX: u8 = TUPLE_BASE + MAX_ARITY as u8;
/// Type tag of a byte buffer.
pub const BUFFER: u8 = 12;

/// Maximal length of a byte buffer value.
pub const BUFFER_MAX_LEN: usize = 1 << 20;

/// Maximal nesting of values accepted by the decoder.
pub const MAX_DECODE_DEPTH: usize = 2048;

/// Closed set of values representable in the machine state.
///
/// Values are immutable; cloning is cheap since aggregate children are reference-counted.
/// Two values are equal iff their hashes are equal.
#[derive(Clone, Debug, From)]
pub enum Value {
    /// Unsigned 256-bit integer.
    #[from]
    Int(u256),

    /// Reference into the code segment.
    #[from]
    CodePoint(CodePoint),

    /// Opaque immutable byte blob.
    #[from]
    Buffer(Buffer),

    /// Aggregate of up to eight slots.
    #[from]
    Tuple(Tuple),
}

#[cfg(feature = "serde")]
impl_serde_marshalled!(Value);

impl From<u64> for Value {
    fn from(int: u64) -> Self { Value::Int(u256::from(int)) }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool { self.hash() == other.hash() }
}

impl Eq for Value {}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(int) => Display::fmt(int, f),
            Value::CodePoint(cp) => Display::fmt(cp, f),
            Value::Buffer(buf) => Display::fmt(buf, f),
            Value::Tuple(tuple) => Display::fmt(tuple, f),
        }
    }
}

impl Value {
    /// The empty tuple.
    pub fn unit() -> Self { Value::Tuple(Tuple::empty()) }

    /// Type code, as reported by the `type` instruction. Tuples of all arities share
    /// [`TUPLE_BASE`].
    pub fn type_code(&self) -> u8 {
        match self {
            Value::Int(_) => INT,
            Value::CodePoint(_) => CODEPOINT,
            Value::Buffer(_) => BUFFER,
            Value::Tuple(_) => TUPLE_BASE,
        }
    }

    pub fn hash(&self) -> ValueHash {
        match self {
            Value::Int(int) => keccak(&int.to_be_bytes()),
            Value::CodePoint(cp) => cp.hash(),
            Value::Buffer(buf) => buf.hash(),
            Value::Tuple(tuple) => tuple.hash(),
        }
    }

    pub fn as_int(&self) -> Option<u256> {
        match self {
            Value::Int(int) => Some(*int),
            _ => None,
        }
    }

    pub fn as_code_point(&self) -> Option<&CodePoint> {
        match self {
            Value::CodePoint(cp) => Some(cp),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&Tuple> {
        match self {
            Value::Tuple(tuple) => Some(tuple),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Value::Buffer(buf) => Some(buf),
            _ => None,
        }
    }

    /// Writes the canonical encoding of the value. Hash-only slots inside tuples are written as
    /// hash-only placeholders.
    pub fn marshal(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Int(int) => {
                buf.push(INT);
                buf.extend_from_slice(&int.to_be_bytes());
            }
            Value::CodePoint(cp) => cp.marshal(buf),
            Value::Buffer(data) => data.marshal(buf),
            Value::Tuple(tuple) => tuple.marshal(buf),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![];
        self.marshal(&mut buf);
        buf
    }

    /// Writes the value for inclusion into a one-step proof: tuples are replaced with their
    /// shallow clones, all other values are written in full.
    pub fn marshal_for_proof(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Tuple(tuple) => tuple.clone_shallow().marshal(buf),
            other => other.marshal(buf),
        }
    }

    /// Reads a single value from the front of `data`, advancing it.
    pub fn unmarshal(data: &mut &[u8]) -> Result<Value, DecodeError> {
        match Slot::unmarshal(data)? {
            Slot::Materialized(value) => Ok(value),
            Slot::HashOnly(_) => Err(DecodeError::UnexpectedHashOnly),
        }
    }

    /// Decodes a value which must span the whole of `data`.
    pub fn from_bytes(mut data: &[u8]) -> Result<Value, DecodeError> {
        let value = Value::unmarshal(&mut data)?;
        if !data.is_empty() {
            return Err(DecodeError::TrailingData(data.len()));
        }
        Ok(value)
    }

    /// Decodes a concatenation of marshalled values.
    pub fn unmarshal_all(mut data: &[u8]) -> Result<Vec<Value>, DecodeError> {
        let mut values = vec![];
        while !data.is_empty() {
            values.push(Value::unmarshal(&mut data)?);
        }
        Ok(values)
    }
}

/// Position in a tuple or a stack, holding either a value or just its hash.
///
/// Both forms of the same value hash identically; the hash-only form stands for substructure
/// which is not needed to compute over.
#[derive(Clone, Debug, From)]
pub enum Slot {
    #[from]
    Materialized(Value),
    HashOnly(ValueHash),
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool { self.hash() == other.hash() }
}

impl Eq for Slot {}

impl Display for Slot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Materialized(value) => Display::fmt(value, f),
            Slot::HashOnly(hash) => write!(f, "HashOnly({hash})"),
        }
    }
}

impl From<u256> for Slot {
    fn from(int: u256) -> Self { Slot::Materialized(Value::Int(int)) }
}

impl From<Tuple> for Slot {
    fn from(tuple: Tuple) -> Self { Slot::Materialized(Value::Tuple(tuple)) }
}

impl Slot {
    pub fn hash(&self) -> ValueHash {
        match self {
            Slot::Materialized(value) => value.hash(),
            Slot::HashOnly(hash) => *hash,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Slot::Materialized(value) => Some(value),
            Slot::HashOnly(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Slot::Materialized(value) => Some(value),
            Slot::HashOnly(_) => None,
        }
    }

    pub fn is_hash_only(&self) -> bool { matches!(self, Slot::HashOnly(_)) }

    /// Hash-only form of the slot.
    pub fn to_shallow(&self) -> Slot { Slot::HashOnly(self.hash()) }

    /// Materializes the slot, looking up hash-only placeholders in the pool. Nested hash-only
    /// slots are resolved recursively.
    pub fn resolve(&self, pool: &ValuePool) -> Result<Value, ResolveError> {
        match self.lookup(pool)? {
            Value::Tuple(tuple) => tuple.resolve(pool).map(Value::Tuple),
            other => Ok(other),
        }
    }

    /// Materializes the slot itself, leaving nested hash-only slots in place.
    pub(crate) fn lookup(&self, pool: &ValuePool) -> Result<Value, ResolveError> {
        match self {
            Slot::Materialized(value) => Ok(value.clone()),
            Slot::HashOnly(hash) => pool.get(hash).ok_or(ResolveError::Missing(*hash)),
        }
    }

    pub fn marshal(&self, buf: &mut Vec<u8>) {
        match self {
            Slot::Materialized(value) => value.marshal(buf),
            Slot::HashOnly(hash) => {
                buf.push(HASH_ONLY);
                buf.extend_from_slice(&hash.to_byte_array());
            }
        }
    }

    pub fn unmarshal(data: &mut &[u8]) -> Result<Slot, DecodeError> { decode_slot(data, 0) }
}

pub(crate) fn decode_slot(data: &mut &[u8], depth: usize) -> Result<Slot, DecodeError> {
    if depth > MAX_DECODE_DEPTH {
        return Err(DecodeError::TooDeep);
    }
    let tag = read_u8(data)?;
    Ok(match tag {
        INT => Slot::Materialized(Value::Int(u256::from_be_bytes(read_array(data)?))),
        CODEPOINT => Slot::Materialized(Value::CodePoint(CodePoint::decode(data, depth)?)),
        HASH_ONLY => Slot::HashOnly(ValueHash::from_byte_array(read_array(data)?)),
        TUPLE_BASE..=TUPLE_MAX => {
            let arity = (tag - TUPLE_BASE) as usize;
            let mut slots = Vec::with_capacity(arity);
            for _ in 0..arity {
                slots.push(decode_slot(data, depth + 1)?);
            }
            Slot::Materialized(Value::Tuple(Tuple::from_slots_unchecked(slots)))
        }
        BUFFER => {
            let len = read_u64(data)?;
            if len > BUFFER_MAX_LEN as u64 {
                return Err(DecodeError::BufferTooLarge(len));
            }
            let bytes = read_bytes(data, len as usize)?;
            Slot::Materialized(Value::Buffer(Buffer(Arc::from(bytes))))
        }
        unknown => return Err(DecodeError::UnknownTag(unknown)),
    })
}

pub(crate) fn read_u8(data: &mut &[u8]) -> Result<u8, DecodeError> {
    let (first, rest) = data.split_first().ok_or(DecodeError::UnexpectedEof)?;
    *data = rest;
    Ok(*first)
}

pub(crate) fn read_bytes<'a>(data: &mut &'a [u8], len: usize) -> Result<&'a [u8], DecodeError> {
    if data.len() < len {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, rest) = data.split_at(len);
    *data = rest;
    Ok(head)
}

pub(crate) fn read_array<const LEN: usize>(data: &mut &[u8]) -> Result<[u8; LEN], DecodeError> {
    let mut buf = [0u8; LEN];
    buf.copy_from_slice(read_bytes(data, LEN)?);
    Ok(buf)
}

pub(crate) fn read_u64(data: &mut &[u8]) -> Result<u64, DecodeError> {
    read_array::<8>(data).map(u64::from_be_bytes)
}

/// Immutable byte blob.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Buffer(Arc<[u8]>);

impl TryFrom<Vec<u8>> for Buffer {
    type Error = BufferError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        if bytes.len() > BUFFER_MAX_LEN {
            return Err(BufferError::Oversized(bytes.len()));
        }
        Ok(Buffer(Arc::from(bytes)))
    }
}

impl Display for Buffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({} bytes)", self.0.len())
    }
}

impl Buffer {
    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn as_slice(&self) -> &[u8] { &self.0 }

    /// Reads a byte; positions past the end read as zero.
    pub fn get8(&self, offset: usize) -> Result<u8, BufferError> {
        if offset >= BUFFER_MAX_LEN {
            return Err(BufferError::OutOfRange(offset));
        }
        Ok(self.0.get(offset).copied().unwrap_or_default())
    }

    /// Returns a copy of the buffer with the byte at `offset` replaced, zero-extending the buffer
    /// when needed.
    pub fn set8(&self, offset: usize, byte: u8) -> Result<Buffer, BufferError> {
        if offset >= BUFFER_MAX_LEN {
            return Err(BufferError::OutOfRange(offset));
        }
        let mut bytes = self.0.to_vec();
        if bytes.len() <= offset {
            bytes.resize(offset + 1, 0);
        }
        bytes[offset] = byte;
        Ok(Buffer(Arc::from(bytes)))
    }

    pub fn hash(&self) -> ValueHash {
        let mut hasher = Hasher::new();
        hasher.update([BUFFER]).update(&self.0);
        hasher.finish()
    }

    pub fn marshal(&self, buf: &mut Vec<u8>) {
        buf.push(BUFFER);
        buf.extend_from_slice(&(self.0.len() as u64).to_be_bytes());
        buf.extend_from_slice(&self.0);
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum BufferError {
    /// buffer of {0} bytes exceeds the maximal buffer length.
    Oversized(usize),

    /// buffer offset {0} is out of range.
    OutOfRange(usize),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum DecodeError {
    /// unexpected end of data.
    UnexpectedEof,

    /// unknown value type tag {0:#04x}.
    UnknownTag(u8),

    /// hash-only placeholder found where a materialized value is required.
    UnexpectedHashOnly,

    /// unknown opcode {0:#04x}.
    InvalidOpcode(u8),

    /// invalid immediate flag {0}; must be 0 or 1.
    InvalidImmediateFlag(u8),

    /// buffer length {0} exceeds the maximal buffer length.
    BufferTooLarge(u64),

    /// value nesting exceeds the decoder limit.
    TooDeep,

    /// {0} bytes of data remain after the decoded value.
    TrailingData(usize),

    /// code point {0} is not part of the program code.
    ForeignCodePoint(ValueHash),
}

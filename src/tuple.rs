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

use core::fmt::{self, Debug, Display, Formatter};
use core::mem;
use std::sync::Arc;

use crate::hash::keccak;
use crate::value::TUPLE_BASE;
use crate::{ResolveError, Slot, Value, ValueHash, ValuePool};

/// Maximal number of elements in a tuple.
pub const MAX_ARITY: usize = 8;

const HASH_PREIMAGE_LEN: usize = 1 + MAX_ARITY * 32;

/// Fixed-arity ordered aggregate of up to [`MAX_ARITY`] slots; a Merkle node of the value graph.
///
/// Tuples are immutable and share their elements on clone. The hash is computed once, at
/// construction, from the hashes of the elements, so it never depends on whether an element is
/// materialized or hash-only.
#[derive(Clone)]
pub struct Tuple(Arc<TupleInner>);

struct TupleInner {
    slots: Vec<Slot>,
    hash: ValueHash,
}

// Nested tuples form chains as long as the inbox or a stack, so they are released with a work
// list instead of the recursive drop glue.
impl Drop for TupleInner {
    fn drop(&mut self) {
        let mut todo = mem::take(&mut self.slots);
        while let Some(slot) = todo.pop() {
            if let Slot::Materialized(Value::Tuple(Tuple(inner))) = slot {
                if let Ok(mut inner) = Arc::try_unwrap(inner) {
                    todo.append(&mut inner.slots);
                }
            }
        }
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool { self.hash() == other.hash() }
}

impl Eq for Tuple {}

impl Debug for Tuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tuple").field(&self.0.slots).finish()
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("Tuple(")?;
        for (no, slot) in self.0.slots.iter().enumerate() {
            if no > 0 {
                f.write_str(", ")?;
            }
            Display::fmt(slot, f)?;
        }
        f.write_str(")")
    }
}

impl Default for Tuple {
    fn default() -> Self { Tuple::empty() }
}

impl Tuple {
    /// Tuple of arity zero.
    pub fn empty() -> Self { Self::from_slots_unchecked(vec![]) }

    /// Constructs a tuple, rejecting arities above [`MAX_ARITY`].
    pub fn new(slots: Vec<Slot>) -> Result<Self, TupleError> {
        if slots.len() > MAX_ARITY {
            return Err(TupleError::Oversized(slots.len()));
        }
        Ok(Self::from_slots_unchecked(slots))
    }

    /// Constructs a tuple of materialized values.
    pub fn with_values(values: impl IntoIterator<Item = Value>) -> Result<Self, TupleError> {
        Self::new(values.into_iter().map(Slot::from).collect())
    }

    /// Callers must guarantee `slots.len() <= MAX_ARITY`.
    pub(crate) fn from_slots_unchecked(slots: Vec<Slot>) -> Self {
        debug_assert!(slots.len() <= MAX_ARITY);
        let hashes = slots.iter().map(Slot::hash).collect::<Vec<_>>();
        let hash = hash_elements(&hashes);
        Tuple(Arc::new(TupleInner { slots, hash }))
    }

    pub fn arity(&self) -> usize { self.0.slots.len() }

    pub fn is_empty(&self) -> bool { self.0.slots.is_empty() }

    pub fn hash(&self) -> ValueHash { self.0.hash }

    pub fn slots(&self) -> &[Slot] { &self.0.slots }

    pub fn get(&self, index: usize) -> Result<&Slot, TupleError> {
        self.0
            .slots
            .get(index)
            .ok_or(TupleError::IndexOutOfRange { index, arity: self.arity() })
    }

    /// Returns a new tuple with the element at `index` replaced.
    pub fn set(&self, index: usize, slot: impl Into<Slot>) -> Result<Tuple, TupleError> {
        if index >= self.arity() {
            return Err(TupleError::IndexOutOfRange { index, arity: self.arity() });
        }
        let mut slots = self.0.slots.clone();
        slots[index] = slot.into();
        Ok(Self::from_slots_unchecked(slots))
    }

    /// Checks whether all elements are materialized (not recursively).
    pub fn is_materialized(&self) -> bool { self.0.slots.iter().all(|slot| !slot.is_hash_only()) }

    /// Tuple of the same arity with every element replaced by its hash-only placeholder.
    ///
    /// The result hashes identically to `self` and takes O(arity) regardless of subtree sizes.
    pub fn clone_shallow(&self) -> Tuple {
        let slots = self.0.slots.iter().map(Slot::to_shallow).collect();
        Tuple(Arc::new(TupleInner { slots, hash: self.0.hash }))
    }

    /// Same as [`Tuple::clone_shallow`], additionally interning every materialized element into
    /// the pool, such that the clone can later be expanded back with [`Tuple::resolve`].
    pub fn clone_shallow_into(&self, pool: &ValuePool) -> Tuple {
        for slot in &self.0.slots {
            if let Slot::Materialized(value) = slot {
                pool.intern_deep(value);
            }
        }
        self.clone_shallow()
    }

    /// Materializes every hash-only element, recursively, using values from the pool.
    pub fn resolve(&self, pool: &ValuePool) -> Result<Tuple, ResolveError> {
        // each frame is a tuple being rebuilt together with its elements resolved so far
        let mut frames = vec![(self.clone(), Vec::with_capacity(self.arity()))];
        let mut resolved = Tuple::empty();
        while let Some((tuple, done)) = frames.last_mut() {
            if let Some(slot) = tuple.slots().get(done.len()) {
                match slot.lookup(pool)? {
                    Value::Tuple(child) => {
                        let arity = child.arity();
                        frames.push((child, Vec::with_capacity(arity)));
                    }
                    other => done.push(Slot::Materialized(other)),
                }
                continue;
            }
            let tuple = Tuple(Arc::new(TupleInner { slots: mem::take(done), hash: tuple.hash() }));
            frames.pop();
            match frames.last_mut() {
                Some((_, parent)) => parent.push(Slot::from(tuple)),
                None => resolved = tuple,
            }
        }
        Ok(resolved)
    }

    /// Writes the tuple tag followed by each element. Hash-only elements are written as
    /// placeholders.
    pub fn marshal(&self, buf: &mut Vec<u8>) {
        buf.push(TUPLE_BASE + self.arity() as u8);
        let mut todo = self.0.slots.iter().rev().collect::<Vec<_>>();
        while let Some(slot) = todo.pop() {
            match slot {
                Slot::Materialized(Value::Tuple(tuple)) => {
                    buf.push(TUPLE_BASE + tuple.arity() as u8);
                    todo.extend(tuple.0.slots.iter().rev());
                }
                other => other.marshal(buf),
            }
        }
    }

    /// Writes the fully materialized encoding, expanding hash-only elements through the pool.
    pub fn marshal_full(&self, pool: &ValuePool, buf: &mut Vec<u8>) -> Result<(), ResolveError> {
        self.resolve(pool)?.marshal(buf);
        Ok(())
    }
}

/// Hash of a tuple whose elements have the given hashes.
///
/// Lets callers compute tuple hashes (stack links, the machine root) without building the tuple.
pub(crate) fn hash_elements(hashes: &[ValueHash]) -> ValueHash {
    debug_assert!(hashes.len() <= MAX_ARITY);
    let mut data = [0u8; HASH_PREIMAGE_LEN];
    data[0] = TUPLE_BASE + hashes.len() as u8;
    for (no, hash) in hashes.iter().enumerate() {
        let offset = 1 + no * 32;
        data[offset..offset + 32].copy_from_slice(&hash.to_byte_array());
    }
    keccak(&data[..1 + 32 * hashes.len()])
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum TupleError {
    /// tuple can't have {0} elements; the maximum is 8.
    Oversized(usize),

    /// index {index} is out of range for a tuple of {arity} elements.
    IndexOutOfRange { index: usize, arity: usize },
}

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

use crate::tuple::hash_elements;
use crate::{Slot, Tuple, Value, ValueHash};

/// Machine stack.
///
/// As a value, a stack is a chain of 2-tuples `(top, rest)` terminated by the empty tuple. The
/// stack keeps its items in a vector together with the hash of every chain prefix, so pushing and
/// popping is O(1) and the chain is built only for marshalling.
///
/// A stack rebuilt from a one-step proof has a hash-only `base` standing for the items which were
/// not exposed.
#[derive(Clone, Debug)]
pub struct Stack {
    base: ValueHash,
    items: Vec<Slot>,
    hashes: Vec<ValueHash>,
}

impl Default for Stack {
    fn default() -> Self { Stack::new() }
}

impl PartialEq for Stack {
    fn eq(&self, other: &Self) -> bool { self.hash() == other.hash() }
}

impl Eq for Stack {}

impl Stack {
    pub fn new() -> Self { Stack { base: ValueHash::empty_tuple(), items: vec![], hashes: vec![] } }

    fn with_base(base: ValueHash) -> Self { Stack { base, items: vec![], hashes: vec![] } }

    pub fn hash(&self) -> ValueHash { self.hashes.last().copied().unwrap_or(self.base) }

    /// Number of items available without resolving the base.
    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() && self.is_complete() }

    /// Whether every item of the stack is available, i.e. the base is the empty stack.
    pub fn is_complete(&self) -> bool { self.base == ValueHash::empty_tuple() }

    pub fn push(&mut self, slot: impl Into<Slot>) {
        let slot = slot.into();
        let hash = hash_elements(&[slot.hash(), self.hash()]);
        self.items.push(slot);
        self.hashes.push(hash);
    }

    pub fn pop(&mut self) -> Option<Slot> {
        self.hashes.pop();
        self.items.pop()
    }

    /// Item at `depth` from the top, with `0` being the top itself.
    pub fn peek(&self, depth: usize) -> Option<&Slot> {
        let index = self.items.len().checked_sub(depth + 1)?;
        self.items.get(index)
    }

    /// Drops `count` top items; returns `false` and leaves the stack intact if there are fewer.
    pub fn drop_top(&mut self, count: usize) -> bool {
        if count > self.items.len() {
            return false;
        }
        let len = self.items.len() - count;
        self.items.truncate(len);
        self.hashes.truncate(len);
        true
    }

    /// Replaces the item at `depth` from the top.
    pub fn replace(&mut self, depth: usize, slot: Slot) -> bool {
        let Some(index) = self.items.len().checked_sub(depth + 1) else {
            return false;
        };
        let rest = self.items.split_off(index);
        self.hashes.truncate(index);
        self.push(slot);
        for item in rest.into_iter().skip(1) {
            self.push(item);
        }
        true
    }

    /// Stack as a fully materialized chain of 2-tuples.
    pub fn to_slot(&self) -> Slot { self.chain(self.items.len(), Slot::clone) }

    /// Stack as it appears in a one-step proof: the top `exposed` items in proof form over a
    /// hash-only rest.
    pub fn to_proof_slot(&self, exposed: usize) -> Slot {
        self.chain(exposed.min(self.items.len()), |slot| match slot {
            Slot::Materialized(Value::Tuple(tuple)) => Slot::from(tuple.clone_shallow()),
            other => other.clone(),
        })
    }

    fn chain(&self, exposed: usize, form: impl Fn(&Slot) -> Slot) -> Slot {
        let hidden = self.items.len() - exposed;
        let mut rest = match hidden.checked_sub(1) {
            Some(index) => Slot::HashOnly(self.hashes[index]),
            None if self.base == ValueHash::empty_tuple() => Slot::from(Tuple::empty()),
            None => Slot::HashOnly(self.base),
        };
        for item in &self.items[hidden..] {
            rest = Slot::from(Tuple::from_slots_unchecked(vec![form(item), rest]));
        }
        rest
    }

    /// Parses a stack chain. Returns `None` if the slot is not a well-formed chain.
    pub fn from_slot(slot: &Slot) -> Option<Stack> {
        let mut items = vec![];
        let mut cursor = slot;
        let base = loop {
            match cursor {
                Slot::HashOnly(hash) => break *hash,
                Slot::Materialized(Value::Tuple(tuple)) if tuple.is_empty() => break tuple.hash(),
                Slot::Materialized(Value::Tuple(tuple)) if tuple.arity() == 2 => {
                    items.push(tuple.slots()[0].clone());
                    cursor = &tuple.slots()[1];
                }
                Slot::Materialized(_) => return None,
            }
        };
        let mut stack = Stack::with_base(base);
        for item in items.into_iter().rev() {
            stack.push(item);
        }
        Some(stack)
    }
}

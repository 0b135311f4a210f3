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

use amplify::num::u256;

use crate::{Slot, Tuple, Value, ValueHash};

/// Machine inbox.
///
/// Committed messages form an append-only chain of 3-tuples `(0, previous, message)` starting
/// from the empty tuple; only the committed chain contributes to the machine hash. Queued
/// messages wait outside of the machine state until they are delivered.
#[derive(Clone, Debug)]
pub struct Inbox {
    committed: Slot,
    pending: Vec<Value>,
}

impl Default for Inbox {
    fn default() -> Self { Inbox::new() }
}

impl Inbox {
    pub fn new() -> Self { Inbox { committed: Slot::from(Tuple::empty()), pending: vec![] } }

    pub(crate) fn with_committed(committed: Slot) -> Self { Inbox { committed, pending: vec![] } }

    pub fn hash(&self) -> ValueHash { self.committed.hash() }

    /// Committed inbox value.
    pub fn committed(&self) -> &Slot { &self.committed }

    pub fn is_empty(&self) -> bool { self.hash() == ValueHash::empty_tuple() }

    pub fn has_pending(&self) -> bool { !self.pending.is_empty() }

    pub fn pending_count(&self) -> usize { self.pending.len() }

    /// Appends a message to the committed chain.
    pub fn append(&mut self, message: Value) {
        let prev = core::mem::replace(&mut self.committed, Slot::HashOnly(ValueHash::zero()));
        self.committed = Slot::from(Tuple::from_slots_unchecked(vec![
            Slot::from(u256::from(0u64)),
            prev,
            Slot::from(message),
        ]));
    }

    /// Queues a message without changing the committed chain.
    pub fn enqueue(&mut self, message: Value) { self.pending.push(message); }

    /// Commits all queued messages in arrival order, returning their number.
    pub fn deliver(&mut self) -> usize {
        let pending = core::mem::take(&mut self.pending);
        let count = pending.len();
        for message in pending {
            self.append(message);
        }
        count
    }
}

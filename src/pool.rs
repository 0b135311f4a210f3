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

use std::collections::HashMap;
use std::sync::RwLock;

use crate::{Slot, Value, ValueHash};

/// Content-addressed store of values keyed by their hash.
///
/// The pool is append-only: an entry, once inserted, is never replaced, and inserting a value
/// with a known hash is a no-op. Readers and writers may share the pool across threads.
#[derive(Debug, Default)]
pub struct ValuePool {
    entries: RwLock<HashMap<ValueHash, Value>>,
}

impl ValuePool {
    pub fn new() -> Self { Self::default() }

    /// Inserts the value unless an entry with the same hash exists, returning the pooled value.
    ///
    /// The returned value shares its substructure with the first value inserted under the hash.
    pub fn intern(&self, value: Value) -> Value {
        let hash = value.hash();
        if let Some(existing) = self.get(&hash) {
            return existing;
        }
        // A poisoned lock still guards a consistent map since entries are never mutated.
        let mut entries = self.entries.write().unwrap_or_else(|err| err.into_inner());
        entries.entry(hash).or_insert(value).clone()
    }

    /// Interns the value together with every materialized value reachable from it.
    pub fn intern_deep(&self, value: &Value) {
        let mut todo = vec![value];
        while let Some(value) = todo.pop() {
            if let Value::Tuple(tuple) = value {
                todo.extend(tuple.slots().iter().filter_map(Slot::value));
            }
            self.intern(value.clone());
        }
    }

    pub fn get(&self, hash: &ValueHash) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(|err| err.into_inner());
        entries.get(hash).cloned()
    }

    pub fn contains(&self, hash: &ValueHash) -> bool {
        let entries = self.entries.read().unwrap_or_else(|err| err.into_inner());
        entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|err| err.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ResolveError {
    /// value with hash {0} is not present in the pool.
    Missing(ValueHash),
}

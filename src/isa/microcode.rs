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

use super::{AvmCore, CodePoint, Fault};
use crate::value::{BUFFER, CODEPOINT, INT, TUPLE_BASE};
use crate::{Buffer, Slot, Tuple, Value};

impl AvmCore {
    /// Fails unless the data stack holds at least `count` items.
    pub fn require(&self, count: usize) -> Result<(), Fault> {
        if self.stack.len() < count {
            return Err(Fault::StackUnderflow(count));
        }
        Ok(())
    }

    /// Data stack item at `depth` from the top, in any form.
    pub fn slot_at(&self, depth: usize) -> Result<&Slot, Fault> {
        self.stack.peek(depth).ok_or(Fault::StackUnderflow(depth + 1))
    }

    /// Materialized data stack item at `depth` from the top.
    pub fn value_at(&self, depth: usize) -> Result<&Value, Fault> {
        self.slot_at(depth)?.value().ok_or(Fault::Unresolved(depth))
    }

    pub fn int_at(&self, depth: usize) -> Result<u256, Fault> {
        match self.value_at(depth)? {
            Value::Int(int) => Ok(*int),
            other => Err(Fault::type_mismatch(depth, INT, other)),
        }
    }

    /// Integer at `depth` used as an index or an offset.
    pub fn index_at(&self, depth: usize) -> Result<usize, Fault> {
        let int = self.int_at(depth)?;
        let bytes = int.to_be_bytes();
        let (high, low) = bytes.split_at(24);
        if high.iter().any(|byte| *byte != 0) {
            return Err(Fault::IndexOverflow);
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(low);
        usize::try_from(u64::from_be_bytes(buf)).map_err(|_| Fault::IndexOverflow)
    }

    pub fn code_point_at(&self, depth: usize) -> Result<&CodePoint, Fault> {
        match self.value_at(depth)? {
            Value::CodePoint(point) => Ok(point),
            other => Err(Fault::type_mismatch(depth, CODEPOINT, other)),
        }
    }

    pub fn tuple_at(&self, depth: usize) -> Result<&Tuple, Fault> {
        match self.value_at(depth)? {
            Value::Tuple(tuple) => Ok(tuple),
            other => Err(Fault::type_mismatch(depth, TUPLE_BASE, other)),
        }
    }

    pub fn buffer_at(&self, depth: usize) -> Result<&Buffer, Fault> {
        match self.value_at(depth)? {
            Value::Buffer(buf) => Ok(buf),
            other => Err(Fault::type_mismatch(depth, BUFFER, other)),
        }
    }

    /// Removes `count` operands which were validated before.
    pub fn consume(&mut self, count: usize) {
        let dropped = self.stack.drop_top(count);
        debug_assert!(dropped, "operands must be validated before being consumed");
    }

    pub fn push(&mut self, slot: impl Into<Slot>) { self.stack.push(slot) }

    pub fn push_int(&mut self, int: u256) { self.stack.push(Slot::from(int)) }

    pub fn push_bool(&mut self, flag: bool) { self.push_int(u256::from(flag as u64)) }

    /// Replaces `count` operands with a single result.
    pub fn reduce(&mut self, count: usize, result: impl Into<Slot>) {
        self.consume(count);
        self.push(result);
    }
}

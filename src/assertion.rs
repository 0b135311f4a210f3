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

use crate::{BlockReason, Opcode, Value};

/// Result of a bounded execution run.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "camelCase"))]
pub struct Assertion {
    /// Messages sent by the program, in order.
    pub out_messages: Vec<Value>,
    /// Values logged by the program, in order.
    pub logs: Vec<Value>,
    /// Number of executed steps, faulting steps included.
    pub num_steps: u64,
    /// Set if the run stopped because the program waits for input.
    pub blocked: Option<BlockReason>,
    /// Per-step records, collected only when tracing is enabled.
    pub trace: Vec<TraceStep>,
}

impl Assertion {
    /// Concatenated encodings of the outgoing messages.
    pub fn marshal_out_messages(&self) -> Vec<u8> { marshal_all(&self.out_messages) }

    /// Concatenated encodings of the logged values.
    pub fn marshal_logs(&self) -> Vec<u8> { marshal_all(&self.logs) }

    pub fn is_blocked(&self) -> bool { self.blocked.is_some() }
}

fn marshal_all(values: &[Value]) -> Vec<u8> {
    let mut buf = vec![];
    for value in values {
        value.marshal(&mut buf);
    }
    buf
}

/// Record of a single step, as collected with [`crate::MachineConfig::trace`].
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "camelCase"))]
pub struct TraceStep {
    pub step: u64,
    /// Position of the executed code point; absent if the code point was not materialized.
    pub pc: Option<u64>,
    pub opcode: Option<Opcode>,
    pub stack_depth: usize,
    pub faulted: bool,
}

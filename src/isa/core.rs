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

use core::fmt::{self, Debug, Formatter};

use amplify::num::u256;

use super::{CodePoint, Operation};
use crate::tuple::hash_elements;
use crate::{Inbox, Slot, Stack, Tuple, Value, ValueHash};

/// Arity of the machine root tuple.
pub const ROOT_ARITY: usize = 8;

/// Execution status, stored as the first element of the machine root tuple.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Default)]
#[display(lowercase)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "camelCase"))]
#[repr(u8)]
pub enum MachineStatus {
    /// Machine may execute further steps.
    #[default]
    Extensive = 0,
    /// Program executed `halt`.
    Halted = 1,
    /// Program faulted with no error handler installed.
    Errored = 2,
}

impl MachineStatus {
    pub fn to_int(self) -> u256 { u256::from(self as u64) }

    pub fn from_int(int: u256) -> Option<Self> {
        match int {
            int if int == u256::from(0u64) => Some(MachineStatus::Extensive),
            int if int == u256::from(1u64) => Some(MachineStatus::Halted),
            int if int == u256::from(2u64) => Some(MachineStatus::Errored),
            _ => None,
        }
    }

    pub fn is_running(self) -> bool { self == MachineStatus::Extensive }
}

/// Complete mutable state of the machine, apart from the code segment.
///
/// The state hash is the hash of the 8-element root tuple; it is recomputed on demand from the
/// cached hashes of the parts.
#[derive(Clone)]
pub struct AvmCore {
    pub(crate) status: MachineStatus,
    /// Current code point; hash-only when the program ran past the code available to the machine.
    pub(crate) pc: Slot,
    pub(crate) stack: Stack,
    pub(crate) aux_stack: Stack,
    pub(crate) register: Slot,
    pub(crate) static_val: Slot,
    pub(crate) err_handler: Slot,
    pub(crate) inbox: Inbox,
}

impl Debug for AvmCore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (sect, reg, val, reset) = if f.alternate() {
            ("\x1B[0;4;1m", "\x1B[0;1m", "\x1B[0;32m", "\x1B[0m")
        } else {
            ("", "", "", "")
        };

        writeln!(f)?;
        writeln!(f, "{sect}AVM core:{reset}")?;
        write!(f, "{reg}status{reset} {val}{}{reset}  ", self.status)?;
        writeln!(f, "{reg}pc{reset} {val}{}{reset}", self.pc)?;
        write!(f, "{reg}stack{reset} {val}{}{reset} items  ", self.stack.len())?;
        writeln!(f, "{reg}aux{reset} {val}{}{reset} items", self.aux_stack.len())?;
        writeln!(f, "{reg}register{reset} {val}{}{reset}", self.register)?;
        writeln!(f, "{reg}err handler{reset} {val}{}{reset}", self.err_handler.hash())?;
        writeln!(f, "{reg}inbox{reset} {val}{}{reset}", self.inbox.hash())?;
        writeln!(f, "{reg}hash{reset} {val}{}{reset}", self.hash())
    }
}

impl AvmCore {
    pub fn new(entry: Slot, static_val: Value) -> Self {
        AvmCore {
            status: MachineStatus::Extensive,
            pc: entry,
            stack: Stack::new(),
            aux_stack: Stack::new(),
            register: Slot::from(Tuple::empty()),
            static_val: Slot::from(static_val),
            err_handler: Slot::from(Value::CodePoint(CodePoint::error())),
            inbox: Inbox::new(),
        }
    }

    pub fn status(&self) -> MachineStatus { self.status }

    /// Code point to be executed next, if it is materialized.
    pub fn code_point(&self) -> Option<&CodePoint> {
        self.pc.value().and_then(Value::as_code_point)
    }

    /// Operation to be executed next, if known.
    pub fn next_operation(&self) -> Option<&Operation> { self.code_point().map(|point| &point.op) }

    pub fn inbox(&self) -> &Inbox { &self.inbox }

    pub fn inbox_mut(&mut self) -> &mut Inbox { &mut self.inbox }

    pub fn stack(&self) -> &Stack { &self.stack }

    pub fn aux_stack(&self) -> &Stack { &self.aux_stack }

    pub fn register(&self) -> &Slot { &self.register }

    pub fn hash(&self) -> ValueHash {
        hash_elements(&[
            Value::Int(self.status.to_int()).hash(),
            self.pc.hash(),
            self.stack.hash(),
            self.aux_stack.hash(),
            self.register.hash(),
            self.static_val.hash(),
            self.err_handler.hash(),
            self.inbox.hash(),
        ])
    }

    /// Root tuple with every part materialized as far as the core knows it.
    pub fn root(&self) -> Tuple {
        Tuple::from_slots_unchecked(vec![
            Slot::from(self.status.to_int()),
            self.pc.clone(),
            self.stack.to_slot(),
            self.aux_stack.to_slot(),
            self.register.clone(),
            self.static_val.clone(),
            self.err_handler.clone(),
            self.inbox.committed().clone(),
        ])
    }

    /// Root tuple carrying only what is needed to replay the next step.
    pub fn proof_root(&self) -> Tuple {
        let (data_reads, aux_reads) = match self.next_operation() {
            Some(op) if self.status.is_running() => (op.stack_reads(), op.opcode.aux_reads()),
            _ => (0, 0),
        };
        Tuple::from_slots_unchecked(vec![
            Slot::from(self.status.to_int()),
            self.pc.clone(),
            self.stack.to_proof_slot(data_reads),
            self.aux_stack.to_proof_slot(aux_reads),
            self.register.to_shallow(),
            self.static_val.to_shallow(),
            self.err_handler.to_shallow(),
            self.inbox.committed().to_shallow(),
        ])
    }

    /// Reconstructs the core from a root tuple. Returns `None` if the tuple is not a well-formed
    /// machine state.
    pub fn from_root(root: &Tuple) -> Option<Self> {
        if root.arity() != ROOT_ARITY {
            return None;
        }
        let slots = root.slots();
        let status = slots[0].value()?.as_int().and_then(MachineStatus::from_int)?;
        Some(AvmCore {
            status,
            pc: slots[1].clone(),
            stack: Stack::from_slot(&slots[2])?,
            aux_stack: Stack::from_slot(&slots[3])?,
            register: slots[4].clone(),
            static_val: slots[5].clone(),
            err_handler: slots[6].clone(),
            inbox: Inbox::with_committed(slots[7].clone()),
        })
    }
}

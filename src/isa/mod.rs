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

//! Instruction set of the machine: operations, the code segment and the single-step executor.

mod bytecode;
mod core;
mod exec;
mod instr;
mod masm;
mod microcode;

pub use self::bytecode::{Code, CodePoint};
pub use self::core::{AvmCore, MachineStatus, ROOT_ARITY};
pub use self::exec::{BlockReason, Fault, StepContext, StepResult};
pub use self::instr::{Opcode, Operation};

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

//! **AVM Core** is the execution core of a stack virtual machine whose entire state is
//! content-addressed. Every value, every code point and the machine itself reduce to a 32-byte
//! Keccak-256 hash, so that two parties agreeing on a machine hash agree on the whole state.
//!
//! The machine state is a tuple tree: data and auxiliary stacks are chains of pairs, the code is
//! a chain of code points each committing to the hash of its successor, and incoming messages are
//! accumulated into an inbox chain. Any part of the tree may be replaced with a hash-only
//! placeholder without changing the hash, which is what makes one-step proofs possible: the
//! machine can marshal just the part of its state the next instruction touches, and a verifier
//! replays that single step over the partial state to obtain the same resulting hash.
//!
//! Execution runs in bounded assertions ([`Machine::execute_assertion`]), which collect outgoing
//! messages and logs and stop when the program halts, errors, blocks on an empty inbox or runs
//! out of its step budget.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[macro_use]
extern crate amplify;

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde;

#[macro_use]
mod deser;
mod hash;
mod value;
mod tuple;
mod pool;
pub mod isa;
mod stack;
mod inbox;
mod program;
mod config;
mod machine;
mod assertion;
mod proof;

pub use assertion::{Assertion, TraceStep};
pub use config::MachineConfig;
pub use hash::{keccak, Hasher, ValueHash};
pub use inbox::Inbox;
pub use isa::{
    AvmCore, BlockReason, Code, CodePoint, Fault, MachineStatus, Opcode, Operation, StepContext,
    StepResult, ROOT_ARITY,
};
pub use machine::{Lifecycle, Machine};
pub use pool::{ResolveError, ValuePool};
pub use program::{LoadError, Program};
pub use proof::{OneStepProof, ProofError, StepReplay};
pub use stack::Stack;
pub use tuple::{Tuple, TupleError, MAX_ARITY};
pub use value::{Buffer, BufferError, DecodeError, Slot, Value};

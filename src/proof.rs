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

use tracing::debug;

use crate::{
    Assertion, AvmCore, Code, DecodeError, Machine, MachineConfig, MachineStatus, Slot, Stack,
    Value, ValueHash,
};

impl Machine {
    /// Marshals the part of the state needed to replay the next step.
    ///
    /// The result is the root tuple with the status and the current code point materialized, the
    /// stack items inspected by the next operation exposed in proof form over hash-only rests, and
    /// everything else hash-only. It hashes to [`Machine::hash`].
    pub fn marshal_for_proof(&self) -> Vec<u8> {
        let mut buf = vec![];
        self.core().proof_root().marshal(&mut buf);
        buf
    }
}

/// Partial machine state decoded from the output of [`Machine::marshal_for_proof`].
#[derive(Clone, Debug)]
pub struct OneStepProof {
    core: AvmCore,
}

impl OneStepProof {
    /// Decodes the proof, rejecting partial states which hide anything the next step inspects.
    ///
    /// For a running machine the proof must materialize the current code point (a hash-only pc
    /// is accepted only with the zero hash marking the end of the code), and expose as many
    /// materialized items of each stack as the operation reads, unless the stack holds fewer
    /// items in total.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProofError> {
        let root = match Value::from_bytes(data)? {
            Value::Tuple(root) => root,
            _ => return Err(ProofError::NotATuple),
        };
        let core = AvmCore::from_root(&root).ok_or(ProofError::MalformedState)?;
        if core.status().is_running() {
            match &core.pc {
                Slot::Materialized(Value::CodePoint(point)) => {
                    let op = &point.op;
                    if !exposes(&core.stack, op.stack_reads())
                        || !exposes(&core.aux_stack, op.opcode.aux_reads())
                    {
                        return Err(ProofError::Insufficient);
                    }
                }
                Slot::HashOnly(hash) if hash.is_zero() => {}
                Slot::HashOnly(_) => return Err(ProofError::Insufficient),
                Slot::Materialized(_) => return Err(ProofError::MalformedState),
            }
        }
        Ok(OneStepProof { core })
    }

    /// Hash of the machine state the proof was made for.
    pub fn hash(&self) -> ValueHash { self.core.hash() }

    pub fn status(&self) -> MachineStatus { self.core.status() }

    /// Executes exactly one step over the partial state.
    pub fn replay(&self, timebound_start: u64, timebound_end: u64) -> StepReplay {
        let code = match &self.core.pc {
            Slot::Materialized(Value::CodePoint(point)) => Code::with_point(point.clone()),
            _ => Code::default(),
        };
        let before = self.core.hash();
        let mut machine = Machine::with_core(self.core.clone(), code, MachineConfig::default());
        let assertion = machine.execute_assertion(1, timebound_start, timebound_end);
        let after = machine.hash();
        debug!("replayed {} step(s) from {before} to {after}", assertion.num_steps);
        StepReplay { before, after, status: machine.status(), assertion }
    }

    /// Decodes the proof and replays the step it was made for.
    pub fn verify(
        data: &[u8],
        timebound_start: u64,
        timebound_end: u64,
    ) -> Result<StepReplay, ProofError> {
        Self::from_bytes(data).map(|proof| proof.replay(timebound_start, timebound_end))
    }
}

fn exposes(stack: &Stack, reads: usize) -> bool {
    (stack.len() >= reads || stack.is_complete())
        && (0..reads.min(stack.len()))
            .all(|depth| stack.peek(depth).is_some_and(|slot| !slot.is_hash_only()))
}

/// Outcome of replaying a single step from a proof.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct StepReplay {
    pub before: ValueHash,
    pub after: ValueHash,
    pub status: MachineStatus,
    /// Output of the step; `num_steps` is zero if the machine was stopped or blocked.
    pub assertion: Assertion,
}

#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ProofError {
    /// invalid proof encoding: {0}
    #[from]
    Decode(DecodeError),

    /// proof does not encode a tuple.
    NotATuple,

    /// proof does not encode a well-formed machine state.
    MalformedState,

    /// proof hides part of the state inspected by the next step.
    Insufficient,
}

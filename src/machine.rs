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

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    Assertion, AvmCore, BlockReason, Code, DecodeError, LoadError, MachineConfig, MachineStatus,
    Program, StepContext, StepResult, TraceStep, Tuple, Value, ValueHash, ValuePool,
};

/// Phase of the machine life, as observed by the host.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
#[display(lowercase)]
pub enum Lifecycle {
    /// No step was executed and no message was delivered yet.
    Loaded,
    /// The machine can execute further steps.
    Runnable,
    /// The last assertion stopped waiting for new inbox messages.
    Blocked,
    Halted,
    Errored,
}

/// Virtual machine: the code segment shared between clones plus the exclusively owned state.
///
/// Cloning is cheap: values are reference-counted and the stacks are copied as vectors of
/// pointers. A clone evolves independently of its origin.
#[derive(Clone, Debug)]
pub struct Machine {
    core: AvmCore,
    code: Code,
    config: MachineConfig,
    pool: Option<Arc<ValuePool>>,
    total_steps: u64,
    blocked: Option<BlockReason>,
}

impl Machine {
    pub fn new(program: Program, config: MachineConfig) -> Self {
        let code = program.code().clone();
        let core = AvmCore::new(code.entry(), program.static_value().clone());
        Machine { core, code, config, pool: None, total_steps: 0, blocked: None }
    }

    /// Loads a program file and creates a machine at its entry point.
    pub fn load(path: impl AsRef<Path>, config: MachineConfig) -> Result<Self, LoadError> {
        Program::load(path).map(|program| Self::new(program, config))
    }

    pub(crate) fn with_core(core: AvmCore, code: Code, config: MachineConfig) -> Self {
        Machine { core, code, config, pool: None, total_steps: 0, blocked: None }
    }

    /// Makes the machine intern all incoming messages into the pool, so that equal messages
    /// received by different machines share their memory.
    pub fn with_pool(mut self, pool: Arc<ValuePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(&self) -> MachineConfig { self.config }

    pub fn code(&self) -> &Code { &self.code }

    pub fn core(&self) -> &AvmCore { &self.core }

    pub fn status(&self) -> MachineStatus { self.core.status() }

    /// Steps executed over the whole life of the machine.
    pub fn total_steps(&self) -> u64 { self.total_steps }

    pub fn lifecycle(&self) -> Lifecycle {
        match self.core.status() {
            MachineStatus::Halted => Lifecycle::Halted,
            MachineStatus::Errored => Lifecycle::Errored,
            MachineStatus::Extensive if self.blocked.is_some() => Lifecycle::Blocked,
            MachineStatus::Extensive
                if self.total_steps == 0
                    && self.core.inbox().is_empty()
                    && !self.has_pending_messages() =>
            {
                Lifecycle::Loaded
            }
            MachineStatus::Extensive => Lifecycle::Runnable,
        }
    }

    /// Hash of the machine state.
    pub fn hash(&self) -> ValueHash { self.core.hash() }

    /// Machine state as a single root tuple.
    pub fn state(&self) -> Tuple { self.core.root() }

    pub fn inbox_hash(&self) -> ValueHash { self.core.inbox().hash() }

    pub fn has_pending_messages(&self) -> bool { self.core.inbox().has_pending() }

    /// Queues a marshalled message. The message becomes visible to the program only after
    /// [`Machine::deliver_onchain_messages`].
    ///
    /// Messages must be fully materialized and may carry only code points of the machine code
    /// (see [`Code::admit`]).
    pub fn send_onchain_message(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let message = Value::from_bytes(data)?;
        self.code.admit(&message)?;
        let message = self.intern(message);
        self.core.inbox_mut().enqueue(message);
        Ok(())
    }

    /// Commits all queued messages to the inbox, returning their number.
    pub fn deliver_onchain_messages(&mut self) -> usize {
        let count = self.core.inbox_mut().deliver();
        if count > 0 {
            self.blocked = None;
            debug!("delivered {count} onchain message(s); inbox is {}", self.inbox_hash());
        }
        count
    }

    /// Appends a concatenation of marshalled messages directly to the inbox, returning their
    /// number. Nothing is appended if any of the messages fails to decode or to be admitted.
    pub fn send_offchain_messages(&mut self, data: &[u8]) -> Result<usize, DecodeError> {
        let messages = Value::unmarshal_all(data)?;
        for message in &messages {
            self.code.admit(message)?;
        }
        let count = messages.len();
        for message in messages {
            let message = self.intern(message);
            self.core.inbox_mut().append(message);
        }
        if count > 0 {
            self.blocked = None;
            debug!("appended {count} offchain message(s); inbox is {}", self.inbox_hash());
        }
        Ok(count)
    }

    fn intern(&self, value: Value) -> Value {
        let Some(pool) = &self.pool else {
            return value;
        };
        let pooled = pool.intern(value.clone());
        // the pool may hold a shallow form of the same value
        match self.code.admit(&pooled) {
            Ok(()) => pooled,
            Err(_) => value,
        }
    }

    /// Runs the machine for at most `max_steps` steps.
    ///
    /// The time bounds are exposed to the program through the `gettime` operation. The run stops
    /// early when the machine halts, errors or blocks on the inbox.
    pub fn execute_assertion(
        &mut self,
        max_steps: u64,
        timebound_start: u64,
        timebound_end: u64,
    ) -> Assertion {
        let budget = self.config.step_budget(max_steps);
        debug!(
            "starting assertion of up to {budget} steps at {} (status {})",
            self.hash(),
            self.status()
        );

        let mut out_messages = vec![];
        let mut logs = vec![];
        let mut trace_steps = vec![];
        let mut num_steps = 0u64;
        let mut blocked = None;
        {
            let mut context = StepContext {
                timebound_start,
                timebound_end,
                out_messages: &mut out_messages,
                logs: &mut logs,
            };
            while num_steps < budget {
                let point = self.core.code_point().map(|point| (point.pc, point.op.opcode));
                let res = self.core.step(&self.code, &mut context);
                if res.counts() {
                    num_steps += 1;
                    if let Some((pc, opcode)) = point {
                        trace!("step {num_steps}: {opcode} at {pc}");
                    }
                    if self.config.trace {
                        trace_steps.push(TraceStep {
                            step: num_steps,
                            pc: point.map(|(pc, _)| pc),
                            opcode: point.map(|(_, opcode)| opcode),
                            stack_depth: self.core.stack().len(),
                            faulted: matches!(res, StepResult::Faulted(_)),
                        });
                    }
                }
                match res {
                    StepResult::Executed | StepResult::Faulted(_) => {}
                    StepResult::Blocked(reason) => {
                        blocked = Some(reason);
                        break;
                    }
                    StepResult::Stopped => break,
                }
            }
        }

        self.total_steps += num_steps;
        if num_steps > 0 || blocked.is_some() {
            self.blocked = blocked;
        }
        debug!(
            "assertion executed {num_steps} steps, sent {} message(s), logged {} value(s); now {} \
             (status {})",
            out_messages.len(),
            logs.len(),
            self.hash(),
            self.status()
        );
        Assertion { out_messages, logs, num_steps, blocked, trace: trace_steps }
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use amplify::num::u256;

    use super::*;
    use crate::{masm, CodePoint, Operation};

    fn machine(ops: Vec<Operation>) -> Machine {
        Machine::new(Program::new(ops, Value::unit()).unwrap(), MachineConfig::default())
    }

    /// Infinite counter: increments the register on each loop iteration.
    fn counter() -> Machine {
        let mut machine = machine(masm! {
            nop 0u64;
            rset;
            pcpush;
            rpush;
            add 1u64;
            rset;
            jump;
        });
        machine.execute_assertion(2, 0, 0);
        machine
    }

    fn register(machine: &Machine) -> Option<u256> {
        machine.core().register().value().and_then(Value::as_int)
    }

    #[test]
    fn zero_steps() {
        let mut machine = counter();
        let hash = machine.hash();
        let assertion = machine.execute_assertion(0, 0, 0);
        assert_eq!(assertion.num_steps, 0);
        assert_eq!(machine.hash(), hash);
    }

    #[test]
    fn bounded_steps() {
        let mut machine = counter();
        let assertion = machine.execute_assertion(10, 0, 0);
        assert_eq!(assertion.num_steps, 10);
        assert_eq!(register(&machine), Some(u256::from(2u64)));
        assert_eq!(machine.lifecycle(), Lifecycle::Runnable);
        assert_eq!(machine.total_steps(), 12);
    }

    #[test]
    fn step_limit() {
        let mut machine = counter();
        machine.config.step_lim = Some(3);
        assert_eq!(machine.execute_assertion(10, 0, 0).num_steps, 3);
    }

    #[test]
    fn halted_is_idempotent() {
        let mut machine = machine(masm! { nop 1u64; log; halt; });
        let assertion = machine.execute_assertion(100, 0, 0);
        assert_eq!(assertion.num_steps, 3);
        assert_eq!(assertion.logs, vec![Value::from(1u64)]);
        assert_eq!(machine.lifecycle(), Lifecycle::Halted);

        let hash = machine.hash();
        for _ in 0..2 {
            let assertion = machine.execute_assertion(100, 0, 0);
            assert_eq!(assertion, Assertion::default());
            assert_eq!(machine.hash(), hash);
        }
    }

    #[test]
    fn errored_is_idempotent() {
        let mut machine = machine(masm! { nop 1u64; error; nop; });
        let assertion = machine.execute_assertion(100, 0, 0);
        assert_eq!(assertion.num_steps, 2);
        assert_eq!(machine.status(), MachineStatus::Errored);

        let hash = machine.hash();
        assert_eq!(machine.execute_assertion(100, 0, 0).num_steps, 0);
        assert_eq!(machine.hash(), hash);
        assert_eq!(machine.lifecycle(), Lifecycle::Errored);
    }

    #[test]
    fn clone_diverges() {
        let mut machine = counter();
        let mut fork = machine.clone();
        assert_eq!(fork.hash(), machine.hash());

        fork.execute_assertion(5, 0, 0);
        assert_ne!(fork.hash(), machine.hash());
        let hash = machine.hash();
        fork.execute_assertion(5, 0, 0);
        assert_eq!(machine.hash(), hash);

        machine.execute_assertion(10, 0, 0);
        assert_eq!(machine.hash(), fork.hash());
    }

    #[test]
    fn clones_run_on_threads() {
        let machine = counter();
        let handles = (0..3)
            .map(|_| {
                let mut fork = machine.clone();
                thread::spawn(move || {
                    fork.execute_assertion(50, 0, 0);
                    fork.hash()
                })
            })
            .collect::<Vec<_>>();
        let hashes = handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>();
        assert!(hashes.iter().all(|hash| *hash == hashes[0]));
    }

    #[test]
    fn inbox_hash_stability() {
        let mut machine = counter();
        let empty = machine.inbox_hash();
        assert_eq!(empty, ValueHash::empty_tuple());

        machine.send_onchain_message(&Value::from(1u64).to_bytes()).unwrap();
        assert!(machine.has_pending_messages());
        assert_eq!(machine.inbox_hash(), empty);
        machine.send_onchain_message(&Value::unit().to_bytes()).unwrap();
        assert_eq!(machine.deliver_onchain_messages(), 2);
        assert!(!machine.has_pending_messages());

        let two = machine.inbox_hash();
        assert_ne!(two, empty);
        assert_eq!(machine.deliver_onchain_messages(), 0);
        assert_eq!(machine.inbox_hash(), two);

        machine.send_onchain_message(&Value::from(3u64).to_bytes()).unwrap();
        machine.deliver_onchain_messages();
        assert_ne!(machine.inbox_hash(), two);
    }

    #[test]
    fn offchain_messages() {
        let mut onchain = counter();
        let mut offchain = counter();
        let mut data = Value::from(1u64).to_bytes();
        Value::from(2u64).marshal(&mut data);

        assert_eq!(offchain.send_offchain_messages(&data).unwrap(), 2);
        assert!(!offchain.has_pending_messages());
        onchain.send_onchain_message(&Value::from(1u64).to_bytes()).unwrap();
        onchain.send_onchain_message(&Value::from(2u64).to_bytes()).unwrap();
        onchain.deliver_onchain_messages();
        assert_eq!(onchain.inbox_hash(), offchain.inbox_hash());
        assert_eq!(onchain.hash(), offchain.hash());

        let hash = offchain.inbox_hash();
        assert_eq!(offchain.send_offchain_messages(&data[..40]), Err(DecodeError::UnexpectedEof));
        assert_eq!(offchain.inbox_hash(), hash);
        assert!(onchain.send_onchain_message(&[0x42]).is_err());
    }

    #[test]
    fn inbox_blocking() {
        let mut machine = machine(masm! {
            nop;
            pcpush;
            swap1;
            inbox;
            dup0;
            tget 2u64;
            log;
            swap1;
            jump;
        });
        machine.execute_assertion(1, 0, 0);
        machine.core.push(Value::unit());
        machine.execute_assertion(2, 0, 0);

        let assertion = machine.execute_assertion(100, 0, 0);
        assert_eq!(assertion.num_steps, 0);
        assert_eq!(assertion.blocked, Some(BlockReason::Inbox(ValueHash::empty_tuple())));
        assert_eq!(machine.lifecycle(), Lifecycle::Blocked);

        machine.send_onchain_message(&Value::from(5u64).to_bytes()).unwrap();
        let assertion = machine.execute_assertion(100, 0, 0);
        assert_eq!(assertion.num_steps, 0);
        assert_eq!(machine.lifecycle(), Lifecycle::Blocked);

        machine.deliver_onchain_messages();
        assert_eq!(machine.lifecycle(), Lifecycle::Runnable);
        let assertion = machine.execute_assertion(100, 0, 0);
        assert_eq!(assertion.logs, vec![Value::from(5u64)]);
        assert_eq!(assertion.num_steps, 8);
        assert_eq!(assertion.blocked, Some(BlockReason::Inbox(machine.inbox_hash())));
    }

    #[test]
    fn lifecycle_loaded() {
        let mut machine = machine(masm! { halt; });
        assert_eq!(machine.lifecycle(), Lifecycle::Loaded);
        machine.send_offchain_messages(&Value::unit().to_bytes()).unwrap();
        assert_eq!(machine.lifecycle(), Lifecycle::Runnable);
    }

    #[test]
    fn lifecycle_pending() {
        let mut machine = machine(masm! { halt; });
        machine.send_onchain_message(&Value::from(1u64).to_bytes()).unwrap();
        assert_eq!(machine.lifecycle(), Lifecycle::Runnable);
        machine.deliver_onchain_messages();
        assert_eq!(machine.lifecycle(), Lifecycle::Runnable);
    }

    #[test]
    fn jump_target_from_message() {
        let program = Program::new(
            masm! { inbox Value::unit(); tget 2u64; jump; halt; nop 7u64; log; halt; },
            Value::unit(),
        )
        .unwrap();
        let genuine = program.code().get(4).unwrap().clone();
        let mut moved = genuine.clone();
        moved.pc = 1000;

        let mut machine = Machine::new(program.clone(), MachineConfig::default());
        let mut other = Machine::new(program, MachineConfig::default());
        machine.send_offchain_messages(&Value::CodePoint(genuine).to_bytes()).unwrap();
        other.send_offchain_messages(&Value::CodePoint(moved).to_bytes()).unwrap();
        assert_eq!(machine.hash(), other.hash());

        let assertion = machine.execute_assertion(100, 0, 0);
        assert_eq!(assertion.logs, vec![Value::from(7u64)]);
        assert_eq!(assertion.num_steps, 6);
        assert_eq!(other.execute_assertion(100, 0, 0), assertion);
        assert_eq!(machine.status(), MachineStatus::Halted);
        assert_eq!(other.status(), MachineStatus::Halted);
        assert_eq!(machine.hash(), other.hash());
    }

    #[test]
    fn foreign_code_point_message() {
        let mut machine = counter();
        let hash = machine.hash();
        let mut foreign = machine.code().get(1).unwrap().clone();
        foreign.next_hash = ValueHash::empty_tuple();
        let data = Value::CodePoint(foreign.clone()).to_bytes();
        assert_eq!(
            machine.send_offchain_messages(&data),
            Err(DecodeError::ForeignCodePoint(foreign.hash()))
        );
        assert_eq!(
            machine.send_onchain_message(&data),
            Err(DecodeError::ForeignCodePoint(foreign.hash()))
        );
        assert!(!machine.has_pending_messages());
        assert_eq!(machine.hash(), hash);

        let sentinel = Value::CodePoint(CodePoint::error()).to_bytes();
        assert_eq!(machine.send_offchain_messages(&sentinel), Ok(1));
    }

    #[test]
    fn shallow_message() {
        let mut machine = counter();
        let shallow = Tuple::with_values([Value::from(1u64)]).unwrap().clone_shallow();
        let data = Value::Tuple(shallow).to_bytes();
        assert_eq!(machine.send_offchain_messages(&data), Err(DecodeError::UnexpectedHashOnly));
    }

    #[test]
    fn pooled_shallow_form() {
        let pool = Arc::new(ValuePool::new());
        let full = Tuple::with_values([Value::from(1u64)]).unwrap();
        pool.intern(Value::Tuple(full.clone_shallow()));
        let mut machine = counter().with_pool(pool);
        machine.send_offchain_messages(&Value::Tuple(full).to_bytes()).unwrap();
        let inbox = machine.core().inbox().committed().value().and_then(Value::as_tuple).unwrap();
        let message = inbox.get(2).unwrap().value().and_then(Value::as_tuple).unwrap();
        assert!(message.is_materialized());
    }

    #[test]
    fn long_inbox() {
        let mut machine = counter();
        let mut data = vec![];
        for no in 0..100_000u64 {
            Value::from(no).marshal(&mut data);
        }
        assert_eq!(machine.send_offchain_messages(&data), Ok(100_000));
        machine.execute_assertion(10, 0, 0);
        let state = Value::Tuple(machine.state()).to_bytes();
        assert!(state.len() > 100_000 * 33);
        let fork = machine.clone();
        drop(machine);
        assert_eq!(fork.total_steps(), 12);
        drop(fork);
    }

    #[test]
    fn gettime_exposes_bounds() {
        let mut machine = machine(masm! { gettime; log; halt; });
        let assertion = machine.execute_assertion(10, 100, 200);
        let expected = Tuple::with_values([Value::from(100u64), Value::from(200u64)]).unwrap();
        assert_eq!(assertion.logs, vec![Value::Tuple(expected)]);
    }

    #[test]
    fn trace_collection() {
        let mut machine = counter();
        assert!(machine.execute_assertion(3, 0, 0).trace.is_empty());
        machine.config.trace = true;
        let assertion = machine.execute_assertion(3, 0, 0);
        let pcs = assertion.trace.iter().map(|step| step.pc).collect::<Vec<_>>();
        assert_eq!(pcs, vec![Some(5), Some(6), Some(2)]);
        assert_eq!(assertion.trace[1].opcode, Some(crate::Opcode::Jump));
    }

    #[test]
    fn pooled_messages() {
        let pool = Arc::new(ValuePool::new());
        let mut machine = counter().with_pool(pool.clone());
        machine.send_offchain_messages(&Value::from(9u64).to_bytes()).unwrap();
        assert!(pool.contains(&Value::from(9u64).hash()));
    }

    #[test]
    fn state_matches_hash() {
        let mut machine = counter();
        machine.send_offchain_messages(&Value::from(9u64).to_bytes()).unwrap();
        machine.execute_assertion(7, 0, 0);
        assert_eq!(machine.state().hash(), machine.hash());
    }
}

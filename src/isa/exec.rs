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
use tracing::{debug, warn};

use super::{AvmCore, Code, CodePoint, MachineStatus, Opcode};
use crate::{Buffer, BufferError, Slot, Tuple, TupleError, Value, ValueHash};

/// In-program fault. A faulting step transfers control to the error handler or, if none is
/// installed, moves the machine into [`MachineStatus::Errored`].
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Fault {
    /// data stack holds fewer than {0} items.
    StackUnderflow(usize),

    /// aux stack is empty.
    AuxUnderflow,

    /// operand at depth {0} is known only by its hash.
    Unresolved(usize),

    /// operand at depth {depth} has type {found} while type {expected} is required.
    TypeMismatch { depth: usize, expected: u8, found: u8 },

    /// division by zero.
    DivisionByZero,

    /// integer operand is too large to be used as an index.
    IndexOverflow,

    /// {0}
    #[from]
    Tuple(TupleError),

    /// {0}
    #[from]
    Buffer(BufferError),

    /// code point with hash {0} is not available for execution.
    NoCodePoint(ValueHash),

    /// program executed the error instruction.
    Explicit,
}

impl Fault {
    pub(crate) fn type_mismatch(depth: usize, expected: u8, found: &Value) -> Self {
        Fault::TypeMismatch { depth, expected, found: found.type_code() }
    }
}

/// Reason for a step not being executed while the machine is running.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
#[display(doc_comments)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "camelCase"))]
pub enum BlockReason {
    /// waiting for the inbox to differ from {0}.
    Inbox(ValueHash),
}

/// Outcome of a single [`AvmCore::step`].
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum StepResult {
    /// The operation executed; the step counts.
    Executed,
    /// The operation faulted; the step counts.
    Faulted(Fault),
    /// The operation can't proceed; the state is unchanged and the step does not count.
    Blocked(BlockReason),
    /// The machine is halted or errored.
    Stopped,
}

impl StepResult {
    pub fn counts(&self) -> bool { matches!(self, StepResult::Executed | StepResult::Faulted(_)) }
}

/// Environment of a step: data provided by the host and sinks for the produced output.
#[derive(Debug)]
pub struct StepContext<'ctx> {
    pub timebound_start: u64,
    pub timebound_end: u64,
    pub out_messages: &'ctx mut Vec<Value>,
    pub logs: &'ctx mut Vec<Value>,
}

enum Flow {
    Next,
    Jump(Slot),
    Halt,
    Block(BlockReason),
}

impl AvmCore {
    /// Executes the current code point.
    ///
    /// Operands are validated before any of them is consumed, so a faulting operation leaves the
    /// stacks as they were before the step.
    pub fn step(&mut self, code: &Code, context: &mut StepContext) -> StepResult {
        if self.status != MachineStatus::Extensive {
            return StepResult::Stopped;
        }
        let point = match &self.pc {
            Slot::Materialized(Value::CodePoint(point)) => point.clone(),
            other => {
                let fault = Fault::NoCodePoint(other.hash());
                return self.fault(fault);
            }
        };

        let immediate = point.op.immediate.as_deref().cloned();
        let has_immediate = immediate.is_some();
        if let Some(imm) = immediate {
            self.push(Slot::from(imm));
        }

        match self.exec(&point, context) {
            Ok(Flow::Next) => {
                self.pc = code.successor(&point);
                StepResult::Executed
            }
            Ok(Flow::Jump(target)) => {
                self.pc = target;
                StepResult::Executed
            }
            Ok(Flow::Halt) => {
                self.status = MachineStatus::Halted;
                StepResult::Executed
            }
            Ok(Flow::Block(reason)) => {
                if has_immediate {
                    self.stack.pop();
                }
                StepResult::Blocked(reason)
            }
            Err(fault) => {
                if has_immediate {
                    self.stack.pop();
                }
                self.fault(fault)
            }
        }
    }

    fn fault(&mut self, fault: Fault) -> StepResult {
        if self.err_handler.hash() == CodePoint::error().hash() {
            warn!("machine errored: {fault}");
            self.status = MachineStatus::Errored;
        } else {
            debug!("transferring control to the error handler after fault: {fault}");
            self.pc = self.err_handler.clone();
        }
        StepResult::Faulted(fault)
    }

    fn exec(&mut self, point: &CodePoint, context: &mut StepContext) -> Result<Flow, Fault> {
        match point.op.opcode {
            Opcode::Add => self.arithmetic(|a, b| Ok(a.wrapping_add(b)))?,
            Opcode::Mul => self.arithmetic(|a, b| Ok(a.wrapping_mul(b)))?,
            Opcode::Sub => self.arithmetic(|a, b| Ok(a.wrapping_sub(b)))?,
            Opcode::Div => self.arithmetic(|a, b| {
                if b == u256::from(0u64) {
                    return Err(Fault::DivisionByZero);
                }
                Ok(a / b)
            })?,
            Opcode::Mod => self.arithmetic(|a, b| {
                if b == u256::from(0u64) {
                    return Err(Fault::DivisionByZero);
                }
                Ok(a % b)
            })?,
            Opcode::Lt => self.comparison(|a, b| a < b)?,
            Opcode::Gt => self.comparison(|a, b| a > b)?,
            Opcode::Eq => {
                let eq = self.slot_at(0)?.hash() == self.slot_at(1)?.hash();
                self.reduce(2, u256::from(eq as u64));
            }
            Opcode::IsZero => {
                let a = self.int_at(0)?;
                self.reduce(1, u256::from((a == u256::from(0u64)) as u64));
            }
            Opcode::And => self.arithmetic(|a, b| Ok(a & b))?,
            Opcode::Or => self.arithmetic(|a, b| Ok(a | b))?,
            Opcode::Xor => self.arithmetic(|a, b| Ok(a ^ b))?,
            Opcode::Not => {
                let a = self.int_at(0)?;
                self.reduce(1, !a);
            }

            Opcode::Hash => {
                let hash = self.slot_at(0)?.hash();
                self.reduce(1, hash.to_u256());
            }
            Opcode::Type => {
                let code = self.value_at(0)?.type_code();
                self.reduce(1, u256::from(code as u64));
            }

            Opcode::Pop => {
                self.require(1)?;
                self.consume(1);
            }
            Opcode::SPush => self.push(self.static_val.clone()),
            Opcode::RPush => self.push(self.register.clone()),
            Opcode::RSet => {
                self.require(1)?;
                self.register = self.stack.pop().ok_or(Fault::StackUnderflow(1))?;
            }
            Opcode::Jump => {
                let target = Value::CodePoint(self.code_point_at(0)?.clone());
                self.consume(1);
                return Ok(Flow::Jump(Slot::from(target)));
            }
            Opcode::CJump => {
                let target = Value::CodePoint(self.code_point_at(0)?.clone());
                let cond = self.int_at(1)?;
                self.consume(2);
                if cond != u256::from(0u64) {
                    return Ok(Flow::Jump(Slot::from(target)));
                }
            }
            Opcode::StackEmpty => {
                let empty = self.stack.is_empty();
                self.push_bool(empty);
            }
            Opcode::PcPush => self.push(Value::CodePoint(point.clone())),
            Opcode::AuxPush => {
                self.require(1)?;
                let item = self.stack.pop().ok_or(Fault::StackUnderflow(1))?;
                self.aux_stack.push(item);
            }
            Opcode::AuxPop => {
                let item = self.aux_stack.pop().ok_or(Fault::AuxUnderflow)?;
                self.push(item);
            }
            Opcode::AuxStackEmpty => {
                let empty = self.aux_stack.is_empty();
                self.push_bool(empty);
            }
            Opcode::Nop => {}
            Opcode::ErrPush => self.push(self.err_handler.clone()),
            Opcode::ErrSet => {
                let handler = Value::CodePoint(self.code_point_at(0)?.clone());
                self.consume(1);
                self.err_handler = Slot::from(handler);
            }

            Opcode::Dup0 => self.push(self.slot_at(0)?.clone()),
            Opcode::Dup1 => self.push(self.slot_at(1)?.clone()),
            Opcode::Dup2 => self.push(self.slot_at(2)?.clone()),
            Opcode::Swap1 => self.swap(1)?,
            Opcode::Swap2 => self.swap(2)?,

            Opcode::TGet => {
                let index = self.index_at(0)?;
                let item = self.tuple_at(1)?.get(index)?.clone();
                self.reduce(2, item);
            }
            Opcode::TSet => {
                let index = self.index_at(0)?;
                let item = self.slot_at(2)?.clone();
                let tuple = self.tuple_at(1)?.set(index, item)?;
                self.reduce(3, tuple);
            }
            Opcode::TLen => {
                let arity = self.tuple_at(0)?.arity();
                self.reduce(1, u256::from(arity as u64));
            }

            Opcode::Log => {
                let item = self.value_at(0)?.clone();
                self.consume(1);
                context.logs.push(item);
            }
            Opcode::Send => {
                let item = self.value_at(0)?.clone();
                self.consume(1);
                context.out_messages.push(item);
            }
            Opcode::GetTime => {
                let bounds = Tuple::with_values([
                    Value::from(context.timebound_start),
                    Value::from(context.timebound_end),
                ])?;
                self.push(bounds);
            }
            Opcode::Inbox => {
                let seen = self.slot_at(0)?.hash();
                if seen == self.inbox.hash() {
                    return Ok(Flow::Block(BlockReason::Inbox(seen)));
                }
                self.reduce(1, self.inbox.committed().clone());
            }
            Opcode::Error => return Err(Fault::Explicit),
            Opcode::Halt => return Ok(Flow::Halt),

            Opcode::NewBuffer => self.push(Value::Buffer(Buffer::default())),
            Opcode::GetBuffer8 => {
                let offset = self.index_at(0)?;
                let byte = self.buffer_at(1)?.get8(offset)?;
                self.reduce(2, u256::from(byte as u64));
            }
            Opcode::SetBuffer8 => {
                let offset = self.index_at(0)?;
                let byte = self.int_at(1)?.to_be_bytes()[31];
                let buf = self.buffer_at(2)?.set8(offset, byte)?;
                self.reduce(3, Value::Buffer(buf));
            }
        }
        Ok(Flow::Next)
    }

    fn arithmetic(&mut self, op: impl FnOnce(u256, u256) -> Result<u256, Fault>) -> Result<(), Fault> {
        let a = self.int_at(0)?;
        let b = self.int_at(1)?;
        let res = op(a, b)?;
        self.reduce(2, res);
        Ok(())
    }

    fn comparison(&mut self, op: impl FnOnce(u256, u256) -> bool) -> Result<(), Fault> {
        self.arithmetic(|a, b| Ok(u256::from(op(a, b) as u64)))
    }

    fn swap(&mut self, depth: usize) -> Result<(), Fault> {
        let top = self.slot_at(0)?.clone();
        let other = self.slot_at(depth)?.clone();
        self.stack.replace(depth, top);
        self.stack.replace(0, other);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::isa::Operation;
    use crate::masm;

    struct Run {
        core: AvmCore,
        code: Code,
        out_messages: Vec<Value>,
        logs: Vec<Value>,
    }

    impl Run {
        fn new(ops: Vec<Operation>) -> Self {
            let code = Code::new(ops);
            Run {
                core: AvmCore::new(code.entry(), Value::from(77u64)),
                code,
                out_messages: vec![],
                logs: vec![],
            }
        }

        fn step(&mut self) -> StepResult {
            let mut context = StepContext {
                timebound_start: 10,
                timebound_end: 20,
                out_messages: &mut self.out_messages,
                logs: &mut self.logs,
            };
            self.core.step(&self.code, &mut context)
        }

        fn run(&mut self, steps: usize) {
            for _ in 0..steps {
                assert_eq!(self.step(), StepResult::Executed);
            }
        }

        fn top(&self) -> u256 { self.core.int_at(0).unwrap() }
    }

    fn int(val: u64) -> u256 { u256::from(val) }

    #[test]
    fn arithmetic() {
        let mut run = Run::new(masm! {
            nop 3u64;
            nop 10u64;
            sub;
            nop 4u64;
            swap1;
            div;
            nop 0u64;
            not;
            nop 1u64;
            add;
        });
        run.run(4);
        assert_eq!(run.top(), int(4));
        run.run(2);
        assert_eq!(run.top(), int(1), "7 / 4");
        run.run(4);
        assert_eq!(run.top(), int(0), "!0 + 1 wraps");
        assert_eq!(run.core.stack().len(), 2);
    }

    #[test]
    fn immediate_is_pushed_first() {
        let mut run = Run::new(masm! {
            nop 5u64;
            sub 7u64;
            lt 1u64;
        });
        run.run(2);
        assert_eq!(run.top(), int(2));
        run.run(1);
        assert_eq!(run.top(), int(1));
    }

    #[test]
    fn division_by_zero_faults() {
        let mut run = Run::new(masm! { nop 0u64; div 1u64; });
        run.run(1);
        let before = run.core.stack().hash();
        assert_eq!(run.step(), StepResult::Faulted(Fault::DivisionByZero));
        assert_eq!(run.core.status(), MachineStatus::Errored);
        assert_eq!(run.core.stack().hash(), before);
        assert_eq!(run.step(), StepResult::Stopped);
    }

    #[test]
    fn error_handler() {
        let mut run = Run::new(masm! {
            pcpush;
            errset;
            error;
        });
        run.run(2);
        let handler = run.core.err_handler.clone();
        assert_eq!(run.step(), StepResult::Faulted(Fault::Explicit));
        assert_eq!(run.core.status(), MachineStatus::Extensive);
        assert_eq!(run.core.pc, handler);
    }

    #[test]
    fn jumps() {
        let mut run = Run::new(masm! {
            nop;
            pcpush;
            nop 0u64;
            swap1;
            cjump;
            pcpush;
            jump;
        });
        run.run(5);
        assert_eq!(run.core.code_point().unwrap().pc, 5);
        run.run(2);
        assert_eq!(run.core.code_point().unwrap().pc, 5);
    }

    #[test]
    fn stack_manipulation() {
        let mut run = Run::new(masm! {
            nop 1u64;
            nop 2u64;
            nop 3u64;
            swap2;
            dup1;
            auxpush;
            auxstackempty;
            auxpop;
            pop;
            stackempty;
        });
        run.run(4);
        assert_eq!(run.top(), int(1));
        assert_eq!(run.core.int_at(2), Ok(int(3)));
        run.run(3);
        assert_eq!(run.top(), int(0));
        run.run(1);
        assert_eq!(run.top(), int(2));
        run.run(2);
        assert_eq!(run.top(), int(0));
    }

    #[test]
    fn underflow_keeps_immediate_out() {
        let mut run = Run::new(masm! { add 1u64; });
        let before = run.core.stack().hash();
        assert_eq!(run.step(), StepResult::Faulted(Fault::StackUnderflow(2)));
        assert_eq!(run.core.stack().hash(), before);
    }

    #[test]
    fn tuples() {
        let mut run = Run::new(masm! {
            gettime;
            dup0;
            tlen;
            pop;
            nop 5u64;
            swap1;
            tset 1u64;
            tget 1u64;
            gettime;
            tget 2u64;
        });
        run.run(3);
        assert_eq!(run.top(), int(2));
        run.run(4);
        assert!(run.core.tuple_at(0).is_ok());
        run.run(1);
        assert_eq!(run.top(), int(5));
        run.run(1);
        assert!(matches!(run.step(), StepResult::Faulted(Fault::Tuple(TupleError::IndexOutOfRange {
            index: 2,
            arity: 2
        }))));
    }

    #[test]
    fn time_bounds() {
        let mut run = Run::new(masm! { gettime; tget 0u64; gettime; tget 1u64; });
        run.run(4);
        assert_eq!(run.top(), int(20));
        assert_eq!(run.core.int_at(1), Ok(int(10)));
    }

    #[test]
    fn buffers() {
        let mut run = Run::new(masm! {
            newbuffer;
            nop 0x1ffu64;
            setbuffer8 3u64;
            dup0;
            getbuffer8 3u64;
            swap1;
            getbuffer8 100u64;
        });
        run.run(5);
        assert_eq!(run.top(), int(0xff));
        run.run(2);
        assert_eq!(run.top(), int(0));
    }

    #[test]
    fn type_and_hash() {
        let mut run = Run::new(masm! { spush; dup0; hash; swap1; type; newbuffer; type; });
        run.run(5);
        assert_eq!(run.top(), int(0));
        assert_eq!(run.core.int_at(1), Ok(Value::from(77u64).hash().to_u256()));
        run.run(2);
        assert_eq!(run.top(), int(12));
    }

    #[test]
    fn outputs() {
        let mut run = Run::new(masm! { nop 1u64; send; nop 2u64; log; halt; nop; });
        run.run(5);
        assert_eq!(run.out_messages, vec![Value::from(1u64)]);
        assert_eq!(run.logs, vec![Value::from(2u64)]);
        assert_eq!(run.core.status(), MachineStatus::Halted);
        assert_eq!(run.step(), StepResult::Stopped);
    }

    #[test]
    fn inbox_blocks() {
        let mut run = Run::new(masm! { nop; inbox; });
        run.core.push(Slot::from(Tuple::empty()));
        run.run(1);
        let hash = run.core.hash();
        assert_eq!(run.step(), StepResult::Blocked(BlockReason::Inbox(ValueHash::empty_tuple())));
        assert_eq!(run.core.hash(), hash);

        run.core.inbox_mut().append(Value::from(9u64));
        run.run(1);
        assert_eq!(run.core.slot_at(0).unwrap().hash(), run.core.inbox().hash());
    }

    #[test]
    fn register_and_static() {
        let mut run = Run::new(masm! { spush; rset; rpush; rpush; eq; });
        run.run(5);
        assert_eq!(run.top(), int(1));
        assert_eq!(run.core.register().hash(), Value::from(77u64).hash());
    }

    #[test]
    fn running_off_the_end() {
        let mut run = Run::new(masm! { nop; });
        run.run(1);
        assert_eq!(run.step(), StepResult::Faulted(Fault::NoCodePoint(ValueHash::zero())));
        assert_eq!(run.core.status(), MachineStatus::Errored);
    }
}

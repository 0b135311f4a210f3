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

/// Macro assembler for the machine operations.
///
/// Each statement is a mnemonic optionally followed by an immediate value, which is converted
/// with `Into<Value>`. An immediate is pushed onto the data stack before the operation runs, so
/// `nop 5u64` pushes `5`.
///
/// # Example
///
/// ```
/// use avm_core::{masm, Machine, MachineConfig, MachineStatus, Program, Value};
///
/// let code = masm! {
///     nop     2u64    ;
///     mul     21u64   ;
///     log             ;
///     halt            ;
/// };
///
/// let program = Program::new(code, Value::unit()).unwrap();
/// let mut machine = Machine::new(program, MachineConfig::default());
/// let assertion = machine.execute_assertion(100, 0, 0);
/// assert_eq!(assertion.logs, vec![Value::from(42u64)]);
/// assert_eq!(machine.status(), MachineStatus::Halted);
/// ```
#[macro_export]
macro_rules! masm {
    ($( $op:ident $( $imm:expr )? );* $(;)?) => {{
        let mut code: Vec<$crate::Operation> = Vec::new();
        $(
            #[allow(unused_mut)]
            let mut op = $crate::Operation::basic($crate::opcode!($op));
            $( op = $crate::Operation::with_immediate(op.opcode, $imm); )?
            code.push(op);
        )*
        code
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! opcode {
    (add) => { $crate::Opcode::Add };
    (mul) => { $crate::Opcode::Mul };
    (sub) => { $crate::Opcode::Sub };
    (div) => { $crate::Opcode::Div };
    (mod) => { $crate::Opcode::Mod };
    (lt) => { $crate::Opcode::Lt };
    (gt) => { $crate::Opcode::Gt };
    (eq) => { $crate::Opcode::Eq };
    (iszero) => { $crate::Opcode::IsZero };
    (and) => { $crate::Opcode::And };
    (or) => { $crate::Opcode::Or };
    (xor) => { $crate::Opcode::Xor };
    (not) => { $crate::Opcode::Not };
    (hash) => { $crate::Opcode::Hash };
    (type) => { $crate::Opcode::Type };
    (pop) => { $crate::Opcode::Pop };
    (spush) => { $crate::Opcode::SPush };
    (rpush) => { $crate::Opcode::RPush };
    (rset) => { $crate::Opcode::RSet };
    (jump) => { $crate::Opcode::Jump };
    (cjump) => { $crate::Opcode::CJump };
    (stackempty) => { $crate::Opcode::StackEmpty };
    (pcpush) => { $crate::Opcode::PcPush };
    (auxpush) => { $crate::Opcode::AuxPush };
    (auxpop) => { $crate::Opcode::AuxPop };
    (auxstackempty) => { $crate::Opcode::AuxStackEmpty };
    (nop) => { $crate::Opcode::Nop };
    (errpush) => { $crate::Opcode::ErrPush };
    (errset) => { $crate::Opcode::ErrSet };
    (dup0) => { $crate::Opcode::Dup0 };
    (dup1) => { $crate::Opcode::Dup1 };
    (dup2) => { $crate::Opcode::Dup2 };
    (swap1) => { $crate::Opcode::Swap1 };
    (swap2) => { $crate::Opcode::Swap2 };
    (tget) => { $crate::Opcode::TGet };
    (tset) => { $crate::Opcode::TSet };
    (tlen) => { $crate::Opcode::TLen };
    (log) => { $crate::Opcode::Log };
    (send) => { $crate::Opcode::Send };
    (gettime) => { $crate::Opcode::GetTime };
    (inbox) => { $crate::Opcode::Inbox };
    (error) => { $crate::Opcode::Error };
    (halt) => { $crate::Opcode::Halt };
    (newbuffer) => { $crate::Opcode::NewBuffer };
    (getbuffer8) => { $crate::Opcode::GetBuffer8 };
    (setbuffer8) => { $crate::Opcode::SetBuffer8 };
}

#[cfg(test)]
mod test {
    use crate::{Opcode, Operation, Value};

    #[test]
    fn assemble() {
        let code = masm! {
            nop 1u64;
            mod;
            type;
            tget Value::unit();
            halt
        };
        assert_eq!(code, vec![
            Operation::with_immediate(Opcode::Nop, 1u64),
            Operation::basic(Opcode::Mod),
            Operation::basic(Opcode::Type),
            Operation::with_immediate(Opcode::TGet, Value::unit()),
            Operation::basic(Opcode::Halt),
        ]);
    }

    #[test]
    fn mnemonics_match_display() {
        let code = masm! { iszero; auxstackempty; setbuffer8; gettime };
        let names = code.iter().map(Operation::to_string).collect::<Vec<_>>();
        assert_eq!(names, vec!["iszero", "auxstackempty", "setbuffer8", "gettime"]);
    }
}

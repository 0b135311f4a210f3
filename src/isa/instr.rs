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

use core::fmt::{self, Display, Formatter};

use crate::value::{decode_slot, read_u8};
use crate::{DecodeError, Slot, Value};

/// Operation codes of the stack machine.
///
/// In the stack effect descriptions `A` is the top of the data stack, `B` the element below it and
/// `C` the third one.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
#[display(lowercase)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "lowercase"))]
#[repr(u8)]
#[non_exhaustive]
pub enum Opcode {
    /// Pushes `A + B`, wrapping on overflow.
    Add = 0x01,
    /// Pushes `A * B`, wrapping on overflow.
    Mul = 0x02,
    /// Pushes `A - B`, wrapping on underflow.
    Sub = 0x03,
    /// Pushes `A / B`; faults if `B` is zero.
    Div = 0x04,
    /// Pushes `A % B`; faults if `B` is zero.
    Mod = 0x06,

    Lt = 0x10,
    Gt = 0x11,
    /// Compares two values of any type by their hashes.
    Eq = 0x14,
    IsZero = 0x15,
    And = 0x16,
    Or = 0x17,
    Xor = 0x18,
    Not = 0x19,

    /// Replaces `A` with its hash.
    Hash = 0x20,
    /// Replaces `A` with its type code.
    Type = 0x21,

    Pop = 0x30,
    /// Pushes the static value.
    SPush = 0x31,
    /// Pushes the register.
    RPush = 0x32,
    /// Pops `A` into the register.
    RSet = 0x33,
    /// Jumps to code point `A`.
    Jump = 0x34,
    /// Jumps to code point `A` if `B` is non-zero.
    CJump = 0x35,
    StackEmpty = 0x36,
    /// Pushes the current code point.
    PcPush = 0x37,
    /// Moves `A` to the aux stack.
    AuxPush = 0x38,
    /// Moves the top of the aux stack to the data stack.
    AuxPop = 0x39,
    AuxStackEmpty = 0x3a,
    Nop = 0x3b,
    /// Pushes the error handler code point.
    ErrPush = 0x3c,
    /// Pops code point `A` and installs it as the error handler.
    ErrSet = 0x3d,

    Dup0 = 0x40,
    Dup1 = 0x41,
    Dup2 = 0x42,
    Swap1 = 0x43,
    Swap2 = 0x44,

    /// Pushes element `A` of tuple `B`.
    TGet = 0x50,
    /// Pushes tuple `B` with element `A` replaced by `C`.
    TSet = 0x51,
    /// Pushes the arity of tuple `A`.
    TLen = 0x52,

    /// Pops `A` into the assertion log.
    Log = 0x61,

    /// Pops `A` into the outgoing messages.
    Send = 0x70,
    /// Pushes the tuple `(timebound_start, timebound_end)` of the running assertion.
    GetTime = 0x72,
    /// Blocks while the inbox hash equals the hash of `A`; otherwise replaces `A` with the inbox.
    Inbox = 0x73,
    /// Faults unconditionally.
    Error = 0x74,
    Halt = 0x75,

    NewBuffer = 0xa0,
    /// Pushes byte `A` of buffer `B`.
    GetBuffer8 = 0xa1,
    /// Pushes buffer `C` with byte `A` set to the low byte of `B`.
    SetBuffer8 = 0xa4,
}

impl TryFrom<u8> for Opcode {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, DecodeError> {
        Ok(match byte {
            0x01 => Opcode::Add,
            0x02 => Opcode::Mul,
            0x03 => Opcode::Sub,
            0x04 => Opcode::Div,
            0x06 => Opcode::Mod,
            0x10 => Opcode::Lt,
            0x11 => Opcode::Gt,
            0x14 => Opcode::Eq,
            0x15 => Opcode::IsZero,
            0x16 => Opcode::And,
            0x17 => Opcode::Or,
            0x18 => Opcode::Xor,
            0x19 => Opcode::Not,
            0x20 => Opcode::Hash,
            0x21 => Opcode::Type,
            0x30 => Opcode::Pop,
            0x31 => Opcode::SPush,
            0x32 => Opcode::RPush,
            0x33 => Opcode::RSet,
            0x34 => Opcode::Jump,
            0x35 => Opcode::CJump,
            0x36 => Opcode::StackEmpty,
            0x37 => Opcode::PcPush,
            0x38 => Opcode::AuxPush,
            0x39 => Opcode::AuxPop,
            0x3a => Opcode::AuxStackEmpty,
            0x3b => Opcode::Nop,
            0x3c => Opcode::ErrPush,
            0x3d => Opcode::ErrSet,
            0x40 => Opcode::Dup0,
            0x41 => Opcode::Dup1,
            0x42 => Opcode::Dup2,
            0x43 => Opcode::Swap1,
            0x44 => Opcode::Swap2,
            0x50 => Opcode::TGet,
            0x51 => Opcode::TSet,
            0x52 => Opcode::TLen,
            0x61 => Opcode::Log,
            0x70 => Opcode::Send,
            0x72 => Opcode::GetTime,
            0x73 => Opcode::Inbox,
            0x74 => Opcode::Error,
            0x75 => Opcode::Halt,
            0xa0 => Opcode::NewBuffer,
            0xa1 => Opcode::GetBuffer8,
            0xa4 => Opcode::SetBuffer8,
            unknown => return Err(DecodeError::InvalidOpcode(unknown)),
        })
    }
}

impl Opcode {
    pub const fn byte(self) -> u8 { self as u8 }

    /// Number of data stack elements the operation inspects or moves, counting from the top.
    ///
    /// One-step proofs expose exactly this many elements of the data stack.
    pub const fn stack_reads(self) -> usize {
        match self {
            Opcode::SPush
            | Opcode::RPush
            | Opcode::StackEmpty
            | Opcode::PcPush
            | Opcode::AuxPop
            | Opcode::AuxStackEmpty
            | Opcode::Nop
            | Opcode::ErrPush
            | Opcode::GetTime
            | Opcode::Error
            | Opcode::Halt
            | Opcode::NewBuffer => 0,

            Opcode::IsZero
            | Opcode::Not
            | Opcode::Hash
            | Opcode::Type
            | Opcode::Pop
            | Opcode::RSet
            | Opcode::Jump
            | Opcode::AuxPush
            | Opcode::ErrSet
            | Opcode::Dup0
            | Opcode::TLen
            | Opcode::Log
            | Opcode::Send
            | Opcode::Inbox => 1,

            Opcode::Add
            | Opcode::Mul
            | Opcode::Sub
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Lt
            | Opcode::Gt
            | Opcode::Eq
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::CJump
            | Opcode::Dup1
            | Opcode::Swap1
            | Opcode::TGet
            | Opcode::GetBuffer8 => 2,

            Opcode::Dup2 | Opcode::Swap2 | Opcode::TSet | Opcode::SetBuffer8 => 3,
        }
    }

    /// Number of aux stack elements the operation inspects or moves.
    pub const fn aux_reads(self) -> usize {
        match self {
            Opcode::AuxPop => 1,
            _ => 0,
        }
    }
}

/// Opcode together with an optional immediate value, which is pushed onto the data stack right
/// before the opcode executes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Operation {
    pub opcode: Opcode,
    pub immediate: Option<Box<Value>>,
}

impl From<Opcode> for Operation {
    fn from(opcode: Opcode) -> Self { Operation::basic(opcode) }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.immediate {
            None => Display::fmt(&self.opcode, f),
            Some(imm) => write!(f, "{} {imm}", self.opcode),
        }
    }
}

impl Operation {
    pub fn basic(opcode: Opcode) -> Self { Operation { opcode, immediate: None } }

    pub fn with_immediate(opcode: Opcode, immediate: impl Into<Value>) -> Self {
        Operation { opcode, immediate: Some(Box::new(immediate.into())) }
    }

    /// Number of data stack elements which must be present before the immediate value is pushed.
    pub fn stack_reads(&self) -> usize {
        let reads = self.opcode.stack_reads();
        match self.immediate {
            Some(_) => reads.saturating_sub(1),
            None => reads,
        }
    }

    /// Writes the immediate flag, the opcode and the immediate value, if any.
    pub fn marshal(&self, buf: &mut Vec<u8>) {
        match &self.immediate {
            None => buf.extend_from_slice(&[0, self.opcode.byte()]),
            Some(imm) => {
                buf.extend_from_slice(&[1, self.opcode.byte()]);
                imm.marshal(buf);
            }
        }
    }

    pub fn unmarshal(data: &mut &[u8]) -> Result<Self, DecodeError> { Self::decode(data, 0) }

    pub(crate) fn decode(data: &mut &[u8], depth: usize) -> Result<Self, DecodeError> {
        let flag = read_u8(data)?;
        let opcode = Opcode::try_from(read_u8(data)?)?;
        match flag {
            0 => Ok(Operation::basic(opcode)),
            1 => match decode_slot(data, depth + 1)? {
                Slot::Materialized(imm) => Ok(Operation::with_immediate(opcode, imm)),
                Slot::HashOnly(_) => Err(DecodeError::UnexpectedHashOnly),
            },
            invalid => Err(DecodeError::InvalidImmediateFlag(invalid)),
        }
    }
}

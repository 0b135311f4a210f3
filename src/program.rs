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
use std::{fs, io};

use crate::value::read_u64;
use crate::{Code, DecodeError, Operation, Value};

/// Loadable program: the code segment and the static value.
///
/// File layout: the operation count as u64 BE, each operation as its immediate flag, opcode and
/// optional marshalled immediate, then the marshalled static value.
#[derive(Clone, Debug)]
pub struct Program {
    code: Code,
    static_val: Value,
}

impl Program {
    pub fn new(ops: Vec<Operation>, static_val: Value) -> Result<Self, LoadError> {
        if ops.is_empty() {
            return Err(LoadError::Empty);
        }
        let code = Code::new(ops);
        for imm in code.iter().filter_map(|point| point.op.immediate.as_deref()) {
            code.admit(imm)?;
        }
        code.admit(&static_val)?;
        Ok(Program { code, static_val })
    }

    pub fn code(&self) -> &Code { &self.code }

    pub fn static_value(&self) -> &Value { &self.static_val }

    pub fn from_bytes(mut data: &[u8]) -> Result<Self, LoadError> {
        let count = read_u64(&mut data)?;
        let mut ops = vec![];
        for _ in 0..count {
            ops.push(Operation::unmarshal(&mut data)?);
        }
        let static_val = Value::unmarshal(&mut data)?;
        if !data.is_empty() {
            return Err(DecodeError::TrailingData(data.len()).into());
        }
        Self::new(ops, static_val)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = (self.code.len() as u64).to_be_bytes().to_vec();
        for point in self.code.iter() {
            point.op.marshal(&mut buf);
        }
        self.static_val.marshal(&mut buf);
        buf
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }
}

#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum LoadError {
    /// unable to read the program file: {0}
    #[from]
    Io(io::Error),

    /// invalid program encoding: {0}
    #[from]
    Decode(DecodeError),

    /// program contains no operations.
    Empty,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{masm, CodePoint, Opcode, Tuple};

    fn sample() -> Program {
        let static_val = Value::Tuple(Tuple::with_values([Value::from(1u64)]).unwrap());
        Program::new(masm! { spush; tget 0u64; log; halt; }, static_val).unwrap()
    }

    #[test]
    fn encoding() {
        let program = sample();
        let bytes = program.to_bytes();
        assert_eq!(&bytes[..8], &4u64.to_be_bytes());
        assert_eq!(&bytes[8..10], &[0, Opcode::SPush.byte()]);
        let decoded = Program::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.code().hash_at(0), program.code().hash_at(0));
        assert_eq!(decoded.static_value(), program.static_value());
    }

    #[test]
    fn trailing_data() {
        let mut bytes = sample().to_bytes();
        bytes.push(0);
        assert!(matches!(
            Program::from_bytes(&bytes),
            Err(LoadError::Decode(DecodeError::TrailingData(1)))
        ));
    }

    #[test]
    fn truncated() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            Program::from_bytes(&bytes[..bytes.len() - 1]),
            Err(LoadError::Decode(DecodeError::UnexpectedEof))
        ));
        assert!(matches!(
            Program::from_bytes(&[0, 0, 0]),
            Err(LoadError::Decode(DecodeError::UnexpectedEof))
        ));
    }

    #[test]
    fn empty_program() {
        let mut bytes = 0u64.to_be_bytes().to_vec();
        Value::unit().marshal(&mut bytes);
        assert!(matches!(Program::from_bytes(&bytes), Err(LoadError::Empty)));
    }

    #[test]
    fn foreign_code_points() {
        let other = Code::new(masm! { nop 9u64; halt; });
        let foreign = other.get(0).unwrap().clone();
        let hash = foreign.hash();
        assert!(matches!(
            Program::new(masm! { halt; }, Value::CodePoint(foreign.clone())),
            Err(LoadError::Decode(DecodeError::ForeignCodePoint(h))) if h == hash
        ));
        assert!(matches!(
            Program::new(masm! { nop Value::CodePoint(foreign); halt; }, Value::unit()),
            Err(LoadError::Decode(DecodeError::ForeignCodePoint(_)))
        ));
        assert!(Program::new(masm! { halt; }, Value::CodePoint(CodePoint::error())).is_ok());

        let shallow = Tuple::with_values([Value::from(1u64)]).unwrap().clone_shallow();
        assert!(matches!(
            Program::new(masm! { halt; }, Value::Tuple(shallow)),
            Err(LoadError::Decode(DecodeError::UnexpectedHashOnly))
        ));
    }

    #[test]
    fn load_file() {
        let path = std::env::temp_dir().join(format!("avm-core-program-{}.bin", std::process::id()));
        fs::write(&path, sample().to_bytes()).unwrap();
        let program = Program::load(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(program.code().len(), 4);

        assert!(matches!(Program::load(&path), Err(LoadError::Io(_))));
    }
}

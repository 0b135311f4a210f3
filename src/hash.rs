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

use core::str::FromStr;

use amplify::hex::{FromHex, ToHex};
use amplify::num::u256;
use amplify::{hex, Bytes32};
use sha3::{Digest, Keccak256};

use crate::value::TUPLE_BASE;

/// Content identifier of a value: the Keccak-256 digest of its canonical hashing preimage, read as
/// a big-endian 256-bit number.
#[derive(Wrapper, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, From)]
#[wrapper(Deref, BorrowSlice, Hex, Index, RangeOps)]
#[display(Self::to_hex)]
pub struct ValueHash(
    #[from]
    #[from([u8; 32])]
    Bytes32,
);

impl From<ValueHash> for [u8; 32] {
    fn from(hash: ValueHash) -> Self { hash.to_byte_array() }
}

impl FromStr for ValueHash {
    type Err = hex::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::from_hex(s) }
}

#[cfg(feature = "serde")]
impl_serde_wrapper!(ValueHash, Bytes32);

impl ValueHash {
    /// All-zero digest. Terminates the code point hash chain.
    pub fn zero() -> Self { Self::from_byte_array([0u8; 32]) }

    /// Hash of the empty tuple: Keccak-256 of the single tag byte `TUPLE_BASE`.
    pub fn empty_tuple() -> Self { keccak(&[TUPLE_BASE]) }

    pub fn from_byte_array(bytes: [u8; 32]) -> Self { Self(Bytes32::from_byte_array(bytes)) }

    pub fn to_byte_array(&self) -> [u8; 32] { self.0.to_byte_array() }

    /// The digest as a 256-bit unsigned integer (big-endian interpretation).
    pub fn to_u256(&self) -> u256 { u256::from_be_bytes(self.to_byte_array()) }

    pub fn is_zero(&self) -> bool { self.to_byte_array() == [0u8; 32] }
}

/// Keccak-256 over `data`, returned as a [`ValueHash`].
pub fn keccak(data: &[u8]) -> ValueHash {
    let digest: [u8; 32] = Keccak256::digest(data).into();
    ValueHash::from_byte_array(digest)
}

/// Incremental Keccak-256 used when a preimage is assembled from parts.
#[derive(Clone, Default)]
pub struct Hasher(Keccak256);

impl Hasher {
    pub fn new() -> Self { Self::default() }

    pub fn update(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.0.update(data);
        self
    }

    pub fn finish(self) -> ValueHash {
        let digest: [u8; 32] = self.0.finalize().into();
        ValueHash::from_byte_array(digest)
    }
}

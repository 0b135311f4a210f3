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

/// Serde for a digest newtype: hex string in human-readable formats, the inner byte array
/// otherwise.
macro_rules! impl_serde_wrapper {
    ($ty:ty, $inner:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where S: serde::Serializer {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_string())
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where D: serde::Deserializer<'de> {
                use serde::de::Error;
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(D::Error::custom)
                } else {
                    <$inner>::deserialize(deserializer).map(Self)
                }
            }
        }
    };
}

/// Serde for a type with the canonical machine encoding (`to_bytes`/`from_bytes`): hex of the
/// encoding in human-readable formats, the raw encoding otherwise.
macro_rules! impl_serde_marshalled {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where S: serde::Serializer {
                use amplify::hex::ToHex;
                let bytes = self.to_bytes();
                if serializer.is_human_readable() {
                    serializer.serialize_str(&bytes.to_hex())
                } else {
                    bytes.serialize(serializer)
                }
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where D: serde::Deserializer<'de> {
                use amplify::hex::FromHex;
                use serde::de::Error;
                let bytes = if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    Vec::<u8>::from_hex(&s).map_err(D::Error::custom)?
                } else {
                    Vec::<u8>::deserialize(deserializer)?
                };
                <$ty>::from_bytes(&bytes).map_err(D::Error::custom)
            }
        }
    };
}

#[cfg(test)]
macro_rules! test_serde_wrapper {
    ($val:expr, $str:literal, $dat:expr) => {
        use serde_test::{assert_tokens, Configure, Token};
        assert_eq!(bincode::serialize(&$val).unwrap(), $dat);
        assert_eq!(bincode::serialize(&$val).unwrap(), bincode::serialize(&$val.0).unwrap());
        assert_tokens(&$val.readable(), &[Token::Str($str)]);
    };
}

#[cfg(test)]
macro_rules! test_serde_marshalled {
    ($val:expr, $str:literal) => {
        use serde_test::{assert_tokens, Configure, Token};
        let bin = bincode::serialize(&$val).unwrap();
        assert_eq!(bincode::deserialize::<Value>(&bin).unwrap(), $val);
        assert_eq!(bin, bincode::serialize(&$val.to_bytes()).unwrap());
        assert_tokens(&$val.clone().readable(), &[Token::Str($str)]);
    };
}

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

/// Host-side limits and switches of a [`crate::Machine`].
///
/// None of the options changes the semantics of a single step, so machines with different
/// configurations stay hash-compatible and their steps can be proven against each other.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "camelCase"))]
pub struct MachineConfig {
    /// Maximal number of steps a single assertion may execute, on top of the per-call limit.
    pub step_lim: Option<u64>,

    /// Whether assertions record a per-step execution trace.
    pub trace: bool,
}

impl MachineConfig {
    /// Number of steps an assertion requested with `max_steps` is allowed to run.
    pub fn step_budget(&self, max_steps: u64) -> u64 {
        match self.step_lim {
            Some(lim) => lim.min(max_steps),
            None => max_steps,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn budget() {
        assert_eq!(MachineConfig::default().step_budget(10), 10);
        let config = MachineConfig { step_lim: Some(4), trace: false };
        assert_eq!(config.step_budget(10), 4);
        assert_eq!(config.step_budget(2), 2);
    }

    #[test]
    #[cfg(feature = "serde")]
    fn config_serde() {
        use serde_test::{assert_tokens, Token};

        let config = MachineConfig { step_lim: Some(100), trace: true };
        assert_tokens(&config, &[
            Token::Struct { name: "MachineConfig", len: 2 },
            Token::Str("stepLim"),
            Token::Some,
            Token::U64(100),
            Token::Str("trace"),
            Token::Bool(true),
            Token::StructEnd,
        ]);
        let bin = bincode::serialize(&config).unwrap();
        assert_eq!(bincode::deserialize::<MachineConfig>(&bin).unwrap(), config);
    }
}

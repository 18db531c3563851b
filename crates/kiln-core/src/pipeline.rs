//! Pipeline manifest types.
//!
//! A manifest is checked into the root of a project's repository and
//! parsed fresh for every build; it is never persisted.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A declarative list of steps that all run in the same image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Container image every step runs in.
    pub image: String,
    /// Steps, executed strictly in declaration order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One named unit of commands run inside a single container instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Shell commands; joined with `&&` so the first failure stops the step.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Step-scoped environment. Not shared with other steps.
    #[serde(default, deserialize_with = "unique_keys")]
    pub env: BTreeMap<String, String>,
}

/// Deserialize an env block, rejecting keys that appear twice.
fn unique_keys<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UniqueKeys;

    impl<'de> Visitor<'de> for UniqueKeys {
        type Value = BTreeMap<String, String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of environment variables")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(BTreeMap::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(BTreeMap::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut env = BTreeMap::new();
            while let Some((key, value)) = map.next_entry::<String, String>()? {
                if env.contains_key(&key) {
                    return Err(de::Error::custom(format!("duplicate env key '{}'", key)));
                }
                env.insert(key, value);
            }
            Ok(env)
        }
    }

    deserializer.deserialize_map(UniqueKeys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_defaults_to_empty() {
        let step: Step = serde_json::from_str(r#"{"name":"a","commands":["true"]}"#).unwrap();
        assert!(step.env.is_empty());
    }

    #[test]
    fn test_duplicate_env_key_is_an_error() {
        let json = r#"{"name":"a","commands":["true"],"env":{"X":"1","X":"2"}}"#;
        let err = serde_json::from_str::<Step>(json).unwrap_err();
        assert!(err.to_string().contains("duplicate env key 'X'"));
    }
}

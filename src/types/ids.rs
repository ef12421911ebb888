//! Strongly-typed identifiers.
//!
//! Process ids are allocated from parent-scoped counters instead of random
//! UUIDs, so the same process keeps the same id across snapshot/restore.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed string newtype.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(ProcessId);
define_id!(RoutineKind);

impl ProcessId {
    /// Id for a top-level process: `<kind>:<n>`.
    pub fn root(kind: &RoutineKind, n: u64) -> Self {
        Self(format!("{}:{}", kind, n))
    }

    /// Id for a child process, scoped under its parent: `<parent>/<kind>:<n>`.
    pub fn child(parent: &ProcessId, kind: &RoutineKind, n: u64) -> Self {
        Self(format!("{}/{}:{}", parent, kind, n))
    }
}

impl From<&str> for RoutineKind {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_id_rejected() {
        assert!(ProcessId::from_string(String::new()).is_err());
        assert!(RoutineKind::from_string(String::new()).is_err());
    }

    #[test]
    fn test_child_ids_nest_under_parent() {
        let kind = RoutineKind::from("hauler");
        let parent = ProcessId::root(&RoutineKind::from("colony"), 0);
        let child = ProcessId::child(&parent, &kind, 3);
        assert_eq!(parent.as_str(), "colony:0");
        assert_eq!(child.as_str(), "colony:0/hauler:3");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let pid = ProcessId::from_string("reactor:1".to_string()).unwrap();
        assert_eq!(serde_json::to_string(&pid).unwrap(), "\"reactor:1\"");
    }
}

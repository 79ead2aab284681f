use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one node in the cluster.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
  /// Fresh identifier for nodes that were not given one.
  pub fn generate() -> Self {
    Self(format!("node-{}", uuid::Uuid::now_v7().simple()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<String> for NodeId {
  fn from(s: String) -> Self {
    Self(s)
  }
}

impl From<&str> for NodeId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_generated_ids_are_unique() {
    let a = NodeId::generate();
    let b = NodeId::generate();
    assert_ne!(a, b);
    assert!(a.as_str().starts_with("node-"));
  }
}

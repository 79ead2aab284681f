//! Rebuild requests and the projection sets they carry.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Ordered set of unique projection names.
///
/// Names are trimmed, blank names are dropped and duplicates keep their first
/// position, so the rebuild loop walks projections in the order the caller
/// listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProjectionSet(Vec<String>);

impl ProjectionSet {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut set = Vec::new();
    for name in names {
      let name: String = name.into();
      let name = name.trim();
      if name.is_empty() || set.iter().any(|existing: &String| existing == name) {
        continue;
      }
      set.push(name.to_string());
    }
    Self(set)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.0.iter().any(|n| n == name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }

  pub fn into_vec(self) -> Vec<String> {
    self.0
  }
}

impl<S: Into<String>> FromIterator<S> for ProjectionSet {
  fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
    Self::new(iter)
  }
}

impl<'de> Deserialize<'de> for ProjectionSet {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let names = Vec::<String>::deserialize(deserializer)?;
    Ok(Self::new(names))
  }
}

impl fmt::Display for ProjectionSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0.join(","))
  }
}

/// A validated request to rebuild one or more projections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildRequest {
  projections: ProjectionSet,
}

impl RebuildRequest {
  pub fn new(projections: ProjectionSet) -> Result<Self, RequestError> {
    if projections.is_empty() {
      return Err(RequestError::Empty);
    }
    Ok(Self { projections })
  }

  pub fn projections(&self) -> &ProjectionSet {
    &self.projections
  }

  pub fn into_projections(self) -> ProjectionSet {
    self.projections
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
  #[error("At least one projection name is required")]
  Empty,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_projection_set_dedups_in_order() {
    let set = ProjectionSet::new(["Weather", " Orders ", "Weather", "", "  "]);
    assert_eq!(set.iter().collect::<Vec<_>>(), vec!["Weather", "Orders"]);
    assert_eq!(set.len(), 2);
    assert!(set.contains("Orders"));
    assert_eq!(set.to_string(), "Weather,Orders");
  }

  #[test]
  fn test_projection_set_deserializes_from_array() {
    let set: ProjectionSet = serde_json::from_str(r#"["B","A","B"]"#).unwrap();
    assert_eq!(set.into_vec(), vec!["B".to_string(), "A".to_string()]);
  }

  #[test]
  fn test_empty_request_rejected() {
    assert_eq!(RebuildRequest::new(ProjectionSet::default()), Err(RequestError::Empty));
    assert_eq!(
      RebuildRequest::new(ProjectionSet::new(["", " "])),
      Err(RequestError::Empty)
    );

    let request = RebuildRequest::new(ProjectionSet::new(["Weather"])).unwrap();
    assert_eq!(request.projections().len(), 1);
  }
}

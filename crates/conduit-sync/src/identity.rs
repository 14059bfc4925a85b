//! Keys used by the sync group table

use std::borrow::Borrow;
use std::fmt;

use serde::Serialize;

/// Stable identity of a group member, rendered as `namespace/name`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    /// Identity of the namespaced object `namespace/name`
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}/{name}"))
    }

    /// The identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace part of the identity
    pub fn namespace(&self) -> &str {
        self.0.split_once('/').map_or("", |(ns, _)| ns)
    }

    /// Name part of the identity
    pub fn name(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(_, name)| name)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of an update sync group, as read from a member's annotation
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    /// Wrap an annotation value
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for GroupKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GroupKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_id_splits_back_into_parts() {
        let id = MemberId::new("red", "conduit-a");
        assert_eq!(id.as_str(), "red/conduit-a");
        assert_eq!(id.namespace(), "red");
        assert_eq!(id.name(), "conduit-a");
        assert_eq!(id.to_string(), "red/conduit-a");
    }

    #[test]
    fn keys_serialize_as_plain_strings() {
        let json = serde_json::to_string(&(GroupKey::from("g"), MemberId::new("ns", "m"))).unwrap();
        assert_eq!(json, r#"["g","ns/m"]"#);
    }
}

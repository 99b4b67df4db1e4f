//! Dotted-path node identifiers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Identifier of a hypothesis node, e.g. `"1"`, `"1.2"`, `"1.2.1"`.
///
/// The path encodes identity, parent linkage and depth at once. The root
/// sentinel `"0"` is the parent of every root node and has depth 0.
///
/// Format is validated once on construction, so [`NodeId::depth`] and
/// [`NodeId::parent`] never fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

/// Raw value of the root sentinel.
pub const ROOT_SENTINEL: &str = "0";

impl NodeId {
    /// Parse and validate a dotted path.
    ///
    /// Every segment must be a positive integer without leading zeros that
    /// fits in a `u64`; the single segment `"0"` is accepted as the root
    /// sentinel.
    pub fn parse(raw: impl Into<String>) -> EngineResult<Self> {
        let raw = raw.into();
        if raw == ROOT_SENTINEL {
            return Ok(Self(raw));
        }

        let valid = !raw.is_empty()
            && raw.split('.').all(|segment| {
                !segment.is_empty()
                    && !segment.starts_with('0')
                    && segment.bytes().all(|b| b.is_ascii_digit())
                    && segment.parse::<u64>().is_ok()
            });

        if valid {
            Ok(Self(raw))
        } else {
            Err(EngineError::InvalidNodeId { id: raw })
        }
    }

    /// The root sentinel `"0"`.
    pub fn root_sentinel() -> Self {
        Self(ROOT_SENTINEL.to_string())
    }

    /// Id of the `index`-th root (1-based).
    pub fn root(index: usize) -> Self {
        Self(index.max(1).to_string())
    }

    /// Id of the `index`-th child (1-based) of this node.
    pub fn child(&self, index: usize) -> Self {
        if self.is_sentinel() {
            Self::root(index)
        } else {
            Self(format!("{}.{}", self.0, index.max(1)))
        }
    }

    /// Whether this is the root sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.0 == ROOT_SENTINEL
    }

    /// Number of path segments; 0 for the sentinel.
    pub fn depth(&self) -> usize {
        if self.is_sentinel() {
            0
        } else {
            self.0.split('.').count()
        }
    }

    /// Parent id derived from the path; roots map to the sentinel.
    pub fn parent(&self) -> Self {
        match self.0.rsplit_once('.') {
            Some((parent, _)) => Self(parent.to_string()),
            None => Self::root_sentinel(),
        }
    }

    /// Whether `self` is a strict ancestor of `other` by path.
    pub fn is_ancestor_of(&self, other: &NodeId) -> bool {
        if self.is_sentinel() {
            return !other.is_sentinel();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'.'
    }

    /// Borrow the raw path.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Segments are validated to fit in a u64 by `parse`.
    fn segments(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.split('.').map(|s| s.parse::<u64>().unwrap_or(u64::MAX))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodeId {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NodeId::parse(value)
    }
}

impl TryFrom<&str> for NodeId {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        NodeId::parse(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl std::str::FromStr for NodeId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeId::parse(s)
    }
}

impl PartialEq<str> for NodeId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for NodeId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Numeric segment order, so `"1.2"` sorts before `"1.10"`.
impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments().cmp(other.segments())
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_paths() {
        for raw in ["1", "2", "1.2", "1.2.1", "10.11.12"] {
            assert!(NodeId::parse(raw).is_ok(), "{} should parse", raw);
        }
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        for raw in ["", ".", "1.", ".1", "1..2", "a", "1.b", "01", "1.0", "-1", "1 .2"] {
            let err = NodeId::parse(raw).unwrap_err();
            assert_eq!(
                err,
                EngineError::InvalidNodeId {
                    id: raw.to_string()
                }
            );
        }
    }

    #[test]
    fn test_parse_rejects_segments_beyond_u64() {
        let max = u64::MAX.to_string();
        assert!(NodeId::parse(format!("1.{}", max)).is_ok());
        for raw in ["18446744073709551616", "1.18446744073709551617", "99999999999999999999999"] {
            assert!(NodeId::parse(raw).is_err(), "{} should be rejected", raw);
        }
    }

    #[test]
    fn test_ordering_agrees_with_equality() {
        let max = NodeId::parse(u64::MAX.to_string()).unwrap();
        let below = NodeId::parse((u64::MAX - 1).to_string()).unwrap();
        assert_eq!(max.cmp(&max.clone()), Ordering::Equal);
        assert_eq!(below.cmp(&max), Ordering::Less);
        assert_ne!(below, max);
    }

    #[test]
    fn test_sentinel() {
        let sentinel = NodeId::parse("0").unwrap();
        assert!(sentinel.is_sentinel());
        assert_eq!(sentinel.depth(), 0);
        assert_eq!(sentinel, NodeId::root_sentinel());
    }

    #[test]
    fn test_depth_is_segment_count() {
        assert_eq!(NodeId::parse("1").unwrap().depth(), 1);
        assert_eq!(NodeId::parse("1.2").unwrap().depth(), 2);
        assert_eq!(NodeId::parse("1.2.3").unwrap().depth(), 3);
    }

    #[test]
    fn test_parent_has_one_fewer_segment() {
        let id = NodeId::parse("1.2.3").unwrap();
        assert_eq!(id.parent(), "1.2");
        assert_eq!(id.parent().parent(), "1");
        assert!(id.parent().parent().parent().is_sentinel());
    }

    #[test]
    fn test_child_ids() {
        assert_eq!(NodeId::root_sentinel().child(2), "2");
        assert_eq!(NodeId::parse("1").unwrap().child(3), "1.3");
        assert_eq!(NodeId::parse("1.3").unwrap().child(1), "1.3.1");
    }

    #[test]
    fn test_is_ancestor_of() {
        let a = NodeId::parse("1.1").unwrap();
        assert!(a.is_ancestor_of(&NodeId::parse("1.1.2").unwrap()));
        assert!(!a.is_ancestor_of(&NodeId::parse("1.10").unwrap()));
        assert!(!a.is_ancestor_of(&a));
        assert!(NodeId::root_sentinel().is_ancestor_of(&a));
    }

    #[test]
    fn test_numeric_ordering() {
        let mut ids: Vec<NodeId> = ["1.10", "1.2", "2", "1"]
            .iter()
            .map(|s| NodeId::parse(*s).unwrap())
            .collect();
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(sorted, vec!["1", "1.2", "1.10", "2"]);
    }

    #[test]
    fn test_serde_validates_on_deserialize() {
        let id: NodeId = serde_json::from_str("\"1.2\"").unwrap();
        assert_eq!(id, "1.2");
        assert!(serde_json::from_str::<NodeId>("\"1..2\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"1.2\"");
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Placeholder leader address meaning "ask someone else".
pub const UNKNOWN_LEADER: &str = "Unknown";

/// Stable per-process replica identifier, set at startup from configuration.
///
/// Ordering matters: leader election picks the lowest reachable id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ReplicaId(pub u64);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `host:port` of a replica's RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ReplicaAddress(pub String);

impl ReplicaAddress {
    pub fn new(host: &str, port: u16) -> Self {
        Self(format!("{}:{}", host, port))
    }

    /// The address clients and peers use when no leader is known.
    pub fn unknown() -> Self {
        Self(UNKNOWN_LEADER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for empty strings and the `"Unknown"` marker.
    pub fn is_placeholder(&self) -> bool {
        let trimmed = self.0.trim();
        trimmed.is_empty() || trimmed == UNKNOWN_LEADER
    }

    /// Builds `http://<addr><path>` for an endpoint on this replica.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.0, path)
    }
}

impl fmt::Display for ReplicaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaAddress {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ReplicaAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A set that only ever grows.
///
/// Used for cluster membership on nodes and for the replica list cached by
/// clients: merging two views is a plain union, so every observer's view is
/// monotonic no matter in which order updates arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrowOnlySet<T: Ord> {
    items: BTreeSet<T>,
}

impl<T: Ord> Default for GrowOnlySet<T> {
    fn default() -> Self {
        Self {
            items: BTreeSet::new(),
        }
    }
}

impl<T: Ord + Clone> GrowOnlySet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one element. Returns `true` if it was not present before.
    pub fn insert(&mut self, item: T) -> bool {
        self.items.insert(item)
    }

    /// Union with another view. Returns how many elements were new.
    pub fn merge<I>(&mut self, other: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        other
            .into_iter()
            .map(|item| self.items.insert(item))
            .filter(|added| *added)
            .count()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T: Ord + Clone> FromIterator<T> for GrowOnlySet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

//! Measurement model
//!
//! Immutable value types shared by reference across every consumer that
//! receives them.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of one telemetry point.
///
/// Equality, ordering and hashing use only the GUID; the alias is for humans.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "SignalKeyRepr", into = "SignalKeyRepr")]
pub struct SignalKey {
    id: Uuid,
    alias: Arc<str>,
}

/// Wire form of [`SignalKey`]; serde has no `Arc<str>` impl without the `rc` feature.
#[derive(Serialize, Deserialize)]
struct SignalKeyRepr {
    id: Uuid,
    alias: String,
}

impl From<SignalKeyRepr> for SignalKey {
    fn from(repr: SignalKeyRepr) -> Self {
        Self::new(repr.id, repr.alias)
    }
}

impl From<SignalKey> for SignalKeyRepr {
    fn from(key: SignalKey) -> Self {
        Self {
            id: key.id,
            alias: key.alias.to_string(),
        }
    }
}

impl SignalKey {
    pub fn new(id: Uuid, alias: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            alias: alias.into(),
        }
    }

    /// Deterministic key derived from a point tag.
    ///
    /// The same tag always yields the same GUID, which lets configuration files
    /// refer to signals by name.
    pub fn from_tag(tag: &str) -> Self {
        Self::new(Uuid::new_v5(&Uuid::NAMESPACE_OID, tag.as_bytes()), tag)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl PartialEq for SignalKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SignalKey {}

impl Hash for SignalKey {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialOrd for SignalKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SignalKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.alias)
    }
}

impl fmt::Debug for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignalKey({}, {})", self.alias, self.id)
    }
}

/// Set of signal keys.
pub type KeySet = HashSet<SignalKey>;

/// Build a [`KeySet`] from point tags.
pub fn key_set<'a>(tags: impl IntoIterator<Item = &'a str>) -> KeySet {
    tags.into_iter().map(SignalKey::from_tag).collect()
}

/// Measurement quality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Good,
    Suspect,
    Bad,
}

/// One timestamped value for a signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub key: SignalKey,

    /// Source timestamp; dependency timeouts are measured from it.
    pub timestamp: DateTime<Utc>,

    pub value: f64,

    #[serde(default)]
    pub quality: Quality,
}

/// Shared, immutable handle to a published measurement.
pub type MeasurementRef = Arc<Measurement>;

impl Measurement {
    /// Measurement stamped with the current wall-clock time.
    pub fn now(key: SignalKey, value: f64) -> Self {
        Self::at(key, Utc::now(), value)
    }

    pub fn at(key: SignalKey, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            key,
            timestamp,
            value,
            quality: Quality::Good,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Freeze into a shareable reference.
    pub fn into_ref(self) -> MeasurementRef {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_equality_ignores_alias() {
        let id = Uuid::new_v4();
        let a = SignalKey::new(id, "PPA:1");
        let b = SignalKey::new(id, "renamed");
        assert_eq!(a, b);
        assert_ne!(a, SignalKey::new(Uuid::new_v4(), "PPA:1"));
    }

    #[test]
    fn test_from_tag_is_deterministic() {
        assert_eq!(SignalKey::from_tag("FREQ"), SignalKey::from_tag("FREQ"));
        assert_ne!(SignalKey::from_tag("FREQ"), SignalKey::from_tag("DFDT"));
        assert_eq!(SignalKey::from_tag("FREQ").alias(), "FREQ");
    }

    #[test]
    fn test_key_set_dedups() {
        let keys = key_set(["A", "B", "A"]);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&SignalKey::from_tag("B")));
    }

    #[test]
    fn test_measurement_serde() {
        let m = Measurement::now(SignalKey::from_tag("VPHM"), 131.5).with_quality(Quality::Suspect);
        let json = serde_json::to_string(&m).unwrap();
        let back: Measurement = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, m.key);
        assert_eq!(back.quality, Quality::Suspect);
        assert_eq!(back.value, 131.5);
    }

    #[test]
    fn test_key_serde_keeps_alias() {
        let key = SignalKey::from_tag("PPA:7");
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["alias"], "PPA:7");
        let back: SignalKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, key);
        assert_eq!(back.alias(), "PPA:7");
    }
}

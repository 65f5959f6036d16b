use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a tracked object (a grid or a player).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Controlling identity of a tracked object. Players own themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    Grid,
    Player,
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityClass::Grid => write!(f, "grid"),
            EntityClass::Player => write!(f, "player"),
        }
    }
}

/// One profiled measurement for a single entity over one sampling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub entity_id: EntityId,
    pub entity_name: String,
    /// Milliseconds of CPU per simulation frame.
    pub metric_ms: f64,
    pub owner_id: OwnerId,
    pub owner_name: String,
    pub group_tag: Option<String>,
}

impl Sample {
    pub fn new(entity_id: EntityId, owner_id: OwnerId, metric_ms: f64) -> Self {
        Self {
            entity_id,
            entity_name: format!("entity-{}", entity_id),
            metric_ms,
            owner_id,
            owner_name: format!("owner-{}", owner_id),
            group_tag: None,
        }
    }

    pub fn named(mut self, entity_name: &str) -> Self {
        self.entity_name = entity_name.to_string();
        self
    }

    pub fn owner_name(mut self, owner_name: &str) -> Self {
        self.owner_name = owner_name.to_string();
        self
    }

    pub fn group(mut self, tag: &str) -> Self {
        self.group_tag = Some(tag.to_string());
        self
    }

    /// NaN, infinite and negative metrics are unusable.
    pub fn is_valid(&self) -> bool {
        self.metric_ms.is_finite() && self.metric_ms >= 0.0
    }
}

/// Samples collected during one profiling window, stamped when the window closed.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub taken_at: DateTime<Utc>,
    pub samples: Vec<Sample>,
}

impl SampleBatch {
    pub fn new(taken_at: DateTime<Utc>, samples: Vec<Sample>) -> Self {
        Self { taken_at, samples }
    }

    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self::new(taken_at, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_validity() {
        let ok = Sample::new(EntityId(1), OwnerId(2), 0.0);
        assert!(ok.is_valid());

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.5] {
            let sample = Sample::new(EntityId(1), OwnerId(2), bad);
            assert!(!sample.is_valid(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_sample_builder() {
        let sample = Sample::new(EntityId(7), OwnerId(3), 1.5)
            .named("Hauler")
            .owner_name("alice")
            .group("Pirates");
        assert_eq!(sample.entity_name, "Hauler");
        assert_eq!(sample.owner_name, "alice");
        assert_eq!(sample.group_tag.as_deref(), Some("Pirates"));
    }
}

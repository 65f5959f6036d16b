use crate::config::ClassPolicy;
use crate::core::{EnforceError, EntityClass, EntityId, OwnerId, Result, Sample};
use crate::series::{OutlierScorer, TimeSeries};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which of the three scoring conditions currently applies to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityPhase {
    /// Newly spawned; always scores 0 and cannot be pinned
    Grace,
    /// Past grace but the retained history is still too short to pin
    Collecting,
    Evaluated,
}

/// Rolling lag history and pin state of one tracked entity.
#[derive(Debug, Clone)]
pub struct EntityScore {
    id: EntityId,
    class: EntityClass,
    name: String,
    owner_id: OwnerId,
    owner_name: String,
    group_tag: Option<String>,
    spawned_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    series: TimeSeries<f64>,
    score: f64,
    phase: EntityPhase,
    history_complete: bool,
    pin_expiration: Option<DateTime<Utc>>,
    last_breach_at: Option<DateTime<Utc>>,
}

/// Copy of an entity's state handed across component boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub class: EntityClass,
    pub name: String,
    pub owner_id: OwnerId,
    pub owner_name: String,
    pub score: f64,
    pub phase: EntityPhase,
    pub pinned: bool,
    pub pin_remaining_secs: Option<i64>,
    pub last_seen_at: DateTime<Utc>,
}

impl EntityScore {
    /// Starts tracking from the entity's first sample.
    pub fn new(class: EntityClass, first: &Sample, now: DateTime<Utc>) -> Self {
        Self {
            id: first.entity_id,
            class,
            name: first.entity_name.clone(),
            owner_id: first.owner_id,
            owner_name: first.owner_name.clone(),
            group_tag: first.group_tag.clone(),
            spawned_at: now,
            last_seen_at: now,
            series: TimeSeries::new(),
            score: 0.0,
            phase: EntityPhase::Grace,
            history_complete: false,
            pin_expiration: None,
            last_breach_at: None,
        }
    }

    /// Records this interval's measurement, or a zero point when `sample` is `None`,
    /// then re-evaluates the score and pin state.
    pub fn update(
        &mut self,
        sample: Option<&Sample>,
        now: DateTime<Utc>,
        policy: &ClassPolicy,
    ) -> Result<()> {
        if let Some(sample) = sample {
            if sample.entity_id != self.id {
                return Err(EnforceError::SampleMismatch {
                    expected: self.id,
                    actual: sample.entity_id,
                });
            }
        }
        let normalized = sample
            .map(|sample| (sample.metric_ms / policy.budget_ms).max(0.0))
            .unwrap_or(0.0);

        self.series.add(now, normalized)?;
        if let Some(sample) = sample {
            self.name = sample.entity_name.clone();
            self.owner_id = sample.owner_id;
            self.owner_name = sample.owner_name.clone();
            self.group_tag = sample.group_tag.clone();
            self.last_seen_at = now;
        }
        self.series
            .retain_after(now - policy.tracking_window_duration());

        if self.is_blessed(now, policy) {
            self.phase = EntityPhase::Grace;
            self.score = 0.0;
            return Ok(());
        }

        if !self.history_complete && self.series.span_until(now) >= policy.required_history() {
            self.history_complete = true;
        }

        self.score = self.evaluate(policy);

        if !self.history_complete {
            self.phase = EntityPhase::Collecting;
            return Ok(());
        }

        self.phase = EntityPhase::Evaluated;
        if self.score >= 1.0 {
            self.pin_expiration = Some(now + policy.pin_duration_duration());
            self.last_breach_at = Some(now);
        }

        Ok(())
    }

    fn evaluate(&self, policy: &ClassPolicy) -> f64 {
        let values = self.series.to_values();
        match policy.outlier_fence {
            Some(fence) => OutlierScorer::capped_mean(&values, fence),
            None => self.series.mean(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn class(&self) -> EntityClass {
        self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub fn group_tag(&self) -> Option<&str> {
        self.group_tag.as_deref()
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn phase(&self) -> EntityPhase {
        self.phase
    }

    pub fn series(&self) -> &TimeSeries<f64> {
        &self.series
    }

    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    pub fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_seen_at
    }

    pub fn last_breach_at(&self) -> Option<DateTime<Utc>> {
        self.last_breach_at
    }

    pub fn is_blessed(&self, now: DateTime<Utc>, policy: &ClassPolicy) -> bool {
        now < self.spawned_at + policy.grace_period_duration()
    }

    pub fn is_pinned(&self, now: DateTime<Utc>) -> bool {
        matches!(self.pin_expiration, Some(expiration) if expiration > now)
    }

    pub fn pin_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.pin_expiration
            .filter(|expiration| *expiration > now)
            .map(|expiration| expiration - now)
    }

    /// No real sample for a whole tracking window and nothing left to wait out.
    pub fn is_decayed(&self, now: DateTime<Utc>, policy: &ClassPolicy) -> bool {
        now - self.last_seen_at >= policy.tracking_window_duration() && !self.is_pinned(now)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> EntitySnapshot {
        EntitySnapshot {
            id: self.id,
            class: self.class,
            name: self.name.clone(),
            owner_id: self.owner_id,
            owner_name: self.owner_name.clone(),
            score: self.score,
            phase: self.phase,
            pinned: self.is_pinned(now),
            pin_remaining_secs: self.pin_remaining(now).map(|d| d.num_seconds()),
            last_seen_at: self.last_seen_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn policy() -> ClassPolicy {
        ClassPolicy::new(1.0)
            .tracking_window(10)
            .pin_duration(30)
            .grace_period(0)
            .outlier_fence(None)
    }

    fn sample(metric: f64) -> Sample {
        Sample::new(EntityId(1), OwnerId(100), metric)
    }

    #[test]
    fn test_grace_forces_zero_and_never_pins() {
        let policy = policy().grace_period(60);
        let mut entity = EntityScore::new(EntityClass::Grid, &sample(500.0), at(0));

        for s in 0..30 {
            entity.update(Some(&sample(500.0)), at(s), &policy).unwrap();
            assert_eq!(entity.score(), 0.0);
            assert_eq!(entity.phase(), EntityPhase::Grace);
            assert!(!entity.is_pinned(at(s)));
        }
    }

    #[test]
    fn test_short_history_cannot_pin() {
        let policy = policy();
        let mut entity = EntityScore::new(EntityClass::Grid, &sample(3.0), at(0));

        // Needs 5s of history for a 10s window.
        for s in 0..5 {
            entity.update(Some(&sample(3.0)), at(s), &policy).unwrap();
            assert_eq!(entity.phase(), EntityPhase::Collecting);
            assert!(!entity.is_pinned(at(s)));
        }
        assert!((entity.score() - 3.0).abs() < 1e-9);

        entity.update(Some(&sample(3.0)), at(5), &policy).unwrap();
        assert_eq!(entity.phase(), EntityPhase::Evaluated);
        assert!(entity.is_pinned(at(5)));
    }

    #[test]
    fn test_mismatched_sample_is_rejected() {
        let mut entity = EntityScore::new(EntityClass::Grid, &sample(1.0), at(0));
        let other = Sample::new(EntityId(2), OwnerId(100), 1.0);
        let err = entity.update(Some(&other), at(0), &policy()).unwrap_err();
        assert!(matches!(
            err,
            EnforceError::SampleMismatch {
                expected: EntityId(1),
                actual: EntityId(2)
            }
        ));
        assert!(entity.series().is_empty());
    }

    #[test]
    fn test_rejected_update_leaves_entity_untouched() {
        let policy = policy();
        let mut entity = EntityScore::new(EntityClass::Grid, &sample(0.1), at(0));
        entity.update(Some(&sample(0.1)), at(5), &policy).unwrap();

        let late = Sample::new(EntityId(1), OwnerId(300), 9.0).named("Late");
        let err = entity.update(Some(&late), at(4), &policy).unwrap_err();
        assert!(matches!(err, EnforceError::NonMonotonicTimestamp { .. }));
        assert_eq!(entity.name(), "entity-1");
        assert_eq!(entity.owner_id(), OwnerId(100));
        assert_eq!(entity.last_seen_at(), at(5));
        assert_eq!(entity.series().len(), 1);
    }

    #[test]
    fn test_missing_sample_decays_to_zero() {
        let policy = policy();
        let mut entity = EntityScore::new(EntityClass::Player, &sample(0.8), at(0));
        for s in 0..6 {
            entity.update(Some(&sample(0.8)), at(s), &policy).unwrap();
        }
        assert!(entity.score() > 0.5);

        for s in 6..16 {
            entity.update(None, at(s), &policy).unwrap();
        }
        assert_eq!(entity.score(), 0.0);
        assert!(entity.is_decayed(at(15), &policy));
    }

    #[test]
    fn test_snapshot_refreshes_owner() {
        let policy = policy();
        let mut entity = EntityScore::new(EntityClass::Grid, &sample(0.1), at(0));
        let transferred = Sample::new(EntityId(1), OwnerId(200), 0.1)
            .named("Renamed")
            .owner_name("bob");
        entity.update(Some(&transferred), at(1), &policy).unwrap();

        let snapshot = entity.snapshot(at(1));
        assert_eq!(snapshot.owner_id, OwnerId(200));
        assert_eq!(snapshot.owner_name, "bob");
        assert_eq!(snapshot.name, "Renamed");
        assert!(!snapshot.pinned);
        assert_eq!(snapshot.pin_remaining_secs, None);
    }
}

use super::entity_score::{EntityScore, EntitySnapshot};
use crate::config::EnforcementConfig;
use crate::core::{EnforceError, EntityClass, EntityId, Result, Sample, SampleBatch};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashMap;

/// Outcome of feeding one sample batch into a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryUpdate {
    pub created: Vec<EntityId>,
    pub updated: usize,
    pub invalid: usize,
    pub exempt: usize,
    pub duplicates: usize,
}

/// All tracked entities of one class. Exclusively owned by its tracker.
#[derive(Debug)]
pub struct EntityRegistry {
    class: EntityClass,
    entities: HashMap<EntityId, EntityScore>,
    last_taken_at: Option<DateTime<Utc>>,
}

impl EntityRegistry {
    pub fn new(class: EntityClass) -> Self {
        Self {
            class,
            entities: HashMap::new(),
            last_taken_at: None,
        }
    }

    pub fn class(&self) -> EntityClass {
        self.class
    }

    /// Ingests one interval. Every tracked entity is updated exactly once; those
    /// without a usable sample receive a zero point.
    ///
    /// A batch stamped at or before the previous one is rejected whole, before
    /// any entity changes.
    pub fn update(
        &mut self,
        batch: &SampleBatch,
        config: &EnforcementConfig,
    ) -> Result<RegistryUpdate> {
        let policy = config.policy(self.class);
        let now = batch.taken_at;
        if let Some(last) = self.last_taken_at {
            if now <= last {
                warn!("rejecting {} batch at {}: last batch was at {}", self.class, now, last);
                return Err(EnforceError::NonMonotonicTimestamp {
                    last,
                    attempted: now,
                });
            }
        }
        self.last_taken_at = Some(now);
        let mut report = RegistryUpdate::default();

        let mut fresh: HashMap<EntityId, &Sample> = HashMap::with_capacity(batch.samples.len());
        for sample in &batch.samples {
            if !sample.is_valid() {
                warn!(
                    "dropping malformed {} sample: id={} metric={}",
                    self.class, sample.entity_id, sample.metric_ms
                );
                report.invalid += 1;
                continue;
            }
            if config.is_owner_exempt(sample.owner_id)
                || config.is_group_exempt(sample.group_tag.as_deref())
            {
                report.exempt += 1;
                continue;
            }
            if fresh.contains_key(&sample.entity_id) {
                debug!(
                    "duplicate {} sample in one batch: id={}",
                    self.class, sample.entity_id
                );
                report.duplicates += 1;
                continue;
            }
            fresh.insert(sample.entity_id, sample);
        }

        for (id, entity) in self.entities.iter_mut() {
            entity.update(fresh.remove(id), now, policy)?;
            report.updated += 1;
        }

        let mut created: Vec<&Sample> = fresh.into_values().collect();
        created.sort_by_key(|sample| sample.entity_id);
        for sample in created {
            let mut entity = EntityScore::new(self.class, sample, now);
            entity.update(Some(sample), now, policy)?;
            report.created.push(sample.entity_id);
            self.entities.insert(sample.entity_id, entity);
        }

        Ok(report)
    }

    /// Removes entities that have decayed fully. Returns their ids.
    pub fn evict_decayed(&mut self, now: DateTime<Utc>, config: &EnforcementConfig) -> Vec<EntityId> {
        let policy = config.policy(self.class);
        let mut evicted: Vec<EntityId> = self
            .entities
            .values()
            .filter(|entity| entity.is_decayed(now, policy))
            .map(|entity| entity.id())
            .collect();
        evicted.sort();

        for id in &evicted {
            self.entities.remove(id);
            debug!("evicted decayed {} {}", self.class, id);
        }
        evicted
    }

    pub fn stop_tracking(&mut self, id: EntityId) -> Option<EntityScore> {
        self.entities.remove(&id)
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityScore> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> &HashMap<EntityId, EntityScore> {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn snapshots(&self, now: DateTime<Utc>) -> Vec<EntitySnapshot> {
        let mut snapshots: Vec<EntitySnapshot> = self
            .entities
            .values()
            .map(|entity| entity.snapshot(now))
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassPolicy;
    use crate::core::OwnerId;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn config() -> EnforcementConfig {
        EnforcementConfig::new().grids(
            ClassPolicy::new(1.0)
                .tracking_window(10)
                .pin_duration(30)
                .grace_period(0)
                .outlier_fence(None),
        )
    }

    #[test]
    fn test_invalid_and_exempt_samples_are_dropped() {
        let config = config().exempt_owner(OwnerId(9)).exempt_group("ADM");
        let mut registry = EntityRegistry::new(EntityClass::Grid);

        let batch = SampleBatch::new(
            at(0),
            vec![
                Sample::new(EntityId(1), OwnerId(1), f64::NAN),
                Sample::new(EntityId(2), OwnerId(1), -1.0),
                Sample::new(EntityId(3), OwnerId(9), 4.0),
                Sample::new(EntityId(4), OwnerId(1), 4.0).group("adm"),
                Sample::new(EntityId(5), OwnerId(1), 0.5),
                Sample::new(EntityId(5), OwnerId(1), 9.0),
            ],
        );
        let report = registry.update(&batch, &config).unwrap();

        assert_eq!(report.invalid, 2);
        assert_eq!(report.exempt, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.created, vec![EntityId(5)]);
        assert_eq!(registry.len(), 1);
        assert!((registry.get(EntityId(5)).unwrap().score() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_absent_entities_still_update() {
        let config = config();
        let mut registry = EntityRegistry::new(EntityClass::Grid);
        registry
            .update(
                &SampleBatch::new(at(0), vec![Sample::new(EntityId(1), OwnerId(1), 1.0)]),
                &config,
            )
            .unwrap();

        let report = registry.update(&SampleBatch::empty(at(1)), &config).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(registry.get(EntityId(1)).unwrap().series().len(), 2);
        assert!((registry.get(EntityId(1)).unwrap().score() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_decayed_entities_are_evicted() {
        let config = config();
        let mut registry = EntityRegistry::new(EntityClass::Grid);
        registry
            .update(
                &SampleBatch::new(at(0), vec![Sample::new(EntityId(1), OwnerId(1), 0.2)]),
                &config,
            )
            .unwrap();

        for s in 1..10 {
            registry.update(&SampleBatch::empty(at(s)), &config).unwrap();
            assert!(registry.evict_decayed(at(s), &config).is_empty());
        }

        registry.update(&SampleBatch::empty(at(10)), &config).unwrap();
        assert_eq!(registry.evict_decayed(at(10), &config), vec![EntityId(1)]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_backward_batch_changes_nothing() {
        let config = config();
        let mut registry = EntityRegistry::new(EntityClass::Grid);
        registry
            .update(
                &SampleBatch::new(
                    at(10),
                    vec![
                        Sample::new(EntityId(1), OwnerId(1), 0.2),
                        Sample::new(EntityId(2), OwnerId(1), 0.4),
                    ],
                ),
                &config,
            )
            .unwrap();

        let backward = SampleBatch::new(
            at(9),
            vec![
                Sample::new(EntityId(1), OwnerId(5), 3.0).named("Moved"),
                Sample::new(EntityId(3), OwnerId(1), 0.1),
            ],
        );
        let err = registry.update(&backward, &config).unwrap_err();
        assert!(matches!(err, EnforceError::NonMonotonicTimestamp { .. }));

        assert_eq!(registry.len(), 2);
        for id in [EntityId(1), EntityId(2)] {
            let entity = registry.get(id).unwrap();
            assert_eq!(entity.series().len(), 1);
            assert_eq!(entity.owner_id(), OwnerId(1));
            assert_eq!(entity.last_seen_at(), at(10));
        }

        let report = registry
            .update(&SampleBatch::new(at(11), vec![Sample::new(EntityId(3), OwnerId(1), 0.1)]), &config)
            .unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.created, vec![EntityId(3)]);
    }

    #[test]
    fn test_stop_tracking_and_clear() {
        let config = config();
        let mut registry = EntityRegistry::new(EntityClass::Grid);
        registry
            .update(
                &SampleBatch::new(
                    at(0),
                    vec![
                        Sample::new(EntityId(1), OwnerId(1), 0.2),
                        Sample::new(EntityId(2), OwnerId(1), 0.2),
                    ],
                ),
                &config,
            )
            .unwrap();

        assert!(registry.stop_tracking(EntityId(1)).is_some());
        assert!(registry.stop_tracking(EntityId(1)).is_none());
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }
}

use super::entity_score::EntitySnapshot;
use super::owner_index::OwnerIndex;
use super::registry::{EntityRegistry, RegistryUpdate};
use crate::config::EnforcementConfig;
use crate::core::{EntityClass, EntityId, OwnerId, Result, SampleBatch};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Result of one [`EntityTracker::ingest`] call.
#[derive(Debug, Clone, Default)]
pub struct TrackerUpdate {
    pub registry: RegistryUpdate,
    pub evicted: Vec<EntityId>,
}

struct TrackerState {
    registry: EntityRegistry,
    snapshots: Vec<EntitySnapshot>,
    owners: OwnerIndex,
    updated_at: Option<DateTime<Utc>>,
}

impl TrackerState {
    fn refresh_views(&mut self, now: DateTime<Utc>) {
        self.snapshots = self.registry.snapshots(now);
        self.owners = OwnerIndex::build(&self.snapshots);
        self.updated_at = Some(now);
    }
}

/// Owns the registry of one entity class. The enforcement loop is the only
/// writer; inspection reads run concurrently and always receive copies.
pub struct EntityTracker {
    class: EntityClass,
    state: RwLock<TrackerState>,
}

impl EntityTracker {
    pub fn new(class: EntityClass) -> Self {
        Self {
            class,
            state: RwLock::new(TrackerState {
                registry: EntityRegistry::new(class),
                snapshots: Vec::new(),
                owners: OwnerIndex::default(),
                updated_at: None,
            }),
        }
    }

    pub fn class(&self) -> EntityClass {
        self.class
    }

    /// Feeds one interval into the registry, evicts decayed entities and rebuilds
    /// the owner index.
    ///
    /// ```no_run
    /// use chrono::Utc;
    /// use lagguard::{EnforcementConfig, EntityClass, EntityId, EntityTracker, OwnerId, Sample, SampleBatch};
    ///
    /// # tokio_test::block_on(async {
    /// let tracker = EntityTracker::new(EntityClass::Grid);
    /// let batch = SampleBatch::new(Utc::now(), vec![Sample::new(EntityId(7), OwnerId(1), 0.25)]);
    /// tracker.ingest(&batch, &EnforcementConfig::default()).await.unwrap();
    /// assert_eq!(tracker.len().await, 1);
    /// # });
    /// ```
    pub async fn ingest(&self, batch: &SampleBatch, config: &EnforcementConfig) -> Result<TrackerUpdate> {
        let mut state = self.state.write().await;
        let registry = state.registry.update(batch, config)?;
        let evicted = state.registry.evict_decayed(batch.taken_at, config);
        state.refresh_views(batch.taken_at);
        Ok(TrackerUpdate { registry, evicted })
    }

    /// Forgets an entity whose object is confirmed gone.
    pub async fn stop_tracking(&self, id: EntityId) -> Option<EntitySnapshot> {
        let mut state = self.state.write().await;
        state.registry.stop_tracking(id)?;
        let removed = state.snapshots.iter().find(|s| s.id == id).cloned();
        state.snapshots.retain(|s| s.id != id);
        state.owners = OwnerIndex::build(&state.snapshots);
        removed
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.registry.clear();
        state.snapshots.clear();
        state.owners = OwnerIndex::default();
    }

    pub async fn snapshots(&self) -> Vec<EntitySnapshot> {
        self.state.read().await.snapshots.clone()
    }

    pub async fn owner_index(&self) -> OwnerIndex {
        self.state.read().await.owners.clone()
    }

    pub async fn entity(&self, id: EntityId) -> Option<EntitySnapshot> {
        let state = self.state.read().await;
        state.snapshots.iter().find(|s| s.id == id).cloned()
    }

    pub async fn owner_entities(&self, owner: OwnerId) -> Vec<EntitySnapshot> {
        let state = self.state.read().await;
        state
            .snapshots
            .iter()
            .filter(|s| s.owner_id == owner)
            .cloned()
            .collect()
    }

    pub async fn tracked_ids(&self) -> Vec<EntityId> {
        let state = self.state.read().await;
        state.snapshots.iter().map(|s| s.id).collect()
    }

    /// Worst `limit` entities, highest score first.
    pub async fn top(&self, limit: usize) -> Vec<EntitySnapshot> {
        let mut snapshots = self.snapshots().await;
        snapshots.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        snapshots.truncate(limit);
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.registry.len()
    }

    pub async fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.updated_at
    }
}

use super::entity_score::EntitySnapshot;
use crate::core::OwnerId;
use std::collections::HashMap;

/// Owner → that owner's worst-scoring entity. Rebuilt from scratch each interval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerIndex {
    worst: HashMap<OwnerId, EntitySnapshot>,
}

impl OwnerIndex {
    pub fn build(snapshots: &[EntitySnapshot]) -> Self {
        Self::build_filtered(snapshots, |_| true)
    }

    /// Same as [`OwnerIndex::build`] over only the snapshots accepted by `keep`.
    pub fn build_filtered<F>(snapshots: &[EntitySnapshot], keep: F) -> Self
    where
        F: Fn(&EntitySnapshot) -> bool,
    {
        let mut ordered: Vec<&EntitySnapshot> = snapshots.iter().filter(|s| keep(s)).collect();
        // Ascending, so the last write per owner is the worst one.
        ordered.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.id.cmp(&b.id)));

        let mut worst = HashMap::with_capacity(ordered.len());
        for snapshot in ordered {
            worst.insert(snapshot.owner_id, snapshot.clone());
        }
        Self { worst }
    }

    pub fn get(&self, owner: OwnerId) -> Option<&EntitySnapshot> {
        self.worst.get(&owner)
    }

    pub fn len(&self) -> usize {
        self.worst.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worst.is_empty()
    }

    pub fn owners(&self) -> impl Iterator<Item = OwnerId> + '_ {
        self.worst.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OwnerId, &EntitySnapshot)> {
        self.worst.iter()
    }

    /// Entries ordered worst first.
    pub fn ranked(&self) -> Vec<&EntitySnapshot> {
        let mut entries: Vec<&EntitySnapshot> = self.worst.values().collect();
        entries.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityClass, EntityId};
    use crate::scoring::EntityPhase;
    use chrono::Utc;

    fn snapshot(id: u64, owner: u64, score: f64, pinned: bool) -> EntitySnapshot {
        EntitySnapshot {
            id: EntityId(id),
            class: EntityClass::Grid,
            name: format!("grid-{}", id),
            owner_id: OwnerId(owner),
            owner_name: format!("owner-{}", owner),
            score,
            phase: EntityPhase::Evaluated,
            pinned,
            pin_remaining_secs: None,
            last_seen_at: Utc::now(),
        }
    }

    #[test]
    fn test_keeps_worst_entity_per_owner() {
        let snapshots = vec![
            snapshot(1, 10, 0.3, false),
            snapshot(2, 10, 0.9, false),
            snapshot(3, 20, 0.1, false),
        ];
        let index = OwnerIndex::build(&snapshots);

        assert_eq!(index.len(), 2);
        assert_eq!(index.get(OwnerId(10)).unwrap().id, EntityId(2));
        assert_eq!(index.get(OwnerId(20)).unwrap().id, EntityId(3));
    }

    #[test]
    fn test_rebuild_is_stable() {
        let snapshots = vec![
            snapshot(4, 10, 0.5, false),
            snapshot(1, 10, 0.5, false),
            snapshot(2, 30, 2.0, true),
        ];
        assert_eq!(OwnerIndex::build(&snapshots), OwnerIndex::build(&snapshots));
        assert_eq!(OwnerIndex::build(&snapshots).get(OwnerId(10)).unwrap().id, EntityId(4));
    }

    #[test]
    fn test_filtered_and_ranked() {
        let snapshots = vec![
            snapshot(1, 10, 3.0, false),
            snapshot(2, 10, 1.5, true),
            snapshot(3, 20, 2.0, true),
        ];
        let pinned = OwnerIndex::build_filtered(&snapshots, |s| s.pinned);
        assert_eq!(pinned.get(OwnerId(10)).unwrap().id, EntityId(2));

        let ranked: Vec<EntityId> = pinned.ranked().iter().map(|s| s.id).collect();
        assert_eq!(ranked, vec![EntityId(3), EntityId(2)]);
    }
}

use crate::core::{EntityId, OwnerId};
use crate::scoring::EntitySnapshot;
use serde::{Deserialize, Serialize};

/// What an owner is asked to do about their lag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarningState {
    NeedsSelfCheck,
    NeedsReduction,
    MustWaitOutPin,
    Cleared,
}

/// Composite warning for one owner, combining their worst grid and their player load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningRecord {
    pub owner_id: OwnerId,
    pub owner_name: String,
    pub grid: Option<EntitySnapshot>,
    pub player: Option<EntitySnapshot>,
    pub state: WarningState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunishmentRecord {
    pub grid_id: EntityId,
    pub grid_name: String,
    pub owner_id: OwnerId,
    pub owner_name: String,
    pub score: f64,
    pub pinned: bool,
}

impl PunishmentRecord {
    pub fn from_snapshot(snapshot: &EntitySnapshot) -> Self {
        Self {
            grid_id: snapshot.id,
            grid_name: snapshot.name.clone(),
            owner_id: snapshot.owner_id,
            owner_name: snapshot.owner_name.clone(),
            score: snapshot.score,
            pinned: snapshot.pinned,
        }
    }
}

/// Marker shown in the world for a pinned grid. Rank 1 is the worst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub entity_id: EntityId,
    pub score: f64,
    pub remaining_secs: i64,
    pub rank: usize,
}

use super::dispatcher::HostDispatcher;
use super::records::{Marker, WarningState};
use crate::core::{EntityClass, EntityId, OwnerId, Result, Sample};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Attributes per-frame CPU cost to entities over a sampling window.
#[async_trait]
pub trait Profiler: Send + Sync {
    /// Profiles `class` for `window` and returns one sample per observed entity.
    async fn sample(&self, class: EntityClass, window: Duration) -> Result<Vec<Sample>>;
}

/// Answers whether the live object behind a tracked id still exists.
#[async_trait]
pub trait EntityLookup: Send + Sync {
    async fn exists(&self, class: EntityClass, id: EntityId) -> Result<bool>;
}

/// One constituent part of a grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRef {
    pub grid_id: EntityId,
    pub part_id: u64,
    pub type_id: String,
    pub subtype: String,
    /// Current integrity as a fraction of max integrity
    pub integrity: f64,
}

/// Live-object actions used by the punishment executor. Always invoked through
/// the [`HostDispatcher`].
#[async_trait]
pub trait PunishmentActions: Send + Sync {
    /// Parts of a grid, or `None` when the grid no longer exists.
    async fn parts(&self, grid: EntityId) -> Result<Option<Vec<PartRef>>>;

    async fn apply_damage(&self, part: &PartRef, normalized_amount: f64) -> Result<()>;

    async fn disable(&self, part: &PartRef) -> Result<()>;
}

/// In-world markers exposing pinned grids.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn set_active_markers(&self, markers: Vec<Marker>) -> Result<()>;

    async fn clear_markers(&self) -> Result<()>;
}

/// Per-owner warning/quest presentation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn set_warning_state(&self, owner: OwnerId, state: WarningState) -> Result<()>;
}

#[async_trait]
pub trait ChatFeed: Send + Sync {
    async fn announce(&self, message: String) -> Result<()>;
}

/// Everything the enforcement loop talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub profiler: Arc<dyn Profiler>,
    pub lookup: Arc<dyn EntityLookup>,
    pub actions: Arc<dyn PunishmentActions>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub notifier: Arc<dyn Notifier>,
    pub chat: Arc<dyn ChatFeed>,
    pub dispatcher: Arc<dyn HostDispatcher>,
}

//! Read-only inspection surface for interactive commands.
//!
//! Every command returns either its result or a [`CommandFailure`] that carries
//! only a correlation id; the underlying error is logged under that id.

use crate::config::ConfigSource;
use crate::core::{EnforceError, EntityClass, EntityId, OwnerId, Result};
use crate::scoring::{EntitySnapshot, EntityTracker};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{Level, event};
use uuid::Uuid;

/// Opaque failure reported back to whoever issued a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub correlation_id: Uuid,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command failed (ref {})", self.correlation_id)
    }
}

impl std::error::Error for CommandFailure {}

pub type CommandResult<T> = std::result::Result<T, CommandFailure>;

/// Everything known about one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerStatus {
    pub owner_id: OwnerId,
    pub grids: Vec<EntitySnapshot>,
    pub player: Option<EntitySnapshot>,
    pub pinned: bool,
    pub above_warning: bool,
}

#[derive(Clone)]
pub struct Inspector {
    grids: Arc<EntityTracker>,
    players: Arc<EntityTracker>,
    config: Arc<dyn ConfigSource>,
}

impl Inspector {
    pub fn new(
        grids: Arc<EntityTracker>,
        players: Arc<EntityTracker>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            grids,
            players,
            config,
        }
    }

    fn tracker(&self, class: EntityClass) -> &EntityTracker {
        match class {
            EntityClass::Grid => &self.grids,
            EntityClass::Player => &self.players,
        }
    }

    fn guard<T>(command: &str, result: Result<T>) -> CommandResult<T> {
        result.map_err(|err| {
            let correlation_id = Uuid::new_v4();
            event!(
                Level::ERROR,
                command = command,
                correlation_id = %correlation_id,
                error = %err,
                "inspection command failed"
            );
            CommandFailure { correlation_id }
        })
    }

    /// Worst `limit` entities of a class.
    pub async fn top(&self, class: EntityClass, limit: usize) -> CommandResult<Vec<EntitySnapshot>> {
        if limit == 0 {
            return Self::guard(
                "top",
                Err(EnforceError::ExecutionError("limit must be > 0".to_string())),
            );
        }
        Ok(self.tracker(class).top(limit).await)
    }

    pub async fn entity(&self, class: EntityClass, id: EntityId) -> CommandResult<Option<EntitySnapshot>> {
        Ok(self.tracker(class).entity(id).await)
    }

    pub async fn owner_status(&self, owner: OwnerId) -> CommandResult<OwnerStatus> {
        let config = self.config.snapshot();
        let grids = self.grids.owner_entities(owner).await;
        let player = self.players.owner_entities(owner).await.into_iter().next();

        let pinned = grids.iter().chain(player.iter()).any(|s| s.pinned);
        let above_warning = grids
            .iter()
            .any(|s| s.score >= config.grids.warning_threshold)
            || player
                .iter()
                .any(|s| s.score >= config.players.warning_threshold);

        Ok(OwnerStatus {
            owner_id: owner,
            grids,
            player,
            pinned,
            above_warning,
        })
    }

    /// JSON rendering of [`Inspector::top`].
    pub async fn top_json(&self, class: EntityClass, limit: usize) -> CommandResult<String> {
        let top = self.top(class, limit).await?;
        Self::guard(
            "top_json",
            serde_json::to_string_pretty(&top)
                .map_err(|err| EnforceError::ExecutionError(err.to_string())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassPolicy, EnforcementConfig};
    use crate::core::{Sample, SampleBatch};
    use chrono::{DateTime, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    async fn inspector() -> Inspector {
        let config = EnforcementConfig::new()
            .grids(ClassPolicy::new(1.0).grace_period(0).warning_threshold(0.5));
        let grids = Arc::new(EntityTracker::new(EntityClass::Grid));
        let players = Arc::new(EntityTracker::new(EntityClass::Player));
        grids
            .ingest(
                &SampleBatch::new(
                    at(0),
                    vec![
                        Sample::new(EntityId(1), OwnerId(7), 0.2),
                        Sample::new(EntityId(2), OwnerId(7), 0.6),
                    ],
                ),
                &config,
            )
            .await
            .unwrap();
        Inspector::new(grids, players, Arc::new(config))
    }

    #[tokio::test]
    async fn test_owner_status() {
        let inspector = inspector().await;
        let status = inspector.owner_status(OwnerId(7)).await.unwrap();
        assert_eq!(status.grids.len(), 2);
        assert!(status.above_warning);
        assert!(!status.pinned);
        assert!(status.player.is_none());
    }

    #[tokio::test]
    async fn test_failures_are_opaque() {
        let inspector = inspector().await;
        let failure = inspector.top(EntityClass::Grid, 0).await.unwrap_err();
        let message = failure.to_string();
        assert!(message.contains(&failure.correlation_id.to_string()));
        assert!(!message.contains("limit"));
    }

    #[tokio::test]
    async fn test_top_json() {
        let inspector = inspector().await;
        let json = inspector.top_json(EntityClass::Grid, 1).await.unwrap();
        let parsed: Vec<EntitySnapshot> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, EntityId(2));
    }
}

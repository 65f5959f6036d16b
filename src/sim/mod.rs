//! Deterministic in-memory world implementing every enforcement collaborator.
//!
//! Used by the demo binary and the test suites in place of a real game host.

use crate::core::{EnforceError, EntityClass, EntityId, OwnerId, Result, Sample};
use crate::enforcement::{
    Broadcaster, ChatFeed, Collaborators, EntityLookup, HostDispatcher, Marker, Notifier, PartRef,
    Profiler, PunishmentActions, WarningState,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct SimPart {
    pub part: PartRef,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct SimGrid {
    pub name: String,
    pub owner_id: OwnerId,
    pub owner_name: String,
    pub group_tag: Option<String>,
    pub load_ms: f64,
    pub parts: Vec<SimPart>,
}

#[derive(Debug, Clone)]
pub struct SimPlayer {
    pub name: String,
    pub load_ms: f64,
}

#[derive(Debug, Default)]
struct WorldState {
    grids: BTreeMap<EntityId, SimGrid>,
    players: BTreeMap<EntityId, SimPlayer>,
    markers: Vec<Marker>,
    marker_clears: usize,
    warnings: HashMap<OwnerId, WarningState>,
    warning_log: Vec<(OwnerId, WarningState)>,
    chat: Vec<String>,
    damage_calls: usize,
    disable_calls: usize,
    profile_calls: usize,
}

/// Shared handle to the simulated world. Cloning shares state.
#[derive(Clone, Default)]
pub struct SimWorld {
    state: Arc<Mutex<WorldState>>,
    sleep_profile_window: bool,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes profiling actually wait for the requested window.
    pub fn with_real_windows(mut self) -> Self {
        self.sleep_profile_window = true;
        self
    }

    /// Bundles the world as every collaborator, dispatching through `dispatcher`.
    pub fn collaborators(&self, dispatcher: Arc<dyn HostDispatcher>) -> Collaborators {
        let world = Arc::new(self.clone());
        Collaborators {
            profiler: world.clone(),
            lookup: world.clone(),
            actions: world.clone(),
            broadcaster: world.clone(),
            notifier: world.clone(),
            chat: world,
            dispatcher,
        }
    }

    pub async fn spawn_grid(
        &self,
        id: EntityId,
        owner: OwnerId,
        owner_name: &str,
        name: &str,
        load_ms: f64,
        part_types: &[(&str, &str)],
    ) {
        let parts = part_types
            .iter()
            .enumerate()
            .map(|(i, (type_id, subtype))| SimPart {
                part: PartRef {
                    grid_id: id,
                    part_id: i as u64,
                    type_id: type_id.to_string(),
                    subtype: subtype.to_string(),
                    integrity: 1.0,
                },
                enabled: true,
            })
            .collect();

        let mut state = self.state.lock().await;
        state.grids.insert(
            id,
            SimGrid {
                name: name.to_string(),
                owner_id: owner,
                owner_name: owner_name.to_string(),
                group_tag: None,
                load_ms,
                parts,
            },
        );
    }

    pub async fn spawn_player(&self, id: EntityId, name: &str, load_ms: f64) {
        let mut state = self.state.lock().await;
        state.players.insert(
            id,
            SimPlayer {
                name: name.to_string(),
                load_ms,
            },
        );
    }

    pub async fn set_grid_load(&self, id: EntityId, load_ms: f64) {
        if let Some(grid) = self.state.lock().await.grids.get_mut(&id) {
            grid.load_ms = load_ms;
        }
    }

    pub async fn set_grid_group(&self, id: EntityId, tag: &str) {
        if let Some(grid) = self.state.lock().await.grids.get_mut(&id) {
            grid.group_tag = Some(tag.to_string());
        }
    }

    pub async fn set_player_load(&self, id: EntityId, load_ms: f64) {
        if let Some(player) = self.state.lock().await.players.get_mut(&id) {
            player.load_ms = load_ms;
        }
    }

    pub async fn remove_grid(&self, id: EntityId) -> Option<SimGrid> {
        self.state.lock().await.grids.remove(&id)
    }

    pub async fn remove_player(&self, id: EntityId) -> Option<SimPlayer> {
        self.state.lock().await.players.remove(&id)
    }

    pub async fn grid(&self, id: EntityId) -> Option<SimGrid> {
        self.state.lock().await.grids.get(&id).cloned()
    }

    pub async fn markers(&self) -> Vec<Marker> {
        self.state.lock().await.markers.clone()
    }

    pub async fn marker_clears(&self) -> usize {
        self.state.lock().await.marker_clears
    }

    pub async fn warning(&self, owner: OwnerId) -> Option<WarningState> {
        self.state.lock().await.warnings.get(&owner).copied()
    }

    pub async fn warning_log(&self) -> Vec<(OwnerId, WarningState)> {
        self.state.lock().await.warning_log.clone()
    }

    pub async fn chat(&self) -> Vec<String> {
        self.state.lock().await.chat.clone()
    }

    pub async fn damage_calls(&self) -> usize {
        self.state.lock().await.damage_calls
    }

    pub async fn disable_calls(&self) -> usize {
        self.state.lock().await.disable_calls
    }

    pub async fn profile_calls(&self) -> usize {
        self.state.lock().await.profile_calls
    }
}

#[async_trait]
impl Profiler for SimWorld {
    async fn sample(&self, class: EntityClass, window: Duration) -> Result<Vec<Sample>> {
        if self.sleep_profile_window {
            tokio::time::sleep(window).await;
        }

        let mut state = self.state.lock().await;
        state.profile_calls += 1;
        let samples = match class {
            EntityClass::Grid => state
                .grids
                .iter()
                .map(|(id, grid)| Sample {
                    entity_id: *id,
                    entity_name: grid.name.clone(),
                    metric_ms: grid.load_ms,
                    owner_id: grid.owner_id,
                    owner_name: grid.owner_name.clone(),
                    group_tag: grid.group_tag.clone(),
                })
                .collect(),
            EntityClass::Player => state
                .players
                .iter()
                .map(|(id, player)| Sample {
                    entity_id: *id,
                    entity_name: player.name.clone(),
                    metric_ms: player.load_ms,
                    owner_id: OwnerId(id.0),
                    owner_name: player.name.clone(),
                    group_tag: None,
                })
                .collect(),
        };
        Ok(samples)
    }
}

#[async_trait]
impl EntityLookup for SimWorld {
    async fn exists(&self, class: EntityClass, id: EntityId) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(match class {
            EntityClass::Grid => state.grids.contains_key(&id),
            EntityClass::Player => state.players.contains_key(&id),
        })
    }
}

#[async_trait]
impl PunishmentActions for SimWorld {
    async fn parts(&self, grid: EntityId) -> Result<Option<Vec<PartRef>>> {
        let state = self.state.lock().await;
        Ok(state
            .grids
            .get(&grid)
            .map(|g| g.parts.iter().map(|p| p.part.clone()).collect()))
    }

    async fn apply_damage(&self, part: &PartRef, normalized_amount: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.damage_calls += 1;
        let target = find_part(&mut state, part)?;
        target.part.integrity = (target.part.integrity - normalized_amount).max(0.0);
        Ok(())
    }

    async fn disable(&self, part: &PartRef) -> Result<()> {
        let mut state = self.state.lock().await;
        state.disable_calls += 1;
        find_part(&mut state, part)?.enabled = false;
        Ok(())
    }
}

fn find_part<'a>(state: &'a mut WorldState, part: &PartRef) -> Result<&'a mut SimPart> {
    state
        .grids
        .get_mut(&part.grid_id)
        .and_then(|grid| grid.parts.iter_mut().find(|p| p.part.part_id == part.part_id))
        .ok_or_else(|| {
            EnforceError::Collaborator(format!(
                "part {} of grid {} does not exist",
                part.part_id, part.grid_id
            ))
        })
}

#[async_trait]
impl Broadcaster for SimWorld {
    async fn set_active_markers(&self, markers: Vec<Marker>) -> Result<()> {
        self.state.lock().await.markers = markers;
        Ok(())
    }

    async fn clear_markers(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.markers.clear();
        state.marker_clears += 1;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SimWorld {
    async fn set_warning_state(&self, owner: OwnerId, warning: WarningState) -> Result<()> {
        let mut state = self.state.lock().await;
        state.warning_log.push((owner, warning));
        if warning == WarningState::Cleared {
            state.warnings.remove(&owner);
        } else {
            state.warnings.insert(owner, warning);
        }
        Ok(())
    }
}

#[async_trait]
impl ChatFeed for SimWorld {
    async fn announce(&self, message: String) -> Result<()> {
        self.state.lock().await.chat.push(message);
        Ok(())
    }
}

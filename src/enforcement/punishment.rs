use super::collaborators::{PartRef, PunishmentActions};
use super::dispatcher::{HostDispatcher, run_on_host};
use super::exemption::ExemptionPredicate;
use super::records::PunishmentRecord;
use crate::config::{PunishmentMode, PunishmentPolicy};
use crate::core::{EnforceError, EntityId, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Instrument, Level, event, info_span};

/// What one [`PunishmentExecutor::execute`] pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PunishmentOutcome {
    pub started: Vec<EntityId>,
    pub ended: Vec<EntityId>,
    pub missing: Vec<EntityId>,
    pub parts_punished: usize,
    pub parts_exempt: usize,
    /// Cancellation was observed between slices
    pub interrupted: bool,
}

/// Applies the configured action to pinned grids, tracking punishment episodes.
#[derive(Debug, Default)]
pub struct PunishmentExecutor {
    episodes: HashMap<EntityId, DateTime<Utc>>,
}

impl PunishmentExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_punishing(&self, id: EntityId) -> bool {
        self.episodes.contains_key(&id)
    }

    pub fn active_episodes(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.episodes.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Ends every open episode without touching any part.
    pub fn end_all(&mut self, now: DateTime<Utc>) -> Vec<EntityId> {
        let ended = self.active_episodes();
        for id in &ended {
            if let Some(started) = self.episodes.remove(id) {
                event!(
                    Level::INFO,
                    grid = %id,
                    duration_secs = (now - started).num_seconds(),
                    "punishment ended"
                );
            }
        }
        ended
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &mut self,
        targets: &[PunishmentRecord],
        policy: &PunishmentPolicy,
        exemptions: Arc<dyn ExemptionPredicate>,
        actions: Arc<dyn PunishmentActions>,
        dispatcher: &dyn HostDispatcher,
        cancel: &watch::Receiver<bool>,
        now: DateTime<Utc>,
    ) -> Result<PunishmentOutcome> {
        let mut outcome = PunishmentOutcome::default();

        let pinned: HashMap<EntityId, &PunishmentRecord> = targets
            .iter()
            .filter(|record| record.pinned)
            .map(|record| (record.grid_id, record))
            .collect();

        let mut finished: Vec<EntityId> = self
            .episodes
            .keys()
            .filter(|id| !pinned.contains_key(id))
            .copied()
            .collect();
        finished.sort();
        for id in finished {
            if let Some(started) = self.episodes.remove(&id) {
                event!(
                    Level::INFO,
                    grid = %id,
                    duration_secs = (now - started).num_seconds(),
                    "punishment ended"
                );
                outcome.ended.push(id);
            }
        }

        let mut ordered: Vec<&PunishmentRecord> = pinned.values().copied().collect();
        ordered.sort_by_key(|record| record.grid_id);

        for record in ordered {
            if !self.episodes.contains_key(&record.grid_id) {
                self.episodes.insert(record.grid_id, now);
                event!(
                    Level::INFO,
                    grid = %record.grid_id,
                    owner = %record.owner_id,
                    score = record.score,
                    "punishment started"
                );
                outcome.started.push(record.grid_id);
            }

            if !matches!(policy.mode, PunishmentMode::Disable | PunishmentMode::Damage) {
                continue;
            }

            if *cancel.borrow() {
                outcome.interrupted = true;
                break;
            }

            let span = info_span!("punishment.grid", grid = %record.grid_id, mode = ?policy.mode);
            let interrupted = self
                .punish_grid(
                    record,
                    policy,
                    exemptions.as_ref(),
                    actions.clone(),
                    dispatcher,
                    cancel,
                    &mut outcome,
                )
                .instrument(span)
                .await?;
            if interrupted {
                outcome.interrupted = true;
                break;
            }
        }

        Ok(outcome)
    }

    /// Returns true when cancellation stopped the work between slices.
    #[allow(clippy::too_many_arguments)]
    async fn punish_grid(
        &self,
        record: &PunishmentRecord,
        policy: &PunishmentPolicy,
        exemptions: &dyn ExemptionPredicate,
        actions: Arc<dyn PunishmentActions>,
        dispatcher: &dyn HostDispatcher,
        cancel: &watch::Receiver<bool>,
        outcome: &mut PunishmentOutcome,
    ) -> Result<bool> {
        let grid = record.grid_id;
        let lookup = actions.clone();
        let parts = run_on_host(dispatcher, async move { lookup.parts(grid).await }).await?;
        let Some(parts) = parts else {
            event!(Level::WARN, "pinned grid is gone, skipping this interval");
            outcome.missing.push(grid);
            return Ok(false);
        };

        let (exempt, eligible): (Vec<PartRef>, Vec<PartRef>) =
            parts.into_iter().partition(|part| exemptions.is_exempt(part));
        outcome.parts_exempt += exempt.len();

        for slice in eligible.chunks(policy.max_parts_per_slice) {
            let slice = slice.to_vec();
            let actions = actions.clone();
            let mode = policy.mode;
            let damage_normal = policy.damage_normal;
            let floor = policy.min_integrity_normal;

            let touched = run_on_host(dispatcher, async move {
                let mut touched = 0usize;
                for part in &slice {
                    match mode {
                        PunishmentMode::Disable => {
                            actions.disable(part).await?;
                            touched += 1;
                        }
                        PunishmentMode::Damage => {
                            let amount = damage_normal.min(part.integrity - floor);
                            if amount > 0.0 {
                                actions.apply_damage(part, amount).await?;
                                touched += 1;
                            }
                        }
                        PunishmentMode::None | PunishmentMode::Broadcast => {}
                    }
                }
                Ok::<usize, EnforceError>(touched)
            })
            .await?;
            outcome.parts_punished += touched;

            tokio::task::yield_now().await;
            if *cancel.borrow() {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

use super::collaborators::Collaborators;
use super::dispatcher::run_on_host;
use super::exemption::{ExemptionPredicate, PartTypeExemptions};
use super::punishment::{PunishmentExecutor, PunishmentOutcome};
use super::records::{Marker, PunishmentRecord, WarningRecord, WarningState};
use crate::config::{ConfigSource, EnforcementConfig, MessageTemplates, PunishmentMode};
use crate::core::{Clock, EnforceError, EntityClass, EntityId, OwnerId, Result, Sample, SampleBatch};
use crate::scoring::{EntityTracker, OwnerIndex, TrackerUpdate};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Instrument, Level, event, info_span};

/// Cooperative cancellation shared by the loop, its worker and callers.
#[derive(Clone)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolves once cancellation has been requested.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Everything one iteration derived and dispatched.
#[derive(Debug, Clone, Default)]
pub struct IterationReport {
    pub at: Option<DateTime<Utc>>,
    pub grids: TrackerUpdate,
    pub players: TrackerUpdate,
    pub warnings: Vec<WarningRecord>,
    pub punishments: Vec<PunishmentRecord>,
    pub punishment: PunishmentOutcome,
    pub markers: Vec<Marker>,
    pub deleted: Vec<EntityId>,
}

#[derive(Debug, Clone)]
pub enum IterationOutcome {
    Completed(IterationReport),
    /// Enforcement is disabled; derived state has been cleared
    Idle,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    pub iterations: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

/// Periodic control loop: profile, score, warn, punish, broadcast, reconcile.
pub struct EnforcementLoop {
    config: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    collaborators: Collaborators,
    grids: Arc<EntityTracker>,
    players: Arc<EntityTracker>,
    executor: PunishmentExecutor,
    warnings: HashMap<OwnerId, WarningState>,
    markers_active: bool,
    has_state: bool,
    cancel: CancellationHandle,
    cancel_rx: watch::Receiver<bool>,
    stats: LoopStats,
}

impl EnforcementLoop {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
    ) -> Self {
        let (cancel, cancel_rx) = CancellationHandle::new();
        Self {
            config,
            clock,
            collaborators,
            grids: Arc::new(EntityTracker::new(EntityClass::Grid)),
            players: Arc::new(EntityTracker::new(EntityClass::Player)),
            executor: PunishmentExecutor::new(),
            warnings: HashMap::new(),
            markers_active: false,
            has_state: false,
            cancel,
            cancel_rx,
            stats: LoopStats::default(),
        }
    }

    pub fn grids(&self) -> Arc<EntityTracker> {
        self.grids.clone()
    }

    pub fn players(&self) -> Arc<EntityTracker> {
        self.players.clone()
    }

    pub fn tracker(&self, class: EntityClass) -> Arc<EntityTracker> {
        match class {
            EntityClass::Grid => self.grids.clone(),
            EntityClass::Player => self.players.clone(),
        }
    }

    pub fn config_source(&self) -> Arc<dyn ConfigSource> {
        self.config.clone()
    }

    pub fn cancellation(&self) -> CancellationHandle {
        self.cancel.clone()
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn warning_states(&self) -> &HashMap<OwnerId, WarningState> {
        &self.warnings
    }

    pub fn record_error(&mut self, err: &EnforceError) {
        self.stats.failures += 1;
        self.stats.last_error = Some(err.to_string());
        event!(Level::ERROR, error = %err, "enforcement iteration failed");
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Runs one full iteration. Never overlaps with another because it takes `&mut self`.
    pub async fn run_iteration(&mut self) -> Result<IterationOutcome> {
        if self.is_cancelled() {
            return Ok(IterationOutcome::Cancelled);
        }

        let config = self.config.snapshot();
        if !config.enabled {
            if self.has_state {
                event!(Level::INFO, "enforcement disabled, clearing derived state");
                self.cleanup().await;
                self.grids.clear().await;
                self.players.clear().await;
                self.has_state = false;
            }
            return Ok(IterationOutcome::Idle);
        }
        config.validate()?;

        let span = info_span!("enforcement.iteration", iteration = self.stats.iterations + 1);
        let outcome = self.iterate(&config).instrument(span).await?;
        if matches!(outcome, IterationOutcome::Completed(_)) {
            self.stats.iterations += 1;
        }
        Ok(outcome)
    }

    async fn iterate(&mut self, config: &EnforcementConfig) -> Result<IterationOutcome> {
        // 1. profile
        let Some((grid_samples, player_samples)) = self.profile(config).await? else {
            return Ok(IterationOutcome::Cancelled);
        };
        let now = self.clock.now();
        self.has_state = true;

        // 2. score
        let mut report = IterationReport {
            at: Some(now),
            ..IterationReport::default()
        };
        report.grids = self
            .grids
            .ingest(&SampleBatch::new(now, grid_samples), config)
            .await?;
        report.players = self
            .players
            .ingest(&SampleBatch::new(now, player_samples), config)
            .await?;
        let grid_owners = self.grids.owner_index().await;
        let player_owners = self.players.owner_index().await;
        if self.is_cancelled() {
            return Ok(IterationOutcome::Cancelled);
        }

        let grid_snapshots = self.grids.snapshots().await;
        let pinned_owners = OwnerIndex::build_filtered(&grid_snapshots, |s| s.pinned);

        // 3. warnings
        report.warnings = derive_warnings(&grid_owners, &pinned_owners, &player_owners, config);
        self.publish_warnings(&report.warnings).await?;

        // 4. punishments
        report.punishments = pinned_owners
            .ranked()
            .into_iter()
            .map(PunishmentRecord::from_snapshot)
            .collect();

        let exemptions: Arc<dyn ExemptionPredicate> =
            Arc::new(PartTypeExemptions::new(&config.exempt_parts));
        report.punishment = self
            .executor
            .execute(
                &report.punishments,
                &config.punishment,
                exemptions,
                self.collaborators.actions.clone(),
                self.collaborators.dispatcher.as_ref(),
                &self.cancel_rx,
                now,
            )
            .await?;
        self.announce_started(&report, config).await;
        if report.punishment.interrupted || self.is_cancelled() {
            return Ok(IterationOutcome::Cancelled);
        }

        // 5. broadcasts
        report.markers = self.publish_markers(&pinned_owners, config).await?;

        // 6. reconcile
        report.deleted = self.reconcile(config).await?;

        event!(
            Level::DEBUG,
            grids = report.grids.registry.updated + report.grids.registry.created.len(),
            players = report.players.registry.updated + report.players.registry.created.len(),
            warnings = report.warnings.len(),
            punished = report.punishments.len(),
            "enforcement iteration complete"
        );
        Ok(IterationOutcome::Completed(report))
    }

    /// Samples both classes concurrently. `None` when cancelled mid-window.
    async fn profile(&self, config: &EnforcementConfig) -> Result<Option<(Vec<Sample>, Vec<Sample>)>> {
        let window = config.profile_window_duration();

        let grid_profiler = self.collaborators.profiler.clone();
        let grid_task =
            tokio::spawn(async move { grid_profiler.sample(EntityClass::Grid, window).await });
        let player_profiler = self.collaborators.profiler.clone();
        let player_task =
            tokio::spawn(async move { player_profiler.sample(EntityClass::Player, window).await });
        let grid_abort = grid_task.abort_handle();
        let player_abort = player_task.abort_handle();

        let mut cancel = self.cancel_rx.clone();
        tokio::select! {
            joined = async { tokio::join!(grid_task, player_task) } => {
                let (grids, players) = joined;
                Ok(Some((grids??, players??)))
            }
            _ = cancelled(&mut cancel) => {
                grid_abort.abort();
                player_abort.abort();
                Ok(None)
            }
        }
    }

    async fn publish_warnings(&mut self, records: &[WarningRecord]) -> Result<()> {
        let mut next: HashMap<OwnerId, WarningState> = HashMap::with_capacity(records.len());
        for record in records {
            next.insert(record.owner_id, record.state);
        }

        let notifier = &self.collaborators.notifier;
        for record in records {
            if self.warnings.get(&record.owner_id) != Some(&record.state) {
                notifier
                    .set_warning_state(record.owner_id, record.state)
                    .await?;
            }
        }

        let mut cleared: Vec<OwnerId> = self
            .warnings
            .keys()
            .filter(|owner| !next.contains_key(owner))
            .copied()
            .collect();
        cleared.sort();
        for owner in cleared {
            notifier.set_warning_state(owner, WarningState::Cleared).await?;
        }

        self.warnings = next;
        Ok(())
    }

    async fn announce_started(&self, report: &IterationReport, config: &EnforcementConfig) {
        if config.punishment.mode == PunishmentMode::None {
            return;
        }
        for id in &report.punishment.started {
            let Some(record) = report.punishments.iter().find(|r| r.grid_id == *id) else {
                continue;
            };
            let message = MessageTemplates::render(
                &config.messages.punishment_started,
                &record.owner_name,
                &record.grid_name,
                record.score,
            );
            if let Err(err) = self.collaborators.chat.announce(message).await {
                event!(Level::WARN, error = %err, "punishment announcement failed");
            }
        }
    }

    async fn publish_markers(
        &mut self,
        pinned_owners: &OwnerIndex,
        config: &EnforcementConfig,
    ) -> Result<Vec<Marker>> {
        let broadcaster = self.collaborators.broadcaster.clone();
        let dispatcher = self.collaborators.dispatcher.clone();

        if config.punishment.mode != PunishmentMode::Broadcast {
            if self.markers_active {
                run_on_host(dispatcher.as_ref(), async move { broadcaster.clear_markers().await })
                    .await?;
                self.markers_active = false;
            }
            return Ok(Vec::new());
        }

        let markers: Vec<Marker> = pinned_owners
            .ranked()
            .into_iter()
            .enumerate()
            .map(|(i, snapshot)| Marker {
                entity_id: snapshot.id,
                score: snapshot.score,
                remaining_secs: snapshot.pin_remaining_secs.unwrap_or(0),
                rank: i + 1,
            })
            .collect();

        let published = markers.clone();
        run_on_host(dispatcher.as_ref(), async move {
            broadcaster.set_active_markers(published).await
        })
        .await?;
        self.markers_active = !markers.is_empty();
        Ok(markers)
    }

    /// Stops tracking objects that no longer exist. Returns deleted grid ids.
    async fn reconcile(&self, config: &EnforcementConfig) -> Result<Vec<EntityId>> {
        let lookup = &self.collaborators.lookup;

        for id in self.players.tracked_ids().await {
            if !lookup.exists(EntityClass::Player, id).await? {
                self.players.stop_tracking(id).await;
            }
        }

        let mut deleted = Vec::new();
        for id in self.grids.tracked_ids().await {
            if lookup.exists(EntityClass::Grid, id).await? {
                continue;
            }
            let Some(snapshot) = self.grids.stop_tracking(id).await else {
                continue;
            };
            deleted.push(id);
            event!(Level::DEBUG, grid = %id, "tracked grid no longer exists");

            if snapshot.score >= config.grids.warning_threshold {
                let message = MessageTemplates::render(
                    &config.messages.deleted_while_flagged,
                    &snapshot.owner_name,
                    &snapshot.name,
                    snapshot.score,
                );
                if let Err(err) = self.collaborators.chat.announce(message).await {
                    event!(Level::WARN, error = %err, "deletion notice failed");
                }
            }
        }
        Ok(deleted)
    }

    /// Best-effort teardown of everything presented to players.
    pub async fn cleanup(&mut self) {
        let broadcaster = self.collaborators.broadcaster.clone();
        let dispatcher = self.collaborators.dispatcher.clone();
        if let Err(err) =
            run_on_host(dispatcher.as_ref(), async move { broadcaster.clear_markers().await }).await
        {
            event!(Level::WARN, error = %err, "clearing markers failed during cleanup");
        }
        self.markers_active = false;

        let mut owners: Vec<OwnerId> = self.warnings.keys().copied().collect();
        owners.sort();
        for owner in owners {
            if let Err(err) = self
                .collaborators
                .notifier
                .set_warning_state(owner, WarningState::Cleared)
                .await
            {
                event!(Level::WARN, owner = %owner, error = %err, "clearing warning failed");
            }
        }
        self.warnings.clear();

        self.executor.end_all(self.clock.now());
    }
}

/// Owners whose worst grid or player is above its warning threshold, or who
/// have any pinned grid or player. A pinned grid takes the record's grid slot
/// even when a sibling grid currently scores higher.
pub fn derive_warnings(
    grid_owners: &OwnerIndex,
    pinned_grids: &OwnerIndex,
    player_owners: &OwnerIndex,
    config: &EnforcementConfig,
) -> Vec<WarningRecord> {
    let owners: BTreeSet<OwnerId> = grid_owners
        .owners()
        .chain(pinned_grids.owners())
        .chain(player_owners.owners())
        .collect();
    let mut records = Vec::new();

    for owner in owners {
        let worst_grid = grid_owners.get(owner);
        let pinned_grid = pinned_grids.get(owner);
        let player = player_owners.get(owner);

        let state = if pinned_grid.is_some() || player.is_some_and(|s| s.pinned) {
            WarningState::MustWaitOutPin
        } else {
            let entries = [
                worst_grid.map(|s| (s, config.grids.warning_threshold)),
                player.map(|s| (s, config.players.warning_threshold)),
            ];
            let entries: Vec<_> = entries.into_iter().flatten().collect();

            if entries.iter().any(|(s, _)| s.score >= 1.0) {
                WarningState::NeedsReduction
            } else if entries.iter().any(|(s, threshold)| s.score >= *threshold) {
                WarningState::NeedsSelfCheck
            } else {
                continue;
            }
        };

        let grid = pinned_grid.or(worst_grid);
        let owner_name = grid
            .or(player)
            .map(|s| s.owner_name.clone())
            .unwrap_or_default();
        records.push(WarningRecord {
            owner_id: owner,
            owner_name,
            grid: grid.cloned(),
            player: player.cloned(),
            state,
        });
    }
    records
}

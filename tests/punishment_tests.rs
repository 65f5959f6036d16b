/// Punishment executor tests
///
/// Episodes, slicing, exemptions, integrity floor and cancellation between slices
/// Run with: cargo test --test punishment_tests

use async_trait::async_trait;
use chrono::Utc;
use lagguard::enforcement::{
    ExemptionPredicate, HostDispatcher, HostJob, PartTypeExemptions, PunishmentActions,
    PunishmentExecutor,
};
use lagguard::sim::SimWorld;
use lagguard::{
    EntityId, InlineDispatcher, OwnerId, PartTypeRule, PunishmentMode, PunishmentPolicy,
    PunishmentRecord, Result,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

fn record(id: u64, pinned: bool) -> PunishmentRecord {
    PunishmentRecord {
        grid_id: EntityId(id),
        grid_name: format!("grid-{}", id),
        owner_id: OwnerId(1),
        owner_name: "owner".to_string(),
        score: 1.5,
        pinned,
    }
}

fn policy(mode: PunishmentMode, slice: usize) -> PunishmentPolicy {
    PunishmentPolicy {
        mode,
        max_parts_per_slice: slice,
        ..PunishmentPolicy::default()
    }
}

fn no_exemptions() -> Arc<dyn ExemptionPredicate> {
    Arc::new(PartTypeExemptions::default())
}

/// Runs jobs inline and requests cancellation once `after` jobs have run.
struct CancelAfter {
    remaining: AtomicUsize,
    cancel: watch::Sender<bool>,
}

#[async_trait]
impl HostDispatcher for CancelAfter {
    async fn submit(&self, job: HostJob) -> Result<()> {
        job.await;
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.cancel.send(true);
        }
        Ok(())
    }
}

#[tokio::test]
async fn episodes_start_once_and_end_when_released() {
    let world = SimWorld::new();
    world.spawn_grid(EntityId(1), OwnerId(1), "owner", "G", 2.0, &[]).await;
    let actions: Arc<dyn PunishmentActions> = Arc::new(world.clone());
    let (_tx, rx) = watch::channel(false);
    let mut executor = PunishmentExecutor::new();
    let policy = policy(PunishmentMode::Broadcast, 10);

    let first = executor
        .execute(
            &[record(1, true)],
            &policy,
            no_exemptions(),
            actions.clone(),
            &InlineDispatcher,
            &rx,
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(first.started, vec![EntityId(1)]);
    assert!(executor.is_punishing(EntityId(1)));

    let second = executor
        .execute(
            &[record(1, true)],
            &policy,
            no_exemptions(),
            actions.clone(),
            &InlineDispatcher,
            &rx,
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(second.started.is_empty());

    let third = executor
        .execute(
            &[record(1, false)],
            &policy,
            no_exemptions(),
            actions,
            &InlineDispatcher,
            &rx,
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(third.ended, vec![EntityId(1)]);
    assert!(executor.active_episodes().is_empty());
}

#[tokio::test]
async fn parts_are_processed_in_slices_and_exemptions_apply() {
    let world = SimWorld::new();
    let mut parts = vec![("Light", "Small"); 10];
    parts.push(("Beacon", "Large"));
    world.spawn_grid(EntityId(1), OwnerId(1), "owner", "G", 2.0, &parts).await;

    let exemptions: Arc<dyn ExemptionPredicate> =
        Arc::new(PartTypeExemptions::new(&[PartTypeRule::exact("Beacon", "Large")]));
    let (_tx, rx) = watch::channel(false);
    let mut executor = PunishmentExecutor::new();

    let outcome = executor
        .execute(
            &[record(1, true)],
            &policy(PunishmentMode::Disable, 3),
            exemptions,
            Arc::new(world.clone()),
            &InlineDispatcher,
            &rx,
            Utc::now(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.parts_punished, 10);
    assert_eq!(outcome.parts_exempt, 1);
    assert!(!outcome.interrupted);
    assert_eq!(world.disable_calls().await, 10);

    let grid = world.grid(EntityId(1)).await.unwrap();
    assert!(grid.parts.last().unwrap().enabled);
}

#[tokio::test]
async fn damage_stops_at_the_integrity_floor() {
    let world = SimWorld::new();
    world.spawn_grid(EntityId(1), OwnerId(1), "owner", "G", 2.0, &[("Armor", "Heavy")]).await;
    let (_tx, rx) = watch::channel(false);
    let mut executor = PunishmentExecutor::new();
    let policy = PunishmentPolicy {
        mode: PunishmentMode::Damage,
        damage_normal: 0.3,
        min_integrity_normal: 0.5,
        max_parts_per_slice: 10,
    };

    for _ in 0..4 {
        executor
            .execute(
            &[record(1, true)],
            &policy,
            no_exemptions(),
            Arc::new(world.clone()),
            &InlineDispatcher,
            &rx,
            Utc::now(),
        )
            .await
            .unwrap();
    }

    let integrity = world.grid(EntityId(1)).await.unwrap().parts[0].part.integrity;
    assert!((integrity - 0.5).abs() < 1e-9);
    assert_eq!(world.damage_calls().await, 2);
}

#[tokio::test]
async fn missing_grid_is_skipped() {
    let world = SimWorld::new();
    let (_tx, rx) = watch::channel(false);
    let mut executor = PunishmentExecutor::new();

    let outcome = executor
        .execute(
            &[record(404, true)],
            &policy(PunishmentMode::Damage, 10),
            no_exemptions(),
            Arc::new(world.clone()),
            &InlineDispatcher,
            &rx,
            Utc::now(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.missing, vec![EntityId(404)]);
    assert_eq!(outcome.parts_punished, 0);
    assert!(executor.is_punishing(EntityId(404)));
}

#[tokio::test]
async fn cancellation_finishes_the_current_slice_only() {
    let world = SimWorld::new();
    world.spawn_grid(EntityId(1), OwnerId(1), "owner", "G", 2.0, &[("Rotor", "Small"); 9]).await;

    let (tx, rx) = watch::channel(false);
    // First job is the part lookup, second is the first slice.
    let dispatcher = CancelAfter {
        remaining: AtomicUsize::new(2),
        cancel: tx,
    };
    let mut executor = PunishmentExecutor::new();

    let outcome = executor
        .execute(
            &[record(1, true)],
            &policy(PunishmentMode::Disable, 3),
            no_exemptions(),
            Arc::new(world.clone()),
            &dispatcher,
            &rx,
            Utc::now(),
        )
        .await
        .unwrap();

    assert!(outcome.interrupted);
    assert_eq!(outcome.parts_punished, 3);
    assert_eq!(world.disable_calls().await, 3);
}

// ============================================================================
// lagguard Library
// ============================================================================

pub mod config;
pub mod core;
pub mod enforcement;
pub mod inspect;
pub mod scoring;
pub mod series;
pub mod sim;

// Re-export main types for convenience
pub use config::{
    ClassPolicy, ConfigSource, EnforcementConfig, MessageTemplates, PartTypeRule,
    PunishmentMode, PunishmentPolicy, SharedConfig,
};
pub use core::{
    Clock, EnforceError, EntityClass, EntityId, ManualClock, OwnerId, Result, Sample,
    SampleBatch, SystemClock,
};
pub use enforcement::{
    CancellationHandle, ChannelDispatcher, Collaborators, EnforcementLoop, EnforcementWorker,
    InlineDispatcher, IterationOutcome, IterationReport, Marker, PunishmentRecord,
    WarningRecord, WarningState, spawn_enforcement_worker,
};
pub use inspect::{CommandFailure, Inspector, OwnerStatus};
pub use scoring::{
    EntityPhase, EntityRegistry, EntityScore, EntitySnapshot, EntityTracker, OwnerIndex,
};
pub use series::{OutlierScorer, TimeSeries};

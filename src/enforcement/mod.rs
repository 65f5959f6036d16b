pub mod collaborators;
pub mod dispatcher;
pub mod engine;
pub mod exemption;
pub mod punishment;
pub mod records;
pub mod worker;

pub use collaborators::{
    Broadcaster, ChatFeed, Collaborators, EntityLookup, Notifier, PartRef, Profiler,
    PunishmentActions,
};
pub use dispatcher::{ChannelDispatcher, HostDispatcher, HostJob, InlineDispatcher, run_on_host};
pub use engine::{
    CancellationHandle, EnforcementLoop, IterationOutcome, IterationReport, LoopStats,
    derive_warnings,
};
pub use exemption::{ExemptionPredicate, PartTypeExemptions};
pub use punishment::{PunishmentExecutor, PunishmentOutcome};
pub use records::{Marker, PunishmentRecord, WarningRecord, WarningState};
pub use worker::{EnforcementWorker, spawn_enforcement_worker};

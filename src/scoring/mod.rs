pub mod entity_score;
pub mod owner_index;
pub mod registry;
pub mod tracker;

pub use entity_score::{EntityPhase, EntityScore, EntitySnapshot};
pub use owner_index::OwnerIndex;
pub use registry::{EntityRegistry, RegistryUpdate};
pub use tracker::{EntityTracker, TrackerUpdate};

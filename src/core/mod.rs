pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EnforceError, Result};
pub use types::{EntityClass, EntityId, OwnerId, Sample, SampleBatch};

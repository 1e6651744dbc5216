//! Jobs as handed out by the control plane, and their local run state.
//!
//! - `model` - `Job` snapshot, host descriptors, wire payload, `JobStatus`
//! - `state` - `JobRun` bookkeeping (transitions + timestamps) for one execution

pub mod model;
pub mod state;

pub use model::{HostAuth, HostDescriptor, Job, JobPayload, JobStatus};
pub use state::{JobRun, StatusTransition};

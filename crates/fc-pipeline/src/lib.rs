//! Bounded-concurrency reply processor, and the Supervisor that drives it
//! alongside the dispatch and schedule-sync loops.

mod error;
mod pipeline;
mod ports;
mod supervisor;

pub use error::{PipelineError, Result};
pub use pipeline::Pipeline;
pub use ports::DebounceCheck;
pub use supervisor::{Supervisor, SupervisorConfig};

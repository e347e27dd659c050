// Supervised runs turn panics into `error` states, which needs unwinding.
#[cfg(panic = "abort")]
compile_error!("jobpulse-jobs requires panic = \"unwind\"");

mod batch;
mod error;
mod orchestrator;
mod store;

pub use batch::chunk;
pub use error::JobError;
pub use orchestrator::{JobOrchestrator, JobReport, PipelineSettings, StartOutcome};
pub use store::{JobStore, MemoryJobStore};

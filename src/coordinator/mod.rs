pub mod run_coordinator;

pub use run_coordinator::{ResumeMode, RunCoordinator, RunSummary};

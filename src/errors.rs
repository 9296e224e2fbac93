// src/errors.rs
use thiserror::Error;

/// Run-level failures. Each of these aborts the run and leaves it resumable.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to fetch population: {0}")]
    PopulationFetch(String),

    #[error("checkpoint at index {index} for run {run_id} could not be persisted after {attempts} attempts: {reason}")]
    CheckpointPersistence {
        run_id: String,
        index: usize,
        attempts: u32,
        reason: String,
    },

    #[error("population changed since run {run_id} started (expected {expected_size} persons / digest {expected_digest}, found {found_size} / {found_digest}); start a new run")]
    SnapshotDrift {
        run_id: String,
        expected_size: usize,
        found_size: usize,
        expected_digest: String,
        found_digest: String,
    },

    #[error("run {0} not found")]
    RunNotFound(String),

    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },
}

/// Per-pair failures of the external judgment service. Logged and isolated, never fatal.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("service returned status {0}")]
    BadStatus(u16),

    #[error("could not parse response: {0}")]
    Unparseable(String),
}

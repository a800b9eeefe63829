use std::path::PathBuf;

use thiserror::Error;

use crate::lifecycle::Stage;

/// Terminal failures of the loader. None of these are retried: their
/// preconditions are fixed at process start, so a retry without an
/// external fix cannot change the outcome.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Artifact missing, unreadable, or failing static validation.
    #[error("failed to open bytecode object `{path}`: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    /// The kernel declined to load the program (verifier rejection,
    /// license mismatch, disallowed helper).
    #[error("kernel rejected the program: {0}")]
    LoadRejected(String),

    /// No usable entry point with the requested name in the object.
    #[error("program `{name}` not usable: {reason}")]
    ProgramNotFound { name: String, reason: String },

    /// Hook binding rejected.
    #[error("failed to attach to {hook}: {reason}")]
    AttachFailed { hook: String, reason: String },

    /// Termination handler could not be installed.
    #[error("failed to install termination handler: {0}")]
    Signal(String),

    /// Lifecycle operation invoked out of order.
    #[error("`{op}` is not valid in stage {stage:?}")]
    InvalidStage { op: &'static str, stage: Stage },
}

impl LoaderError {
    /// Process exit code for this failure. Each setup stage gets its
    /// own code so "never attached" is distinguishable from "ran and
    /// was stopped" (exit 0).
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::OpenFailed { .. } => 1,
            Self::LoadRejected(_) => 2,
            Self::ProgramNotFound { .. } => 3,
            Self::AttachFailed { .. } => 4,
            Self::Signal(_) | Self::InvalidStage { .. } => 70,
        }
    }
}

//! Error types.

use thiserror::Error;

/// Misuse of the reactive API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    #[error("cannot run an inactive effect scope")]
    InactiveScope,

    #[error("on_scope_dispose() called with no active effect scope")]
    NoActiveScope,

    #[error("on_effect_cleanup() called with no active effect")]
    NoActiveEffect,

    #[error("on_watcher_cleanup() called outside of a watcher callback")]
    NoActiveWatcher,

    #[error("computed value is read-only")]
    ReadonlyComputed,

    #[error("expected a reactive {expected}, found a reactive {found}")]
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

/// Failure of a scheduled job, reported at the flush boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("job {id:?} panicked: {message}")]
    JobPanicked { id: Option<u32>, message: String },

    #[error("maximum recursive updates exceeded for job {id:?} (limit {limit})")]
    RecursionLimit { id: Option<u32>, limit: u32 },
}

/// Invalid scheduler configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid scheduler config: {0}")]
    Json(#[from] serde_json::Error),
}

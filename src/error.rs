//! Error taxonomy for the deliberation core.
//!
//! Each layer recovers locally up to its boundary: transport problems are
//! retried by the model slot, parse rejections are retried by the
//! think-cycle, retrieval failures become per-question warnings, and every
//! recoverable failure ends up as an error record in the shared state
//! rather than an unwound error. Only configuration-class failures can
//! stop a run.

use thiserror::Error;

/// Transport and runtime failures from the local model runtime.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// The runtime could not be reached at all.
    #[error("model runtime unreachable: {message}")]
    Unavailable {
        /// Transport-level detail.
        message: String,
    },

    /// The requested model is not present in the runtime.
    #[error("model `{model}` not present in the runtime")]
    ModelAbsent {
        /// Model identifier that was probed.
        model: String,
    },

    /// The call did not complete before its deadline.
    #[error("model runtime call exceeded its deadline")]
    Timeout,

    /// Any other runtime-side failure.
    #[error("model runtime error (status {status}): {message}")]
    Api {
        /// HTTP status reported by the runtime.
        status: u16,
        /// Response body excerpt.
        message: String,
    },
}

impl RuntimeError {
    /// Whether another load attempt may succeed.
    ///
    /// `Unavailable` and `ModelAbsent` are worth retrying (the runtime may
    /// come back, the model may finish pulling). `Timeout` is retried only
    /// when the overall deadline still permits an attempt, which the slot
    /// checks separately. `Api` failures are not transient.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::ModelAbsent { .. } | Self::Timeout
        )
    }
}

/// Failures surfaced by an agent's think-cycle.
///
/// These never cross the pipeline boundary: the think-cycle converts each
/// into a degraded-but-typed output plus an [`ErrorRecord`]
/// (`crate::state::ErrorRecord`) in the shared state.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The slot exhausted its load retry budget.
    #[error("failed to load model `{model}` after {attempts} attempts: {last}")]
    ModelLoadFailed {
        /// Model identifier that could not be loaded.
        model: String,
        /// Number of load attempts made.
        attempts: u32,
        /// The failure from the final attempt.
        last: RuntimeError,
    },

    /// Model output could not be converted to the agent's typed output.
    #[error("model output rejected: {message}")]
    ParseRejected {
        /// What was wrong with the output.
        message: String,
    },

    /// A runtime failure during generation (not retried at this layer).
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The caller cancelled the run.
    #[error("cancelled by caller")]
    Cancelled,
}

/// A rejection from an agent's `parse` hook.
///
/// Distinct from [`AgentError::ParseRejected`] so that the think-cycle can
/// decide whether the rejection is worth a generation retry.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ParseRejection {
    /// Why the output was rejected.
    pub message: String,
}

impl ParseRejection {
    /// Creates a rejection with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A failed retrieval sub-query. Non-fatal: the retriever converts these
/// into per-question warnings and continues.
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    /// Web search sub-query failed.
    #[error("web search failed: {message}")]
    Web {
        /// Failure detail.
        message: String,
    },

    /// Vector store sub-query failed.
    #[error("vector search failed: {message}")]
    Vector {
        /// Failure detail.
        message: String,
    },
}

/// Invalid or missing configuration. Surfaced immediately; the core
/// refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is out of range or malformed.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Configuration key.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Failures that halt the pipeline engine before or instead of a run.
///
/// Everything else the engine encounters becomes an error record in the
/// returned shared state.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A mode's sequence names an agent that was never registered.
    #[error("no agent registered for `{agent}` (required by mode `{mode}`)")]
    MissingAgent {
        /// The missing agent.
        agent: crate::state::AgentId,
        /// The mode that requires it.
        mode: crate::state::Mode,
    },
}

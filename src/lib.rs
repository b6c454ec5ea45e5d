//! Conclave: deliberative multi-agent orchestration for local-first
//! knowledge synthesis.
//!
//! Given a free-form brief and an execution mode, a sequence of
//! specialized agents transforms the brief into a structured artifact
//! (research report, project specification, or learning path). Each
//! agent consumes prior agents' outputs from a shared deliberation
//! state, calls a local model runtime to produce JSON, and contributes
//! typed results back. A single-slot loader enforces that at most one
//! model is resident in accelerator memory at a time.
//!
//! # Architecture
//!
//! ```text
//! brief + mode → PipelineEngine
//!   ├── Interpreter  → Intent
//!   ├── Planner      → Plan (research-question DAG)
//!   ├── Grounder     → EvidenceRetriever (web + vector fanout)
//!   │                  → one grounded answer per question
//!   ├── Auditor      → AuditReport
//!   ├── Visualizer   → Visualizations          (project mode)
//!   └── Judge        → FinalArtifact + consensus score
//!         └── below threshold? rerun Grounder → ... → Judge
//! ```
//!
//! Every model invocation goes through [`runtime::ModelSlot`], which
//! serializes access to the accelerator and swaps models with retry and
//! backoff. Agent failures degrade to typed fallbacks and are recorded
//! in [`state::SharedState::errors`]; the pipeline always completes
//! with a state.

pub mod agents;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod retrieval;
pub mod runtime;
pub mod state;

// Re-export key types
pub use config::{CoreConfig, ModelDescriptor};
pub use error::{AgentError, ConfigError, EngineError, RetrievalError, RuntimeError};
pub use output::AgentOutput;
pub use pipeline::{PipelineEngine, RunRequest};
pub use retrieval::{CitationRegistry, EvidenceRetriever};
pub use runtime::{ModelRuntime, ModelSlot, OllamaClient};
pub use state::{AgentId, Mode, SharedState};

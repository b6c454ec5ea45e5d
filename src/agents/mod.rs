//! The deliberation agents and their shared think-cycle.
//!
//! # Architecture
//!
//! ```text
//! PipelineEngine
//!   └── for each agent in the mode's sequence:
//!       agent.think(state, ctx)
//!         ├── prepare_input(state) → prompt::assemble
//!         ├── slot.with_model → runtime.generate (parse-retry loop)
//!         ├── extract::extract_object → parse(raw, state)
//!         └── on failure: state.errors += record, degrade(state)
//! ```
//!
//! The grounder overrides the cycle to add evidence retrieval and
//! per-question generation; every other agent uses the default.

pub mod auditor;
pub mod grounder;
pub mod interpreter;
pub mod judge;
pub mod planner;
pub mod prompt;
pub mod think;
pub mod visualizer;

pub use auditor::Auditor;
pub use grounder::Grounder;
pub use interpreter::Interpreter;
pub use judge::Judge;
pub use planner::Planner;
pub use think::{DeliberativeAgent, ThinkContext};
pub use visualizer::Visualizer;

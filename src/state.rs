//! Shared deliberation state and run identity types.
//!
//! One [`SharedState`] exists per run. The engine creates it, each agent's
//! think-cycle reads it and contributes its single declared field, and the
//! caller receives it back when the pipeline finishes. Nothing here is
//! shared across runs and no lock is needed: agents execute strictly
//! sequentially.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::output::{
    AgentOutput, AuditReport, FinalArtifact, Intent, Plan, ResearchFinding, RubricScores,
    Visualization,
};
use crate::retrieval::{CitationRegistry, RetrievalWarning, SourceRecord};

/// Execution mode: selects the agent sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Produce a research report.
    Research,
    /// Produce a project specification.
    Project,
    /// Produce a learning path.
    Learn,
}

impl Mode {
    /// The ordered agent sequence for this mode.
    #[must_use]
    pub const fn sequence(self) -> &'static [AgentId] {
        match self {
            Self::Research => &[
                AgentId::Interpreter,
                AgentId::Planner,
                AgentId::Grounder,
                AgentId::Auditor,
                AgentId::Judge,
            ],
            Self::Project => &[
                AgentId::Interpreter,
                AgentId::Planner,
                AgentId::Auditor,
                AgentId::Visualizer,
                AgentId::Judge,
            ],
            Self::Learn => &[
                AgentId::Interpreter,
                AgentId::Planner,
                AgentId::Grounder,
                AgentId::Judge,
            ],
        }
    }

    /// The post-planner subsequence rerun when the judge requests a
    /// revision. Interpretation and planning are settled by then; only
    /// grounding, auditing, visualization, and judgment repeat.
    #[must_use]
    pub fn revision_sequence(self) -> &'static [AgentId] {
        let sequence = self.sequence();
        let start = sequence
            .iter()
            .position(|&id| id != AgentId::Interpreter && id != AgentId::Planner)
            .unwrap_or(sequence.len());
        &sequence[start..]
    }

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Project => "project",
            Self::Learn => "learn",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "research" => Ok(Self::Research),
            "project" => Ok(Self::Project),
            "learn" => Ok(Self::Learn),
            other => Err(format!(
                "unknown mode `{other}` (expected research, project, or learn)"
            )),
        }
    }
}

/// Identity of an agent within a run. Unique and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    /// Reads the brief into a structured intent.
    Interpreter,
    /// Turns the intent into a research plan.
    Planner,
    /// Retrieves evidence and grounds answers.
    Grounder,
    /// Assesses risk and feasibility.
    Auditor,
    /// Proposes visualizations.
    Visualizer,
    /// Assembles and scores the final artifact.
    Judge,
}

impl AgentId {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interpreter => "interpreter",
            Self::Planner => "planner",
            Self::Grounder => "grounder",
            Self::Auditor => "auditor",
            Self::Visualizer => "visualizer",
            Self::Judge => "judge",
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable failure recorded against the agent that hit it.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// The agent the failure originated from.
    pub agent: AgentId,
    /// Short canonical message.
    pub message: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

/// The per-run deliberation context.
///
/// Created at pipeline entry, destroyed at pipeline exit. Single-valued
/// fields are written at most once per deliberation round; sequences are
/// append-only.
#[derive(Debug, Clone, Serialize)]
pub struct SharedState {
    /// The user's free-form brief (immutable after init).
    pub user_brief: String,
    /// Execution mode (immutable).
    pub mode: Mode,
    /// Answers the user gave to clarifying questions.
    pub clarifications: BTreeMap<String, String>,
    /// Opaque session identifier supplied by the front-end (immutable).
    pub session_id: String,
    /// Interpreter output.
    pub intent: Option<Intent>,
    /// Planner output.
    pub plan: Option<Plan>,
    /// Grounder output, one entry per grounded question (append-only).
    pub research_findings: Vec<ResearchFinding>,
    /// Evidence assembled per research question id.
    pub evidence: BTreeMap<String, Vec<SourceRecord>>,
    /// Auditor output.
    pub audit_report: Option<AuditReport>,
    /// Visualizer output.
    pub visualizations: Vec<Visualization>,
    /// Judge output.
    pub final_artifact: Option<FinalArtifact>,
    /// The judge's consensus score, when one was validated.
    pub consensus_score: Option<f32>,
    /// Current deliberation round, starting at 1.
    pub deliberation_round: u32,
    /// Citations registered during retrieval, owned by this run.
    pub citations: CitationRegistry,
    /// Non-fatal retrieval failures, per question.
    pub retrieval_warnings: Vec<RetrievalWarning>,
    /// Recoverable failures, in pipeline order (append-only).
    pub errors: Vec<ErrorRecord>,
    agent_outputs: Vec<(AgentId, AgentOutput)>,
}

impl SharedState {
    /// Creates the state for a fresh run.
    #[must_use]
    pub fn new(
        user_brief: impl Into<String>,
        mode: Mode,
        clarifications: BTreeMap<String, String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            user_brief: user_brief.into(),
            mode,
            clarifications,
            session_id: session_id.into(),
            intent: None,
            plan: None,
            research_findings: Vec::new(),
            evidence: BTreeMap::new(),
            audit_report: None,
            visualizations: Vec::new(),
            final_artifact: None,
            consensus_score: None,
            deliberation_round: 1,
            citations: CitationRegistry::new(),
            retrieval_warnings: Vec::new(),
            errors: Vec::new(),
            agent_outputs: Vec::new(),
        }
    }

    /// Records a recoverable failure against `agent` and logs it.
    pub fn record_error(&mut self, agent: AgentId, message: impl Into<String>) {
        let message = message.into();
        warn!(agent = %agent, %message, "agent failure recorded");
        self.errors.push(ErrorRecord {
            agent,
            message,
            timestamp: Utc::now(),
        });
    }

    /// Records an agent's typed output, routing it into the declared
    /// state field. The raw union is also retained in pipeline order;
    /// for an agent that runs again in a revision round, the latest
    /// output wins.
    pub fn record_output(&mut self, agent: AgentId, output: AgentOutput) {
        match &output {
            AgentOutput::Intent(intent) => self.intent = Some(intent.clone()),
            AgentOutput::Plan(plan) => self.plan = Some(plan.clone()),
            AgentOutput::Findings(findings) => {
                self.research_findings.extend(findings.iter().cloned());
            }
            AgentOutput::Audit(report) => self.audit_report = Some(report.clone()),
            AgentOutput::Visuals(visuals) => self.visualizations = visuals.clone(),
            AgentOutput::Verdict(verdict) => {
                self.final_artifact = Some(verdict.artifact.clone());
                self.consensus_score = verdict.scores.as_ref().map(RubricScores::consensus);
            }
        }
        self.agent_outputs.push((agent, output));
    }

    /// The most recent output recorded for `agent`, if any.
    #[must_use]
    pub fn output_of(&self, agent: AgentId) -> Option<&AgentOutput> {
        self.agent_outputs
            .iter()
            .rev()
            .find(|(id, _)| *id == agent)
            .map(|(_, output)| output)
    }

    /// Whether `agent` has recorded an output this run.
    #[must_use]
    pub fn has_output(&self, agent: AgentId) -> bool {
        self.output_of(agent).is_some()
    }

    /// Agent ids in first-output order.
    #[must_use]
    pub fn output_order(&self) -> Vec<AgentId> {
        let mut seen = Vec::new();
        for (id, _) in &self.agent_outputs {
            if !seen.contains(id) {
                seen.push(*id);
            }
        }
        seen
    }

    /// Whether any error was recorded for `agent`.
    #[must_use]
    pub fn has_error_for(&self, agent: AgentId) -> bool {
        self.errors.iter().any(|e| e.agent == agent)
    }

    /// Whether a warning was recorded while retrieving for `question_id`.
    #[must_use]
    pub fn has_retrieval_warning_for(&self, question_id: &str) -> bool {
        self.retrieval_warnings
            .iter()
            .any(|w| w.question_id == question_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{OutputType, Scope};

    fn state() -> SharedState {
        SharedState::new("brief", Mode::Research, BTreeMap::new(), "session-1")
    }

    fn intent() -> Intent {
        Intent {
            primary_goal: "goal".to_string(),
            domain: String::new(),
            output_type: OutputType::ResearchReport,
            scope: Scope::Moderate,
            extracted_requirements: Vec::new(),
            ambiguities: Vec::new(),
            clarifying_questions: Vec::new(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_mode_sequences() {
        assert_eq!(Mode::Research.sequence().len(), 5);
        assert_eq!(Mode::Project.sequence().len(), 5);
        assert_eq!(Mode::Learn.sequence().len(), 4);
        assert!(!Mode::Research.sequence().contains(&AgentId::Visualizer));
        assert!(!Mode::Project.sequence().contains(&AgentId::Grounder));
    }

    #[test]
    fn test_mode_revision_sequences() {
        assert_eq!(
            Mode::Research.revision_sequence(),
            &[AgentId::Grounder, AgentId::Auditor, AgentId::Judge]
        );
        assert_eq!(
            Mode::Project.revision_sequence(),
            &[AgentId::Auditor, AgentId::Visualizer, AgentId::Judge]
        );
        assert_eq!(
            Mode::Learn.revision_sequence(),
            &[AgentId::Grounder, AgentId::Judge]
        );
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("research".parse::<Mode>(), Ok(Mode::Research));
        assert_eq!("LEARN".parse::<Mode>(), Ok(Mode::Learn));
        assert!("sprint".parse::<Mode>().is_err());
    }

    #[test]
    fn test_record_output_routes_to_field() {
        let mut state = state();
        state.record_output(AgentId::Interpreter, AgentOutput::Intent(intent()));
        assert!(state.intent.is_some());
        assert!(state.has_output(AgentId::Interpreter));
        assert_eq!(state.output_order(), vec![AgentId::Interpreter]);
    }

    #[test]
    fn test_latest_output_wins() {
        let mut state = state();
        let mut second = intent();
        second.primary_goal = "revised".to_string();
        state.record_output(AgentId::Interpreter, AgentOutput::Intent(intent()));
        state.record_output(AgentId::Interpreter, AgentOutput::Intent(second));
        assert!(matches!(
            state.output_of(AgentId::Interpreter),
            Some(AgentOutput::Intent(i)) if i.primary_goal == "revised"
        ));
        // First-output order is unchanged by the overwrite.
        assert_eq!(state.output_order(), vec![AgentId::Interpreter]);
    }

    #[test]
    fn test_findings_append() {
        let mut state = state();
        state.record_output(
            AgentId::Grounder,
            AgentOutput::Findings(vec![crate::output::ResearchFinding::ungrounded("rq-1")]),
        );
        state.record_output(
            AgentId::Grounder,
            AgentOutput::Findings(vec![crate::output::ResearchFinding::ungrounded("rq-2")]),
        );
        assert_eq!(state.research_findings.len(), 2);
    }

    #[test]
    fn test_record_error() {
        let mut state = state();
        state.record_error(AgentId::Planner, "model output rejected");
        assert!(state.has_error_for(AgentId::Planner));
        assert!(!state.has_error_for(AgentId::Judge));
        assert_eq!(state.errors.len(), 1);
    }

    #[test]
    fn test_new_state_starts_at_round_one() {
        let state = state();
        assert_eq!(state.deliberation_round, 1);
        assert!(state.consensus_score.is_none());
        assert!(state.errors.is_empty());
    }
}

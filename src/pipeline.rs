//! Pipeline engine: mode → agent sequence, quality gates, deliberation.
//!
//! The engine executes agents strictly sequentially, applies a quality
//! gate after each think-cycle, and reruns the post-planner subsequence
//! when the judge requests a revision. It is the only component whose
//! failures can halt a run, and only for configuration-class problems;
//! everything else ends up inside the returned [`SharedState`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agents::{DeliberativeAgent, ThinkContext};
use crate::config::CoreConfig;
use crate::error::EngineError;
use crate::output::{AgentOutput, Decision};
use crate::runtime::ModelSlot;
use crate::state::{AgentId, Mode, SharedState};

/// A request to run the pipeline once.
#[derive(Debug)]
pub struct RunRequest {
    /// The user's free-form brief.
    pub user_brief: String,
    /// Execution mode.
    pub mode: Mode,
    /// Answers to clarifying questions, if the front-end gathered any.
    pub clarifications: BTreeMap<String, String>,
    /// Opaque session identifier for the front-end's bookkeeping.
    pub session_id: String,
    /// Deadline for the whole run.
    pub overall_deadline: Instant,
    /// Cooperative cancellation for the whole run.
    pub cancel: CancellationToken,
}

/// Drives the agent sequence for a mode over one model slot.
pub struct PipelineEngine {
    agents: BTreeMap<AgentId, Arc<dyn DeliberativeAgent>>,
    slot: Arc<ModelSlot>,
    config: CoreConfig,
}

impl PipelineEngine {
    /// Creates an engine with no agents registered.
    #[must_use]
    pub fn new(config: CoreConfig, slot: Arc<ModelSlot>) -> Self {
        Self {
            agents: BTreeMap::new(),
            slot,
            config,
        }
    }

    /// Registers an agent under its declared id. A later registration
    /// for the same id replaces the earlier one.
    pub fn register(&mut self, agent: Arc<dyn DeliberativeAgent>) {
        self.agents.insert(agent.id(), agent);
    }

    /// Runs the pipeline to completion (or cancellation) and returns the
    /// deliberation state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingAgent`] when the mode's sequence
    /// names an unregistered agent. Every other failure is recorded in
    /// the returned state instead of raised.
    pub async fn run(&self, request: RunRequest) -> Result<SharedState, EngineError> {
        for &agent_id in request.mode.sequence() {
            if !self.agents.contains_key(&agent_id) {
                return Err(EngineError::MissingAgent {
                    agent: agent_id,
                    mode: request.mode,
                });
            }
        }

        let mut state = SharedState::new(
            request.user_brief.clone(),
            request.mode,
            request.clarifications.clone(),
            request.session_id.clone(),
        );
        info!(mode = %state.mode, session = %state.session_id, "pipeline starting");

        let mut sequence: &[AgentId] = request.mode.sequence();
        'deliberation: loop {
            for &agent_id in sequence {
                if request.cancel.is_cancelled() {
                    debug!(%agent_id, "run cancelled before agent");
                    break 'deliberation;
                }
                if Instant::now() >= request.overall_deadline {
                    state.record_error(agent_id, "overall deadline expired before agent ran");
                    break 'deliberation;
                }
                let Some(agent) = self.agents.get(&agent_id) else {
                    break 'deliberation;
                };

                let step_deadline = std::cmp::min(
                    request.overall_deadline,
                    Instant::now() + self.config.agent_time_budget,
                );
                let ctx = ThinkContext {
                    slot: &self.slot,
                    config: &self.config,
                    deadline: step_deadline,
                    cancel: &request.cancel,
                };

                debug!(%agent_id, round = state.deliberation_round, "agent starting");
                let findings_before = state.research_findings.len();
                let output = agent.think(&mut state, &ctx).await;
                state.record_output(agent_id, output);

                if let Err(reason) = apply_gate(agent_id, &state) {
                    state.record_error(agent_id, format!("quality gate rejected: {reason}"));
                    // Findings append; drop the rejected output's entries
                    // so the degraded output substitutes instead of
                    // accumulating alongside them.
                    state.research_findings.truncate(findings_before);
                    let degraded = agent.degrade(&state);
                    state.record_output(agent_id, degraded);
                }

                if request.cancel.is_cancelled() {
                    debug!(%agent_id, "run cancelled during agent");
                    break 'deliberation;
                }
            }

            if self.should_revise(&state, &request) {
                state.deliberation_round += 1;
                sequence = request.mode.revision_sequence();
                info!(
                    round = state.deliberation_round,
                    "judge requested revision; rerunning deliberation subsequence"
                );
                continue 'deliberation;
            }
            break 'deliberation;
        }

        self.slot.release().await;
        info!(
            round = state.deliberation_round,
            consensus = ?state.consensus_score,
            errors = state.errors.len(),
            "pipeline finished"
        );
        Ok(state)
    }

    fn should_revise(&self, state: &SharedState, request: &RunRequest) -> bool {
        if request.cancel.is_cancelled() || Instant::now() >= request.overall_deadline {
            return false;
        }
        if state.deliberation_round >= self.config.max_deliberation_rounds {
            return false;
        }
        matches!(
            state.output_of(AgentId::Judge),
            Some(AgentOutput::Verdict(v)) if v.decision == Decision::NeedsRevision
        )
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// The per-agent quality gate, evaluated after the think-cycle returns.
/// A rejection does not halt the pipeline; the engine records it and
/// substitutes the agent's degraded output.
fn apply_gate(agent: AgentId, state: &SharedState) -> Result<(), String> {
    match agent {
        AgentId::Interpreter => {
            let Some(intent) = &state.intent else {
                return Err("no intent produced".to_string());
            };
            if intent.primary_goal.trim().is_empty() {
                return Err("intent primary_goal is empty".to_string());
            }
            Ok(())
        }
        AgentId::Planner => {
            let Some(plan) = &state.plan else {
                return Err("no plan produced".to_string());
            };
            if plan.research_questions.is_empty() {
                return Err("plan has no research questions".to_string());
            }
            if let Some(violation) = plan.dependency_violation() {
                return Err(violation);
            }
            Ok(())
        }
        AgentId::Grounder => {
            if state.research_findings.is_empty() {
                return Err("no research findings produced".to_string());
            }
            for finding in &state.research_findings {
                let trivial = finding.answer.trim().is_empty();
                if !trivial
                    && !finding.cites_sources()
                    && !state.has_retrieval_warning_for(&finding.question_id)
                {
                    return Err(format!(
                        "answer for `{}` cites no sources and no retrieval warning was recorded",
                        finding.question_id
                    ));
                }
            }
            Ok(())
        }
        AgentId::Auditor => {
            if state.audit_report.is_none() {
                return Err("no audit report produced".to_string());
            }
            Ok(())
        }
        AgentId::Visualizer => Ok(()),
        AgentId::Judge => {
            let Some(artifact) = &state.final_artifact else {
                return Err("no final artifact produced".to_string());
            };
            if artifact.sections.is_empty() {
                return Err("final artifact has no sections".to_string());
            }
            match state.consensus_score {
                Some(score) if (0.0..=1.0).contains(&score) => Ok(()),
                Some(score) => Err(format!("consensus score {score} is outside [0, 1]")),
                None => Err("no consensus score recorded".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{
        Decision, FinalArtifact, Intent, JudgeVerdict, OutputType, ResearchFinding, RubricScores,
        Scope, Section,
    };
    use crate::retrieval::SourceOrigin;
    use serde_json::Value;

    fn state() -> SharedState {
        SharedState::new("brief", Mode::Research, BTreeMap::new(), "s-1")
    }

    fn verdict(sections: usize, scores: Option<RubricScores>) -> AgentOutput {
        AgentOutput::Verdict(JudgeVerdict {
            artifact: FinalArtifact {
                artifact_type: "research_report".to_string(),
                sections: (0..sections)
                    .map(|i| Section {
                        title: format!("S{i}"),
                        content: "c".to_string(),
                        subsections: Vec::new(),
                        confidence: 0.9,
                        evidence: Vec::new(),
                    })
                    .collect(),
                metadata: Value::Null,
            },
            scores,
            decision: Decision::Accept,
            revision_notes: Vec::new(),
        })
    }

    #[test]
    fn test_gate_interpreter_requires_goal() {
        let mut state = state();
        assert!(apply_gate(AgentId::Interpreter, &state).is_err());
        state.intent = Some(Intent {
            primary_goal: "g".to_string(),
            domain: String::new(),
            output_type: OutputType::ResearchReport,
            scope: Scope::Moderate,
            extracted_requirements: Vec::new(),
            ambiguities: Vec::new(),
            clarifying_questions: Vec::new(),
            confidence: 0.5,
        });
        assert!(apply_gate(AgentId::Interpreter, &state).is_ok());
    }

    #[test]
    fn test_gate_grounder_accepts_warned_questions() {
        let mut state = state();
        let mut finding = ResearchFinding::ungrounded("rq-1");
        finding.answer = "an answer without citations".to_string();
        state.research_findings.push(finding);
        // Uncited non-trivial answer with no warning: rejected.
        assert!(apply_gate(AgentId::Grounder, &state).is_err());
        // With a recorded warning for the question: accepted.
        state
            .retrieval_warnings
            .push(crate::retrieval::RetrievalWarning {
                question_id: "rq-1".to_string(),
                origin: SourceOrigin::Web,
                message: "unreachable".to_string(),
            });
        assert!(apply_gate(AgentId::Grounder, &state).is_ok());
    }

    #[test]
    fn test_gate_grounder_accepts_trivial_answers() {
        let mut state = state();
        state
            .research_findings
            .push(ResearchFinding::ungrounded("rq-1"));
        assert!(apply_gate(AgentId::Grounder, &state).is_ok());
    }

    #[test]
    fn test_gate_judge_requires_sections_and_score() {
        let mut state = state();
        assert!(apply_gate(AgentId::Judge, &state).is_err());

        state.record_output(AgentId::Judge, verdict(0, None));
        assert!(apply_gate(AgentId::Judge, &state).is_err());

        state.record_output(
            AgentId::Judge,
            verdict(
                3,
                Some(RubricScores {
                    groundedness: 0.9,
                    coherence: 0.9,
                    completeness: 0.9,
                }),
            ),
        );
        assert!(apply_gate(AgentId::Judge, &state).is_ok());
    }

    #[test]
    fn test_gate_visualizer_never_rejects() {
        assert!(apply_gate(AgentId::Visualizer, &state()).is_ok());
    }
}

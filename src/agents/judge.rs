//! Judge agent: assembles the final artifact and decides whether the
//! deliberation is done.
//!
//! The judge's reply carries the artifact plus a self-reported rubric
//! (groundedness, coherence, completeness). The consensus score is their
//! mean; the accept/revise decision is derived here from the configured
//! threshold and the current deliberation round, never taken from the
//! model.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::agents::prompt::JUDGE_TEMPLATE;
use crate::agents::think::DeliberativeAgent;
use crate::config::{CoreConfig, ModelDescriptor};
use crate::error::ParseRejection;
use crate::output::{
    AgentOutput, Decision, FinalArtifact, JudgeAssessment, JudgeVerdict, OutputType, Section,
};
use crate::state::{AgentId, SharedState};

/// Assembles and scores the final artifact.
pub struct Judge {
    model: ModelDescriptor,
    consensus_threshold: f32,
    max_rounds: u32,
}

impl Judge {
    /// Creates the judge with its declared model and decision policy.
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            model: config.models.judge.clone(),
            consensus_threshold: config.consensus_threshold,
            max_rounds: config.max_deliberation_rounds,
        }
    }

    /// Drops citation ids the run never registered, recursively.
    fn retain_known_citations(sections: &mut [Section], state: &SharedState) {
        for section in sections {
            section.evidence.retain(|id| state.citations.contains(id));
            Self::retain_known_citations(&mut section.subsections, state);
        }
    }
}

#[async_trait]
impl DeliberativeAgent for Judge {
    fn id(&self) -> AgentId {
        AgentId::Judge
    }

    fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    fn template(&self) -> &'static str {
        JUDGE_TEMPLATE
    }

    fn prepare_input(&self, state: &SharedState) -> Value {
        json!({
            "user_brief": state.user_brief,
            "mode": state.mode.as_str(),
            "intent": state.intent,
            "plan": state.plan,
            "research_findings": state.research_findings,
            "audit_report": state.audit_report,
            "visualizations": state.visualizations,
            "citations": state.citations,
            "deliberation_round": state.deliberation_round,
        })
    }

    fn parse(&self, raw: &Value, state: &SharedState) -> Result<AgentOutput, ParseRejection> {
        let assessment: JudgeAssessment = serde_json::from_value(raw.clone())
            .map_err(|e| ParseRejection::new(format!("judge schema mismatch: {e}")))?;
        if !assessment.scores.in_range() {
            return Err(ParseRejection::new(
                "rubric scores must each lie in [0, 1]",
            ));
        }

        let mut artifact = assessment.artifact;
        if artifact.artifact_type.trim().is_empty() {
            artifact.artifact_type = OutputType::from_mode(state.mode).as_str().to_string();
        }
        Self::retain_known_citations(&mut artifact.sections, state);

        let consensus = assessment.scores.consensus();
        let decision = if consensus < self.consensus_threshold
            && state.deliberation_round < self.max_rounds
        {
            Decision::NeedsRevision
        } else {
            Decision::Accept
        };
        debug!(
            consensus = f64::from(consensus),
            round = state.deliberation_round,
            ?decision,
            "judge decided"
        );

        Ok(AgentOutput::Verdict(JudgeVerdict {
            artifact,
            scores: Some(assessment.scores),
            decision,
            revision_notes: assessment.revision_notes,
        }))
    }

    fn degrade(&self, state: &SharedState) -> AgentOutput {
        AgentOutput::Verdict(JudgeVerdict {
            artifact: FinalArtifact {
                artifact_type: OutputType::from_mode(state.mode).as_str().to_string(),
                sections: Vec::new(),
                metadata: Value::Null,
            },
            scores: None,
            decision: Decision::Accept,
            revision_notes: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Mode;
    use std::collections::BTreeMap;

    fn judge_with(threshold: f32, max_rounds: u32) -> Judge {
        let config = CoreConfig::builder()
            .consensus_threshold(threshold)
            .max_deliberation_rounds(max_rounds)
            .build()
            .unwrap_or_else(|_| unreachable!());
        Judge::new(&config)
    }

    fn state() -> SharedState {
        SharedState::new("brief", Mode::Research, BTreeMap::new(), "s-1")
    }

    fn raw_assessment(groundedness: f32, coherence: f32, completeness: f32) -> Value {
        json!({
            "artifact": {
                "type": "research_report",
                "sections": [{"title": "Overview", "content": "..."}]
            },
            "scores": {
                "groundedness": groundedness,
                "coherence": coherence,
                "completeness": completeness
            },
            "revision_notes": ["tighten citations"]
        })
    }

    #[test]
    fn test_parse_accepts_above_threshold() {
        let judge = judge_with(0.85, 7);
        let output = judge.parse(&raw_assessment(0.9, 0.9, 0.9), &state());
        assert!(matches!(
            output,
            Ok(AgentOutput::Verdict(v)) if v.decision == Decision::Accept
        ));
    }

    #[test]
    fn test_parse_requests_revision_below_threshold() {
        let judge = judge_with(0.85, 7);
        let output = judge.parse(&raw_assessment(0.7, 0.7, 0.7), &state());
        assert!(matches!(
            output,
            Ok(AgentOutput::Verdict(v))
                if v.decision == Decision::NeedsRevision && !v.revision_notes.is_empty()
        ));
    }

    #[test]
    fn test_parse_accepts_when_rounds_exhausted() {
        let judge = judge_with(0.85, 3);
        let mut state = state();
        state.deliberation_round = 3;
        let output = judge.parse(&raw_assessment(0.5, 0.5, 0.5), &state);
        assert!(matches!(
            output,
            Ok(AgentOutput::Verdict(v)) if v.decision == Decision::Accept
        ));
    }

    #[test]
    fn test_parse_rejects_out_of_range_scores() {
        let judge = judge_with(0.85, 7);
        assert!(judge.parse(&raw_assessment(1.2, 0.9, 0.9), &state()).is_err());
    }

    #[test]
    fn test_parse_fills_artifact_type_from_mode() {
        let judge = judge_with(0.5, 7);
        let raw = json!({
            "artifact": {"sections": [{"title": "S", "content": "c"}]},
            "scores": {"groundedness": 0.9, "coherence": 0.9, "completeness": 0.9}
        });
        let output = judge.parse(&raw, &state());
        assert!(matches!(
            output,
            Ok(AgentOutput::Verdict(v)) if v.artifact.artifact_type == "research_report"
        ));
    }

    #[test]
    fn test_parse_strips_unknown_citations() {
        let judge = judge_with(0.5, 7);
        let mut state = state();
        let known = state.citations.register("A", "https://a.example", "web");
        let raw = json!({
            "artifact": {
                "type": "research_report",
                "sections": [{"title": "S", "content": "c", "evidence": [known, "c99"]}]
            },
            "scores": {"groundedness": 0.9, "coherence": 0.9, "completeness": 0.9}
        });
        let output = judge.parse(&raw, &state);
        assert!(matches!(
            output,
            Ok(AgentOutput::Verdict(v)) if v.artifact.sections[0].evidence == vec!["c1".to_string()]
        ));
    }

    #[test]
    fn test_degrade_accepts_with_empty_sections() {
        let judge = judge_with(0.85, 7);
        let output = judge.degrade(&state());
        assert!(matches!(
            output,
            AgentOutput::Verdict(v)
                if v.decision == Decision::Accept
                    && v.artifact.sections.is_empty()
                    && v.scores.is_none()
        ));
    }
}

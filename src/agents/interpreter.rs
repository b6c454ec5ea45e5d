//! Interpreter agent: reads the brief into a structured intent.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agents::prompt::INTERPRETER_TEMPLATE;
use crate::agents::think::DeliberativeAgent;
use crate::config::{CoreConfig, ModelDescriptor};
use crate::error::ParseRejection;
use crate::output::{AgentOutput, Intent, OutputType, Scope};
use crate::state::{AgentId, SharedState};

/// Maximum clarifying questions kept from the model's reply.
const MAX_CLARIFYING_QUESTIONS: usize = 5;

/// Turns the free-form user brief and clarification answers into an
/// [`Intent`].
pub struct Interpreter {
    model: ModelDescriptor,
}

impl Interpreter {
    /// Creates the interpreter with its declared model.
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            model: config.models.interpreter.clone(),
        }
    }
}

#[async_trait]
impl DeliberativeAgent for Interpreter {
    fn id(&self) -> AgentId {
        AgentId::Interpreter
    }

    fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    fn template(&self) -> &'static str {
        INTERPRETER_TEMPLATE
    }

    fn prepare_input(&self, state: &SharedState) -> Value {
        json!({
            "user_brief": state.user_brief,
            "mode": state.mode.as_str(),
            "clarifications": state.clarifications,
        })
    }

    fn parse(&self, raw: &Value, _state: &SharedState) -> Result<AgentOutput, ParseRejection> {
        let mut intent: Intent = serde_json::from_value(raw.clone())
            .map_err(|e| ParseRejection::new(format!("intent schema mismatch: {e}")))?;
        if intent.primary_goal.trim().is_empty() {
            return Err(ParseRejection::new("primary_goal is empty"));
        }
        if !(0.0..=1.0).contains(&intent.confidence) {
            return Err(ParseRejection::new(format!(
                "confidence {} is outside [0, 1]",
                intent.confidence
            )));
        }
        intent.clarifying_questions.truncate(MAX_CLARIFYING_QUESTIONS);
        Ok(AgentOutput::Intent(intent))
    }

    fn degrade(&self, state: &SharedState) -> AgentOutput {
        AgentOutput::Intent(Intent {
            primary_goal: state.user_brief.clone(),
            domain: String::new(),
            output_type: OutputType::from_mode(state.mode),
            scope: Scope::default(),
            extracted_requirements: Vec::new(),
            ambiguities: Vec::new(),
            clarifying_questions: Vec::new(),
            confidence: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Mode;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn agent() -> Interpreter {
        let config = CoreConfig::builder()
            .build()
            .unwrap_or_else(|_| unreachable!());
        Interpreter::new(&config)
    }

    fn state() -> SharedState {
        SharedState::new("explain raft", Mode::Research, BTreeMap::new(), "s-1")
    }

    #[test]
    fn test_parse_valid_intent() {
        let raw = json!({
            "primary_goal": "explain raft consensus",
            "domain": "distributed systems",
            "output_type": "research_report",
            "scope": "narrow",
            "confidence": 0.9
        });
        let output = agent().parse(&raw, &state());
        assert!(matches!(
            output,
            Ok(AgentOutput::Intent(i)) if i.primary_goal == "explain raft consensus"
        ));
    }

    #[test]
    fn test_parse_rejects_empty_goal() {
        let raw = json!({"primary_goal": "  ", "output_type": "research_report"});
        assert!(agent().parse(&raw, &state()).is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range_confidence() {
        let raw = json!({
            "primary_goal": "g",
            "output_type": "research_report",
            "confidence": 1.4
        });
        assert!(agent().parse(&raw, &state()).is_err());
    }

    #[test]
    fn test_parse_caps_clarifying_questions() {
        let raw = json!({
            "primary_goal": "g",
            "output_type": "research_report",
            "clarifying_questions": ["a", "b", "c", "d", "e", "f", "g"]
        });
        let output = agent().parse(&raw, &state());
        assert!(matches!(
            output,
            Ok(AgentOutput::Intent(i)) if i.clarifying_questions.len() == MAX_CLARIFYING_QUESTIONS
        ));
    }

    #[test]
    fn test_degrade_falls_back_to_brief() {
        let output = agent().degrade(&state());
        assert!(matches!(
            output,
            AgentOutput::Intent(i)
                if i.primary_goal == "explain raft"
                    && i.output_type == OutputType::ResearchReport
                    && i.confidence == 0.0
        ));
    }
}

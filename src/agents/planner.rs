//! Planner agent: turns the interpreted brief into a research plan.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agents::prompt::PLANNER_TEMPLATE;
use crate::agents::think::DeliberativeAgent;
use crate::config::{CoreConfig, ModelDescriptor};
use crate::error::ParseRejection;
use crate::output::{AgentOutput, Phase, Plan, Priority, QuestionType, ResearchQuestion};
use crate::state::{AgentId, SharedState};

/// Produces the [`Plan`]: research questions with a dependency DAG,
/// phases, and success criteria.
pub struct Planner {
    model: ModelDescriptor,
}

impl Planner {
    /// Creates the planner with its declared model.
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            model: config.models.planner.clone(),
        }
    }
}

#[async_trait]
impl DeliberativeAgent for Planner {
    fn id(&self) -> AgentId {
        AgentId::Planner
    }

    fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    fn template(&self) -> &'static str {
        PLANNER_TEMPLATE
    }

    fn prepare_input(&self, state: &SharedState) -> Value {
        json!({
            "user_brief": state.user_brief,
            "intent": state.intent,
            "clarifications": state.clarifications,
        })
    }

    fn parse(&self, raw: &Value, _state: &SharedState) -> Result<AgentOutput, ParseRejection> {
        let plan: Plan = serde_json::from_value(raw.clone())
            .map_err(|e| ParseRejection::new(format!("plan schema mismatch: {e}")))?;
        if let Some(violation) = plan.dependency_violation() {
            return Err(ParseRejection::new(violation));
        }
        Ok(AgentOutput::Plan(plan))
    }

    fn degrade(&self, state: &SharedState) -> AgentOutput {
        AgentOutput::Plan(Plan {
            research_questions: vec![ResearchQuestion {
                id: "rq-1".to_string(),
                question: state.user_brief.clone(),
                question_type: QuestionType::Exploratory,
                priority: Priority::Critical,
                estimated_time_minutes: 0,
                dependencies: Vec::new(),
            }],
            phases: vec![Phase {
                name: "research".to_string(),
                description: String::new(),
                rq_ids: vec!["rq-1".to_string()],
                parallel: false,
            }],
            success_criteria: Vec::new(),
            estimated_total_time_minutes: 0,
        })
    }
}

//! Visualizer agent: proposes renderable visualization specifications.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::agents::prompt::VISUALIZER_TEMPLATE;
use crate::agents::think::DeliberativeAgent;
use crate::config::{CoreConfig, ModelDescriptor};
use crate::error::ParseRejection;
use crate::output::{AgentOutput, Visualization};
use crate::state::{AgentId, SharedState};

#[derive(Deserialize)]
struct VisualizerReply {
    #[serde(default)]
    visualizations: Vec<Visualization>,
}

/// Proposes charts, diagrams, and flowcharts for the final artifact.
pub struct Visualizer {
    model: ModelDescriptor,
}

impl Visualizer {
    /// Creates the visualizer with its declared model.
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            model: config.models.visualizer.clone(),
        }
    }
}

#[async_trait]
impl DeliberativeAgent for Visualizer {
    fn id(&self) -> AgentId {
        AgentId::Visualizer
    }

    fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    fn template(&self) -> &'static str {
        VISUALIZER_TEMPLATE
    }

    fn prepare_input(&self, state: &SharedState) -> Value {
        json!({
            "intent": state.intent,
            "plan": state.plan,
            "research_findings": state.research_findings,
        })
    }

    fn parse(&self, raw: &Value, _state: &SharedState) -> Result<AgentOutput, ParseRejection> {
        let reply: VisualizerReply = serde_json::from_value(raw.clone())
            .map_err(|e| ParseRejection::new(format!("visualization schema mismatch: {e}")))?;
        let mut visuals = reply.visualizations;
        for (index, viz) in visuals.iter_mut().enumerate() {
            if viz.id.trim().is_empty() {
                viz.id = format!("viz-{}", index + 1);
            }
        }
        Ok(AgentOutput::Visuals(visuals))
    }

    fn degrade(&self, _state: &SharedState) -> AgentOutput {
        AgentOutput::Visuals(Vec::new())
    }
}

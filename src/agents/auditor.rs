//! Auditor agent: risk, dependency, and feasibility assessment.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agents::prompt::AUDITOR_TEMPLATE;
use crate::agents::think::DeliberativeAgent;
use crate::config::{CoreConfig, ModelDescriptor};
use crate::error::ParseRejection;
use crate::output::{AgentOutput, AuditReport};
use crate::state::{AgentId, SharedState};

/// Reviews the plan and findings for risks, dependencies, security
/// concerns, and feasibility.
pub struct Auditor {
    model: ModelDescriptor,
}

impl Auditor {
    /// Creates the auditor with its declared model.
    #[must_use]
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            model: config.models.auditor.clone(),
        }
    }
}

#[async_trait]
impl DeliberativeAgent for Auditor {
    fn id(&self) -> AgentId {
        AgentId::Auditor
    }

    fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    fn template(&self) -> &'static str {
        AUDITOR_TEMPLATE
    }

    fn prepare_input(&self, state: &SharedState) -> Value {
        json!({
            "plan": state.plan,
            "research_findings": state.research_findings,
        })
    }

    fn parse(&self, raw: &Value, _state: &SharedState) -> Result<AgentOutput, ParseRejection> {
        let report: AuditReport = serde_json::from_value(raw.clone())
            .map_err(|e| ParseRejection::new(format!("audit schema mismatch: {e}")))?;
        let overall = report.feasibility_assessment.overall;
        if !(0.0..=1.0).contains(&overall) {
            return Err(ParseRejection::new(format!(
                "feasibility overall {overall} is outside [0, 1]"
            )));
        }
        Ok(AgentOutput::Audit(report))
    }

    fn degrade(&self, _state: &SharedState) -> AgentOutput {
        AgentOutput::Audit(AuditReport::unassessed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RiskLevel;
    use crate::state::Mode;
    use std::collections::BTreeMap;

    fn agent() -> Auditor {
        let config = CoreConfig::builder()
            .build()
            .unwrap_or_else(|_| unreachable!());
        Auditor::new(&config)
    }

    fn state() -> SharedState {
        SharedState::new("brief", Mode::Research, BTreeMap::new(), "s-1")
    }

    #[test]
    fn test_parse_valid_report() {
        let raw = json!({
            "risk_assessment": {
                "overall_risk_level": "medium",
                "risks": [{"category": "technical", "description": "d", "severity": "high", "likelihood": "possible", "mitigation": "m"}]
            },
            "feasibility_assessment": {"technical": 0.9, "resource": 0.8, "time": 0.7, "overall": 0.8}
        });
        let output = agent().parse(&raw, &state());
        assert!(matches!(
            output,
            Ok(AgentOutput::Audit(r))
                if r.risk_assessment.overall_risk_level == RiskLevel::Medium
                    && r.risk_assessment.risks.len() == 1
        ));
    }

    #[test]
    fn test_parse_rejects_bad_feasibility() {
        let raw = json!({
            "risk_assessment": {"overall_risk_level": "low"},
            "feasibility_assessment": {"overall": 3.0}
        });
        assert!(agent().parse(&raw, &state()).is_err());
    }

    #[test]
    fn test_parse_requires_risk_assessment() {
        let raw = json!({"recommendations": []});
        assert!(agent().parse(&raw, &state()).is_err());
    }

    #[test]
    fn test_degrade_is_unassessed() {
        let output = agent().degrade(&state());
        assert!(matches!(
            output,
            AgentOutput::Audit(r)
                if r.risk_assessment.overall_risk_level == RiskLevel::Unknown
                    && r.risk_assessment.risks.is_empty()
                    && r.recommendations.is_empty()
        ));
    }
}

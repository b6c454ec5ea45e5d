//! Grounder agent: retrieves evidence and grounds one answer per
//! research question.
//!
//! The grounder overrides the default think-cycle: it first fans out
//! retrieval through the [`EvidenceRetriever`], then holds the model
//! slot once while generating an answer for every question in turn.
//! Cancellation mid-way keeps whatever answers were completed.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

use crate::agents::prompt::{self, GROUNDER_TEMPLATE};
use crate::agents::think::{self, DeliberativeAgent, ThinkContext};
use crate::config::{CoreConfig, ModelDescriptor};
use crate::error::{AgentError, ParseRejection};
use crate::output::{AgentOutput, ResearchFinding, ResearchQuestion};
use crate::retrieval::{EvidenceRetriever, SourceRecord};
use crate::state::{AgentId, SharedState};

/// Answers research questions from retrieved evidence, citing sources.
pub struct Grounder {
    model: ModelDescriptor,
    retriever: EvidenceRetriever,
}

impl Grounder {
    /// Creates the grounder with its declared model and retriever.
    #[must_use]
    pub fn new(config: &CoreConfig, retriever: EvidenceRetriever) -> Self {
        Self {
            model: config.models.grounder.clone(),
            retriever,
        }
    }

    /// Parses one finding for a known question. The question id from the
    /// pipeline is authoritative; the model's echo of it is overwritten.
    fn parse_question(
        &self,
        question: &ResearchQuestion,
        raw: &Value,
        state: &SharedState,
    ) -> Result<AgentOutput, ParseRejection> {
        let mut finding: ResearchFinding = serde_json::from_value(raw.clone())
            .map_err(|e| ParseRejection::new(format!("finding schema mismatch: {e}")))?;
        finding.question_id = question.id.clone();
        let available = state.evidence.get(&question.id).map_or(0, Vec::len);
        validate_citations(&finding, available)?;
        Ok(AgentOutput::Findings(vec![finding]))
    }
}

/// Rejects findings citing source numbers outside the question's
/// evidence list.
fn validate_citations(
    finding: &ResearchFinding,
    available: usize,
) -> Result<(), ParseRejection> {
    if !(0.0..=1.0).contains(&finding.overall_confidence) {
        return Err(ParseRejection::new(format!(
            "overall_confidence {} is outside [0, 1]",
            finding.overall_confidence
        )));
    }
    for key_finding in &finding.key_findings {
        for evidence in &key_finding.evidence {
            let label = evidence.source_id.trim().trim_start_matches(['S', 's']);
            let index: usize = label.parse().map_err(|_| {
                ParseRejection::new(format!(
                    "source_id `{}` is not a source number",
                    evidence.source_id
                ))
            })?;
            if index == 0 || index > available {
                return Err(ParseRejection::new(format!(
                    "cites source {index} but only {available} sources were retrieved"
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DeliberativeAgent for Grounder {
    fn id(&self) -> AgentId {
        AgentId::Grounder
    }

    fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    fn template(&self) -> &'static str {
        GROUNDER_TEMPLATE
    }

    fn prepare_input(&self, state: &SharedState) -> Value {
        json!({
            "research_questions": state.plan.as_ref().map(|p| &p.research_questions),
        })
    }

    fn parse(&self, raw: &Value, state: &SharedState) -> Result<AgentOutput, ParseRejection> {
        let finding: ResearchFinding = serde_json::from_value(raw.clone())
            .map_err(|e| ParseRejection::new(format!("finding schema mismatch: {e}")))?;
        let available = state.evidence.get(&finding.question_id).map_or(0, Vec::len);
        validate_citations(&finding, available)?;
        Ok(AgentOutput::Findings(vec![finding]))
    }

    fn degrade(&self, state: &SharedState) -> AgentOutput {
        let findings = state.plan.as_ref().map_or_else(
            || vec![ResearchFinding::ungrounded("rq-1")],
            |plan| {
                if plan.research_questions.is_empty() {
                    vec![ResearchFinding::ungrounded("rq-1")]
                } else {
                    plan.research_questions
                        .iter()
                        .map(|q| ResearchFinding::ungrounded(q.id.as_str()))
                        .collect()
                }
            },
        );
        AgentOutput::Findings(findings)
    }

    async fn think(&self, state: &mut SharedState, ctx: &ThinkContext<'_>) -> AgentOutput {
        let Some(plan) = state.plan.clone() else {
            state.record_error(AgentId::Grounder, "no plan available for grounding");
            return self.degrade(state);
        };
        let questions = plan.research_questions;
        if questions.is_empty() {
            state.record_error(AgentId::Grounder, "plan contains no research questions");
            return self.degrade(state);
        }

        let retrieved = self
            .retriever
            .retrieve(&questions, &mut state.citations, ctx.deadline, ctx.cancel)
            .await;
        state.retrieval_warnings.extend(retrieved.warnings);
        for (question_id, sources) in retrieved.evidence {
            // Evidence is written once per question id; a revision round
            // keeps the original round's sources.
            state.evidence.entry(question_id).or_insert(sources);
        }

        let mut findings: Vec<ResearchFinding> = Vec::new();
        let mut failed: Vec<(String, String)> = Vec::new();
        let state_ref: &SharedState = &*state;
        let questions_ref = &questions;
        let findings_ref = &mut findings;
        let failed_ref = &mut failed;

        let outcome = ctx
            .slot
            .with_model(&self.model, ctx.deadline, ctx.cancel, |runtime| async move {
                for question in questions_ref {
                    let sources: &[SourceRecord] = state_ref
                        .evidence
                        .get(&question.id)
                        .map_or(&[], Vec::as_slice);
                    let evidence_block = prompt::format_evidence(sources);
                    let input = json!({
                        "question_id": question.id,
                        "question": question.question,
                        "type": question.question_type,
                        "priority": question.priority,
                    });
                    let base_prompt =
                        prompt::assemble_with_evidence(GROUNDER_TEMPLATE, &evidence_block, &input);

                    let parsed = think::attempt_generation(
                        &runtime,
                        AgentId::Grounder,
                        &self.model,
                        &base_prompt,
                        ctx.config.max_parse_retries,
                        ctx.config.generate_timeout,
                        ctx.deadline,
                        |raw| self.parse_question(question, raw, state_ref),
                    )
                    .await;

                    match parsed {
                        Ok(AgentOutput::Findings(batch)) => findings_ref.extend(batch),
                        Ok(_) => {}
                        Err(AgentError::ParseRejected { message }) => {
                            warn!(question = %question.id, %message, "grounding failed; recording ungrounded finding");
                            failed_ref.push((question.id.clone(), message));
                            findings_ref.push(ResearchFinding::ungrounded(question.id.as_str()));
                        }
                        Err(error) => return Err(error),
                    }
                }
                Ok(())
            })
            .await;

        for (question_id, message) in failed {
            state.record_error(
                AgentId::Grounder,
                format!("question `{question_id}`: {message}"),
            );
        }

        match outcome {
            Ok(()) => AgentOutput::Findings(findings),
            Err(error) => {
                let cancelled = matches!(error, AgentError::Cancelled);
                state.record_error(AgentId::Grounder, error.to_string());
                if findings.is_empty() && !cancelled {
                    self.degrade(state)
                } else {
                    // Keep whatever questions completed before the
                    // interruption.
                    AgentOutput::Findings(findings)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{KeyFinding, Plan};
    use crate::retrieval::{
        CitationRegistry, NullVectorStore, SourceOrigin, SourceRecord, WebSearch,
    };
    use crate::state::Mode;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct NoWeb;

    #[async_trait]
    impl WebSearch for NoWeb {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
        ) -> Result<Vec<crate::retrieval::WebHit>, crate::error::RetrievalError> {
            Ok(Vec::new())
        }
    }

    fn agent() -> Grounder {
        let config = CoreConfig::builder()
            .build()
            .unwrap_or_else(|_| unreachable!());
        let retriever =
            EvidenceRetriever::new(Arc::new(NoWeb), Arc::new(NullVectorStore), &config);
        Grounder::new(&config, retriever)
    }

    fn state_with_evidence(question_id: &str, sources: usize) -> SharedState {
        let mut state = SharedState::new("brief", Mode::Research, BTreeMap::new(), "s-1");
        let records = (0..sources)
            .map(|i| SourceRecord {
                origin: SourceOrigin::Web,
                title: format!("T{i}"),
                url: Some(format!("https://e/{i}")),
                content: "c".to_string(),
                snippet: None,
                citation_id: Some(format!("c{}", i + 1)),
                relevance_score: 0.5,
            })
            .collect();
        state.evidence.insert(question_id.to_string(), records);
        state
    }

    fn question(id: &str) -> ResearchQuestion {
        ResearchQuestion {
            id: id.to_string(),
            question: "how?".to_string(),
            question_type: crate::output::QuestionType::Factual,
            priority: crate::output::Priority::High,
            estimated_time_minutes: 5,
            dependencies: Vec::new(),
        }
    }

    fn raw_finding(source_id: &str) -> Value {
        json!({
            "question_id": "echoed-wrong",
            "answer": "because",
            "key_findings": [
                {"finding": "f", "evidence": [{"source_id": source_id, "excerpt": "e", "reliability": "high"}], "confidence": 0.8}
            ],
            "overall_confidence": 0.8
        })
    }

    #[test]
    fn test_parse_question_accepts_valid_citation() {
        let state = state_with_evidence("rq-1", 3);
        let output = agent().parse_question(&question("rq-1"), &raw_finding("2"), &state);
        assert!(matches!(
            output,
            Ok(AgentOutput::Findings(f)) if f[0].question_id == "rq-1"
        ));
    }

    #[test]
    fn test_parse_question_accepts_prefixed_source_label() {
        let state = state_with_evidence("rq-1", 3);
        let output = agent().parse_question(&question("rq-1"), &raw_finding("S3"), &state);
        assert!(output.is_ok());
    }

    #[test]
    fn test_parse_question_rejects_unknown_source() {
        let state = state_with_evidence("rq-1", 2);
        let result = agent().parse_question(&question("rq-1"), &raw_finding("5"), &state);
        assert!(matches!(result, Err(r) if r.message.contains("only 2 sources")));
    }

    #[test]
    fn test_parse_question_rejects_non_numeric_source() {
        let state = state_with_evidence("rq-1", 2);
        assert!(
            agent()
                .parse_question(&question("rq-1"), &raw_finding("the first one"), &state)
                .is_err()
        );
    }

    #[test]
    fn test_parse_rejects_out_of_range_confidence() {
        let state = state_with_evidence("rq-1", 2);
        let raw = json!({"question_id": "rq-1", "answer": "a", "overall_confidence": 2.0});
        assert!(agent().parse(&raw, &state).is_err());
    }

    #[test]
    fn test_validate_citations_ignores_findings_without_evidence() {
        let finding = ResearchFinding {
            question_id: "rq-1".to_string(),
            answer: "a".to_string(),
            key_findings: vec![KeyFinding {
                finding: "f".to_string(),
                evidence: Vec::new(),
                confidence: 0.5,
            }],
            contradictions: Vec::new(),
            knowledge_gaps: Vec::new(),
            overall_confidence: 0.5,
        };
        assert!(validate_citations(&finding, 0).is_ok());
    }

    #[test]
    fn test_degrade_one_placeholder_per_question() {
        let mut state = SharedState::new("brief", Mode::Research, BTreeMap::new(), "s-1");
        state.plan = Some(Plan {
            research_questions: vec![question("rq-1"), question("rq-2")],
            phases: Vec::new(),
            success_criteria: Vec::new(),
            estimated_total_time_minutes: 0,
        });
        let output = agent().degrade(&state);
        assert!(matches!(
            output,
            AgentOutput::Findings(f)
                if f.len() == 2 && f.iter().all(|x| x.overall_confidence == 0.0 && !x.cites_sources())
        ));
    }

    #[test]
    fn test_degrade_without_plan() {
        let state = SharedState::new("brief", Mode::Research, BTreeMap::new(), "s-1");
        let output = agent().degrade(&state);
        assert!(matches!(output, AgentOutput::Findings(f) if f.len() == 1));
    }
}

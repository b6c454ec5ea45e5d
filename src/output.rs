//! Typed output schemas for every agent.
//!
//! The source of truth for what each agent may write into the shared
//! state. Raw model JSON is parsed into these structs at the agent
//! boundary; untyped data never travels further down the pipeline.
//! Model-facing fields are defaulted liberally so that a structurally
//! sound reply survives missing optional fields, while genuinely required
//! fields cause a parse rejection (and a generation retry).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::Mode;

fn default_confidence() -> f32 {
    0.7
}

/// The artifact family a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// A structured research report.
    ResearchReport,
    /// A project specification.
    ProjectSpec,
    /// A learning path.
    LearningPath,
}

impl OutputType {
    /// The artifact family implied by an execution mode, used when the
    /// interpreter cannot extract one from the brief.
    #[must_use]
    pub const fn from_mode(mode: Mode) -> Self {
        match mode {
            Mode::Research => Self::ResearchReport,
            Mode::Project => Self::ProjectSpec,
            Mode::Learn => Self::LearningPath,
        }
    }

    /// Returns the string representation (matches the serde encoding).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResearchReport => "research_report",
            Self::ProjectSpec => "project_spec",
            Self::LearningPath => "learning_path",
        }
    }
}

/// How widely the brief should be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Survey the whole area.
    Broad,
    /// Balanced coverage.
    #[default]
    Moderate,
    /// Focus tightly on the stated ask.
    Narrow,
}

/// Interpreter output: the structured reading of the user brief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// What the user is fundamentally asking for.
    pub primary_goal: String,
    /// Subject domain of the brief.
    #[serde(default)]
    pub domain: String,
    /// Artifact family to produce.
    pub output_type: OutputType,
    /// Interpretation breadth.
    #[serde(default)]
    pub scope: Scope,
    /// Concrete requirements pulled out of the brief.
    #[serde(default)]
    pub extracted_requirements: Vec<String>,
    /// Points the brief leaves unclear.
    #[serde(default)]
    pub ambiguities: Vec<String>,
    /// Questions worth asking the user (capped at five).
    #[serde(default)]
    pub clarifying_questions: Vec<String>,
    /// Self-reported interpretation confidence in `[0, 1]`.
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

/// Kind of research question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Answerable from a single authoritative source.
    Factual,
    /// Requires reasoning over evidence.
    Analytical,
    /// Weighs alternatives against each other.
    Comparative,
    /// Open-ended survey.
    #[default]
    Exploratory,
}

/// Research question priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// The run fails its purpose without this.
    Critical,
    /// Important.
    High,
    /// Useful.
    #[default]
    Medium,
    /// Nice to have.
    Low,
}

/// A single research question within a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchQuestion {
    /// Plan-unique identifier.
    pub id: String,
    /// The question text.
    pub question: String,
    /// Kind of question.
    #[serde(default, rename = "type")]
    pub question_type: QuestionType,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// Rough effort estimate.
    #[serde(default)]
    pub estimated_time_minutes: u32,
    /// Ids of questions that must be answered first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// A named phase grouping research questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// Phase name.
    pub name: String,
    /// What the phase accomplishes.
    #[serde(default)]
    pub description: String,
    /// Questions belonging to this phase.
    #[serde(default)]
    pub rq_ids: Vec<String>,
    /// Whether the phase's questions are independent of each other.
    #[serde(default)]
    pub parallel: bool,
}

/// Planner output: the research plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// The questions to research, with dependencies.
    pub research_questions: Vec<ResearchQuestion>,
    /// Phases grouping the questions.
    #[serde(default)]
    pub phases: Vec<Phase>,
    /// What a successful artifact must cover.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Total effort estimate.
    #[serde(default)]
    pub estimated_total_time_minutes: u32,
}

impl Plan {
    /// Checks that question ids are unique and the dependency graph is a
    /// DAG over existing ids. Returns a description of the first
    /// violation found, or `None` when the plan is well-formed.
    #[must_use]
    pub fn dependency_violation(&self) -> Option<String> {
        let mut ids: BTreeMap<&str, &ResearchQuestion> = BTreeMap::new();
        for rq in &self.research_questions {
            if ids.insert(rq.id.as_str(), rq).is_some() {
                return Some(format!("duplicate question id `{}`", rq.id));
            }
        }
        for rq in &self.research_questions {
            for dep in &rq.dependencies {
                if !ids.contains_key(dep.as_str()) {
                    return Some(format!(
                        "question `{}` depends on unknown id `{dep}`",
                        rq.id
                    ));
                }
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }
        let mut marks: BTreeMap<&str, Mark> = ids.keys().map(|&id| (id, Mark::New)).collect();

        for root in ids.keys() {
            if marks.get(root) != Some(&Mark::New) {
                continue;
            }
            // Iterative DFS; (node, next dependency index) frames.
            let mut stack: Vec<(&str, usize)> = vec![(*root, 0)];
            while let Some((node, child_idx)) = stack.pop() {
                let deps = ids.get(node).map(|rq| rq.dependencies.as_slice());
                let Some(deps) = deps else { continue };
                if child_idx == 0 {
                    marks.insert(node, Mark::Active);
                }
                if child_idx < deps.len() {
                    stack.push((node, child_idx + 1));
                    let child = deps[child_idx].as_str();
                    match marks.get(child) {
                        Some(Mark::Active) => {
                            return Some(format!(
                                "dependency cycle through `{node}` and `{child}`"
                            ));
                        }
                        Some(Mark::New) => stack.push((child, 0)),
                        _ => {}
                    }
                } else {
                    marks.insert(node, Mark::Done);
                }
            }
        }
        None
    }
}

/// How trustworthy a cited excerpt is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    /// Authoritative source.
    High,
    /// Reasonable source.
    #[default]
    Medium,
    /// Weak or secondhand source.
    Low,
}

/// A citation of one evidence source inside a finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// 1-based source label within the question's evidence list, as
    /// presented in the prompt's `[Source N]` blocks.
    pub source_id: String,
    /// Supporting excerpt from the source.
    #[serde(default)]
    pub excerpt: String,
    /// Reliability of the source for this claim.
    #[serde(default)]
    pub reliability: Reliability,
}

/// One claim extracted while answering a research question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFinding {
    /// The claim.
    pub finding: String,
    /// Sources supporting the claim.
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
    /// Self-reported confidence in `[0, 1]`.
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

/// Grounder output: one grounded answer per research question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchFinding {
    /// The research question this answers.
    pub question_id: String,
    /// The grounded answer.
    #[serde(default)]
    pub answer: String,
    /// Claims with their supporting evidence.
    #[serde(default)]
    pub key_findings: Vec<KeyFinding>,
    /// Contradictions observed across sources.
    #[serde(default)]
    pub contradictions: Vec<String>,
    /// What the evidence could not answer.
    #[serde(default)]
    pub knowledge_gaps: Vec<String>,
    /// Self-reported confidence over the whole answer in `[0, 1]`.
    #[serde(default)]
    pub overall_confidence: f32,
}

impl ResearchFinding {
    /// A placeholder finding for a question that could not be grounded.
    #[must_use]
    pub fn ungrounded(question_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            answer: String::new(),
            key_findings: Vec::new(),
            contradictions: Vec::new(),
            knowledge_gaps: Vec::new(),
            overall_confidence: 0.0,
        }
    }

    /// Whether any key finding cites at least one source.
    #[must_use]
    pub fn cites_sources(&self) -> bool {
        self.key_findings.iter().any(|kf| !kf.evidence.is_empty())
    }
}

/// Qualitative risk level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Low risk.
    Low,
    /// Medium risk.
    Medium,
    /// High risk.
    High,
    /// Critical risk.
    Critical,
    /// Could not be assessed.
    #[default]
    Unknown,
}

/// A single identified risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    /// Risk category (technical, resource, scope, ...).
    #[serde(default)]
    pub category: String,
    /// What could go wrong.
    pub description: String,
    /// Severity if it happens.
    #[serde(default)]
    pub severity: RiskLevel,
    /// How likely it is.
    #[serde(default)]
    pub likelihood: String,
    /// How to reduce or absorb it.
    #[serde(default)]
    pub mitigation: String,
}

/// Aggregate risk view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Overall risk level across all identified risks.
    #[serde(default)]
    pub overall_risk_level: RiskLevel,
    /// Individual risks.
    #[serde(default)]
    pub risks: Vec<Risk>,
}

/// An external technical dependency the plan relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalDependency {
    /// Dependency name.
    pub name: String,
    /// Why it is needed.
    #[serde(default)]
    pub reason: String,
    /// How available it is.
    #[serde(default)]
    pub availability: String,
}

/// Dependencies broken out by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyMap {
    /// Technical dependencies.
    #[serde(default)]
    pub technical: Vec<TechnicalDependency>,
    /// Knowledge prerequisites.
    #[serde(default)]
    pub knowledge: Vec<String>,
}

/// Feasibility sub-scores, each in `[0, 1]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Feasibility {
    /// Technical feasibility.
    #[serde(default)]
    pub technical: f32,
    /// Resource feasibility.
    #[serde(default)]
    pub resource: f32,
    /// Schedule feasibility.
    #[serde(default)]
    pub time: f32,
    /// Overall feasibility.
    #[serde(default)]
    pub overall: f32,
    /// Hard blockers found.
    #[serde(default)]
    pub blockers: Vec<String>,
}

/// Auditor output: risks, dependencies, and feasibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    /// Aggregate risk view.
    pub risk_assessment: RiskAssessment,
    /// External dependencies.
    #[serde(default)]
    pub dependencies: DependencyMap,
    /// Security considerations.
    #[serde(default)]
    pub security_concerns: Vec<String>,
    /// Feasibility scores.
    #[serde(default)]
    pub feasibility_assessment: Feasibility,
    /// Recommended adjustments.
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl AuditReport {
    /// The degraded report used when auditing fails: level unknown,
    /// everything else empty.
    #[must_use]
    pub fn unassessed() -> Self {
        Self {
            risk_assessment: RiskAssessment::default(),
            dependencies: DependencyMap::default(),
            security_concerns: Vec::new(),
            feasibility_assessment: Feasibility::default(),
            recommendations: Vec::new(),
        }
    }
}

/// Kind of visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationKind {
    /// Data chart.
    Chart,
    /// Conceptual diagram.
    Diagram,
    /// Process flowchart.
    Flowchart,
    /// System architecture.
    Architecture,
    /// Illustrative image.
    Image,
}

/// Visualizer output item: a renderable specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visualization {
    /// Run-unique identifier.
    #[serde(default)]
    pub id: String,
    /// Kind of visualization.
    #[serde(rename = "type")]
    pub kind: VisualizationKind,
    /// Display title.
    pub title: String,
    /// What the visualization communicates.
    #[serde(default)]
    pub purpose: String,
    /// Opaque renderer specification.
    #[serde(default)]
    pub specification: Value,
}

/// A section of the final artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    /// Section heading.
    pub title: String,
    /// Section body.
    #[serde(default)]
    pub content: String,
    /// Nested subsections.
    #[serde(default)]
    pub subsections: Vec<Section>,
    /// Self-reported confidence in `[0, 1]`.
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// Citation ids backing the section.
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Judge output: the assembled artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalArtifact {
    /// Artifact family as a string (mirrors [`OutputType`]).
    #[serde(default, rename = "type")]
    pub artifact_type: String,
    /// Ordered sections.
    pub sections: Vec<Section>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Value,
}

/// The judge's self-reported quality rubric, each score in `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RubricScores {
    /// How well claims trace to evidence.
    pub groundedness: f32,
    /// How well the artifact hangs together.
    pub coherence: f32,
    /// How fully it covers the plan.
    pub completeness: f32,
}

impl RubricScores {
    /// The consensus score: the mean of the three sub-scores.
    #[must_use]
    pub fn consensus(&self) -> f32 {
        (self.groundedness + self.coherence + self.completeness) / 3.0
    }

    /// Whether every sub-score lies in `[0, 1]`.
    #[must_use]
    pub fn in_range(&self) -> bool {
        [self.groundedness, self.coherence, self.completeness]
            .iter()
            .all(|s| (0.0..=1.0).contains(s))
    }
}

/// What the judge decided about the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The artifact is good enough to ship.
    Accept,
    /// Run another deliberation round.
    NeedsRevision,
}

/// The judge's raw reply shape: artifact plus rubric.
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeAssessment {
    /// The assembled artifact.
    pub artifact: FinalArtifact,
    /// Self-reported quality scores.
    pub scores: RubricScores,
    /// What a revision round should improve.
    #[serde(default)]
    pub revision_notes: Vec<String>,
}

/// The judge's typed verdict after validation and decision derivation.
#[derive(Debug, Clone, Serialize)]
pub struct JudgeVerdict {
    /// The assembled artifact.
    pub artifact: FinalArtifact,
    /// Validated rubric scores; `None` when the judge degraded.
    pub scores: Option<RubricScores>,
    /// Accept or revise.
    pub decision: Decision,
    /// What a revision round should improve.
    pub revision_notes: Vec<String>,
}

/// Discriminated union of everything an agent may contribute to the
/// shared state, keyed by the agent that produced it.
#[derive(Debug, Clone, Serialize)]
pub enum AgentOutput {
    /// Interpreter result.
    Intent(Intent),
    /// Planner result.
    Plan(Plan),
    /// Grounder result.
    Findings(Vec<ResearchFinding>),
    /// Auditor result.
    Audit(AuditReport),
    /// Visualizer result.
    Visuals(Vec<Visualization>),
    /// Judge result.
    Verdict(JudgeVerdict),
}

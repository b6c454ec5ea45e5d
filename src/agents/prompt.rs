//! Prompt templates and deterministic prompt assembly.
//!
//! Every prompt is `template + "## Input" + fenced JSON`; the grounder
//! additionally gets a `## Retrieved Evidence` block with `[Source N]`
//! labels. Assembly is pure: no randomness, no environment lookups, and
//! `serde_json`'s ordered maps keep the JSON fragment stable.

use std::fmt::Write;

use serde_json::Value;

use crate::retrieval::{SourceOrigin, SourceRecord};

/// Appended to the prompt when a generation attempt could not be parsed.
pub const JSON_RETRY_INSTRUCTION: &str =
    "\n\nYour previous reply could not be parsed. Respond with a single valid JSON object and nothing else.";

/// Builds the canonical prompt: template, then the input fragment.
#[must_use]
pub fn assemble(template: &str, input: &Value) -> String {
    format!("{template}\n\n## Input\n\n```json\n{}\n```", pretty(input))
}

/// Builds a prompt with a retrieved-evidence block before the input.
#[must_use]
pub fn assemble_with_evidence(template: &str, evidence: &str, input: &Value) -> String {
    format!(
        "{template}\n\n## Retrieved Evidence\n\n{evidence}\n## Input\n\n```json\n{}\n```",
        pretty(input)
    )
}

fn pretty(input: &Value) -> String {
    serde_json::to_string_pretty(input).unwrap_or_else(|_| "{}".to_string())
}

/// Formats a question's evidence list as `[Source N]` blocks. `N` is the
/// 1-based index within the list; findings cite sources by this number.
#[must_use]
pub fn format_evidence(sources: &[SourceRecord]) -> String {
    if sources.is_empty() {
        return "(no sources retrieved)\n".to_string();
    }
    let mut out = String::new();
    for (index, source) in sources.iter().enumerate() {
        let origin = match source.origin {
            SourceOrigin::Vector => "vector",
            SourceOrigin::Web => "web",
        };
        let _ = writeln!(out, "[Source {}] ({origin}) {}", index + 1, source.title);
        if let Some(url) = &source.url {
            let _ = writeln!(out, "URL: {url}");
        }
        let _ = writeln!(out, "{}\n", source.content);
    }
    out
}

/// Template for the interpreter agent.
pub const INTERPRETER_TEMPLATE: &str = r#"You are the interpreter in a deliberative research pipeline. Read the user's brief and any clarification answers, and produce a structured interpretation of what they want.

## Instructions

1. Identify the primary goal: what the user fundamentally wants produced.
2. Name the subject domain.
3. Choose the output type: "research_report", "project_spec", or "learning_path". Respect the execution mode unless the brief clearly demands otherwise.
4. Judge the scope: "broad", "moderate", or "narrow".
5. Extract concrete requirements stated or strongly implied by the brief.
6. List ambiguities, and up to five clarifying questions worth asking.
7. Report your confidence in this interpretation as a number in [0, 1].

## Output Format (JSON)

```json
{
  "primary_goal": "...",
  "domain": "...",
  "output_type": "research_report",
  "scope": "moderate",
  "extracted_requirements": ["..."],
  "ambiguities": ["..."],
  "clarifying_questions": ["..."],
  "confidence": 0.8
}
```

## Rules

- Do not invent requirements the brief does not support.
- Return ONLY the JSON object, no surrounding text."#;

/// Template for the planner agent.
pub const PLANNER_TEMPLATE: &str = r#"You are the planner in a deliberative research pipeline. Turn the interpreted brief into a research plan: questions, phases, and success criteria.

## Instructions

1. Decompose the goal into research questions. Give each a short unique id ("rq-1", "rq-2", ...), a type ("factual", "analytical", "comparative", "exploratory"), a priority ("critical", "high", "medium", "low"), and a time estimate in minutes.
2. Declare dependencies between questions by id. Dependencies must form a directed acyclic graph: no question may depend, directly or transitively, on itself.
3. Group the questions into ordered phases. Mark a phase "parallel" when its questions are independent of each other.
4. State the success criteria the final artifact must meet.

## Output Format (JSON)

```json
{
  "research_questions": [
    {"id": "rq-1", "question": "...", "type": "factual", "priority": "critical", "estimated_time_minutes": 10, "dependencies": []}
  ],
  "phases": [
    {"name": "Foundations", "description": "...", "rq_ids": ["rq-1"], "parallel": false}
  ],
  "success_criteria": ["..."],
  "estimated_total_time_minutes": 60
}
```

## Rules

- Three to eight questions for a moderate scope; fewer for narrow, more for broad.
- Every dependency must reference an existing question id.
- Return ONLY the JSON object, no surrounding text."#;

/// Template for the grounder agent. Applied once per research question,
/// with that question's evidence block.
pub const GROUNDER_TEMPLATE: &str = r#"You are the grounder in a deliberative research pipeline. Answer one research question using ONLY the retrieved evidence below.

## Instructions

1. Read every [Source N] block.
2. Write a direct answer to the question, grounded in the sources.
3. Break the answer into key findings. For each finding, cite the supporting sources: set "source_id" to the number N from the [Source N] label, quote a short excerpt, and rate the source's reliability ("high", "medium", "low").
4. Note contradictions between sources and gaps the evidence cannot close.
5. Report overall confidence in [0, 1]; lower it when evidence is thin.

## Output Format (JSON)

```json
{
  "question_id": "rq-1",
  "answer": "...",
  "key_findings": [
    {
      "finding": "...",
      "evidence": [{"source_id": "1", "excerpt": "...", "reliability": "high"}],
      "confidence": 0.8
    }
  ],
  "contradictions": ["..."],
  "knowledge_gaps": ["..."],
  "overall_confidence": 0.75
}
```

## Rules

- Every claim must trace to a cited source. Do not cite source numbers that do not appear above.
- If the evidence is empty or irrelevant, say so: empty key_findings, the gap recorded, and a low overall_confidence.
- Return ONLY the JSON object, no surrounding text."#;

/// Template for the auditor agent.
pub const AUDITOR_TEMPLATE: &str = r#"You are the auditor in a deliberative research pipeline. Assess the plan and findings for risk, dependencies, and feasibility.

## Instructions

1. Identify risks: category, description, severity ("low", "medium", "high", "critical"), likelihood, and a mitigation for each. Summarize with an overall risk level.
2. List external dependencies: technical ones (name, why, availability) and knowledge prerequisites.
3. Note security concerns, if any apply.
4. Score feasibility in [0, 1] along technical, resource, and time axes, plus an overall score, and name hard blockers.
5. Recommend concrete adjustments.

## Output Format (JSON)

```json
{
  "risk_assessment": {
    "overall_risk_level": "medium",
    "risks": [{"category": "technical", "description": "...", "severity": "medium", "likelihood": "possible", "mitigation": "..."}]
  },
  "dependencies": {
    "technical": [{"name": "...", "reason": "...", "availability": "widely available"}],
    "knowledge": ["..."]
  },
  "security_concerns": ["..."],
  "feasibility_assessment": {"technical": 0.9, "resource": 0.8, "time": 0.7, "overall": 0.8, "blockers": []},
  "recommendations": ["..."]
}
```

## Rules

- Ground every risk in the plan or findings; do not speculate beyond them.
- Return ONLY the JSON object, no surrounding text."#;

/// Template for the visualizer agent.
pub const VISUALIZER_TEMPLATE: &str = r#"You are the visualizer in a deliberative research pipeline. Propose visualizations that would strengthen the final artifact.

## Instructions

1. Choose visualizations that communicate structure or data the prose cannot: type is one of "chart", "diagram", "flowchart", "architecture", "image".
2. Give each a unique id ("viz-1", ...), a title, and the purpose it serves.
3. Provide a renderer-ready specification object for each: for charts, axes and series; for diagrams and flowcharts, nodes and edges; for architecture, components and connections.

## Output Format (JSON)

```json
{
  "visualizations": [
    {
      "id": "viz-1",
      "type": "flowchart",
      "title": "...",
      "purpose": "...",
      "specification": {"nodes": [], "edges": []}
    }
  ]
}
```

## Rules

- Two to five visualizations; an empty list is acceptable when nothing earns its place.
- Return ONLY the JSON object, no surrounding text."#;

/// Template for the judge agent.
pub const JUDGE_TEMPLATE: &str = r#"You are the judge in a deliberative research pipeline. Assemble the final artifact from everything the other agents produced, then score your own output honestly.

## Instructions

1. Assemble the artifact: a typed document with ordered sections. Each section carries a title, markdown content, optional subsections, a confidence in [0, 1], and the citation ids (from the evidence) that back it.
2. Cover the plan's research questions and success criteria; fold in audit caveats and proposed visualizations where they belong.
3. Score the artifact in [0, 1] on three axes: groundedness (claims trace to evidence), coherence (the artifact hangs together), completeness (the plan is covered).
4. If the artifact falls short, say what a revision round should improve in revision_notes.

## Output Format (JSON)

```json
{
  "artifact": {
    "type": "research_report",
    "sections": [
      {"title": "...", "content": "...", "subsections": [], "confidence": 0.9, "evidence": ["c1"]}
    ],
    "metadata": {}
  },
  "scores": {"groundedness": 0.9, "coherence": 0.9, "completeness": 0.85},
  "revision_notes": []
}
```

## Rules

- Score honestly; inflated scores defeat the deliberation loop.
- Cite only citation ids that exist in the evidence.
- Return ONLY the JSON object, no surrounding text."#;

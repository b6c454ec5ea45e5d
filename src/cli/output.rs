//! Result rendering for the CLI.
//!
//! Text output is a human-readable run summary; JSON output is the
//! serialized run state for scripting (`--format json | jq ...`).

// Rendering is the one place the CLI writes to stdout.
#![allow(clippy::print_stdout)]

use serde_json::json;

use crate::state::SharedState;

/// How results are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format `{other}` (expected text or json)")),
        }
    }
}

/// Renders a finished run.
pub fn render_run(state: &SharedState, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let rendered =
                serde_json::to_string_pretty(state).unwrap_or_else(|_| "{}".to_string());
            println!("{rendered}");
        }
        OutputFormat::Text => render_run_text(state),
    }
}

fn render_run_text(state: &SharedState) {
    println!("session:  {}", state.session_id);
    println!("mode:     {}", state.mode);
    println!("rounds:   {}", state.deliberation_round);
    match state.consensus_score {
        Some(score) => println!("consensus: {score:.2}"),
        None => println!("consensus: (not scored)"),
    }

    if let Some(artifact) = &state.final_artifact {
        println!("\n{} ({} sections)", artifact.artifact_type, artifact.sections.len());
        for section in &artifact.sections {
            println!("  - {} [confidence {:.2}]", section.title, section.confidence);
        }
    } else {
        println!("\n(no final artifact)");
    }

    if !state.citations.is_empty() {
        println!("\ncitations: {}", state.citations.len());
        for citation in state.citations.all() {
            let url = citation.url.as_deref().unwrap_or("-");
            println!("  [{}] {} <{}>", citation.id, citation.title, url);
        }
    }

    if !state.retrieval_warnings.is_empty() {
        println!("\nretrieval warnings: {}", state.retrieval_warnings.len());
    }

    if state.errors.is_empty() {
        println!("\nno errors");
    } else {
        println!("\nerrors: {}", state.errors.len());
        for record in &state.errors {
            println!("  {} - {}", record.agent, record.message);
        }
    }
}

/// Renders the runtime's installed model list.
pub fn render_models(models: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let rendered = serde_json::to_string_pretty(&json!({ "models": models }))
                .unwrap_or_else(|_| "{}".to_string());
            println!("{rendered}");
        }
        OutputFormat::Text => {
            if models.is_empty() {
                println!("no models installed");
            }
            for model in models {
                println!("{model}");
            }
        }
    }
}

//! CLI command implementations.
//!
//! Wires configuration, the runtime client, the slot, the retrieval
//! capabilities, and the six agents into a pipeline engine, then maps
//! the outcome to a process exit code: 0 accepted artifact, 1
//! configuration or fatal error, 2 artifact failed the final gate,
//! 130 cancelled.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agents::{Auditor, Grounder, Interpreter, Judge, Planner, Visualizer};
use crate::cli::output::{self, OutputFormat};
use crate::cli::parser::{Cli, Commands};
use crate::config::CoreConfig;
use crate::pipeline::{PipelineEngine, RunRequest};
use crate::retrieval::{DdgSearch, EvidenceRetriever, NullVectorStore};
use crate::runtime::{ModelRuntime, ModelSlot, OllamaClient};
use crate::state::{Mode, SharedState};

/// Exit code: success with an accepted artifact.
const EXIT_OK: u8 = 0;
/// Exit code: configuration or fatal error.
const EXIT_FATAL: u8 = 1;
/// Exit code: pipeline completed but the artifact failed the final gate.
const EXIT_DEGRADED: u8 = 2;
/// Exit code: caller cancellation.
const EXIT_CANCELLED: u8 = 130;

/// Bound on runtime probes made outside a pipeline run.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Executes the parsed CLI invocation and returns the process exit code.
pub async fn execute(cli: Cli) -> u8 {
    let format = match cli.format.parse::<OutputFormat>() {
        Ok(format) => format,
        Err(message) => {
            error!(%message, "invalid output format");
            return EXIT_FATAL;
        }
    };

    match cli.command {
        Commands::Run {
            brief,
            mode,
            session_id,
            timeout_seconds,
            clarifications,
            cache_dir,
            no_page_fetch,
        } => {
            run_pipeline(
                &brief,
                mode,
                session_id,
                timeout_seconds,
                &clarifications,
                cache_dir,
                no_page_fetch,
                format,
            )
            .await
        }
        Commands::Models => list_models(format).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    brief: &str,
    mode: Mode,
    session_id: Option<String>,
    timeout_seconds: u64,
    clarifications: &[String],
    cache_dir: Option<PathBuf>,
    no_page_fetch: bool,
    format: OutputFormat,
) -> u8 {
    let config = match CoreConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "configuration rejected");
            return EXIT_FATAL;
        }
    };

    let clarifications = match parse_clarifications(clarifications) {
        Ok(map) => map,
        Err(message) => {
            error!(%message, "invalid --clarify argument");
            return EXIT_FATAL;
        }
    };

    let client = match OllamaClient::new(&config) {
        Ok(client) => Arc::new(client) as Arc<dyn ModelRuntime>,
        Err(error) => {
            error!(%error, "failed to create runtime client");
            return EXIT_FATAL;
        }
    };
    let slot = Arc::new(ModelSlot::new(Arc::clone(&client), &config));

    let cache_dir = cache_dir.or_else(|| dirs::cache_dir().map(|d| d.join("conclave/web-cache")));
    let web = match DdgSearch::new(cache_dir, config.cache_ttl_days, !no_page_fetch) {
        Ok(web) => Arc::new(web),
        Err(error) => {
            error!(%error, "failed to set up web search");
            return EXIT_FATAL;
        }
    };
    let retriever = EvidenceRetriever::new(web, Arc::new(NullVectorStore), &config);

    let mut engine = PipelineEngine::new(config.clone(), slot);
    engine.register(Arc::new(Interpreter::new(&config)));
    engine.register(Arc::new(Planner::new(&config)));
    engine.register(Arc::new(Grounder::new(&config, retriever)));
    engine.register(Arc::new(Auditor::new(&config)));
    engine.register(Arc::new(Visualizer::new(&config)));
    engine.register(Arc::new(Judge::new(&config)));

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling run");
            signal_token.cancel();
        }
    });

    let session_id = session_id
        .unwrap_or_else(|| format!("run-{}", chrono::Utc::now().timestamp()));
    let request = RunRequest {
        user_brief: brief.to_string(),
        mode,
        clarifications,
        session_id,
        overall_deadline: Instant::now() + Duration::from_secs(timeout_seconds),
        cancel: cancel.clone(),
    };

    let state = match engine.run(request).await {
        Ok(state) => state,
        Err(error) => {
            error!(%error, "pipeline could not run");
            return EXIT_FATAL;
        }
    };

    output::render_run(&state, format);

    if cancel.is_cancelled() {
        return EXIT_CANCELLED;
    }
    if artifact_accepted(&state) {
        EXIT_OK
    } else {
        info!("final artifact failed the quality gate");
        EXIT_DEGRADED
    }
}

async fn list_models(format: OutputFormat) -> u8 {
    let config = match CoreConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "configuration rejected");
            return EXIT_FATAL;
        }
    };
    let client = match OllamaClient::new(&config) {
        Ok(client) => client,
        Err(error) => {
            error!(%error, "failed to create runtime client");
            return EXIT_FATAL;
        }
    };
    match client.list_models(Instant::now() + PROBE_TIMEOUT).await {
        Ok(models) => {
            output::render_models(&models, format);
            EXIT_OK
        }
        Err(error) => {
            error!(%error, "could not reach the model runtime");
            EXIT_FATAL
        }
    }
}

/// Whether the run ended with an artifact that passes the final gate.
fn artifact_accepted(state: &SharedState) -> bool {
    let sections_present = state
        .final_artifact
        .as_ref()
        .is_some_and(|a| !a.sections.is_empty());
    let consensus_valid = state
        .consensus_score
        .is_some_and(|score| (0.0..=1.0).contains(&score));
    sections_present && consensus_valid
}

fn parse_clarifications(raw: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut map = BTreeMap::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(format!("`{entry}` is not of the form key=value"));
        };
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{FinalArtifact, Section};
    use serde_json::Value;

    #[test]
    fn test_parse_clarifications() {
        let parsed = parse_clarifications(&["depth=deep".to_string(), "k = v".to_string()]);
        assert!(matches!(
            parsed,
            Ok(map) if map["depth"] == "deep" && map["k"] == "v"
        ));
    }

    #[test]
    fn test_parse_clarifications_rejects_bare_key() {
        assert!(parse_clarifications(&["depth".to_string()]).is_err());
    }

    #[test]
    fn test_artifact_accepted_requires_sections_and_score() {
        let mut state = SharedState::new("b", Mode::Research, BTreeMap::new(), "s");
        assert!(!artifact_accepted(&state));

        state.final_artifact = Some(FinalArtifact {
            artifact_type: "research_report".to_string(),
            sections: vec![Section {
                title: "S".to_string(),
                content: "c".to_string(),
                subsections: Vec::new(),
                confidence: 0.9,
                evidence: Vec::new(),
            }],
            metadata: Value::Null,
        });
        assert!(!artifact_accepted(&state));

        state.consensus_score = Some(0.9);
        assert!(artifact_accepted(&state));
    }
}

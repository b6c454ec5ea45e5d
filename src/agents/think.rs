//! The think-cycle shared by every agent.
//!
//! Assemble prompt → acquire the model slot → generate → extract JSON →
//! parse into the agent's typed output, retrying generation with a
//! JSON-only instruction on parse rejection, and degrading to a typed
//! fallback on exhaustion or any fatal error. The cycle never propagates
//! errors to the engine; failures become error records in the shared
//! state.

use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agents::prompt;
use crate::config::{CoreConfig, ModelDescriptor};
use crate::error::{AgentError, ParseRejection};
use crate::extract;
use crate::output::AgentOutput;
use crate::runtime::{GenerateRequest, ModelRuntime, ModelSlot};
use crate::state::{AgentId, SharedState};

/// Everything a think-cycle needs besides the state: the slot, the
/// configuration, and the step's deadline and cancellation token.
pub struct ThinkContext<'a> {
    /// The single model slot.
    pub slot: &'a ModelSlot,
    /// Core configuration.
    pub config: &'a CoreConfig,
    /// Deadline for this agent step.
    pub deadline: Instant,
    /// Cooperative cancellation for the whole run.
    pub cancel: &'a CancellationToken,
}

/// An agent in the deliberation pipeline.
///
/// Implementations provide the three hooks (input shaping, parse
/// validation, degradation) plus their identity and model declaration;
/// the provided [`think`](DeliberativeAgent::think) drives the cycle.
/// Each agent reads its declared subset of the state and contributes
/// exactly one field, which the engine records from the returned output.
#[async_trait]
pub trait DeliberativeAgent: Send + Sync {
    /// This agent's identity.
    fn id(&self) -> AgentId;

    /// The model this agent declared at construction.
    fn model(&self) -> &ModelDescriptor;

    /// The agent's prompt template.
    fn template(&self) -> &'static str;

    /// Shapes the agent's input fragment from the shared state.
    fn prepare_input(&self, state: &SharedState) -> Value;

    /// Validates raw model JSON into the agent's typed output.
    ///
    /// # Errors
    ///
    /// Returns [`ParseRejection`] when the JSON does not satisfy the
    /// agent's schema or invariants; the cycle then retries generation.
    fn parse(&self, raw: &Value, state: &SharedState) -> Result<AgentOutput, ParseRejection>;

    /// The typed fallback used when the cycle fails.
    fn degrade(&self, state: &SharedState) -> AgentOutput;

    /// Runs the full think-cycle. Never fails: on any error the failure
    /// is recorded in `state.errors` and the degraded output returned.
    async fn think(&self, state: &mut SharedState, ctx: &ThinkContext<'_>) -> AgentOutput {
        let input = self.prepare_input(state);
        let base_prompt = prompt::assemble(self.template(), &input);

        let state_ref: &SharedState = &*state;
        let outcome = ctx
            .slot
            .with_model(self.model(), ctx.deadline, ctx.cancel, |runtime| async move {
                attempt_generation(
                    &runtime,
                    self.id(),
                    self.model(),
                    &base_prompt,
                    ctx.config.max_parse_retries,
                    ctx.config.generate_timeout,
                    ctx.deadline,
                    |raw| self.parse(raw, state_ref),
                )
                .await
            })
            .await;

        match outcome {
            Ok(output) => output,
            Err(error) => {
                state.record_error(self.id(), error.to_string());
                self.degrade(state)
            }
        }
    }
}

/// One generation-and-parse loop against an already-resident model.
///
/// Retries generation up to `max_parse_retries` extra times after an
/// extraction or parse rejection, appending the JSON-only instruction;
/// the prompt is otherwise identical. Each attempt is bounded by
/// `generate_timeout` within the caller's deadline. Runtime failures
/// are not retried here.
///
/// # Errors
///
/// Returns [`AgentError::ParseRejected`] on retry exhaustion or any
/// [`AgentError::Runtime`] failure from the runtime.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn attempt_generation<P>(
    runtime: &Arc<dyn ModelRuntime>,
    agent: AgentId,
    model: &ModelDescriptor,
    base_prompt: &str,
    max_parse_retries: u32,
    generate_timeout: Duration,
    deadline: Instant,
    parse: P,
) -> Result<AgentOutput, AgentError>
where
    P: Fn(&Value) -> Result<AgentOutput, ParseRejection>,
{
    let mut attempt = 0u32;
    loop {
        let prompt = if attempt == 0 {
            base_prompt.to_string()
        } else {
            format!("{base_prompt}{}", prompt::JSON_RETRY_INSTRUCTION)
        };
        let request = GenerateRequest {
            model: model.id.clone(),
            prompt,
            temperature: model.temperature,
            num_ctx: model.num_ctx,
            num_predict: model.num_predict,
        };
        let attempt_deadline = cmp::min(deadline, Instant::now() + generate_timeout);
        let text = runtime.generate(&request, attempt_deadline).await?;

        let rejection = match extract::extract_object(&text) {
            Some(raw) => match parse(&raw) {
                Ok(output) => {
                    debug!(%agent, attempt, "agent output parsed");
                    return Ok(output);
                }
                Err(rejection) => rejection.message,
            },
            None => "no JSON object found in model output".to_string(),
        };

        if attempt >= max_parse_retries {
            return Err(AgentError::ParseRejected { message: rejection });
        }
        warn!(%agent, attempt, %rejection, "retrying generation with JSON-only instruction");
        attempt += 1;
    }
}

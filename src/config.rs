//! Core configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment
//! variables (`CONCLAVE_` prefix) → defaults. Validation happens at
//! `build()`; a rejected value means the core refuses to start.

use std::time::Duration;

use crate::error::ConfigError;
use crate::state::AgentId;

/// Default model runtime base URL.
const DEFAULT_BASE_URL: &str = "http://localhost:11434";
/// Default load retry attempts.
const DEFAULT_LOAD_RETRIES: u32 = 3;
/// Default exponential backoff base for load retries, in seconds.
const DEFAULT_BACKOFF_BASE_SECS: u64 = 2;
/// Default jitter fraction applied to each backoff wait.
const DEFAULT_BACKOFF_JITTER: f64 = 0.25;
/// Default settle wait after an unload before the next load, in seconds.
const DEFAULT_SWAP_SETTLE_SECS: u64 = 2;
/// Default per-attempt model load timeout, in seconds.
const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 30;
/// Default generation timeout, in seconds.
const DEFAULT_GENERATE_TIMEOUT_SECS: u64 = 1800;
/// Default maximum tokens to generate per call.
const DEFAULT_MAX_GENERATION_TOKENS: u32 = 4096;
/// Default context window requested from the runtime.
const DEFAULT_MAX_CONTEXT_TOKENS: u32 = 16384;
/// Default cap on evidence sources kept per research question.
const DEFAULT_MAX_SOURCES_PER_QUESTION: usize = 10;
/// Default top-k for vector store sub-queries.
const DEFAULT_VECTOR_K: usize = 5;
/// Default top-k for web search sub-queries.
const DEFAULT_WEB_K: usize = 5;
/// Default web search cache TTL, in days.
const DEFAULT_CACHE_TTL_DAYS: u64 = 7;
/// Default consensus score below which the judge requests revision.
const DEFAULT_CONSENSUS_THRESHOLD: f32 = 0.85;
/// Default ceiling on deliberation rounds.
const DEFAULT_MAX_DELIBERATION_ROUNDS: u32 = 7;
/// Default wall-clock budget per agent step, in seconds.
const DEFAULT_AGENT_TIME_BUDGET_SECS: u64 = 1800;
/// Default generation retries after a parse rejection.
const DEFAULT_MAX_PARSE_RETRIES: u32 = 2;
/// Default bound on concurrent outbound retrieval queries.
const DEFAULT_RETRIEVAL_CONCURRENCY: usize = 4;
/// Default character cap applied to evidence content.
const DEFAULT_EVIDENCE_CONTENT_CAP: usize = 2000;

/// A model as declared by one agent: identifier plus the generation
/// parameters the agent was constructed with. Never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    /// Runtime model identifier (opaque to the core).
    pub id: String,
    /// Declared minimum accelerator memory, in MB.
    pub min_vram_mb: u32,
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f32,
    /// Context window to request.
    pub num_ctx: u32,
    /// Maximum tokens to generate.
    pub num_predict: u32,
}

impl ModelDescriptor {
    /// Creates a descriptor with the crate's default token limits.
    #[must_use]
    pub fn new(id: impl Into<String>, min_vram_mb: u32, temperature: f32) -> Self {
        Self {
            id: id.into(),
            min_vram_mb,
            temperature,
            num_ctx: DEFAULT_MAX_CONTEXT_TOKENS,
            num_predict: DEFAULT_MAX_GENERATION_TOKENS,
        }
    }
}

/// Configuration for the deliberation core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Model runtime base URL.
    pub base_url: String,
    /// Maximum load attempts per model swap.
    pub model_load_retries: u32,
    /// Exponential backoff base between load attempts.
    pub model_load_backoff_base: Duration,
    /// Jitter fraction applied to each backoff wait (`0.0` disables).
    pub backoff_jitter: f64,
    /// Settle wait after an unload before the next load.
    pub model_swap_settle: Duration,
    /// Per-attempt bound on a model load probe.
    pub load_timeout: Duration,
    /// Bound on a single generation call.
    pub generate_timeout: Duration,
    /// Maximum tokens to generate per call.
    pub max_generation_tokens: u32,
    /// Context window requested from the runtime.
    pub max_context_tokens: u32,
    /// Evidence sources kept per research question after ranking.
    pub max_sources_per_question: usize,
    /// Top-k for vector store sub-queries.
    pub vector_k: usize,
    /// Top-k for web search sub-queries.
    pub web_k: usize,
    /// Web search cache TTL.
    pub cache_ttl_days: u64,
    /// Consensus score below which the judge requests revision.
    pub consensus_threshold: f32,
    /// Ceiling on deliberation rounds.
    pub max_deliberation_rounds: u32,
    /// Wall-clock budget per agent step.
    pub agent_time_budget: Duration,
    /// Generation retries after a parse rejection.
    pub max_parse_retries: u32,
    /// Bound on concurrent outbound retrieval queries.
    pub retrieval_concurrency: usize,
    /// Character cap applied to evidence content.
    pub evidence_content_cap: usize,
    /// Per-agent model declarations.
    pub models: AgentModels,
}

/// The model each agent declares at construction.
#[derive(Debug, Clone)]
pub struct AgentModels {
    /// Interpreter model.
    pub interpreter: ModelDescriptor,
    /// Planner model.
    pub planner: ModelDescriptor,
    /// Grounder model.
    pub grounder: ModelDescriptor,
    /// Auditor model.
    pub auditor: ModelDescriptor,
    /// Visualizer model.
    pub visualizer: ModelDescriptor,
    /// Judge model.
    pub judge: ModelDescriptor,
}

impl AgentModels {
    /// Returns the descriptor declared for `agent`.
    #[must_use]
    pub const fn for_agent(&self, agent: AgentId) -> &ModelDescriptor {
        match agent {
            AgentId::Interpreter => &self.interpreter,
            AgentId::Planner => &self.planner,
            AgentId::Grounder => &self.grounder,
            AgentId::Auditor => &self.auditor,
            AgentId::Visualizer => &self.visualizer,
            AgentId::Judge => &self.judge,
        }
    }

    fn defaults(num_ctx: u32, num_predict: u32) -> Self {
        let descriptor = |id: &str, vram: u32, temperature: f32| ModelDescriptor {
            id: id.to_string(),
            min_vram_mb: vram,
            temperature,
            num_ctx,
            num_predict,
        };
        Self {
            interpreter: descriptor("llama3.1:8b", 6144, 0.3),
            planner: descriptor("qwen2.5:14b", 10240, 0.2),
            grounder: descriptor("llama3.1:8b", 6144, 0.2),
            auditor: descriptor("qwen2.5:14b", 10240, 0.1),
            visualizer: descriptor("llama3.1:8b", 6144, 0.4),
            judge: descriptor("qwen2.5:14b", 10240, 0.1),
        }
    }
}

impl CoreConfig {
    /// Creates a new builder for `CoreConfig`.
    #[must_use]
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any resolved value is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder().from_env().build()
    }
}

/// Builder for [`CoreConfig`].
#[derive(Debug, Clone, Default)]
pub struct CoreConfigBuilder {
    base_url: Option<String>,
    model_load_retries: Option<u32>,
    model_load_backoff_base: Option<Duration>,
    backoff_jitter: Option<f64>,
    model_swap_settle: Option<Duration>,
    load_timeout: Option<Duration>,
    generate_timeout: Option<Duration>,
    max_generation_tokens: Option<u32>,
    max_context_tokens: Option<u32>,
    max_sources_per_question: Option<usize>,
    vector_k: Option<usize>,
    web_k: Option<usize>,
    cache_ttl_days: Option<u64>,
    consensus_threshold: Option<f32>,
    max_deliberation_rounds: Option<u32>,
    agent_time_budget: Option<Duration>,
    max_parse_retries: Option<u32>,
    retrieval_concurrency: Option<usize>,
    evidence_content_cap: Option<usize>,
    model_overrides: Vec<(AgentId, ModelDescriptor)>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl CoreConfigBuilder {
    /// Populates unset fields from `CONCLAVE_` environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.base_url.is_none() {
            self.base_url = std::env::var("CONCLAVE_OLLAMA_BASE_URL").ok();
        }
        if self.model_load_retries.is_none() {
            self.model_load_retries = env_parse("CONCLAVE_MODEL_LOAD_RETRIES");
        }
        if self.consensus_threshold.is_none() {
            self.consensus_threshold = env_parse("CONCLAVE_CONSENSUS_THRESHOLD");
        }
        if self.max_deliberation_rounds.is_none() {
            self.max_deliberation_rounds = env_parse("CONCLAVE_MAX_DELIBERATION_ROUNDS");
        }
        if self.cache_ttl_days.is_none() {
            self.cache_ttl_days = env_parse("CONCLAVE_CACHE_TTL_DAYS");
        }
        if self.agent_time_budget.is_none() {
            self.agent_time_budget =
                env_parse("CONCLAVE_AGENT_TIME_BUDGET_SECONDS").map(Duration::from_secs);
        }
        if self.max_sources_per_question.is_none() {
            self.max_sources_per_question = env_parse("CONCLAVE_MAX_SOURCES_PER_QUESTION");
        }
        self
    }

    /// Sets the model runtime base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the maximum load attempts per model swap.
    #[must_use]
    pub const fn model_load_retries(mut self, n: u32) -> Self {
        self.model_load_retries = Some(n);
        self
    }

    /// Sets the exponential backoff base between load attempts.
    #[must_use]
    pub const fn model_load_backoff_base(mut self, d: Duration) -> Self {
        self.model_load_backoff_base = Some(d);
        self
    }

    /// Sets the jitter fraction applied to backoff waits.
    #[must_use]
    pub const fn backoff_jitter(mut self, fraction: f64) -> Self {
        self.backoff_jitter = Some(fraction);
        self
    }

    /// Sets the settle wait between an unload and the next load.
    #[must_use]
    pub const fn model_swap_settle(mut self, d: Duration) -> Self {
        self.model_swap_settle = Some(d);
        self
    }

    /// Sets the per-attempt model load timeout.
    #[must_use]
    pub const fn load_timeout(mut self, d: Duration) -> Self {
        self.load_timeout = Some(d);
        self
    }

    /// Sets the bound on a single generation call.
    #[must_use]
    pub const fn generate_timeout(mut self, d: Duration) -> Self {
        self.generate_timeout = Some(d);
        self
    }

    /// Sets the maximum tokens generated per call.
    #[must_use]
    pub const fn max_generation_tokens(mut self, n: u32) -> Self {
        self.max_generation_tokens = Some(n);
        self
    }

    /// Sets the context window requested from the runtime.
    #[must_use]
    pub const fn max_context_tokens(mut self, n: u32) -> Self {
        self.max_context_tokens = Some(n);
        self
    }

    /// Sets the evidence sources kept per research question.
    #[must_use]
    pub const fn max_sources_per_question(mut self, n: usize) -> Self {
        self.max_sources_per_question = Some(n);
        self
    }

    /// Sets the vector store top-k.
    #[must_use]
    pub const fn vector_k(mut self, k: usize) -> Self {
        self.vector_k = Some(k);
        self
    }

    /// Sets the web search top-k.
    #[must_use]
    pub const fn web_k(mut self, k: usize) -> Self {
        self.web_k = Some(k);
        self
    }

    /// Sets the web search cache TTL in days.
    #[must_use]
    pub const fn cache_ttl_days(mut self, days: u64) -> Self {
        self.cache_ttl_days = Some(days);
        self
    }

    /// Sets the consensus threshold for accepting the final artifact.
    #[must_use]
    pub const fn consensus_threshold(mut self, threshold: f32) -> Self {
        self.consensus_threshold = Some(threshold);
        self
    }

    /// Sets the ceiling on deliberation rounds.
    #[must_use]
    pub const fn max_deliberation_rounds(mut self, n: u32) -> Self {
        self.max_deliberation_rounds = Some(n);
        self
    }

    /// Sets the wall-clock budget per agent step.
    #[must_use]
    pub const fn agent_time_budget(mut self, d: Duration) -> Self {
        self.agent_time_budget = Some(d);
        self
    }

    /// Sets the generation retries after a parse rejection.
    #[must_use]
    pub const fn max_parse_retries(mut self, n: u32) -> Self {
        self.max_parse_retries = Some(n);
        self
    }

    /// Sets the bound on concurrent outbound retrieval queries.
    #[must_use]
    pub const fn retrieval_concurrency(mut self, n: usize) -> Self {
        self.retrieval_concurrency = Some(n);
        self
    }

    /// Sets the character cap applied to evidence content.
    #[must_use]
    pub const fn evidence_content_cap(mut self, n: usize) -> Self {
        self.evidence_content_cap = Some(n);
        self
    }

    /// Overrides the model declared for one agent.
    #[must_use]
    pub fn model(mut self, agent: AgentId, descriptor: ModelDescriptor) -> Self {
        self.model_overrides.push((agent, descriptor));
        self
    }

    /// Builds the [`CoreConfig`], validating ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for out-of-range values.
    pub fn build(self) -> Result<CoreConfig, ConfigError> {
        let consensus_threshold = self.consensus_threshold.unwrap_or(DEFAULT_CONSENSUS_THRESHOLD);
        if !(0.0..=1.0).contains(&consensus_threshold) {
            return Err(ConfigError::Invalid {
                field: "consensus_threshold",
                reason: format!("{consensus_threshold} is outside [0, 1]"),
            });
        }

        let backoff_jitter = self.backoff_jitter.unwrap_or(DEFAULT_BACKOFF_JITTER);
        if !(0.0..1.0).contains(&backoff_jitter) {
            return Err(ConfigError::Invalid {
                field: "backoff_jitter",
                reason: format!("{backoff_jitter} is outside [0, 1)"),
            });
        }

        let model_load_retries = self.model_load_retries.unwrap_or(DEFAULT_LOAD_RETRIES);
        if model_load_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "model_load_retries",
                reason: "at least one attempt is required".to_string(),
            });
        }

        let max_deliberation_rounds = self
            .max_deliberation_rounds
            .unwrap_or(DEFAULT_MAX_DELIBERATION_ROUNDS);
        if max_deliberation_rounds == 0 {
            return Err(ConfigError::Invalid {
                field: "max_deliberation_rounds",
                reason: "at least one round is required".to_string(),
            });
        }

        let retrieval_concurrency = self
            .retrieval_concurrency
            .unwrap_or(DEFAULT_RETRIEVAL_CONCURRENCY);
        if retrieval_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "retrieval_concurrency",
                reason: "at least one concurrent query is required".to_string(),
            });
        }

        let max_context_tokens = self.max_context_tokens.unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS);
        let max_generation_tokens = self
            .max_generation_tokens
            .unwrap_or(DEFAULT_MAX_GENERATION_TOKENS);

        let mut models = AgentModels::defaults(max_context_tokens, max_generation_tokens);
        for (agent, descriptor) in self.model_overrides {
            if !(0.0..=1.0).contains(&descriptor.temperature) {
                return Err(ConfigError::Invalid {
                    field: "model temperature",
                    reason: format!(
                        "{} for `{agent}` is outside [0, 1]",
                        descriptor.temperature
                    ),
                });
            }
            match agent {
                AgentId::Interpreter => models.interpreter = descriptor,
                AgentId::Planner => models.planner = descriptor,
                AgentId::Grounder => models.grounder = descriptor,
                AgentId::Auditor => models.auditor = descriptor,
                AgentId::Visualizer => models.visualizer = descriptor,
                AgentId::Judge => models.judge = descriptor,
            }
        }

        Ok(CoreConfig {
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model_load_retries,
            model_load_backoff_base: self
                .model_load_backoff_base
                .unwrap_or(Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS)),
            backoff_jitter,
            model_swap_settle: self
                .model_swap_settle
                .unwrap_or(Duration::from_secs(DEFAULT_SWAP_SETTLE_SECS)),
            load_timeout: self
                .load_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_LOAD_TIMEOUT_SECS)),
            generate_timeout: self
                .generate_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_GENERATE_TIMEOUT_SECS)),
            max_generation_tokens,
            max_context_tokens,
            max_sources_per_question: self
                .max_sources_per_question
                .unwrap_or(DEFAULT_MAX_SOURCES_PER_QUESTION),
            vector_k: self.vector_k.unwrap_or(DEFAULT_VECTOR_K),
            web_k: self.web_k.unwrap_or(DEFAULT_WEB_K),
            cache_ttl_days: self.cache_ttl_days.unwrap_or(DEFAULT_CACHE_TTL_DAYS),
            consensus_threshold,
            max_deliberation_rounds,
            agent_time_budget: self
                .agent_time_budget
                .unwrap_or(Duration::from_secs(DEFAULT_AGENT_TIME_BUDGET_SECS)),
            max_parse_retries: self.max_parse_retries.unwrap_or(DEFAULT_MAX_PARSE_RETRIES),
            retrieval_concurrency,
            evidence_content_cap: self
                .evidence_content_cap
                .unwrap_or(DEFAULT_EVIDENCE_CONTENT_CAP),
            models,
        })
    }
}

//! Single-slot model loader.
//!
//! Guarantees at most one model resident in accelerator memory at a time.
//! Callers run their generation body under the slot lock, so a model is
//! resident from load through body completion and concurrent callers are
//! totally ordered by lock acquisition.

use std::cmp;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{CoreConfig, ModelDescriptor};
use crate::error::{AgentError, RuntimeError};
use crate::runtime::ModelRuntime;

/// The single accelerator-memory slot.
pub struct ModelSlot {
    runtime: Arc<dyn ModelRuntime>,
    resident: Mutex<Option<String>>,
    retries: u32,
    backoff_base: Duration,
    jitter: f64,
    settle: Duration,
    load_timeout: Duration,
}

impl ModelSlot {
    /// Creates a slot over the given runtime.
    #[must_use]
    pub fn new(runtime: Arc<dyn ModelRuntime>, config: &CoreConfig) -> Self {
        Self {
            runtime,
            resident: Mutex::new(None),
            retries: config.model_load_retries,
            backoff_base: config.model_load_backoff_base,
            jitter: config.backoff_jitter,
            settle: config.model_swap_settle,
            load_timeout: config.load_timeout,
        }
    }

    /// Runs `body` with `model` resident, swapping out any previous
    /// model first. The slot lock is held for the entire body; no other
    /// caller can observe a different model loaded meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ModelLoadFailed`] when the load retry
    /// budget is exhausted, [`AgentError::Cancelled`] when the caller's
    /// token fires, or whatever `body` itself returns.
    pub async fn with_model<T, F, Fut>(
        &self,
        model: &ModelDescriptor,
        deadline: Instant,
        cancel: &CancellationToken,
        body: F,
    ) -> Result<T, AgentError>
    where
        F: FnOnce(Arc<dyn ModelRuntime>) -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut resident = tokio::select! {
            guard = self.resident.lock() => guard,
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
        };

        if resident.as_deref() != Some(model.id.as_str()) {
            if let Some(previous) = resident.take() {
                debug!(from = %previous, to = %model.id, "swapping model");
                self.runtime.unload(&previous).await;
                if !self.settle.is_zero() {
                    self.wait(self.settle, deadline, cancel).await?;
                }
            }
            self.load_with_retries(model, deadline, cancel).await?;
            *resident = Some(model.id.clone());
        }

        let result = tokio::select! {
            outcome = body(Arc::clone(&self.runtime)) => outcome,
            () = cancel.cancelled() => Err(AgentError::Cancelled),
        };
        drop(resident);
        result
    }

    /// The model currently occupying the slot, if any.
    pub async fn resident_model(&self) -> Option<String> {
        self.resident.lock().await.clone()
    }

    /// Best-effort unload of whatever is resident. Called on shutdown.
    pub async fn release(&self) {
        let mut resident = self.resident.lock().await;
        if let Some(model) = resident.take() {
            debug!(%model, "releasing model slot");
            self.runtime.unload(&model).await;
        }
    }

    async fn load_with_retries(
        &self,
        model: &ModelDescriptor,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let mut attempts = 0u32;
        let mut last = RuntimeError::Unavailable {
            message: "no load attempt made".to_string(),
        };

        while attempts < self.retries {
            attempts += 1;
            let attempt_deadline = cmp::min(deadline, Instant::now() + self.load_timeout);
            match self.runtime.ensure_present(&model.id, attempt_deadline).await {
                Ok(()) => {
                    debug!(model = %model.id, attempts, "model loaded");
                    return Ok(());
                }
                Err(error) => {
                    warn!(model = %model.id, attempt = attempts, %error, "model load attempt failed");
                    let retryable = error.is_retryable();
                    last = error;
                    if !retryable || attempts == self.retries {
                        break;
                    }
                    let backoff = self.backoff(attempts);
                    if Instant::now() + backoff >= deadline {
                        break;
                    }
                    self.wait(backoff, deadline, cancel).await?;
                }
            }
        }

        Err(AgentError::ModelLoadFailed {
            model: model.id.clone(),
            attempts,
            last,
        })
    }

    /// Exponential backoff for the given 1-based attempt, jittered.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.backoff_base.as_secs_f64() * 2f64.powi(exponent);
        let factor = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((base * factor).max(0.0))
    }

    /// Sleeps for `duration`, bounded by the deadline, aborting promptly
    /// on cancellation.
    async fn wait(
        &self,
        duration: Duration,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let until = cmp::min(deadline, Instant::now() + duration);
        tokio::select! {
            () = sleep_until(until) => Ok(()),
            () = cancel.cancelled() => Err(AgentError::Cancelled),
        }
    }
}

impl std::fmt::Debug for ModelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSlot")
            .field("runtime", &self.runtime.name())
            .field("retries", &self.retries)
            .field("backoff_base", &self.backoff_base)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::GenerateRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct StubRuntime {
        probes: AtomicU32,
        fail_first: u32,
        failure: Option<RuntimeError>,
        unloads: Mutex<Vec<String>>,
    }

    impl StubRuntime {
        fn healthy() -> Self {
            Self {
                probes: AtomicU32::new(0),
                fail_first: 0,
                failure: None,
                unloads: Mutex::new(Vec::new()),
            }
        }

        fn failing(failure: RuntimeError, fail_first: u32) -> Self {
            Self {
                probes: AtomicU32::new(0),
                fail_first,
                failure: Some(failure),
                unloads: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelRuntime for StubRuntime {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn generate(
            &self,
            _request: &GenerateRequest,
            _deadline: Instant,
        ) -> Result<String, RuntimeError> {
            Ok("{}".to_string())
        }

        async fn ensure_present(
            &self,
            _model: &str,
            _deadline: Instant,
        ) -> Result<(), RuntimeError> {
            let probe = self.probes.fetch_add(1, Ordering::SeqCst);
            match &self.failure {
                Some(failure) if probe < self.fail_first => Err(failure.clone()),
                _ => Ok(()),
            }
        }

        async fn list_models(&self, _deadline: Instant) -> Result<Vec<String>, RuntimeError> {
            Ok(Vec::new())
        }

        async fn unload(&self, model: &str) {
            self.unloads.lock().await.push(model.to_string());
        }
    }

    fn fast_config() -> CoreConfig {
        CoreConfig::builder()
            .model_swap_settle(Duration::ZERO)
            .model_load_backoff_base(Duration::ZERO)
            .backoff_jitter(0.0)
            .build()
            .unwrap_or_else(|_| unreachable!())
    }

    fn descriptor(id: &str) -> ModelDescriptor {
        ModelDescriptor::new(id, 1024, 0.0)
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_with_model_runs_body_and_tracks_residency() {
        let runtime = Arc::new(StubRuntime::healthy());
        let slot = ModelSlot::new(Arc::clone(&runtime) as Arc<dyn ModelRuntime>, &fast_config());
        let cancel = CancellationToken::new();

        let result = slot
            .with_model(&descriptor("m-a"), far_deadline(), &cancel, |_rt| async {
                Ok::<_, AgentError>(42)
            })
            .await;
        assert!(matches!(result, Ok(42)));
        assert_eq!(slot.resident_model().await.as_deref(), Some("m-a"));
    }

    #[tokio::test]
    async fn test_swap_unloads_previous_model() {
        let runtime = Arc::new(StubRuntime::healthy());
        let slot = ModelSlot::new(Arc::clone(&runtime) as Arc<dyn ModelRuntime>, &fast_config());
        let cancel = CancellationToken::new();

        for id in ["m-a", "m-b"] {
            let _ = slot
                .with_model(&descriptor(id), far_deadline(), &cancel, |_rt| async {
                    Ok::<_, AgentError>(())
                })
                .await;
        }
        assert_eq!(*runtime.unloads.lock().await, vec!["m-a".to_string()]);
        assert_eq!(slot.resident_model().await.as_deref(), Some("m-b"));
    }

    #[tokio::test]
    async fn test_same_model_is_not_reloaded() {
        let runtime = Arc::new(StubRuntime::healthy());
        let slot = ModelSlot::new(Arc::clone(&runtime) as Arc<dyn ModelRuntime>, &fast_config());
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let _ = slot
                .with_model(&descriptor("m-a"), far_deadline(), &cancel, |_rt| async {
                    Ok::<_, AgentError>(())
                })
                .await;
        }
        assert_eq!(runtime.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_retry_exhaustion() {
        let runtime = Arc::new(StubRuntime::failing(
            RuntimeError::ModelAbsent {
                model: "m-a".to_string(),
            },
            u32::MAX,
        ));
        let slot = ModelSlot::new(Arc::clone(&runtime) as Arc<dyn ModelRuntime>, &fast_config());
        let cancel = CancellationToken::new();

        let result = slot
            .with_model(&descriptor("m-a"), far_deadline(), &cancel, |_rt| async {
                Ok::<_, AgentError>(())
            })
            .await;
        assert!(matches!(
            result,
            Err(AgentError::ModelLoadFailed { attempts: 3, .. })
        ));
        assert!(slot.resident_model().await.is_none());
    }

    #[tokio::test]
    async fn test_load_recovers_after_transient_failure() {
        let runtime = Arc::new(StubRuntime::failing(
            RuntimeError::Unavailable {
                message: "connection refused".to_string(),
            },
            1,
        ));
        let slot = ModelSlot::new(Arc::clone(&runtime) as Arc<dyn ModelRuntime>, &fast_config());
        let cancel = CancellationToken::new();

        let result = slot
            .with_model(&descriptor("m-a"), far_deadline(), &cancel, |_rt| async {
                Ok::<_, AgentError>("done")
            })
            .await;
        assert!(matches!(result, Ok("done")));
        assert_eq!(runtime.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_api_failure_is_not_retried() {
        let runtime = Arc::new(StubRuntime::failing(
            RuntimeError::Api {
                status: 500,
                message: "boom".to_string(),
            },
            u32::MAX,
        ));
        let slot = ModelSlot::new(Arc::clone(&runtime) as Arc<dyn ModelRuntime>, &fast_config());
        let cancel = CancellationToken::new();

        let result = slot
            .with_model(&descriptor("m-a"), far_deadline(), &cancel, |_rt| async {
                Ok::<_, AgentError>(())
            })
            .await;
        assert!(matches!(
            result,
            Err(AgentError::ModelLoadFailed { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_caller_is_rejected() {
        let runtime = Arc::new(StubRuntime::healthy());
        let slot = ModelSlot::new(Arc::clone(&runtime) as Arc<dyn ModelRuntime>, &fast_config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = slot
            .with_model(&descriptor("m-a"), far_deadline(), &cancel, |_rt| async {
                Ok::<_, AgentError>(())
            })
            .await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }

    #[tokio::test]
    async fn test_concurrent_callers_never_overlap() {
        let runtime = Arc::new(StubRuntime::healthy());
        let slot = Arc::new(ModelSlot::new(
            Arc::clone(&runtime) as Arc<dyn ModelRuntime>,
            &fast_config(),
        ));
        let cancel = CancellationToken::new();
        let busy = Arc::new(AtomicBool::new(false));

        let run = |model: &'static str| {
            let slot = Arc::clone(&slot);
            let cancel = cancel.clone();
            let busy = Arc::clone(&busy);
            async move {
                slot.with_model(&descriptor(model), far_deadline(), &cancel, |_rt| {
                    let busy = Arc::clone(&busy);
                    async move {
                        let was_busy = busy.swap(true, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        busy.store(false, Ordering::SeqCst);
                        if was_busy {
                            Err(AgentError::ParseRejected {
                                message: "overlap observed".to_string(),
                            })
                        } else {
                            Ok(())
                        }
                    }
                })
                .await
            }
        };

        let (a, b) = tokio::join!(run("m-a"), run("m-b"));
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_release_unloads_resident_model() {
        let runtime = Arc::new(StubRuntime::healthy());
        let slot = ModelSlot::new(Arc::clone(&runtime) as Arc<dyn ModelRuntime>, &fast_config());
        let cancel = CancellationToken::new();

        let _ = slot
            .with_model(&descriptor("m-a"), far_deadline(), &cancel, |_rt| async {
                Ok::<_, AgentError>(())
            })
            .await;
        slot.release().await;
        assert!(slot.resident_model().await.is_none());
        assert_eq!(*runtime.unloads.lock().await, vec!["m-a".to_string()]);
    }
}

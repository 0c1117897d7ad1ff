//! AI service manager: provider selection, resilience and failover

use super::circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState, ProviderHealth};
use super::retry::RetryPolicy;
use super::{build_provider, AiProvider, ChatMessage, GenerationOptions, Invocation, ModelInfo, ProviderResult};
use crate::config::Config;
use crate::error::{ProviderError, RagError, Result};
use crate::observability::MetricsCollector;
use futures::{Stream, StreamExt};
use indexmap::IndexMap;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const DEFAULT_STREAM_BUFFER: usize = 32;

struct ProviderSlot {
    provider: Arc<dyn AiProvider>,
    breaker: CircuitBreaker,
    priority: u32,
}

/// Outcome of a single out-of-band provider probe
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub provider: String,
    pub state_before: CircuitState,
    pub healthy: bool,
    pub error: Option<String>,
}

/// Streamed generation bound to the provider that serves it
///
/// Dropping the stream stops forwarding and abandons the provider call
/// without recording a breaker outcome.
pub struct GenerationStream {
    provider: String,
    inner: ReceiverStream<ProviderResult<String>>,
}

impl GenerationStream {
    /// Provider that is producing this stream
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

impl Stream for GenerationStream {
    type Item = ProviderResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Uniform entry point to every configured AI provider
///
/// Providers are tried in priority order (lower first, ties keep insertion
/// order). Each one sits behind its own circuit breaker and the shared retry
/// policy; a provider that still fails after retries hands over to the next.
pub struct AiServiceManager {
    providers: IndexMap<String, ProviderSlot>,
    retry: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
    stream_buffer: usize,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AiServiceManager {
    /// Create an empty manager
    pub fn new(retry: RetryPolicy, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            providers: IndexMap::new(),
            retry,
            breaker_config,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            metrics: None,
        }
    }

    /// Build a manager with every enabled provider from the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut manager = Self::new(
            RetryPolicy::from(&config.resilience.retry),
            CircuitBreakerConfig::from(&config.resilience.circuit_breaker),
        )
        .with_stream_buffer(config.answer.stream_buffer);

        for provider_config in config.enabled_providers() {
            let provider = build_provider(provider_config).map_err(|e| {
                RagError::Config(format!("Failed to build provider '{}': {}", provider_config.id, e))
            })?;
            manager = manager.with_provider(provider, provider_config.priority);
        }

        if manager.providers.is_empty() {
            return Err(RagError::Config("No AI providers configured".to_string()));
        }

        info!(providers = ?manager.provider_ids(), "Initialized AI service manager");
        Ok(manager)
    }

    /// Register a provider; the list is kept sorted by priority
    pub fn with_provider(mut self, provider: Arc<dyn AiProvider>, priority: u32) -> Self {
        let id = provider.id().to_string();
        let breaker = CircuitBreaker::new(id.clone(), self.breaker_config.clone());
        self.providers.insert(
            id,
            ProviderSlot {
                provider,
                breaker,
                priority,
            },
        );
        self.providers.sort_by(|_, a, _, b| a.priority.cmp(&b.priority));
        self
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Capacity of the channel behind [`GenerationStream`]
    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer.max(1);
        self
    }

    /// Provider ids in selection order
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    fn candidates(&self, pinned: Option<&str>) -> Result<Vec<(&String, &ProviderSlot)>> {
        match pinned {
            Some(id) => self
                .providers
                .get_key_value(id)
                .map(|entry| vec![entry])
                .ok_or_else(|| RagError::not_found("provider", id)),
            None => Ok(self.providers.iter().collect()),
        }
    }

    /// Select a provider and run `op` through its breaker and retry policy
    ///
    /// The returned permit is still unsettled so the caller decides when the
    /// logical call is complete.
    async fn invoke<T, F, Fut>(&self, operation: &'static str, pinned: Option<&str>, op: F) -> Result<(Invocation<T>, CallPermit)>
    where
        F: Fn(Arc<dyn AiProvider>) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let candidates = self.candidates(pinned)?;
        let mut attempted = Vec::with_capacity(candidates.len());
        let mut rejection = None;
        let mut last_failure: Option<(String, ProviderError)> = None;

        for (id, slot) in candidates {
            attempted.push(id.clone());

            let permit = match slot.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(e) => {
                    debug!(provider = %id, operation, "Skipping provider with open circuit");
                    rejection = Some(e);
                    continue;
                }
            };

            if last_failure.is_some() {
                if let Some(metrics) = &self.metrics {
                    metrics.record_failover();
                }
                info!(provider = %id, operation, "Failing over to next provider");
            }

            let provider = slot.provider.clone();
            match self.retry.run(|_| op(provider.clone())).await {
                Ok(attempted_call) => {
                    return Ok((
                        Invocation {
                            value: attempted_call.value,
                            provider: id.clone(),
                            failed_attempts: attempted_call.failed_attempts,
                        },
                        permit,
                    ));
                }
                Err(exhausted) => {
                    permit.failure();
                    if let Some(metrics) = &self.metrics {
                        metrics.record_provider_failure();
                    }
                    warn!(
                        provider = %id,
                        operation,
                        attempts = exhausted.failed_attempts,
                        error = %exhausted.error,
                        "Provider call failed"
                    );
                    last_failure = Some((id.clone(), exhausted.error));
                }
            }
        }

        match last_failure {
            None => match (pinned, rejection) {
                (Some(_), Some(open)) => Err(open),
                _ => {
                    warn!(attempted = ?attempted, operation, "No AI provider available");
                    Err(RagError::ServiceDegradation { attempted })
                }
            },
            Some((provider, ProviderError::RateLimited { retry_after })) => {
                warn!(attempted = ?attempted, operation, "All invoked providers failed");
                Err(RagError::RateLimit {
                    provider: Some(provider),
                    retry_after,
                })
            }
            Some((provider, cause)) => {
                warn!(attempted = ?attempted, operation, "All invoked providers failed");
                Err(RagError::AiService { provider, cause })
            }
        }
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, pinned: Option<&str>, op: F) -> Result<Invocation<T>>
    where
        F: Fn(Arc<dyn AiProvider>) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let (invocation, permit) = self.invoke(operation, pinned, op).await?;
        permit.success();
        Ok(invocation)
    }

    /// Embed text with the first available provider
    pub async fn embed(&self, text: &str) -> Result<Invocation<Vec<f32>>> {
        let start = Instant::now();
        let result = self
            .call("embed", None, |provider| async move { provider.embed(text).await })
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.record_embedding_latency(start.elapsed());
        }
        result
    }

    /// Generate a complete response
    pub async fn generate(&self, messages: Vec<ChatMessage>, options: &GenerationOptions) -> Result<Invocation<String>> {
        let request = options.request(messages);
        let start = Instant::now();
        let result = self
            .call("generate", options.provider.as_deref(), |provider| {
                let request = &request;
                async move { provider.generate(request).await }
            })
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.record_generation_latency(start.elapsed());
        }
        result
    }

    /// Generate a response as a stream of chunks
    ///
    /// Failover only happens while the stream is being opened; once chunks
    /// flow, a failure ends the stream and counts against that provider.
    pub async fn generate_stream(&self, messages: Vec<ChatMessage>, options: &GenerationOptions) -> Result<GenerationStream> {
        let request = options.request(messages);
        let (invocation, permit) = self
            .invoke("generate_stream", options.provider.as_deref(), |provider| {
                let request = &request;
                async move { provider.generate_stream(request).await }
            })
            .await?;

        let provider = invocation.provider;
        let mut chunks = invocation.value;
        let chunk_timeout = self.retry.attempt_timeout;
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let task_provider = provider.clone();

        tokio::spawn(async move {
            let outcome = loop {
                tokio::select! {
                    _ = tx.closed() => break None,
                    next = tokio::time::timeout(chunk_timeout, chunks.next()) => match next {
                        Ok(Some(Ok(chunk))) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                break None;
                            }
                        }
                        Ok(Some(Err(e))) => {
                            let _ = tx.send(Err(e)).await;
                            break Some(false);
                        }
                        Ok(None) => break Some(true),
                        Err(_) => {
                            let _ = tx.send(Err(ProviderError::Timeout)).await;
                            break Some(false);
                        }
                    }
                }
            };

            match outcome {
                Some(true) => permit.success(),
                Some(false) => {
                    warn!(provider = %task_provider, "Generation stream failed");
                    permit.failure();
                }
                None => debug!(provider = %task_provider, "Generation stream abandoned by consumer"),
            }
        });

        Ok(GenerationStream {
            provider,
            inner: ReceiverStream::new(rx),
        })
    }

    /// List models from every provider whose circuit admits calls
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let mut models = Vec::new();
        let mut answered = false;

        for (id, slot) in &self.providers {
            if slot.breaker.state() == CircuitState::Open {
                continue;
            }
            match tokio::time::timeout(self.retry.attempt_timeout, slot.provider.list_models()).await {
                Ok(Ok(found)) => {
                    answered = true;
                    models.extend(found);
                }
                Ok(Err(e)) => warn!(provider = %id, error = %e, "Failed to list models"),
                Err(_) => warn!(provider = %id, "Timed out listing models"),
            }
        }

        if !answered && !self.providers.is_empty() {
            return Err(RagError::ServiceDegradation {
                attempted: self.provider_ids(),
            });
        }
        Ok(models)
    }

    /// Breaker snapshot for every provider, in selection order
    pub fn health_summary(&self) -> Vec<ProviderHealth> {
        self.providers.values().map(|slot| slot.breaker.snapshot()).collect()
    }

    /// Whether at least one provider currently admits calls
    pub fn any_available(&self) -> bool {
        self.providers
            .values()
            .any(|slot| slot.breaker.state() != CircuitState::Open)
    }

    /// Probe every provider whose circuit is not closed; close it on success
    pub async fn check_provider_health(&self) -> Vec<ProbeOutcome> {
        let mut outcomes = Vec::new();

        for (id, slot) in &self.providers {
            let state_before = slot.breaker.state();
            if state_before == CircuitState::Closed {
                continue;
            }

            let result = match tokio::time::timeout(self.retry.attempt_timeout, slot.provider.health_check()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            let outcome = match result {
                Ok(()) => {
                    slot.breaker.close_after_probe();
                    ProbeOutcome {
                        provider: id.clone(),
                        state_before,
                        healthy: true,
                        error: None,
                    }
                }
                Err(e) => {
                    debug!(provider = %id, error = %e, "Health probe failed");
                    ProbeOutcome {
                        provider: id.clone(),
                        state_before,
                        healthy: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Force one provider's circuit closed
    pub fn reset_circuit(&self, provider_id: &str) -> Result<()> {
        let slot = self
            .providers
            .get(provider_id)
            .ok_or_else(|| RagError::not_found("provider", provider_id))?;
        slot.breaker.reset();
        info!(provider = %provider_id, "Circuit breaker reset by operator");
        Ok(())
    }

    /// Force every circuit closed
    pub fn reset_all(&self) {
        for slot in self.providers.values() {
            slot.breaker.reset();
        }
        info!("All circuit breakers reset");
    }

    /// Run [`check_provider_health`](Self::check_provider_health) on a fixed interval until shutdown
    pub fn spawn_health_monitor(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for outcome in self.check_provider_health().await {
                            if outcome.healthy {
                                info!(provider = %outcome.provider, "Provider recovered");
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Health monitor stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Prometheus samples for every provider breaker
    pub fn export_prometheus(&self) -> String {
        let mut output = String::from(
            "# HELP provider_circuit_state Circuit breaker state (0=closed, 1=half-open, 2=open)\n\
             # TYPE provider_circuit_state gauge\n",
        );
        for slot in self.providers.values() {
            output.push_str(&slot.breaker.export_prometheus());
        }
        output
    }
}

//! HTTP round-trips to the three remote inference endpoints.
//!
//! One operation per endpoint kind, each with an absolute deadline and a
//! cancellation token observed at the HTTP suspension point.  Retry and
//! fallback policy live with the caller; this crate never retries.

use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use lyra_config::EndpointsConfig;

/// How a single endpoint call can fail.  Callers distinguish every kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Connection refused, DNS failure, or the endpoint otherwise unreachable.
    #[error("backend unavailable")]
    Unavailable,
    /// The absolute deadline passed before a response arrived.
    #[error("deadline exceeded")]
    Timeout,
    /// Non-2xx status or a body that does not match the wire contract.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The caller's cancellation token fired mid-call.
    #[error("call cancelled")]
    Cancelled,
}

/// A successful textual completion plus the observed round-trip latency.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub latency: Duration,
}

/// A successful embedding plus the observed round-trip latency.
#[derive(Debug, Clone)]
pub struct EmbeddingCompletion {
    pub vector: Vec<f32>,
    pub latency: Duration,
}

/// Structured input for the generative endpoint.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

/// Seam between the dispatcher and the remote model endpoints.
///
/// The production implementation is [`HttpInferenceClient`]; tests inject
/// scripted fakes so orchestration paths can be driven without a network.
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(
        &self,
        prompt: &ChatPrompt,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Completion, CallError>;

    async fn contextualize(
        &self,
        prompt: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Completion, CallError>;

    async fn embed(
        &self,
        input: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingCompletion, CallError>;
}

#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    http: reqwest::Client,
    endpoints: EndpointsConfig,
}

impl HttpInferenceClient {
    pub fn new(endpoints: EndpointsConfig) -> Result<Self, CallError> {
        let pool = if endpoints.pool_max_idle == 0 {
            8
        } else {
            endpoints.pool_max_idle
        };
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(pool)
            .build()
            .map_err(|err| CallError::Protocol(err.to_string()))?;
        Ok(Self { http, endpoints })
    }

    async fn post_json(
        &self,
        url: &str,
        payload: serde_json::Value,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(serde_json::Value, Duration), CallError> {
        let budget = remaining_budget(deadline)?;
        let started = Instant::now();

        let request = self.http.post(url).timeout(budget).json(&payload).send();

        let response = tokio::select! {
            response = request => response.map_err(classify_request_error)?,
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
        };

        let status = response.status();
        let body = tokio::select! {
            body = response.json::<serde_json::Value>() => {
                body.map_err(|err| {
                    if err.is_timeout() {
                        CallError::Timeout
                    } else {
                        CallError::Protocol(err.to_string())
                    }
                })?
            }
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
        };

        if !status.is_success() {
            return Err(CallError::Protocol(format!("status {status}: {body}")));
        }

        Ok((body, started.elapsed()))
    }
}

#[async_trait::async_trait]
impl ModelBackend for HttpInferenceClient {
    async fn generate(
        &self,
        prompt: &ChatPrompt,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Completion, CallError> {
        let payload = generative_payload(&self.endpoints.generative, prompt);
        let (body, latency) = self
            .post_json(&self.endpoints.generative.url, payload, deadline, cancel)
            .await?;
        let text = parse_generative_response(&body)?;
        debug!(chars = text.len(), ms = latency.as_millis() as u64, "generative call complete");
        Ok(Completion { text, latency })
    }

    async fn contextualize(
        &self,
        prompt: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Completion, CallError> {
        let payload = contextual_payload(&self.endpoints.contextual, prompt);
        let (body, latency) = self
            .post_json(&self.endpoints.contextual.url, payload, deadline, cancel)
            .await?;
        let text = parse_contextual_response(&body)?;
        debug!(chars = text.len(), ms = latency.as_millis() as u64, "contextual call complete");
        Ok(Completion { text, latency })
    }

    async fn embed(
        &self,
        input: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingCompletion, CallError> {
        let payload = json!({
            "model": self.endpoints.embedding.model,
            "input": input,
        });
        let (body, latency) = self
            .post_json(&self.endpoints.embedding.url, payload, deadline, cancel)
            .await?;
        let vector = parse_embedding_response(&body)?;
        debug!(dims = vector.len(), ms = latency.as_millis() as u64, "embedding call complete");
        Ok(EmbeddingCompletion { vector, latency })
    }
}

/// Time left until `deadline`, or `Timeout` when it has already passed.
fn remaining_budget(deadline: Instant) -> Result<Duration, CallError> {
    let now = Instant::now();
    if now >= deadline {
        return Err(CallError::Timeout);
    }
    Ok(deadline - now)
}

fn classify_request_error(err: reqwest::Error) -> CallError {
    if err.is_timeout() {
        CallError::Timeout
    } else if err.is_connect() || err.is_request() {
        CallError::Unavailable
    } else {
        CallError::Protocol(err.to_string())
    }
}

fn generative_payload(
    endpoint: &lyra_config::GenerativeEndpointConfig,
    prompt: &ChatPrompt,
) -> serde_json::Value {
    let mut payload = json!({
        "model": endpoint.model,
        "messages": [
            {"role": "system", "content": prompt.system},
            {"role": "user", "content": prompt.user},
        ],
        "temperature": endpoint.temperature,
        "top_p": endpoint.top_p,
        "max_tokens": endpoint.max_tokens,
    });
    if let Some(top_k) = endpoint.top_k {
        payload["top_k"] = json!(top_k);
    }
    if let Some(repeat_penalty) = endpoint.repeat_penalty {
        payload["repeat_penalty"] = json!(repeat_penalty);
    }
    if let Some(frequency_penalty) = endpoint.frequency_penalty {
        payload["frequency_penalty"] = json!(frequency_penalty);
    }
    if let Some(presence_penalty) = endpoint.presence_penalty {
        payload["presence_penalty"] = json!(presence_penalty);
    }
    payload
}

fn contextual_payload(
    endpoint: &lyra_config::ContextualEndpointConfig,
    prompt: &str,
) -> serde_json::Value {
    json!({
        "model": endpoint.model,
        "prompt": prompt,
        "stream": false,
        "options": {
            "temperature": endpoint.temperature,
            "top_p": endpoint.top_p,
        },
    })
}

fn parse_generative_response(body: &serde_json::Value) -> Result<String, CallError> {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(ToString::to_string)
        .ok_or_else(|| CallError::Protocol(format!("generative response missing content: {body}")))
}

fn parse_contextual_response(body: &serde_json::Value) -> Result<String, CallError> {
    body.get("response")
        .and_then(|value| value.as_str())
        .map(ToString::to_string)
        .ok_or_else(|| CallError::Protocol(format!("contextual response missing text: {body}")))
}

fn parse_embedding_response(body: &serde_json::Value) -> Result<Vec<f32>, CallError> {
    let vector = body
        .get("data")
        .and_then(|data| data.get(0))
        .and_then(|first| first.get("embedding"))
        .and_then(|embedding| embedding.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|value| value.as_f64().map(|f| f as f32))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if vector.is_empty() {
        return Err(CallError::Protocol(format!(
            "embedding response missing vector: {body}"
        )));
    }
    Ok(vector)
}

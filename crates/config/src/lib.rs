use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Hard cap on queued requests; enqueue beyond this is rejected.
    pub max_size: usize,
    /// Fixed number of parallel dispatch workers.
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            workers: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub particle_timeout_secs: u64,
    pub wave_timeout_secs: u64,
    pub embed_timeout_secs: u64,
    /// Hard ceiling for one request, measured from arrival.
    pub request_deadline_secs: u64,
    /// How long cancelled sub-calls get to wind down.
    pub grace_period_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            particle_timeout_secs: 300,
            wave_timeout_secs: 60,
            embed_timeout_secs: 30,
            request_deadline_secs: 600,
            grace_period_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Memory snippets retrieved per dispatch.
    pub memory_top_k: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self { memory_top_k: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Similarity floor for vector search hits, in [0,1].
    pub similarity_threshold: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Context lines injected into the particle prompt.
    pub recent_context_lines: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            recent_context_lines: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub drain_period_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_period_secs: 30,
        }
    }
}

/// Generation parameters forwarded to the generative endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerativeEndpointConfig {
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

impl Default for GenerativeEndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:1234/v1/chat/completions".to_string(),
            model: "deepseek/deepseek-r1-0528-qwen3-8b".to_string(),
            temperature: 0.9,
            top_p: 0.98,
            max_tokens: 2500,
            top_k: Some(50),
            repeat_penalty: Some(1.2),
            frequency_penalty: Some(0.1),
            presence_penalty: Some(0.1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextualEndpointConfig {
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for ContextualEndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434/api/generate".to_string(),
            model: "qwen2.5:3b".to_string(),
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingEndpointConfig {
    pub url: String,
    pub model: String,
}

impl Default for EmbeddingEndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:1234/v1/embeddings".to_string(),
            model: "deepseek/deepseek-r1-0528-qwen3-8b".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub generative: GenerativeEndpointConfig,
    pub contextual: ContextualEndpointConfig,
    pub embedding: EmbeddingEndpointConfig,
    /// Upper bound on pooled idle connections per endpoint.
    pub pool_max_idle: usize,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            generative: GenerativeEndpointConfig::default(),
            contextual: ContextualEndpointConfig::default(),
            embedding: EmbeddingEndpointConfig::default(),
            pool_max_idle: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for per-user profiles and memories.
    pub root: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/lyra.sock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub dispatch: DispatchConfig,
    pub synth: SynthConfig,
    pub memory: MemoryConfig,
    pub profile: ProfileConfig,
    pub shutdown: ShutdownConfig,
    pub endpoints: EndpointsConfig,
    pub store: StoreConfig,
    pub daemon: DaemonConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Environment variables mirror the dotted config keys with dots replaced
    /// by underscores and the whole name upper-cased, e.g. `queue.maxSize`
    /// becomes `QUEUE_MAXSIZE`.  Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        override_var("QUEUE_MAXSIZE", &mut self.queue.max_size);
        override_var("QUEUE_WORKERS", &mut self.queue.workers);
        override_var(
            "DISPATCH_PARTICLETIMEOUT",
            &mut self.dispatch.particle_timeout_secs,
        );
        override_var("DISPATCH_WAVETIMEOUT", &mut self.dispatch.wave_timeout_secs);
        override_var(
            "DISPATCH_EMBEDTIMEOUT",
            &mut self.dispatch.embed_timeout_secs,
        );
        override_var(
            "DISPATCH_REQUESTDEADLINE",
            &mut self.dispatch.request_deadline_secs,
        );
        override_var("DISPATCH_GRACEPERIOD", &mut self.dispatch.grace_period_secs);
        override_var("SYNTH_MEMORYTOPK", &mut self.synth.memory_top_k);
        override_var(
            "MEMORY_SIMILARITYTHRESHOLD",
            &mut self.memory.similarity_threshold,
        );
        override_var(
            "PROFILE_RECENTCONTEXTLINES",
            &mut self.profile.recent_context_lines,
        );
        override_var("SHUTDOWN_DRAINPERIOD", &mut self.shutdown.drain_period_secs);

        if let Ok(value) = env::var("STORE_ROOT") {
            if !value.is_empty() {
                self.store.root = value;
            }
        }
        if let Ok(value) = env::var("DAEMON_SOCKETPATH") {
            if !value.is_empty() {
                self.daemon.socket_path = value;
            }
        }
    }
}

fn override_var<T: std::str::FromStr>(name: &str, slot: &mut T) {
    if let Ok(raw) = env::var(name) {
        if let Ok(parsed) = raw.trim().parse::<T>() {
            *slot = parsed;
        }
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use lyra_client::{HttpInferenceClient, ModelBackend};
use lyra_config::AppConfig;
use lyra_dispatch::{DispatchError, DispatchMetadata, DispatchSettings, Dispatcher};
use lyra_embed::EmbeddingIndex;
use lyra_queue::{EnqueueReceipt, Overloaded, Request, RequestQueue, UserStatus};
use lyra_store::ProfileStore;

use crate::commands::SupervisorStatus;

/// Delivered to the reply sink when a dispatch reaches a terminal state.
/// Exactly one event is emitted per accepted request.
#[derive(Debug)]
pub enum ReplyEvent {
    Reply {
        queue_id: Uuid,
        user_id: String,
        channel: String,
        text: String,
        metadata: DispatchMetadata,
    },
    Failure {
        queue_id: Uuid,
        user_id: String,
        channel: String,
        error: DispatchError,
    },
}

/// Owns every component and the worker pool.  Construction wires the pieces
/// in dependency order; nothing in the system is reachable except through
/// the supervisor's injected references.
pub struct Supervisor {
    config: AppConfig,
    queue: Arc<RequestQueue>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<ProfileStore>,
    index: Arc<EmbeddingIndex>,
    /// Root token; cancelling it aborts every in-flight dispatch.
    shutdown: CancellationToken,
    /// queue_id → per-dispatch cancel token for in-flight requests.
    inflight: Mutex<HashMap<Uuid, CancellationToken>>,
    reply_tx: Mutex<Option<mpsc::UnboundedSender<ReplyEvent>>>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    started: AtomicBool,
    draining: AtomicBool,
    started_at: Instant,
}

impl Supervisor {
    /// Build the component graph against the production HTTP backend.
    pub async fn new(config: AppConfig) -> Result<Arc<Self>> {
        let backend: Arc<dyn ModelBackend> =
            Arc::new(HttpInferenceClient::new(config.endpoints.clone())?);
        Self::with_backend(config, backend).await
    }

    /// Build with an injected model backend (used by tests and embedders).
    pub async fn with_backend(
        config: AppConfig,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(ProfileStore::new(&config.store.root));
        let index = Arc::new(
            EmbeddingIndex::open(&config.store.root, config.memory.similarity_threshold).await?,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            backend,
            store.clone(),
            index.clone(),
            DispatchSettings::from_config(&config),
        ));
        let queue = Arc::new(RequestQueue::new(config.queue.max_size));

        Ok(Arc::new(Self {
            queue,
            dispatcher,
            store,
            index,
            shutdown: CancellationToken::new(),
            inflight: Mutex::new(HashMap::new()),
            reply_tx: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            started_at: Instant::now(),
            config,
        }))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Spawn the worker pool and hand back the reply sink.  A second call is
    /// a no-op and returns `None`.
    pub async fn start(self: &Arc<Self>) -> Option<mpsc::UnboundedReceiver<ReplyEvent>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("supervisor start called twice; ignoring");
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.reply_tx.lock().await = Some(tx);

        let worker_count = self.config.queue.workers.max(1);
        let mut workers = self.workers.lock().await;
        for worker_id in 0..worker_count {
            let supervisor = self.clone();
            workers.push(tokio::spawn(async move {
                supervisor.worker_loop(worker_id).await;
            }));
        }
        info!(workers = worker_count, "supervisor started");
        Some(rx)
    }

    /// Accept a message for dispatch.  Returns immediately with the queue
    /// receipt; the reply arrives later on the reply sink.
    pub async fn submit(
        &self,
        user_id: &str,
        text: &str,
        channel: &str,
        priority: Option<u8>,
    ) -> Result<EnqueueReceipt, Overloaded> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(Overloaded);
        }
        let deadline =
            Instant::now() + Duration::from_secs(self.config.dispatch.request_deadline_secs);
        let request = Request::new(user_id, text, channel, priority, deadline);
        self.queue.enqueue(request).await
    }

    pub async fn user_status(&self, user_id: &str) -> UserStatus {
        self.queue.status(user_id).await
    }

    /// Cancel a request wherever it currently lives: drop it from the queue,
    /// or signal the in-flight dispatch to wind down.
    pub async fn cancel(&self, queue_id: Uuid) -> bool {
        if self.queue.cancel(queue_id).await {
            return true;
        }
        if let Some(token) = self.inflight.lock().await.get(&queue_id) {
            token.cancel();
            return true;
        }
        false
    }

    pub async fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            uptime_secs: self.started_at.elapsed().as_secs(),
            workers: self.config.queue.workers,
            queue: self.queue.stats().await,
            observer: self.dispatcher.metrics().await,
            store_root: self.config.store.root.clone(),
            draining: self.draining.load(Ordering::SeqCst),
        }
    }

    /// Graceful shutdown: refuse new submissions, drain the queue for the
    /// configured period, then cancel whatever is still in flight and give it
    /// the grace period to wind down.
    pub async fn shutdown(&self) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("supervisor draining");
        self.queue.close().await;

        let drain_deadline =
            Instant::now() + Duration::from_secs(self.config.shutdown.drain_period_secs);
        while Instant::now() < drain_deadline {
            if self.queue.is_drained().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Abort anything the drain window did not finish.
        self.shutdown.cancel();
        tokio::time::sleep(Duration::from_secs(
            self.config.dispatch.grace_period_secs.min(5),
        ))
        .await;

        let mut workers = self.workers.lock().await;
        for worker in workers.iter() {
            worker.abort();
        }
        workers.clear();

        if let Err(err) = self.index.snapshot().await {
            warn!(%err, "final index snapshot failed");
        }
        info!("supervisor stopped");
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        info!(worker_id, "dispatch worker started");
        while let Some(request) = self.queue.pop().await {
            let cancel = self.shutdown.child_token();
            self.inflight
                .lock()
                .await
                .insert(request.queue_id, cancel.clone());

            let started = Instant::now();
            let result = self.dispatcher.dispatch(&request, &cancel).await;
            let service_secs = started.elapsed().as_secs_f64();

            self.inflight.lock().await.remove(&request.queue_id);
            self.queue
                .complete(request.queue_id, service_secs, result.is_ok())
                .await;

            let event = match result {
                Ok(outcome) => ReplyEvent::Reply {
                    queue_id: request.queue_id,
                    user_id: request.user_id.clone(),
                    channel: request.channel.clone(),
                    text: outcome.reply,
                    metadata: outcome.metadata,
                },
                Err(error) => ReplyEvent::Failure {
                    queue_id: request.queue_id,
                    user_id: request.user_id.clone(),
                    channel: request.channel.clone(),
                    error,
                },
            };

            let tx = self.reply_tx.lock().await;
            if let Some(tx) = tx.as_ref() {
                if tx.send(event).is_err() {
                    warn!(worker_id, "reply sink dropped; event discarded");
                }
            }
        }
        info!(worker_id, "dispatch worker stopped");
    }
}

//! Bounded priority-band request queue feeding a fixed worker pool.
//!
//! Ten bands, 9 served first; FIFO within a band; every fourth dispatch is
//! reserved for the lowest non-empty band so low-priority work cannot starve.
//! The hard cap and the worker count are the only backpressure levers.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Number of priority bands; priorities are clamped into `0..=9`.
const BANDS: usize = 10;

/// Every Nth dispatch drains the lowest non-empty band.
const ANTI_STARVATION_STRIDE: u64 = 4;

/// Exponential moving average factor for the rolling mean service time.
const SERVICE_TIME_ALPHA: f64 = 0.2;

/// Initial service-time estimate before any dispatch has completed.
const INITIAL_SERVICE_ESTIMATE_SECS: f64 = 10.0;

/// One inbound user message awaiting dispatch.
#[derive(Debug, Clone)]
pub struct Request {
    pub queue_id: Uuid,
    pub user_id: String,
    pub text: String,
    pub channel: String,
    /// 0..=9; 9 is served first.
    pub priority: u8,
    pub arrived_at: DateTime<Utc>,
    /// Hard ceiling for the whole dispatch, set at arrival.
    pub deadline: Instant,
}

impl Request {
    pub fn new(
        user_id: impl Into<String>,
        text: impl Into<String>,
        channel: impl Into<String>,
        priority: Option<u8>,
        deadline: Instant,
    ) -> Self {
        Self {
            queue_id: Uuid::new_v4(),
            user_id: user_id.into(),
            text: text.into(),
            channel: channel.into(),
            priority: priority.unwrap_or(5).min(9),
            arrived_at: Utc::now(),
            deadline,
        }
    }
}

/// The queue is at its hard cap (or draining); the request was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue overloaded")]
pub struct Overloaded;

/// What `enqueue` hands back to the caller immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueReceipt {
    pub queue_id: Uuid,
    /// Requests that would be served before this one under the policy.
    pub position: usize,
    pub eta_seconds: f64,
}

/// Where a user's most advanced request currently sits.
#[derive(Debug, Clone, PartialEq)]
pub enum UserStatus {
    Processing,
    Queued { position: usize, eta_seconds: f64 },
    None,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct QueueStats {
    pub total_queued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub current_size: usize,
    pub active: usize,
    pub rolling_mean_service_secs: f64,
}

struct QueueInner {
    bands: [VecDeque<Request>; BANDS],
    /// queue_id → user_id for requests a worker has picked up.
    active: HashMap<Uuid, String>,
    dispatch_count: u64,
    rolling_mean_secs: f64,
    closed: bool,
    total_queued: u64,
    total_processed: u64,
    total_failed: u64,
}

impl QueueInner {
    fn len(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    /// Band the next dispatch draws from: normally the highest non-empty,
    /// but every fourth dispatch takes the lowest non-empty instead.
    fn next_band(&self, dispatch_count: u64) -> Option<usize> {
        let non_empty_high = (0..BANDS).rev().find(|b| !self.bands[*b].is_empty())?;
        if dispatch_count % ANTI_STARVATION_STRIDE == ANTI_STARVATION_STRIDE - 1 {
            let non_empty_low = (0..BANDS).find(|b| !self.bands[*b].is_empty())?;
            Some(non_empty_low)
        } else {
            Some(non_empty_high)
        }
    }

    fn pop_next(&mut self) -> Option<Request> {
        let band = self.next_band(self.dispatch_count)?;
        let request = self.bands[band].pop_front()?;
        self.dispatch_count += 1;
        self.active.insert(request.queue_id, request.user_id.clone());
        Some(request)
    }

    /// Exact position of `queue_id` by simulating the dispatch policy from
    /// the current rotation counter.
    fn position_of(&self, queue_id: Uuid) -> Option<usize> {
        let mut sizes: [VecDeque<Uuid>; BANDS] = Default::default();
        for (band, queue) in self.bands.iter().enumerate() {
            sizes[band] = queue.iter().map(|r| r.queue_id).collect();
        }

        let mut counter = self.dispatch_count;
        let mut ahead = 0_usize;
        loop {
            let high = (0..BANDS).rev().find(|b| !sizes[*b].is_empty())?;
            let band = if counter % ANTI_STARVATION_STRIDE == ANTI_STARVATION_STRIDE - 1 {
                (0..BANDS).find(|b| !sizes[*b].is_empty())?
            } else {
                high
            };
            let popped = sizes[band].pop_front()?;
            if popped == queue_id {
                return Some(ahead);
            }
            ahead += 1;
            counter += 1;
        }
    }
}

/// Bounded FIFO with priority bands.  Workers call [`RequestQueue::pop`];
/// everything else is callable from any task.
pub struct RequestQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    max_size: usize,
}

impl RequestQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                bands: Default::default(),
                active: HashMap::new(),
                dispatch_count: 0,
                rolling_mean_secs: INITIAL_SERVICE_ESTIMATE_SECS,
                closed: false,
                total_queued: 0,
                total_processed: 0,
                total_failed: 0,
            }),
            notify: Notify::new(),
            max_size,
        }
    }

    /// Accept a request, or reject with [`Overloaded`] at the hard cap.
    /// Once accepted a request is never rejected.
    pub async fn enqueue(&self, request: Request) -> Result<EnqueueReceipt, Overloaded> {
        let mut inner = self.inner.lock().await;
        if inner.closed || inner.len() >= self.max_size {
            return Err(Overloaded);
        }

        let queue_id = request.queue_id;
        let band = request.priority.min(9) as usize;
        inner.bands[band].push_back(request);
        inner.total_queued += 1;

        let position = inner.position_of(queue_id).unwrap_or(0);
        let eta_seconds = position as f64 * inner.rolling_mean_secs;
        drop(inner);

        self.notify.notify_one();
        debug!(%queue_id, band, position, "request enqueued");
        Ok(EnqueueReceipt {
            queue_id,
            position,
            eta_seconds,
        })
    }

    /// Next request under the band policy; waits until one is available.
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Request> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(request) = inner.pop_next() {
                    return Some(request);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Record completion of a dispatched request and fold its service time
    /// into the rolling mean.
    pub async fn complete(&self, queue_id: Uuid, service_secs: f64, success: bool) {
        let mut inner = self.inner.lock().await;
        inner.active.remove(&queue_id);
        if success {
            inner.total_processed += 1;
        } else {
            inner.total_failed += 1;
        }
        inner.rolling_mean_secs = SERVICE_TIME_ALPHA * service_secs
            + (1.0 - SERVICE_TIME_ALPHA) * inner.rolling_mean_secs;
        // Wake the drain watcher (and any idle worker) to re-check state.
        self.notify.notify_waiters();
    }

    /// O(n) scan; processing wins over queued when a user has both.
    pub async fn status(&self, user_id: &str) -> UserStatus {
        let inner = self.inner.lock().await;
        if inner.active.values().any(|user| user == user_id) {
            return UserStatus::Processing;
        }

        let queued = inner
            .bands
            .iter()
            .flat_map(|band| band.iter())
            .filter(|request| request.user_id == user_id)
            .min_by_key(|request| request.arrived_at);
        match queued {
            Some(request) => {
                let position = inner.position_of(request.queue_id).unwrap_or(0);
                UserStatus::Queued {
                    position,
                    eta_seconds: position as f64 * inner.rolling_mean_secs,
                }
            }
            None => UserStatus::None,
        }
    }

    /// Remove a still-queued request.  In-flight requests are not touched;
    /// cancelling those is the dispatcher's job.
    pub async fn cancel(&self, queue_id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        for band in &mut inner.bands {
            if let Some(index) = band.iter().position(|r| r.queue_id == queue_id) {
                band.remove(index);
                return true;
            }
        }
        false
    }

    /// Stop accepting new requests; `pop` returns `None` once drained.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// True when nothing is queued and no worker holds an active request.
    pub async fn is_drained(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.len() == 0 && inner.active.is_empty()
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        QueueStats {
            total_queued: inner.total_queued,
            total_processed: inner.total_processed,
            total_failed: inner.total_failed,
            current_size: inner.len(),
            active: inner.active.len(),
            rolling_mean_service_secs: inner.rolling_mean_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(user: &str, priority: u8) -> Request {
        Request::new(
            user,
            "hello",
            "chan",
            Some(priority),
            Instant::now() + Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn enqueue_beyond_cap_is_overloaded() {
        let queue = RequestQueue::new(2);
        queue.enqueue(request("u1", 5)).await.unwrap();
        queue.enqueue(request("u2", 5)).await.unwrap();
        assert_eq!(queue.enqueue(request("u3", 5)).await, Err(Overloaded));
        // Existing requests unaffected.
        assert_eq!(queue.stats().await.current_size, 2);
    }

    #[tokio::test]
    async fn higher_band_is_served_first() {
        let queue = RequestQueue::new(10);
        queue.enqueue(request("low", 1)).await.unwrap();
        queue.enqueue(request("high", 9)).await.unwrap();

        let first = queue.pop().await.unwrap();
        assert_eq!(first.user_id, "high");
        let second = queue.pop().await.unwrap();
        assert_eq!(second.user_id, "low");
    }

    #[tokio::test]
    async fn fifo_within_a_band() {
        let queue = RequestQueue::new(10);
        queue.enqueue(request("first", 5)).await.unwrap();
        queue.enqueue(request("second", 5)).await.unwrap();

        assert_eq!(queue.pop().await.unwrap().user_id, "first");
        assert_eq!(queue.pop().await.unwrap().user_id, "second");
    }

    #[tokio::test]
    async fn every_fourth_dispatch_serves_lowest_band() {
        let queue = RequestQueue::new(10);
        for i in 0..4 {
            queue.enqueue(request(&format!("high{i}"), 9)).await.unwrap();
        }
        queue.enqueue(request("starved", 0)).await.unwrap();

        let mut order = Vec::new();
        for _ in 0..5 {
            order.push(queue.pop().await.unwrap().user_id);
        }
        // Dispatches 1-3 drain band 9, the fourth serves band 0.
        assert_eq!(order[3], "starved");
    }

    #[tokio::test]
    async fn receipt_position_counts_requests_served_before() {
        let queue = RequestQueue::new(10);
        queue.enqueue(request("a", 9)).await.unwrap();
        queue.enqueue(request("b", 9)).await.unwrap();
        let receipt = queue.enqueue(request("c", 9)).await.unwrap();
        assert_eq!(receipt.position, 2);
        assert!((receipt.eta_seconds - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn low_priority_position_accounts_for_rotation() {
        let queue = RequestQueue::new(10);
        for i in 0..6 {
            queue.enqueue(request(&format!("h{i}"), 9)).await.unwrap();
        }
        let receipt = queue.enqueue(request("low", 0)).await.unwrap();
        // Served on the fourth dispatch thanks to anti-starvation, so only
        // three high-band requests go before it.
        assert_eq!(receipt.position, 3);
    }

    #[tokio::test]
    async fn status_reflects_queued_then_processing_then_none() {
        let queue = RequestQueue::new(10);
        let receipt = queue.enqueue(request("u1", 5)).await.unwrap();
        assert!(matches!(
            queue.status("u1").await,
            UserStatus::Queued { position: 0, .. }
        ));

        let popped = queue.pop().await.unwrap();
        assert_eq!(popped.queue_id, receipt.queue_id);
        assert_eq!(queue.status("u1").await, UserStatus::Processing);

        queue.complete(popped.queue_id, 1.0, true).await;
        assert_eq!(queue.status("u1").await, UserStatus::None);
    }

    #[tokio::test]
    async fn cancel_only_works_while_queued() {
        let queue = RequestQueue::new(10);
        let receipt = queue.enqueue(request("u1", 5)).await.unwrap();
        assert!(queue.cancel(receipt.queue_id).await);
        assert!(!queue.cancel(receipt.queue_id).await);

        let receipt = queue.enqueue(request("u2", 5)).await.unwrap();
        let _active = queue.pop().await.unwrap();
        assert!(!queue.cancel(receipt.queue_id).await);
    }

    #[tokio::test]
    async fn close_rejects_new_and_pop_drains_then_ends() {
        let queue = RequestQueue::new(10);
        queue.enqueue(request("u1", 5)).await.unwrap();
        queue.close().await;

        assert_eq!(queue.enqueue(request("u2", 5)).await, Err(Overloaded));
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn service_time_folds_into_ewma() {
        let queue = RequestQueue::new(10);
        let receipt = queue.enqueue(request("u1", 5)).await.unwrap();
        let _ = queue.pop().await.unwrap();
        queue.complete(receipt.queue_id, 20.0, true).await;

        let stats = queue.stats().await;
        // 0.2 * 20 + 0.8 * 10 = 12
        assert!((stats.rolling_mean_service_secs - 12.0).abs() < 1e-9);
        assert_eq!(stats.total_processed, 1);
    }

    #[tokio::test]
    async fn pop_waits_for_enqueue() {
        let queue = std::sync::Arc::new(RequestQueue::new(10));
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(request("late", 5)).await.unwrap();

        let popped = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.unwrap().user_id, "late");
    }
}

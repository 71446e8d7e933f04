use serde::{Deserialize, Serialize};

use lyra_dispatch::ObserverMetrics;
use lyra_queue::QueueStats;

/// Snapshot of the running system, served over the control socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub uptime_secs: u64,
    pub workers: usize,
    pub queue: QueueStats,
    pub observer: ObserverMetrics,
    pub store_root: String,
    pub draining: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlCommand {
    GetStatus,
    Shutdown,
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlResponse {
    Status(SupervisorStatus),
    Ack(String),
    Pong,
}

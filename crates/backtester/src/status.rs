//! Fire-and-forget progress notifications.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pairs_core::types::Interval;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// A progress message about a run, optionally tied to a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub run_id: Uuid,
    pub message: String,
    pub symbol: Option<String>,
    pub interval: Option<Interval>,
    pub timestamp: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(run_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            run_id,
            message: message.into(),
            symbol: None,
            interval: None,
            timestamp: Utc::now(),
        }
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }
}

/// Destination for status updates.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn send_status_update(&self, update: StatusUpdate) -> anyhow::Result<()>;
}

/// Writes updates to the log.
#[derive(Debug, Default, Clone)]
pub struct TracingStatusSink;

#[async_trait]
impl StatusSink for TracingStatusSink {
    async fn send_status_update(&self, update: StatusUpdate) -> anyhow::Result<()> {
        info!(
            run_id = %update.run_id,
            symbol = update.symbol.as_deref().unwrap_or("-"),
            interval = update.interval.map(|i| i.as_str()).unwrap_or("-"),
            "{}",
            update.message
        );
        Ok(())
    }
}

/// Forwards updates over a bounded channel. Updates are dropped when the
/// channel is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelStatusSink {
    tx: mpsc::Sender<StatusUpdate>,
}

impl ChannelStatusSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<StatusUpdate>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StatusSink for ChannelStatusSink {
    async fn send_status_update(&self, update: StatusUpdate) -> anyhow::Result<()> {
        self.tx
            .try_send(update)
            .map_err(|e| anyhow::anyhow!("status channel unavailable: {}", e))
    }
}

/// Send an update, logging instead of failing when delivery fails.
pub async fn notify(sink: &dyn StatusSink, update: StatusUpdate) {
    let run_id = update.run_id;
    if let Err(e) = sink.send_status_update(update).await {
        warn!(run_id = %run_id, error = %e, "Failed to deliver status update");
    }
}

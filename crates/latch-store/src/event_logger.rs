//! Change-event logger.
//!
//! Subscribes to a collection's change feed and emits one structured log
//! line per event. Useful as an audit trail while developing against a
//! shared store. Server-backed implementations can resume their stream from
//! a saved timestamp; the in-memory feed has no history, so logging starts
//! from the moment `start` is called.

use crate::store::{Collection, EventOp, WatchHandler};
use async_trait::async_trait;
use latch_commons::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Logs every change event on one collection.
pub struct EventLogger {
    col: Arc<dyn Collection>,
}

struct LoggingHandler {
    col_name: String,
}

#[async_trait]
impl WatchHandler for LoggingHandler {
    async fn on_event(&self, op: EventOp, key: &Value) {
        log::info!("event: coll={}, op={}, key={}", self.col_name, op, key);
    }
}

impl EventLogger {
    pub fn new(col: Arc<dyn Collection>) -> Self {
        Self { col }
    }

    /// Starts logging change events until the token is cancelled.
    pub fn start(&self, token: CancellationToken) -> Result<()> {
        log::info!("starting event logger for collection {}", self.col.name());
        let handler = Arc::new(LoggingHandler {
            col_name: self.col.name().to_string(),
        });
        self.col.watch(token, None, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;
    use crate::store::StoreClient;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_logger_subscribes_and_stops() {
        let col = MemoryClient::new().collection("test", "audited");
        let token = CancellationToken::new();

        EventLogger::new(col.clone()).start(token.clone()).unwrap();
        col.insert_one(&json!({"id": 1}), &json!({"v": 1})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    }
}

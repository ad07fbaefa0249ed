//! Test doubles shared by unit tests.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use switchyard_core::{ApiError, ApiResult, Bot, BotInfo, BoxedBot};
use tokio_util::sync::CancellationToken;

/// Records every text it is asked to send.
pub(crate) struct MockBot {
    info: BotInfo,
    pub(crate) sent: Mutex<Vec<(i64, String)>>,
}

impl Default for MockBot {
    fn default() -> Self {
        Self {
            info: BotInfo::new(1, "yard_bot"),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl MockBot {
    pub(crate) fn boxed() -> BoxedBot {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Bot for MockBot {
    fn info(&self) -> &BotInfo {
        &self.info
    }

    async fn call_api(&self, _method: &str, _params: Value, _cancel: &CancellationToken) -> ApiResult<Value> {
        Err(ApiError::NotConnected)
    }

    async fn send_text(&self, chat_id: i64, text: &str, _cancel: &CancellationToken) -> ApiResult<i64> {
        let mut sent = self.sent.lock();
        sent.push((chat_id, text.to_string()));
        Ok(sent.len() as i64)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

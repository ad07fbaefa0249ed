//! Bot trait and related types.
//!
//! A [`Bot`] is the outbound half of a platform connection: handlers use it
//! to answer the events they were dispatched. The dispatch engine itself
//! only needs [`BotInfo`] (for filters such as mention and command matching)
//! and passes the bot through to handlers untouched.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ApiResult;

/// Identity of the bot account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotInfo {
    pub id: i64,
    /// Username without the leading `@`.
    pub username: String,
    #[serde(default)]
    pub first_name: String,
}

impl BotInfo {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            first_name: String::new(),
        }
    }

    /// Returns the username with a leading `@`.
    pub fn mention(&self) -> String {
        format!("@{}", self.username)
    }
}

/// The core Bot trait.
///
/// # API Design
///
/// - `call_api`: Raw API call with method name and JSON parameters
/// - `send_text`: Text reply into a conversation
///
/// Every call observes a cancellation token so a handler whose lifetime
/// ended does not keep outbound requests alive.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Returns the identity of the bot account.
    fn info(&self) -> &BotInfo;

    /// Calls a raw platform method with JSON parameters.
    async fn call_api(&self, method: &str, params: Value, cancel: &CancellationToken) -> ApiResult<Value>;

    /// Sends a text message into `chat_id`, returning the new message id.
    async fn send_text(&self, chat_id: i64, text: &str, cancel: &CancellationToken) -> ApiResult<i64>;

    /// Returns self as an `Arc<dyn Any>` for safe downcasting.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A boxed Bot trait object.
pub type BoxedBot = Arc<dyn Bot>;

/// Attempts to downcast a BoxedBot to a specific concrete type.
pub fn downcast_bot<T: Bot + 'static>(bot: BoxedBot) -> Option<Arc<T>> {
    Arc::downcast::<T>(bot.as_any()).ok()
}

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use switchyard_core::{
    ApiError, ApiResult, Bot, BotInfo, BoxedBot, BoxedEvent, CallbackQuery, Chat, Message, Update, User,
};
use switchyard_framework::{DispatchError, ErrorSink};
use tokio_util::sync::CancellationToken;

/// A bot that records outgoing texts instead of sending them.
pub struct RecordingBot {
    info: BotInfo,
    pub sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingBot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            info: BotInfo::new(1, "yard_bot"),
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Bot for RecordingBot {
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

pub fn boxed(bot: &Arc<RecordingBot>) -> BoxedBot {
    bot.clone()
}

/// Error sink that keeps every reported error.
#[derive(Clone, Default)]
pub struct CollectingSink {
    errors: Arc<Mutex<Vec<DispatchError>>>,
}

impl CollectingSink {
    pub fn take(&self) -> Vec<DispatchError> {
        std::mem::take(&mut *self.errors.lock())
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, error: DispatchError) {
        self.errors.lock().push(error);
    }
}

pub fn text_message(update_id: i64, chat: i64, user: i64, text: &str) -> BoxedEvent {
    BoxedEvent::new(Update::from_message(
        update_id,
        Message::new(update_id, Chat::private(chat))
            .from_user(User::new(user, "ann"))
            .text(text),
    ))
}

pub fn button_press(update_id: i64, chat: i64, user: i64, data: &str) -> BoxedEvent {
    let query = CallbackQuery::new(format!("q{update_id}"), User::new(user, "ann"))
        .on_message(Message::new(update_id, Chat::private(chat)))
        .data(data);
    BoxedEvent::new(Update::from_callback(update_id, query))
}

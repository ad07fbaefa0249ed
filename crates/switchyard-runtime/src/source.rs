//! Update sources.
//!
//! An [`UpdateSource`] feeds the runtime. Transports (long polling,
//! webhooks) live outside this crate; they push into a [`ChannelSource`]
//! through its [`UpdateSender`].

use async_trait::async_trait;
use switchyard_core::{BoxedEvent, Event, Update};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{RuntimeError, RuntimeResult};

/// A stream of incoming updates.
#[async_trait]
pub trait UpdateSource: Send {
    /// Returns the next update, or `None` once the source is exhausted.
    async fn next_update(&mut self) -> Option<BoxedEvent>;

    /// Name used in log output.
    fn name(&self) -> &str {
        "update source"
    }
}

/// An [`UpdateSource`] backed by a bounded channel.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<BoxedEvent>,
}

impl ChannelSource {
    /// Creates a source and the sender feeding it.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` is 0.
    pub fn new(buffer: usize) -> (UpdateSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (UpdateSender { tx }, Self { rx })
    }
}

#[async_trait]
impl UpdateSource for ChannelSource {
    async fn next_update(&mut self) -> Option<BoxedEvent> {
        self.rx.recv().await
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Sending half of a [`ChannelSource`].
///
/// The source is exhausted once every sender is dropped.
#[derive(Debug, Clone)]
pub struct UpdateSender {
    tx: mpsc::Sender<BoxedEvent>,
}

impl UpdateSender {
    /// Sends an event, waiting for buffer space.
    pub async fn send(&self, event: impl Event) -> RuntimeResult<()> {
        self.send_boxed(BoxedEvent::new(event)).await
    }

    pub async fn send_boxed(&self, event: BoxedEvent) -> RuntimeResult<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| RuntimeError::SourceClosed)
    }

    /// Decodes a platform update from its JSON payload and sends it.
    pub async fn send_json(&self, payload: &str) -> RuntimeResult<()> {
        let update: Update = serde_json::from_str(payload)?;
        trace!(update_id = update.update_id, kind = %update.kind(), "Decoded update");
        self.send(update).await
    }

    /// Sends without waiting; fails if the buffer is full or the source is gone.
    pub fn try_send(&self, event: impl Event) -> RuntimeResult<()> {
        self.tx
            .try_send(BoxedEvent::new(event))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => RuntimeError::SourceFull,
                mpsc::error::TrySendError::Closed(_) => RuntimeError::SourceClosed,
            })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::{Chat, EventKind, Message};

    use super::*;

    #[tokio::test]
    async fn test_channel_delivers_in_order_then_ends() {
        let (tx, mut source) = ChannelSource::new(4);
        tx.send(Update::from_message(1, Message::new(1, Chat::private(5))))
            .await
            .unwrap();
        tx.send(Update::from_message(2, Message::new(2, Chat::private(5))))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(source.next_update().await.unwrap().update_id(), Some(1));
        assert_eq!(source.next_update().await.unwrap().update_id(), Some(2));
        assert!(source.next_update().await.is_none());
    }

    #[tokio::test]
    async fn test_send_json_decodes_update() {
        let (tx, mut source) = ChannelSource::new(1);
        tx.send_json(
            r#"{"update_id": 9, "callback_query": {"id": "q", "from": {"id": 3, "first_name": "ann"}, "data": "ok"}}"#,
        )
        .await
        .unwrap();

        let event = source.next_update().await.unwrap();
        assert_eq!(event.kind(), EventKind::CallbackQuery);
        assert_eq!(event.sender_id(), Some(3));
    }

    #[tokio::test]
    async fn test_send_errors() {
        let (tx, source) = ChannelSource::new(1);
        assert!(matches!(
            tx.send_json("not json").await,
            Err(RuntimeError::Decode(_))
        ));

        tx.try_send(Update::default()).unwrap();
        assert!(matches!(
            tx.try_send(Update::default()),
            Err(RuntimeError::SourceFull)
        ));

        drop(source);
        assert!(tx.is_closed());
        assert!(matches!(
            tx.send(Update::default()).await,
            Err(RuntimeError::SourceClosed)
        ));
    }
}

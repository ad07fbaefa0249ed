//! Event system for Switchyard.
//!
//! This module defines the boundary between the dispatch engine and the
//! messaging platform:
//!
//! - [`EventKind`] - Closed classification of platform updates
//! - [`Event`] - Base trait implemented by every platform update type
//! - [`BoxedEvent`] - Type-erased, cheaply cloneable event container
//!
//! The engine never inspects an event's payload directly. Descriptors carry
//! projection functions that extract the typed part they care about (for
//! example the message of an update), and everything else is opaque.
//!
//! ```rust,ignore
//! use switchyard_core::{BoxedEvent, EventKind, Update};
//!
//! let event = BoxedEvent::new(update);
//! assert_eq!(event.kind(), EventKind::Message);
//! let update = event.downcast_ref::<Update>().unwrap();
//! ```

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ============================================================================
// Event Kind Classification
// ============================================================================

/// Classification of platform updates.
///
/// [`EventKind::Unknown`] doubles as the "any kind" sentinel: descriptors
/// registered under it are consulted for every event whose own kind has no
/// registered handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Unrecognized update, or "any kind" when used as a registry bucket.
    Unknown,
    /// New incoming message.
    Message,
    /// New version of a message that was edited.
    EditedMessage,
    /// New incoming channel post.
    ChannelPost,
    /// New version of a channel post that was edited.
    EditedChannelPost,
    /// New incoming inline query.
    InlineQuery,
    /// Result of an inline query chosen by a user.
    ChosenInlineResult,
    /// New incoming callback query.
    CallbackQuery,
    /// New incoming shipping query.
    ShippingQuery,
    /// New incoming pre-checkout query.
    PreCheckoutQuery,
    /// New poll state.
    Poll,
    /// A user changed their answer in a non-anonymous poll.
    PollAnswer,
    /// The bot's chat member status was updated.
    MyChatMember,
    /// A chat member's status was updated.
    ChatMember,
    /// A request to join a chat has been sent.
    ChatJoinRequest,
}

impl EventKind {
    /// Every recognized kind, excluding the [`Unknown`](Self::Unknown) sentinel.
    pub const RECOGNIZED: [EventKind; 14] = [
        EventKind::Message,
        EventKind::EditedMessage,
        EventKind::ChannelPost,
        EventKind::EditedChannelPost,
        EventKind::InlineQuery,
        EventKind::ChosenInlineResult,
        EventKind::CallbackQuery,
        EventKind::ShippingQuery,
        EventKind::PreCheckoutQuery,
        EventKind::Poll,
        EventKind::PollAnswer,
        EventKind::MyChatMember,
        EventKind::ChatMember,
        EventKind::ChatJoinRequest,
    ];

    /// Returns `true` for the "any kind" sentinel.
    pub fn is_any(self) -> bool {
        self == EventKind::Unknown
    }

    /// Returns the snake_case name of this kind, matching the platform field name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Unknown => "unknown",
            EventKind::Message => "message",
            EventKind::EditedMessage => "edited_message",
            EventKind::ChannelPost => "channel_post",
            EventKind::EditedChannelPost => "edited_channel_post",
            EventKind::InlineQuery => "inline_query",
            EventKind::ChosenInlineResult => "chosen_inline_result",
            EventKind::CallbackQuery => "callback_query",
            EventKind::ShippingQuery => "shipping_query",
            EventKind::PreCheckoutQuery => "pre_checkout_query",
            EventKind::Poll => "poll",
            EventKind::PollAnswer => "poll_answer",
            EventKind::MyChatMember => "my_chat_member",
            EventKind::ChatMember => "chat_member",
            EventKind::ChatJoinRequest => "chat_join_request",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        Ok(EventKind::RECOGNIZED
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .unwrap_or(EventKind::Unknown))
    }
}

// ============================================================================
// Core Event Trait
// ============================================================================

/// The base trait for all platform events.
///
/// Events are type-erased behind [`BoxedEvent`] and recovered with
/// [`BoxedEvent::downcast_ref`]. The correlation accessors (`chat_id`,
/// `sender_id`) are what key resolvers use to route follow-up events back to
/// the conversation that is waiting for them.
pub trait Event: Any + Send + Sync + fmt::Debug {
    /// Returns the classification of this event.
    fn kind(&self) -> EventKind;

    /// Returns the platform-assigned sequence id, if any.
    fn update_id(&self) -> Option<i64> {
        None
    }

    /// Returns the id of the conversation this event originated from.
    fn chat_id(&self) -> Option<i64> {
        None
    }

    /// Returns the id of the user that produced this event.
    fn sender_id(&self) -> Option<i64> {
        None
    }

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

// ============================================================================
// Boxed Event
// ============================================================================

/// A type-erased container for events that supports runtime downcasting.
///
/// `BoxedEvent` wraps any [`Event`] in an `Arc`, so cloning it for every
/// matched handler is cheap. It derefs to `dyn Event`:
///
/// ```rust,ignore
/// let event: BoxedEvent = /* ... */;
/// let kind = event.kind();
/// let chat = event.chat_id();
/// ```
#[derive(Clone)]
pub struct BoxedEvent {
    inner: Arc<dyn Event>,
}

impl BoxedEvent {
    /// Creates a new `BoxedEvent` from any type implementing `Event`.
    pub fn new<E: Event>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
        }
    }

    /// Returns the inner `Arc<dyn Event>`.
    pub fn inner(&self) -> &Arc<dyn Event> {
        &self.inner
    }

    /// Attempts to downcast to a concrete event type.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.inner.as_any().downcast_ref()
    }

    /// Returns `true` if the wrapped event is of type `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.inner.as_any().is::<E>()
    }
}

impl std::ops::Deref for BoxedEvent {
    type Target = dyn Event;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl<E: Event> From<E> for BoxedEvent {
    fn from(event: E) -> Self {
        BoxedEvent::new(event)
    }
}

impl fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedEvent")
            .field("kind", &self.kind())
            .field("update_id", &self.update_id())
            .field("chat_id", &self.chat_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping(i64);

    impl Event for Ping {
        fn kind(&self) -> EventKind {
            EventKind::Poll
        }

        fn chat_id(&self) -> Option<i64> {
            Some(self.0)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in EventKind::RECOGNIZED {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert_eq!("nonsense".parse::<EventKind>(), Ok(EventKind::Unknown));
        assert_eq!("CALLBACK_QUERY".parse::<EventKind>(), Ok(EventKind::CallbackQuery));
    }

    #[test]
    fn test_boxed_event_downcast() {
        let event = BoxedEvent::new(Ping(7));
        assert!(event.is::<Ping>());
        assert_eq!(event.downcast_ref::<Ping>().map(|p| p.0), Some(7));
        assert_eq!(event.kind(), EventKind::Poll);
        assert_eq!(event.chat_id(), Some(7));
        assert_eq!(event.sender_id(), None);
    }
}

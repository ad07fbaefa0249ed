//! Telegram-shaped update model.
//!
//! [`Update`] is the concrete event type the built-in filters and key
//! resolvers understand. Only the fields the dispatch engine needs are
//! modeled; everything else in the platform payload is ignored on
//! deserialization.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};

// ============================================================================
// Update
// ============================================================================

/// A single incoming update from the platform.
///
/// At most one of the optional payload fields is set. The update's
/// [`EventKind`] is derived from whichever one is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Platform-assigned sequence id.
    pub update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_post: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_channel_post: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_query: Option<InlineQuery>,
}

impl Update {
    /// Creates an update carrying a new message.
    pub fn from_message(update_id: i64, message: Message) -> Self {
        Self {
            update_id,
            message: Some(message),
            ..Default::default()
        }
    }

    /// Creates an update carrying an edited message.
    pub fn from_edited_message(update_id: i64, message: Message) -> Self {
        Self {
            update_id,
            edited_message: Some(message),
            ..Default::default()
        }
    }

    /// Creates an update carrying a channel post.
    pub fn from_channel_post(update_id: i64, message: Message) -> Self {
        Self {
            update_id,
            channel_post: Some(message),
            ..Default::default()
        }
    }

    /// Creates an update carrying a callback query.
    pub fn from_callback(update_id: i64, query: CallbackQuery) -> Self {
        Self {
            update_id,
            callback_query: Some(query),
            ..Default::default()
        }
    }

    /// Creates an update carrying an inline query.
    pub fn from_inline_query(update_id: i64, query: InlineQuery) -> Self {
        Self {
            update_id,
            inline_query: Some(query),
            ..Default::default()
        }
    }

    /// Returns whichever message-like payload is present.
    ///
    /// This covers new and edited messages as well as channel posts.
    pub fn any_message(&self) -> Option<&Message> {
        self.message
            .as_ref()
            .or(self.edited_message.as_ref())
            .or(self.channel_post.as_ref())
            .or(self.edited_channel_post.as_ref())
    }

    /// Returns the callback query payload, if present.
    pub fn callback(&self) -> Option<&CallbackQuery> {
        self.callback_query.as_ref()
    }

    /// Returns the inline query payload, if present.
    pub fn inline(&self) -> Option<&InlineQuery> {
        self.inline_query.as_ref()
    }

    /// Returns the conversation the update belongs to.
    ///
    /// For callback queries this is the chat of the message the button was
    /// attached to.
    pub fn chat(&self) -> Option<&Chat> {
        if let Some(message) = self.any_message() {
            return Some(&message.chat);
        }
        self.callback_query
            .as_ref()
            .and_then(|query| query.message.as_ref())
            .map(|message| &message.chat)
    }

    /// Returns the user that produced the update.
    pub fn sender(&self) -> Option<&User> {
        if let Some(message) = self.any_message() {
            return message.from.as_ref();
        }
        if let Some(query) = &self.callback_query {
            return Some(&query.from);
        }
        self.inline_query.as_ref().map(|query| &query.from)
    }
}

impl Event for Update {
    fn kind(&self) -> EventKind {
        if self.message.is_some() {
            EventKind::Message
        } else if self.edited_message.is_some() {
            EventKind::EditedMessage
        } else if self.channel_post.is_some() {
            EventKind::ChannelPost
        } else if self.edited_channel_post.is_some() {
            EventKind::EditedChannelPost
        } else if self.callback_query.is_some() {
            EventKind::CallbackQuery
        } else if self.inline_query.is_some() {
            EventKind::InlineQuery
        } else {
            EventKind::Unknown
        }
    }

    fn update_id(&self) -> Option<i64> {
        Some(self.update_id)
    }

    fn chat_id(&self) -> Option<i64> {
        self.chat().map(|chat| chat.id)
    }

    fn sender_id(&self) -> Option<i64> {
        self.sender().map(|user| user.id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// A chat message or channel post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub date: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<MessageEntity>,
}

impl Message {
    /// Creates a message in `chat` with no sender or text.
    pub fn new(message_id: i64, chat: Chat) -> Self {
        Self {
            message_id,
            date: 0,
            chat,
            from: None,
            text: None,
            entities: Vec::new(),
        }
    }

    /// Sets the sender.
    pub fn from_user(mut self, user: User) -> Self {
        self.from = Some(user);
        self
    }

    /// Sets the text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Appends an entity.
    pub fn entity(mut self, entity: MessageEntity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Returns the text covered by `entity`, if the offsets are in range.
    pub fn entity_text(&self, entity: &MessageEntity) -> Option<String> {
        self.text.as_deref().and_then(|text| entity.slice(text))
    }
}

/// Kind of conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

/// A conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Chat {
    pub fn new(id: i64, kind: ChatKind) -> Self {
        Self {
            id,
            kind,
            title: None,
            username: None,
        }
    }

    pub fn private(id: i64) -> Self {
        Self::new(id, ChatKind::Private)
    }

    pub fn group(id: i64) -> Self {
        Self::new(id, ChatKind::Group)
    }
}

/// A platform user or bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl User {
    pub fn new(id: i64, first_name: impl Into<String>) -> Self {
        Self {
            id,
            is_bot: false,
            first_name: first_name.into(),
            username: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// Kind of a special span inside message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Mention,
    Hashtag,
    Cashtag,
    BotCommand,
    Url,
    Email,
    PhoneNumber,
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Spoiler,
    Code,
    Pre,
    TextLink,
    TextMention,
    CustomEmoji,
    #[serde(other)]
    Other,
}

/// A special span inside message text.
///
/// Offsets and lengths are measured in UTF-16 code units, as the platform
/// reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

impl MessageEntity {
    pub fn new(kind: EntityKind, offset: usize, length: usize) -> Self {
        Self {
            kind,
            offset,
            length,
        }
    }

    /// Extracts the covered span from `text`.
    pub fn slice(&self, text: &str) -> Option<String> {
        let units: Vec<u16> = text.encode_utf16().collect();
        let end = self.offset.checked_add(self.length)?;
        let span = units.get(self.offset..end)?;
        String::from_utf16(span).ok()
    }
}

/// An inline keyboard button press.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl CallbackQuery {
    pub fn new(id: impl Into<String>, from: User) -> Self {
        Self {
            id: id.into(),
            from,
            message: None,
            data: None,
        }
    }

    /// Attaches the message the pressed button belongs to.
    pub fn on_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// An incoming inline query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
}

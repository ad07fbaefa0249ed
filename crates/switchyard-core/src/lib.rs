//! # Switchyard Core
//!
//! Platform-facing types shared by every Switchyard crate.
//!
//! - **Event System**: Type-erased events with runtime downcasting ([`Event`], [`BoxedEvent`])
//! - **Event Kinds**: Closed classification of updates ([`EventKind`])
//! - **Update Model**: Telegram-shaped payloads ([`Update`], [`Message`], [`CallbackQuery`])
//! - **Bot**: The outbound API handlers answer through ([`Bot`], [`BotInfo`])
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌───────────┐
//! │ UpdateSource │────▶│ UpdateRouter │────▶│  Handler  │──▶ Bot
//! │  (runtime)   │     │ (framework)  │────▶│  Handler  │──▶ Bot
//! └──────────────┘     └──────────────┘     └───────────┘
//! ```

pub mod bot;
pub mod error;
pub mod event;
pub mod model;

pub use bot::{Bot, BotInfo, BoxedBot, downcast_bot};
pub use error::{ApiError, ApiResult};
pub use event::{BoxedEvent, Event, EventKind};
pub use model::{
    CallbackQuery, Chat, ChatKind, EntityKind, InlineQuery, Message, MessageEntity, Update, User,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::bot::{Bot, BotInfo, BoxedBot};
    pub use super::event::{BoxedEvent, Event, EventKind};
    pub use super::model::*;
}

//! # Switchyard
//!
//! Prioritized, filterable update dispatch with conversational await for
//! bot platforms.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌───────────────────────────────┐
//! │ UpdateSource │────▶│ UpdateRouter │────▶│ pending waits (consume)       │
//! │  (runtime)   │     │              │────▶│ handlers, by (C, P) descending│──▶ Bot
//! └──────────────┘     └──────────────┘     └───────────────────────────────┘
//! ```
//!
//! - **Descriptors**: a handler plus its filters and `(concurrency, priority)` order key
//! - **Registry**: ordered, collision-shifting buckets per update kind, frozen before dispatch
//! - **Filters**: composable predicates sharing a completed-filters ledger
//! - **State**: keyed per-conversation routing
//! - **Pools**: one concurrency limit per bucket value
//! - **Await**: suspend a handler until a correlated follow-up update arrives
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use switchyard::prelude::*;
//!
//! async fn start(awaiter: Awaiter, bot: BoxedBot, update: Update) -> HandlerResult {
//!     let chat = update.chat_id().unwrap_or_default();
//!     bot.send_text(chat, "Continue? (yes/no)", &CancellationToken::new()).await?;
//!     let answer: Message = awaiter
//!         .next(EventKind::Message)
//!         .keyed_by(ChatIdResolver)
//!         .wait_for()
//!         .await?;
//!     bot.send_text(chat, &format!("You said {:?}", answer.text), &CancellationToken::new()).await?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = SwitchyardRuntime::new();
//!     runtime.register(Descriptor::builder(EventKind::Message).command(["start"]).handler(start))?;
//!
//!     let (sender, source) = runtime.channel();
//!     tokio::spawn(poll(sender));
//!     runtime.run(bot, source).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use switchyard_core as core;
pub use switchyard_framework as framework;
pub use switchyard_runtime as runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    // Runtime - main entry point
    pub use switchyard_runtime::{ChannelSource, SwitchyardRuntime, UpdateSender, UpdateSource};

    // Platform types
    pub use switchyard_core::prelude::*;

    // Registration, filters, state and await
    pub use switchyard_framework::prelude::*;

    pub use tokio_util::sync::CancellationToken;
}

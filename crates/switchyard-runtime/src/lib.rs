//! Switchyard Runtime - host wiring for the Switchyard dispatch engine.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `SwitchyardConfig`)
//! - Logging setup over `tracing-subscriber` (`LoggingBuilder`)
//! - Update feeds (`UpdateSource`, `ChannelSource`)
//! - The run loop with graceful shutdown (`SwitchyardRuntime`)
//!
//! ```rust,ignore
//! use switchyard_runtime::SwitchyardRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = SwitchyardRuntime::new();
//!     runtime.register(Descriptor::builder(EventKind::Message).command(["start"]).handler(start))?;
//!
//!     let (sender, source) = runtime.channel();
//!     tokio::spawn(long_poll(sender));
//!
//!     // Run until Ctrl+C
//!     runtime.run(bot, source).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod source;

pub use config::{ConfigError, ConfigLoader, ConfigResult, LoggingConfig, Profile, SwitchyardConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, RuntimeStats, SwitchyardRuntime};
pub use source::{ChannelSource, UpdateSender, UpdateSource};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// Logging macros plus the runtime entry points.
pub mod prelude {
    pub use crate::runtime::SwitchyardRuntime;
    pub use crate::source::{ChannelSource, UpdateSender, UpdateSource};
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}

//! Main runtime orchestration.
//!
//! [`SwitchyardRuntime`] owns the configuration and the handler registry
//! while handlers are being registered. Running it freezes the registry,
//! builds an [`UpdateRouter`] and routes every update from an
//! [`UpdateSource`] until shutdown.
//!
//! ```rust,ignore
//! let mut runtime = SwitchyardRuntime::builder()
//!     .config_file("config/switchyard.toml")
//!     .build()?;
//! runtime.register(Descriptor::builder(EventKind::Message).command(["start"]).handler(start))?;
//!
//! let (sender, source) = runtime.channel();
//! tokio::spawn(poll_updates(sender));
//! runtime.run(bot, source).await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use switchyard_core::BoxedBot;
use switchyard_framework::{
    Descriptor, DispatchError, ErrorSink, HandlerRegistry, HandlerResolver, OrderKey, RouteOutcome, UpdateRouter,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigLoader, ConfigResult, SwitchyardConfig};
use crate::error::RuntimeResult;
use crate::logging;
use crate::source::{ChannelSource, UpdateSender, UpdateSource};

/// Counters collected over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Updates pulled from the source.
    pub received: usize,
    /// Updates consumed by pending waits.
    pub awaited: usize,
    /// Handler executions scheduled.
    pub enqueued: usize,
    /// Updates nothing took.
    pub unhandled: usize,
    /// Dispatch errors reported to the error sink.
    pub failed: usize,
    /// Whether in-flight handlers had to be cancelled to finish shutdown.
    pub forced_shutdown: bool,
}

impl RuntimeStats {
    fn record(&mut self, outcome: RouteOutcome) {
        self.received += 1;
        self.awaited += usize::from(outcome.awaited > 0);
        self.enqueued += outcome.enqueued;
        self.failed += outcome.failed;
        self.unhandled += usize::from(outcome.is_unhandled());
    }
}

/// The Switchyard runtime.
pub struct SwitchyardRuntime {
    config: SwitchyardConfig,
    registry: HandlerRegistry,
    sink: Option<Arc<dyn ErrorSink>>,
    cancel: CancellationToken,
}

impl SwitchyardRuntime {
    /// Creates a runtime from the configuration in the default locations.
    ///
    /// Falls back to defaults if loading fails.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                SwitchyardConfig::default()
            });

        Self::from_config(&config)
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from a loaded configuration and initializes logging.
    pub fn from_config(config: &SwitchyardConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            first_match_only = config.dispatch.execute_only_first_match,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            registry: HandlerRegistry::new(config.dispatch.clone()),
            sink: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SwitchyardConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Registers a handler descriptor, returning its final order key.
    pub fn register(&mut self, descriptor: Descriptor) -> RuntimeResult<OrderKey> {
        Ok(self.registry.register(descriptor)?)
    }

    /// Sets the resolver for keyed descriptors.
    pub fn with_resolver(mut self, resolver: impl HandlerResolver) -> Self {
        self.registry = self.registry.with_resolver(resolver);
        self
    }

    /// Replaces the default logging error sink.
    pub fn error_sink(mut self, sink: impl ErrorSink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Global token; cancelling it stops the run loop and every execution.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Creates a channel source sized from `runtime.source_buffer`.
    pub fn channel(&self) -> (UpdateSender, ChannelSource) {
        ChannelSource::new(self.config.runtime.source_buffer.max(1))
    }

    /// Runs until Ctrl+C, SIGTERM, global cancellation or the source ends.
    pub async fn run<S: UpdateSource>(self, bot: BoxedBot, source: S) -> RuntimeResult<RuntimeStats> {
        self.run_until(bot, source, wait_for_shutdown()).await
    }

    /// Runs until `shutdown` completes, global cancellation or the source ends.
    pub async fn run_until<S, F>(self, bot: BoxedBot, mut source: S, shutdown: F) -> RuntimeResult<RuntimeStats>
    where
        S: UpdateSource,
        F: Future<Output = ()>,
    {
        let provider = self.registry.freeze();
        let commands = provider.commands();
        if !commands.is_empty() {
            info!(commands = ?commands, "Registered bot commands");
        }

        let executions = self.cancel.child_token();
        let mut builder = UpdateRouter::builder(provider, bot).cancellation(executions.clone());
        if let Some(sink) = self.sink {
            builder = builder.error_sink(move |err: DispatchError| sink.report(err));
        }
        let router = builder.build();

        info!(source = source.name(), "Switchyard runtime is now running");

        let mut stats = RuntimeStats::default();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Runtime cancelled, shutting down");
                    break;
                }
                _ = &mut shutdown => break,
                next = source.next_update() => match next {
                    Some(event) => {
                        debug!(kind = %event.kind(), update_id = ?event.update_id(), "Received update");
                        stats.record(router.route(event).await);
                    }
                    None => {
                        info!(source = source.name(), "Update source exhausted, shutting down");
                        break;
                    }
                },
            }
        }

        stats.forced_shutdown = !drain(&router, self.config.runtime.shutdown_timeout_ms).await;
        if stats.forced_shutdown {
            warn!(
                in_flight = router.pool().in_flight(),
                "Handlers still running after shutdown timeout, cancelling them"
            );
            executions.cancel();
            router.shutdown().await;
        }

        info!(
            received = stats.received,
            enqueued = stats.enqueued,
            failed = stats.failed,
            "Runtime stopped"
        );
        Ok(stats)
    }
}

impl Default for SwitchyardRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SwitchyardRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchyardRuntime")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Waits for in-flight handlers. Returns `false` if the timeout elapsed.
async fn drain(router: &UpdateRouter, timeout_ms: u64) -> bool {
    if timeout_ms == 0 {
        router.shutdown().await;
        return true;
    }
    tokio::time::timeout(Duration::from_millis(timeout_ms), router.shutdown())
        .await
        .is_ok()
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
///
/// If no signal can be observed this never completes, leaving shutdown to
/// the cancellation token or the source.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a [`SwitchyardRuntime`] with custom configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: SwitchyardConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    pub fn build(self) -> ConfigResult<SwitchyardRuntime> {
        let config = self.config_loader.load()?;
        Ok(SwitchyardRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

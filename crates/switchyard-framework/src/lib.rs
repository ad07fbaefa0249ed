//! # Switchyard Framework
//!
//! The dispatch engine: handler registration, filtering, routing and
//! conversational await.
//!
//! This layer provides:
//! - Descriptors ordered by `(concurrency, priority)` with collision shifting
//! - A freezable, snapshot-iterated descriptor registry
//! - Composable filters (AND, NOT, OR-next) with a completed-filters ledger
//! - Keyed state routing and an in-memory state store
//! - Axum-style function handlers with context extractors
//! - Per-bucket execution pools and the update router
//! - The await primitive for waiting on correlated follow-up updates
//!
//! ```rust,ignore
//! let mut registry = HandlerRegistry::new(DispatchOptions::default());
//! registry.register(Descriptor::builder(EventKind::Message).command(["start"]).handler(start))?;
//!
//! let router = UpdateRouter::builder(registry.freeze(), bot).build();
//! router.route(BoxedEvent::new(update)).await;
//! ```

pub mod awaiting;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod extract;
pub mod filter;
pub mod handler;
pub mod options;
pub mod pool;
pub mod provider;
pub mod registry;
pub mod router;
pub mod state;

#[cfg(test)]
mod testing;

pub use awaiting::{AwaitBuilder, AwaitGuard, Awaiter, AwaitingProvider};
pub use context::HandlerContext;
pub use descriptor::{Descriptor, DescriptorBuilder, HandlerFactory, HandlerResolver, Instantiation, OrderKey};
pub use error::{
    AwaitError, AwaitResult, BoxError, DispatchError, ErrorSink, ExtractError, ExtractResult, FilterError,
    FilterResult, HandlerResult, RegistrationError, RegistrationResult, TracingErrorSink,
};
pub use extract::{FromContext, FromUpdate, Projection};
pub use filter::{
    And, BoxedFilter, CompletedFilters, Filter, FilterChain, FilterContext, FilterExt, FilterModifier, FilterSet,
    Not, Or, Targeted,
};
pub use handler::{BoxedHandler, Handler, HandlerResponse, LifetimeToken, UpdateHandler, into_handler};
pub use options::DispatchOptions;
pub use pool::HandlersPool;
pub use provider::{DescribedHandler, HandlerProvider, Matches};
pub use registry::{DescriptorList, HandlerRegistry};
pub use router::{RouteOutcome, RouterBuilder, UpdateRouter};
pub use state::{
    ChatIdResolver, KeyResolver, MemoryStateStore, SenderIdResolver, StateFilter, StateKeeper, StateKeyFilter,
    StateKey, StateMatch, StateStore,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::awaiting::Awaiter;
    pub use crate::descriptor::{Descriptor, OrderKey};
    pub use crate::error::{AwaitError, DispatchError, ErrorSink, HandlerResult};
    pub use crate::extract::Projection;
    pub use crate::filter::builtin::*;
    pub use crate::filter::{Filter, FilterContext, FilterExt, FilterModifier};
    pub use crate::handler::UpdateHandler;
    pub use crate::options::DispatchOptions;
    pub use crate::registry::HandlerRegistry;
    pub use crate::router::UpdateRouter;
    pub use crate::state::{ChatIdResolver, SenderIdResolver, StateKeeper, StateMatch};
}

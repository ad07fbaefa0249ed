//! Handler system for the Switchyard framework.
//!
//! Two ways to write a handler:
//!
//! - Implement [`UpdateHandler`] on a type. This is what descriptors store
//!   and what instantiation strategies (transient, singleton, ...) create.
//! - Write an async function whose parameters implement
//!   [`FromContext`](crate::extract::FromContext). Such functions implement
//!   [`Handler`] through blanket implementations, similar to Axum's handler
//!   system, and are turned into an [`UpdateHandler`] with [`into_handler`].
//!
//! ```rust,ignore
//! async fn start(command: CommandArgs) -> String {
//!     format!("started with {:?}", command.args)
//! }
//!
//! async fn confirm(message: Projection<Message>, awaiter: Awaiter) -> HandlerResult {
//!     let answer = awaiter.next(EventKind::CallbackQuery).keyed_by(ChatIdResolver).wait().await?;
//!     Ok(())
//! }
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::context::HandlerContext;
use crate::error::{BoxError, HandlerResult};
use crate::extract::FromContext;

// ============================================================================
// UpdateHandler - what descriptors instantiate
// ============================================================================

/// An instantiated handler.
#[async_trait]
pub trait UpdateHandler: Send + Sync + 'static {
    /// Runs the handler body for one matched update.
    async fn execute(&self, ctx: Arc<HandlerContext>) -> HandlerResult;
}

/// A type-erased handler instance.
pub type BoxedHandler = Arc<dyn UpdateHandler>;

// ============================================================================
// HandlerResponse - Handle handler return values
// ============================================================================

/// A trait for types that can be returned from function handlers.
#[async_trait]
pub trait HandlerResponse: Send {
    /// Converts this value into the handler's result.
    async fn into_result(self, ctx: Arc<HandlerContext>) -> HandlerResult;
}

/// No response needed.
#[async_trait]
impl HandlerResponse for () {
    async fn into_result(self, _ctx: Arc<HandlerContext>) -> HandlerResult {
        Ok(())
    }
}

/// Sends the string back into the originating conversation.
#[async_trait]
impl HandlerResponse for String {
    async fn into_result(self, ctx: Arc<HandlerContext>) -> HandlerResult {
        ctx.reply(&self).await?;
        Ok(())
    }
}

/// On `Some`, the inner value's response is handled. On `None`, nothing happens.
#[async_trait]
impl<T: HandlerResponse> HandlerResponse for Option<T> {
    async fn into_result(self, ctx: Arc<HandlerContext>) -> HandlerResult {
        match self {
            Some(t) => t.into_result(ctx).await,
            None => Ok(()),
        }
    }
}

/// On `Ok`, the inner value's response is handled. `Err` faults the handler.
#[async_trait]
impl<T, E> HandlerResponse for Result<T, E>
where
    T: HandlerResponse,
    E: Into<BoxError> + Send,
{
    async fn into_result(self, ctx: Arc<HandlerContext>) -> HandlerResult {
        match self {
            Ok(t) => t.into_result(ctx).await,
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Handler Trait - function handlers
// ============================================================================

/// Implemented for async functions usable as handlers.
///
/// # Blanket Implementation
///
/// This trait is automatically implemented for async functions that:
/// - Take 0-12 parameters that implement [`FromContext`]
/// - Return a type that implements [`HandlerResponse`]
///
/// A parameter that cannot be extracted faults the handler.
#[async_trait]
pub trait Handler<T>: Clone + Send + Sync + 'static {
    /// Call the handler with the given context.
    async fn call(self, ctx: Arc<HandlerContext>) -> HandlerResult;
}

/// Adapts a function handler to [`UpdateHandler`].
pub struct FnHandler<F, T> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> FnHandler<F, T> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> UpdateHandler for FnHandler<F, T>
where
    F: Handler<T>,
    T: 'static,
{
    async fn execute(&self, ctx: Arc<HandlerContext>) -> HandlerResult {
        self.f.clone().call(ctx).await
    }
}

/// Convert a handler function into a boxed handler.
pub fn into_handler<F, T>(f: F) -> BoxedHandler
where
    F: Handler<T>,
    T: 'static,
{
    Arc::new(FnHandler::new(f))
}

/// Macro to generate Handler implementations for functions with different arities.
macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_variables)]
        #[async_trait]
        impl<F, Fut, Res, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: HandlerResponse + 'static,
            $( $ty: FromContext + Send + 'static, )*
        {
            async fn call(self, ctx: Arc<HandlerContext>) -> HandlerResult {
                $(
                    let $ty = $ty::from_context(&ctx)?;
                )*

                let res = (self)($($ty,)*).await;
                res.into_result(ctx).await
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);

// ============================================================================
// Lifetime Token
// ============================================================================

type EndCallback = Box<dyn FnOnce() + Send>;

/// Signals the end of one handler instance's execution.
///
/// The pool ends the token exactly once, after the handler body completes
/// (successfully, with an error, by panicking or by cancellation).
/// Callbacks registered after the end run immediately.
#[derive(Clone)]
pub struct LifetimeToken {
    // `None` once ended.
    callbacks: Arc<Mutex<Option<Vec<EndCallback>>>>,
}

impl LifetimeToken {
    pub fn new() -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(Some(Vec::new()))),
        }
    }

    /// Registers a callback to run when the lifetime ends.
    pub fn on_ended<F: FnOnce() + Send + 'static>(&self, callback: F) {
        let mut guard = self.callbacks.lock();
        if let Some(pending) = guard.as_mut() {
            pending.push(Box::new(callback));
            return;
        }
        drop(guard);
        callback();
    }

    /// Returns `true` once the lifetime has ended.
    pub fn has_ended(&self) -> bool {
        self.callbacks.lock().is_none()
    }

    /// Ends the lifetime, running every registered callback once.
    pub(crate) fn end(&self) {
        let pending = self.callbacks.lock().take();
        for callback in pending.into_iter().flatten() {
            callback();
        }
    }
}

impl Default for LifetimeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LifetimeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifetimeToken")
            .field("ended", &self.has_ended())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_lifetime_callbacks_run_once() {
        let token = LifetimeToken::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        token.on_ended(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!token.has_ended());

        token.end();
        token.end();
        assert!(token.has_ended());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let counter = fired.clone();
        token.on_ended(move || {
            counter.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 11);
    }
}

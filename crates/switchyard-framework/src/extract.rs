//! Parameter extraction for function handlers.
//!
//! Types implementing [`FromContext`] can be used directly as handler
//! function parameters:
//!
//! ```rust,ignore
//! async fn handler(update: Update, bot: BoxedBot, ledger: CompletedFilters) {
//!     // ...
//! }
//! ```

use std::ops::Deref;

use switchyard_core::{
    BotInfo, BoxedBot, BoxedEvent, CallbackQuery, Chat, InlineQuery, Message, Update, User,
};
use tokio_util::sync::CancellationToken;

use crate::awaiting::Awaiter;
use crate::context::HandlerContext;
use crate::error::{ExtractError, ExtractResult};
use crate::filter::CompletedFilters;
use crate::filter::builtin::{Command, CommandArgs};
use crate::handler::LifetimeToken;

/// A trait for types that can be extracted from a [`HandlerContext`].
///
/// Extraction failure faults the handler before its body runs. Use
/// `Option<T>` for parameters that may legitimately be absent.
pub trait FromContext: Sized {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self>;
}

impl FromContext for BoxedEvent {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(ctx.event().clone())
    }
}

impl FromContext for BoxedBot {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(ctx.bot().clone())
    }
}

impl FromContext for BotInfo {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(ctx.bot_info().clone())
    }
}

impl FromContext for CompletedFilters {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(ctx.completed().clone())
    }
}

impl FromContext for CancellationToken {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(ctx.cancellation().clone())
    }
}

impl FromContext for LifetimeToken {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(ctx.lifetime().clone())
    }
}

impl FromContext for Awaiter {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        ctx.awaiter().ok_or(ExtractError::AwaitingUnavailable)
    }
}

impl FromContext for Update {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        ctx.event()
            .downcast_ref::<Update>()
            .cloned()
            .ok_or_else(|| ExtractError::EventTypeMismatch {
                expected: std::any::type_name::<Update>(),
                got: ctx.event().kind(),
            })
    }
}

/// Extracts the arguments parsed by a [`Command`] filter.
impl FromContext for CommandArgs {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        ctx.completed()
            .artifact::<Command, CommandArgs>(0)
            .cloned()
            .ok_or(ExtractError::MissingProjection("CommandArgs"))
    }
}

impl<T: FromContext> FromContext for Option<T> {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        Ok(T::from_context(ctx).ok())
    }
}

// ============================================================================
// Projections
// ============================================================================

/// A typed part of an [`Update`].
pub trait FromUpdate: Clone + Send + 'static {
    /// Name used in extraction errors.
    const NAME: &'static str;

    fn from_update(update: &Update) -> Option<&Self>;
}

impl FromUpdate for Message {
    const NAME: &'static str = "message";

    fn from_update(update: &Update) -> Option<&Self> {
        update.any_message()
    }
}

impl FromUpdate for CallbackQuery {
    const NAME: &'static str = "callback_query";

    fn from_update(update: &Update) -> Option<&Self> {
        update.callback()
    }
}

impl FromUpdate for InlineQuery {
    const NAME: &'static str = "inline_query";

    fn from_update(update: &Update) -> Option<&Self> {
        update.inline()
    }
}

impl FromUpdate for Chat {
    const NAME: &'static str = "chat";

    fn from_update(update: &Update) -> Option<&Self> {
        update.chat()
    }
}

impl FromUpdate for User {
    const NAME: &'static str = "sender";

    fn from_update(update: &Update) -> Option<&Self> {
        update.sender()
    }
}

/// Extracts a projection of the update.
///
/// ```rust,ignore
/// async fn on_callback(query: Projection<CallbackQuery>) {
///     println!("pressed: {:?}", query.data);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Projection<T>(pub T);

impl<T> Projection<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Projection<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: FromUpdate> FromContext for Projection<T> {
    fn from_context(ctx: &HandlerContext) -> ExtractResult<Self> {
        project(ctx.event())
            .map(Projection)
            .ok_or(ExtractError::MissingProjection(T::NAME))
    }
}

/// Projects `event` onto `T`, if it is an [`Update`] carrying one.
pub fn project<T: FromUpdate>(event: &BoxedEvent) -> Option<T> {
    event
        .downcast_ref::<Update>()
        .and_then(T::from_update)
        .cloned()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::MockBot;

    #[test]
    fn test_projection_extraction() {
        let query = CallbackQuery::new("q", User::new(4, "ann"))
            .on_message(Message::new(1, Chat::private(4)))
            .data("ok");
        let ctx = HandlerContext::new(BoxedEvent::new(Update::from_callback(1, query)), MockBot::boxed());

        let query = Projection::<CallbackQuery>::from_context(&ctx).unwrap();
        assert_eq!(query.data.as_deref(), Some("ok"));
        assert_eq!(Projection::<User>::from_context(&ctx).unwrap().id, 4);
        assert_eq!(Projection::<Chat>::from_context(&ctx).unwrap().id, 4);

        let missing = Projection::<Message>::from_context(&ctx).unwrap_err();
        assert!(matches!(missing, ExtractError::MissingProjection("message")));
        assert!(Option::<Projection<Message>>::from_context(&ctx).unwrap().is_none());
    }

    #[test]
    fn test_awaiter_requires_provider() {
        let ctx = HandlerContext::new(
            BoxedEvent::new(Update::from_message(1, Message::new(1, Chat::private(1)))),
            Arc::new(MockBot::default()),
        );
        assert!(matches!(
            Awaiter::from_context(&ctx),
            Err(ExtractError::AwaitingUnavailable)
        ));
        assert_eq!(BotInfo::from_context(&ctx).unwrap().username, "yard_bot");
    }
}

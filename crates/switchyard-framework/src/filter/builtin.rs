//! Built-in filters over the reference update model.
//!
//! Most filters here are typed over a projection ([`Message`],
//! [`CallbackQuery`]) and are lifted onto the raw event with [`on_message`]
//! / [`on_callback`], or with [`Targeted`] and a function from
//! [`projections`].

use std::marker::PhantomData;

use switchyard_core::{BoxedEvent, CallbackQuery, ChatKind, EntityKind, Message, MessageEntity};

use super::{Filter, FilterContext, Targeted};
use crate::error::{FilterError, FilterResult};

// ============================================================================
// Projections
// ============================================================================

/// Projection functions usable with [`Targeted`].
pub mod projections {
    use switchyard_core::{BoxedEvent, CallbackQuery, InlineQuery, Message, Update};

    /// The event as an [`Update`].
    pub fn update(event: &BoxedEvent) -> Option<&Update> {
        event.downcast_ref::<Update>()
    }

    /// Any message-like payload: message, edited message or channel post.
    pub fn message(event: &BoxedEvent) -> Option<&Message> {
        update(event).and_then(Update::any_message)
    }

    pub fn callback_query(event: &BoxedEvent) -> Option<&CallbackQuery> {
        update(event).and_then(Update::callback)
    }

    pub fn inline_query(event: &BoxedEvent) -> Option<&InlineQuery> {
        update(event).and_then(Update::inline)
    }
}

/// Lifts a message filter onto the raw event.
pub fn on_message<F: Filter<Message>>(filter: F) -> impl Filter<BoxedEvent> {
    Targeted::new(projections::message, filter)
}

/// Lifts a callback query filter onto the raw event.
pub fn on_callback<F: Filter<CallbackQuery>>(filter: F) -> impl Filter<BoxedEvent> {
    Targeted::new(projections::callback_query, filter)
}

// ============================================================================
// Message Text
// ============================================================================

macro_rules! text_filter {
    ($(#[$meta:meta])* $name:ident, |$text:ident, $content:ident| $check:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            content: String,
            ignore_case: bool,
        }

        impl $name {
            pub fn new(content: impl Into<String>) -> Self {
                Self {
                    content: content.into(),
                    ignore_case: false,
                }
            }

            /// Compares without regard to case.
            pub fn ignore_case(mut self) -> Self {
                self.ignore_case = true;
                self
            }
        }

        impl Filter<Message> for $name {
            fn can_pass(&self, ctx: &mut FilterContext<'_, Message>) -> FilterResult {
                let Some(text) = ctx.input.text.as_deref() else {
                    return Ok(false);
                };
                let check = |$text: &str, $content: &str| -> bool { $check };
                if self.ignore_case {
                    Ok(check(text.to_lowercase().as_str(), self.content.to_lowercase().as_str()))
                } else {
                    Ok(check(text, self.content.as_str()))
                }
            }

            fn name(&self) -> &'static str {
                stringify!($name)
            }
        }
    };
}

text_filter!(
    /// Passes when the message text equals the content.
    TextEquals,
    |text, content| text == content
);

text_filter!(
    /// Passes when the message text starts with the content.
    TextStartsWith,
    |text, content| text.starts_with(content)
);

text_filter!(
    /// Passes when the message text ends with the content.
    TextEndsWith,
    |text, content| text.ends_with(content)
);

text_filter!(
    /// Passes when the message text contains the content.
    TextContains,
    |text, content| text.contains(content)
);

/// Passes when the message has non-empty text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextNotEmpty;

impl Filter<Message> for TextNotEmpty {
    fn can_pass(&self, ctx: &mut FilterContext<'_, Message>) -> FilterResult {
        Ok(ctx.input.text.as_deref().is_some_and(|text| !text.is_empty()))
    }

    fn name(&self) -> &'static str {
        "TextNotEmpty"
    }
}

// ============================================================================
// Entities and Mentions
// ============================================================================

/// Artifact left by [`HasEntity`]: the matching entities, in message order.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundEntities(pub Vec<MessageEntity>);

/// Passes when the message carries at least one entity of the given kind.
#[derive(Debug, Clone, Copy)]
pub struct HasEntity {
    kind: EntityKind,
}

impl HasEntity {
    pub fn new(kind: EntityKind) -> Self {
        Self { kind }
    }
}

impl Filter<Message> for HasEntity {
    fn can_pass(&self, ctx: &mut FilterContext<'_, Message>) -> FilterResult {
        let found: Vec<MessageEntity> = ctx
            .input
            .entities
            .iter()
            .filter(|entity| entity.kind == self.kind)
            .cloned()
            .collect();

        if found.is_empty() {
            return Ok(false);
        }
        ctx.leave(FoundEntities(found));
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "HasEntity"
    }
}

/// Passes when the message mentions the bot (or an explicit username).
///
/// Reads the entities located by a preceding [`HasEntity`] filter, so it
/// must be declared after one. Without it the filter errors.
#[derive(Debug, Clone, Default)]
pub struct Mentioned {
    username: Option<String>,
}

impl Mentioned {
    /// Matches mentions of the receiving bot.
    pub fn bot() -> Self {
        Self::default()
    }

    /// Matches mentions of `username` (without `@`).
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
        }
    }
}

impl Filter<Message> for Mentioned {
    fn can_pass(&self, ctx: &mut FilterContext<'_, Message>) -> FilterResult {
        let Some(text) = ctx.input.text.as_deref() else {
            return Ok(false);
        };

        let target = self.username.as_deref().unwrap_or(&ctx.bot.username);
        if target.is_empty() {
            return Err(FilterError::new("Mentioned requires the bot username to be known"));
        }

        let found = ctx
            .completed
            .artifact::<HasEntity, FoundEntities>(0)
            .ok_or_else(|| FilterError::new("Mentioned requires a preceding HasEntity filter"))?;

        let mention = found
            .0
            .iter()
            .find(|entity| entity.kind == EntityKind::Mention)
            .and_then(|entity| entity.slice(text));

        Ok(mention.is_some_and(|mention| {
            mention
                .strip_prefix('@')
                .is_some_and(|name| name.eq_ignore_ascii_case(target))
        }))
    }

    fn name(&self) -> &'static str {
        "Mentioned"
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Artifact left by [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArgs {
    /// The matched command, lowercased, without `/` or `@bot`.
    pub command: String,
    /// Whitespace-separated arguments.
    pub args: Vec<String>,
    /// Everything after the command, trimmed.
    pub raw: String,
}

/// Matches `/alias` or `/alias@botname` at the start of the message text.
///
/// Aliases are compared case-insensitively. A command addressed to another
/// bot does not match.
#[derive(Debug, Clone)]
pub struct Command {
    aliases: Vec<String>,
}

impl Command {
    pub fn new<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for alias in aliases {
            let alias = alias.into().trim_start_matches('/').to_lowercase();
            if !unique.contains(&alias) {
                unique.push(alias);
            }
        }
        Self { aliases: unique }
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    fn parse(&self, text: &str, bot_username: &str) -> Option<CommandArgs> {
        let text = text.trim_start();
        let body = text.strip_prefix('/')?;
        let (head, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        let (name, addressee) = match head.split_once('@') {
            Some((name, addressee)) => (name, Some(addressee)),
            None => (head, None),
        };

        if addressee.is_some_and(|addressee| !addressee.eq_ignore_ascii_case(bot_username)) {
            return None;
        }
        let command = name.to_lowercase();
        if !self.aliases.contains(&command) {
            return None;
        }

        let raw = rest.trim().to_string();
        Some(CommandArgs {
            command,
            args: raw.split_whitespace().map(str::to_string).collect(),
            raw,
        })
    }
}

impl Filter<Message> for Command {
    fn can_pass(&self, ctx: &mut FilterContext<'_, Message>) -> FilterResult {
        let parsed = ctx
            .input
            .text
            .as_deref()
            .and_then(|text| self.parse(text, &ctx.bot.username));

        match parsed {
            Some(args) => {
                ctx.leave(args);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn name(&self) -> &'static str {
        "Command"
    }
}

// ============================================================================
// Chats and Callbacks
// ============================================================================

/// Passes when the message was sent in a chat of the given kind.
#[derive(Debug, Clone, Copy)]
pub struct ChatKindIs(pub ChatKind);

impl Filter<Message> for ChatKindIs {
    fn can_pass(&self, ctx: &mut FilterContext<'_, Message>) -> FilterResult {
        Ok(ctx.input.chat.kind == self.0)
    }

    fn name(&self) -> &'static str {
        "ChatKindIs"
    }
}

/// Passes when the callback data equals the value.
#[derive(Debug, Clone)]
pub struct CallbackDataEquals {
    data: String,
}

impl CallbackDataEquals {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}

impl Filter<CallbackQuery> for CallbackDataEquals {
    fn can_pass(&self, ctx: &mut FilterContext<'_, CallbackQuery>) -> FilterResult {
        Ok(ctx.input.data.as_deref() == Some(self.data.as_str()))
    }

    fn name(&self) -> &'static str {
        "CallbackDataEquals"
    }
}

/// Passes when the callback data starts with the prefix.
#[derive(Debug, Clone)]
pub struct CallbackDataStartsWith {
    prefix: String,
}

impl CallbackDataStartsWith {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Filter<CallbackQuery> for CallbackDataStartsWith {
    fn can_pass(&self, ctx: &mut FilterContext<'_, CallbackQuery>) -> FilterResult {
        Ok(ctx
            .input
            .data
            .as_deref()
            .is_some_and(|data| data.starts_with(&self.prefix)))
    }

    fn name(&self) -> &'static str {
        "CallbackDataStartsWith"
    }
}

// ============================================================================
// Closures
// ============================================================================

/// A filter backed by a closure over the input.
pub struct FnFilter<T: ?Sized, F> {
    f: F,
    name: &'static str,
    _input: PhantomData<fn(&T)>,
}

impl<T: ?Sized, F> FnFilter<T, F>
where
    F: Fn(&T) -> bool,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            name: "FnFilter",
            _input: PhantomData,
        }
    }

    /// Sets the name recorded in the ledger.
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl<T, F> Filter<T> for FnFilter<T, F>
where
    T: ?Sized + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn can_pass(&self, ctx: &mut FilterContext<'_, T>) -> FilterResult {
        Ok((self.f)(ctx.input))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::{BotInfo, Chat, Update, User};

    use super::*;
    use crate::filter::{CompletedFilters, FilterExt, FilterSet};
    use std::sync::Arc;

    fn bot() -> BotInfo {
        BotInfo::new(1, "yard_bot")
    }

    fn text_event(text: &str, entities: Vec<MessageEntity>) -> BoxedEvent {
        let mut message = Message::new(5, Chat::group(-7))
            .from_user(User::new(3, "ann"))
            .text(text);
        message.entities = entities;
        BoxedEvent::new(Update::from_message(10, message))
    }

    fn check<F: Filter<BoxedEvent>>(filter: F, event: &BoxedEvent) -> (FilterResult, CompletedFilters) {
        let bot = bot();
        let mut completed = CompletedFilters::new();
        let result = FilterContext::new(&bot, event, &mut completed).evaluate(&filter);
        (result, completed)
    }

    #[test]
    fn test_text_filters() {
        let event = text_event("Hello World", Vec::new());
        assert!(check(on_message(TextEquals::new("Hello World")), &event).0.unwrap());
        assert!(!check(on_message(TextEquals::new("hello world")), &event).0.unwrap());
        assert!(check(on_message(TextEquals::new("hello world").ignore_case()), &event).0.unwrap());
        assert!(check(on_message(TextStartsWith::new("Hello")), &event).0.unwrap());
        assert!(!check(on_message(TextStartsWith::new("World")), &event).0.unwrap());
        assert!(check(on_message(TextEndsWith::new("WORLD").ignore_case()), &event).0.unwrap());
        assert!(check(on_message(TextContains::new("o W")), &event).0.unwrap());
        assert!(check(on_message(TextNotEmpty), &event).0.unwrap());

        let empty = text_event("", Vec::new());
        assert!(!check(on_message(TextNotEmpty), &empty).0.unwrap());
    }

    #[test]
    fn test_command_leaves_args() {
        let event = text_event("/Start@yard_bot  deep   link ", Vec::new());
        let (result, completed) = check(on_message(Command::new(["start", "begin"])), &event);
        assert!(result.unwrap());
        let args = completed.artifact::<Command, CommandArgs>(0).unwrap();
        assert_eq!(args.command, "start");
        assert_eq!(args.args, vec!["deep", "link"]);
        assert_eq!(args.raw, "deep   link");
    }

    #[test]
    fn test_command_aliases_are_unique() {
        let command = Command::new(["start", "/Help", "START", "help", "/start"]);
        assert_eq!(command.aliases(), ["start", "help"]);
    }

    #[test]
    fn test_command_for_other_bot_does_not_match() {
        let event = text_event("/start@other_bot", Vec::new());
        assert!(!check(on_message(Command::new(["start"])), &event).0.unwrap());
        let event = text_event("start", Vec::new());
        assert!(!check(on_message(Command::new(["start"])), &event).0.unwrap());
    }

    #[test]
    fn test_mentioned_reads_has_entity_artifact() {
        let event = text_event(
            "hey @Yard_Bot look",
            vec![MessageEntity::new(EntityKind::Mention, 4, 9)],
        );
        let set = FilterSet::new(
            None,
            None,
            vec![
                Arc::new(on_message(HasEntity::new(EntityKind::Mention))),
                Arc::new(on_message(Mentioned::bot())),
            ],
        );
        let bot = bot();
        let mut completed = CompletedFilters::new();
        let mut ctx = FilterContext::new(&bot, &event, &mut completed);
        assert!(set.evaluate(&mut ctx).unwrap());
        assert_eq!(completed.names(), vec!["HasEntity", "Mentioned"]);

        let set = FilterSet::new(
            None,
            None,
            vec![
                Arc::new(on_message(HasEntity::new(EntityKind::Mention))),
                Arc::new(on_message(Mentioned::user("someone_else"))),
            ],
        );
        let mut completed = CompletedFilters::new();
        let mut ctx = FilterContext::new(&bot, &event, &mut completed);
        assert!(!set.evaluate(&mut ctx).unwrap());
    }

    #[test]
    fn test_mentioned_without_has_entity_errors() {
        let event = text_event("hey @yard_bot", vec![MessageEntity::new(EntityKind::Mention, 4, 9)]);
        let (result, _) = check(on_message(Mentioned::bot()), &event);
        assert!(result.is_err());
    }

    #[test]
    fn test_callback_filters() {
        let query = CallbackQuery::new("q1", User::new(3, "ann"))
            .on_message(Message::new(9, Chat::private(3)))
            .data("vote:yes");
        let event = BoxedEvent::new(Update::from_callback(11, query));

        assert!(check(on_callback(CallbackDataStartsWith::new("vote:")), &event).0.unwrap());
        assert!(!check(on_callback(CallbackDataEquals::new("vote:no")), &event).0.unwrap());
        // Message filters never pass on a callback update.
        assert!(!check(on_message(TextNotEmpty), &event).0.unwrap());
    }

    #[test]
    fn test_chat_kind_and_closures() {
        let event = text_event("hi", Vec::new());
        assert!(check(on_message(ChatKindIs(ChatKind::Group)), &event).0.unwrap());
        assert!(!check(on_message(ChatKindIs(ChatKind::Private)), &event).0.unwrap());

        let short = FnFilter::new(|message: &Message| message.text.as_deref().is_some_and(|t| t.len() < 5));
        assert!(check(on_message(short.or(TextEquals::new("never"))), &event).0.unwrap());
    }
}

//! Structural event matchers.
//!
//! A [`Matcher`] decides whether a handler registration applies to an event.
//! It never looks at anything but the event itself, so it is cheap to clone
//! and evaluate for every registration.
//!
//! ```rust,ignore
//! Matcher::command("recap");                  // "/recap", "/recap@my_bot 50"
//! Matcher::prefix("!");                       // "!ping"
//! Matcher::kind(EventKind::EditedMessage);    // any edit
//! Matcher::predicate(|e| e.text().len() > 200);
//! ```

use std::sync::Arc;

use crate::event::{Event, EventKind};

/// A type-erased predicate over events.
pub type PredicateFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

#[derive(Clone)]
enum Rule {
    Command(String),
    Prefix(String),
    Kind(EventKind),
    Predicate(PredicateFn),
    All(Vec<Matcher>),
}

/// A structural check over events.
#[derive(Clone)]
pub struct Matcher {
    rule: Rule,
    name: Option<String>,
}

impl Matcher {
    fn from_rule(rule: Rule) -> Self {
        Self { rule, name: None }
    }

    /// Matches new messages invoking `/name`, with or without a `@bot` suffix.
    pub fn command(name: impl Into<String>) -> Self {
        let name = name.into();
        let name = name.trim_start_matches('/').to_string();
        Self::from_rule(Rule::Command(name))
    }

    /// Matches new or edited messages whose text starts with `prefix`.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::from_rule(Rule::Prefix(prefix.into()))
    }

    /// Matches every event of the given kind.
    pub fn kind(kind: EventKind) -> Self {
        Self::from_rule(Rule::Kind(kind))
    }

    /// Matches events accepted by `f`.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self::from_rule(Rule::Predicate(Arc::new(f)))
    }

    /// Matches when both `self` and `other` match.
    pub fn and(self, other: Matcher) -> Self {
        let name = self.name.clone();
        let mut parts = match self.rule {
            Rule::All(parts) => parts,
            rule => vec![Matcher { rule, name: None }],
        };
        parts.push(other);
        Self {
            rule: Rule::All(parts),
            name,
        }
    }

    /// Sets a name used in logs (builder pattern).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the name of this matcher, if set.
    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Checks `event` against this matcher.
    pub fn matches(&self, event: &Event) -> bool {
        match &self.rule {
            Rule::Command(name) => match event {
                Event::Message(m) => parse_command(&m.text).is_some_and(|(cmd, _)| cmd == name),
                _ => false,
            },
            Rule::Prefix(prefix) => event
                .as_message()
                .is_some_and(|m| m.text.starts_with(prefix.as_str())),
            Rule::Kind(kind) => event.kind() == *kind,
            Rule::Predicate(f) => f(event),
            Rule::All(parts) => parts.iter().all(|m| m.matches(event)),
        }
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rule = match &self.rule {
            Rule::Command(c) => format!("command(/{c})"),
            Rule::Prefix(p) => format!("prefix({p:?})"),
            Rule::Kind(k) => format!("kind({k})"),
            Rule::Predicate(_) => "predicate".to_string(),
            Rule::All(parts) => format!("all({})", parts.len()),
        };
        f.debug_struct("Matcher")
            .field("rule", &rule)
            .field("name", &self.name)
            .finish()
    }
}

/// Splits a bot command into its name and argument text.
///
/// `"/recap@my_bot 50"` yields `("recap", "50")`. Returns `None` when `text`
/// is not a command.
pub fn parse_command(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split_once('@').map_or(head, |(name, _)| name);
    if name.is_empty() {
        return None;
    }
    Some((name, args))
}

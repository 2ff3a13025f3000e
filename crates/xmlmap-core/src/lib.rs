//! Declarative, event driven mapping of nested markup onto typed object graphs.
//!
//! A [`RuleTree`] describes, per element tag, which objects to create when the
//! element opens, which attributes and text feed which fields, and what to do
//! with the finished object when the element closes. A [`DocumentDriver`]
//! walks a stream of [`MarkupEvent`]s against the tree, keeping every object
//! under construction on a [`BranchContext`].

use std::borrow::Cow;

pub mod branch;
pub mod driver;
pub mod error;
pub mod event;
pub mod mapping;
pub mod rule;

pub use branch::{AnyPredicate, BranchContext, ListBranch, TypeMapBranch};
pub use driver::{DocumentDriver, DriverOptions, DriverStats, RunError, SkipPolicy};
pub use error::{BoxError, BranchError, HookPhase, MapError};
pub use event::{AttributeSource, EventSource, MarkupEvent};
pub use mapping::{
    AttributeMapping, AttributeMappingBuilder, AttributeMappingSetter, AttributeValues,
    TextMapping,
};
pub use rule::{ElementRule, RuleTree, ROOT_TAG};

/// Characters of element text kept in log records by default.
pub const DEFAULT_LOG_TEXT_LIMIT: usize = 100;

/// Shorten `text` to at most `limit` characters for logging, marking the cut
/// with `...`.
pub fn truncate_for_log(text: &str, limit: usize) -> Cow<'_, str> {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => Cow::Owned(format!("{}...", &text[..cut])),
        None => Cow::Borrowed(text),
    }
}

//! Rule nodes: per-tag configuration assembled before parsing starts.

use std::any::Any;
use std::collections::HashMap;

use crate::branch::BranchContext;
use crate::error::{BoxError, MapError};
use crate::mapping::{AttributeMapping, AttributeRule, TextMapping, TextRule};

/// Tag name of the synthetic root wrapping the caller's top-level rule.
pub const ROOT_TAG: &str = "root";

type ContextHook<C> = Box<dyn Fn(&mut C) -> Result<(), BoxError> + Send + Sync>;
type AttributeHook<C> = Box<dyn Fn(&mut C, Option<&str>) -> Result<(), BoxError> + Send + Sync>;

/// Start hook of a rule node.
pub(crate) enum StartHook<C> {
    /// Receives the branch only.
    Context(ContextHook<C>),
    /// Also receives the raw value of one named attribute.
    Attribute {
        attribute: String,
        hook: AttributeHook<C>,
    },
}

/// Configuration for one element tag.
pub struct ElementRule<C> {
    name: String,
    attributes: Vec<Box<dyn AttributeRule<C>>>,
    texts: Vec<Box<dyn TextRule<C>>>,
    children: HashMap<String, ElementRule<C>>,
    on_start: Option<StartHook<C>>,
    on_end: Option<ContextHook<C>>,
}

impl<C: BranchContext + 'static> ElementRule<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            texts: Vec::new(),
            children: HashMap::new(),
            on_start: None,
            on_end: None,
        }
    }

    /// Hook run right after the element is matched, before its attribute
    /// units. Replaces any attribute-fed start hook.
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut C) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_start = Some(StartHook::Context(Box::new(hook)));
        self
    }

    /// Start hook that also receives the raw value of `attribute` (`None` when
    /// the element lacks it). Replaces any context-only start hook.
    pub fn on_start_with_attribute<F>(mut self, attribute: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&mut C, Option<&str>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_start = Some(StartHook::Attribute {
            attribute: attribute.into(),
            hook: Box::new(hook),
        });
        self
    }

    /// Hook run when the element closes, before it leaves the stack.
    pub fn on_end<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut C) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_end = Some(Box::new(hook));
        self
    }

    /// Add an attribute unit. Units run in the order they were added.
    pub fn attribute<T, V>(mut self, mapping: AttributeMapping<T, V, C>) -> Self
    where
        T: Any,
        V: 'static,
    {
        self.attributes.push(Box::new(mapping));
        self
    }

    /// Add a text unit. Units run in the order they were added.
    pub fn text<T, V>(mut self, mapping: TextMapping<T, V>) -> Self
    where
        T: Any,
        V: 'static,
    {
        self.texts.push(Box::new(mapping));
        self
    }

    /// Register a child rule. A child with the same tag name replaces the
    /// earlier one.
    pub fn child(mut self, child: ElementRule<C>) -> Self {
        self.children.insert(child.name.clone(), child);
        self
    }

    /// Register several child rules.
    pub fn children<I>(self, children: I) -> Self
    where
        I: IntoIterator<Item = ElementRule<C>>,
    {
        children.into_iter().fold(self, ElementRule::child)
    }
}

impl<C> ElementRule<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Child rule registered for `name`.
    pub fn child_rule(&self, name: &str) -> Option<&ElementRule<C>> {
        self.children.get(name)
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn attribute_unit_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn text_unit_count(&self) -> usize {
        self.texts.len()
    }

    pub(crate) fn attribute_units(&self) -> &[Box<dyn AttributeRule<C>>] {
        &self.attributes
    }

    pub(crate) fn text_units(&self) -> &[Box<dyn TextRule<C>>] {
        &self.texts
    }

    pub(crate) fn start_hook(&self) -> Option<&StartHook<C>> {
        self.on_start.as_ref()
    }

    pub(crate) fn end_hook(&self) -> Option<&ContextHook<C>> {
        self.on_end.as_ref()
    }
}

impl<C> std::fmt::Debug for ElementRule<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut children: Vec<&str> = self.children.keys().map(String::as_str).collect();
        children.sort_unstable();
        f.debug_struct("ElementRule")
            .field("name", &self.name)
            .field("attributes", &self.attributes.len())
            .field("texts", &self.texts.len())
            .field("children", &children)
            .field("on_start", &self.on_start.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

/// Immutable rule tree: a synthetic root holding the caller's top-level rule.
///
/// The tree holds only `Send + Sync` callables and can be shared between
/// threads; every parse gets its own driver and branch context.
#[derive(Debug)]
pub struct RuleTree<C> {
    root: ElementRule<C>,
}

impl<C: BranchContext + 'static> RuleTree<C> {
    /// Wrap `top` in the synthetic root.
    pub fn new(top: ElementRule<C>) -> Result<Self, MapError> {
        if top.name.trim().is_empty() {
            return Err(MapError::Config(
                "the top-level rule must name the document element".into(),
            ));
        }
        Ok(Self {
            root: ElementRule::new(ROOT_TAG).child(top),
        })
    }
}

impl<C> RuleTree<C> {
    pub(crate) fn root(&self) -> &ElementRule<C> {
        &self.root
    }

    /// The caller-supplied top-level rule.
    pub fn top(&self) -> &ElementRule<C> {
        self.root
            .children
            .values()
            .next()
            .unwrap_or(&self.root)
    }
}

//! The document driver: a stack of active rule nodes walked by markup events.

use std::any::{type_name, Any};

use thiserror::Error;
use tracing::{debug, warn};

use crate::branch::BranchContext;
use crate::error::{HookPhase, MapError};
use crate::event::{AttributeSource, EventSource, MarkupEvent};
use crate::mapping::AttributeValues;
use crate::rule::{ElementRule, RuleTree, StartHook};
use crate::{truncate_for_log, DEFAULT_LOG_TEXT_LIMIT};

/// What happens inside an element that has no rule under the current node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SkipPolicy {
    /// Ignore the whole subtree of the unmatched element.
    #[default]
    Isolate,
    /// Keep matching descendants against the unmatched element's parent rule.
    Legacy,
}

/// Driver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    pub skip_policy: SkipPolicy,
    /// Characters of element text kept in log records.
    pub log_text_limit: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            skip_policy: SkipPolicy::default(),
            log_text_limit: DEFAULT_LOG_TEXT_LIMIT,
        }
    }
}

impl DriverOptions {
    pub fn skip_policy(mut self, policy: SkipPolicy) -> Self {
        self.skip_policy = policy;
        self
    }

    pub fn log_text_limit(mut self, limit: usize) -> Self {
        self.log_text_limit = limit;
        self
    }
}

/// Counters describing what the driver did with the events it received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Element-open events matched to a rule and pushed.
    pub matched: u64,
    /// Element-open events without a rule (including isolated descendants).
    pub skipped: u64,
    /// Element-close events that popped a rule.
    pub popped: u64,
    /// Element-close events that did not match the stack top.
    pub unmatched_closes: u64,
    pub attribute_units_applied: u64,
    pub text_units_applied: u64,
    /// Units that found no object to write into.
    pub missing_targets: u64,
}

/// Failure while pumping an [`EventSource`] through a driver.
#[derive(Debug, Error)]
pub enum RunError<E> {
    #[error("event source: {0}")]
    Source(#[source] E),
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Drives one document through a [`RuleTree`], building objects on a branch
/// context of type `C`.
pub struct DocumentDriver<'r, C> {
    tree: &'r RuleTree<C>,
    stack: Vec<&'r ElementRule<C>>,
    branch: C,
    options: DriverOptions,
    skip_depth: usize,
    stats: DriverStats,
}

impl<'r, C: BranchContext + Default> DocumentDriver<'r, C> {
    /// Driver with an empty, default branch context.
    pub fn new(tree: &'r RuleTree<C>) -> Self {
        Self::with_branch(tree, C::default())
    }
}

impl<'r, C: BranchContext> DocumentDriver<'r, C> {
    /// Driver over a caller supplied branch, e.g. one pre-seeded with an
    /// existing graph the document should extend.
    pub fn with_branch(tree: &'r RuleTree<C>, branch: C) -> Self {
        Self {
            tree,
            stack: vec![tree.root()],
            branch,
            options: DriverOptions::default(),
            skip_depth: 0,
            stats: DriverStats::default(),
        }
    }

    pub fn with_options(mut self, options: DriverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Number of rules on the stack, the synthetic root included.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Tag of the rule currently on top of the stack.
    pub fn current_element(&self) -> &'r str {
        self.top().name()
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    pub fn branch(&self) -> &C {
        &self.branch
    }

    pub fn branch_mut(&mut self) -> &mut C {
        &mut self.branch
    }

    pub fn into_branch(self) -> C {
        self.branch
    }

    fn top(&self) -> &'r ElementRule<C> {
        self.stack.last().copied().unwrap_or_else(|| self.tree.root())
    }

    /// Handle an element-open event.
    pub fn start_element<A>(&mut self, name: &str, attributes: &A) -> Result<(), MapError>
    where
        A: AttributeSource + ?Sized,
    {
        if self.skip_depth > 0 {
            self.skip_depth += 1;
            self.stats.skipped += 1;
            debug!(element = name, "element inside a skipped subtree");
            return Ok(());
        }

        let parent = self.top();
        let Some(rule) = parent.child_rule(name) else {
            debug!(
                element = name,
                parent = parent.name(),
                "element skipped, no rule configured under parent"
            );
            self.stats.skipped += 1;
            if self.options.skip_policy == SkipPolicy::Isolate {
                self.skip_depth = 1;
            }
            return Ok(());
        };

        self.stack.push(rule);
        self.stats.matched += 1;
        debug!(element = name, depth = self.stack.len(), "start element");

        self.run_start_hook(rule, attributes)?;
        for unit in rule.attribute_units() {
            let values = AttributeValues::capture(unit.fields(), attributes);
            if unit.apply(rule.name(), &values, &mut self.branch)? {
                self.stats.attribute_units_applied += 1;
            } else if !unit.fields().is_empty() {
                self.stats.missing_targets += 1;
            }
        }
        Ok(())
    }

    fn run_start_hook<A>(&mut self, rule: &ElementRule<C>, attributes: &A) -> Result<(), MapError>
    where
        A: AttributeSource + ?Sized,
    {
        let outcome = match rule.start_hook() {
            Some(StartHook::Context(hook)) => hook(&mut self.branch),
            Some(StartHook::Attribute { attribute, hook }) => {
                hook(&mut self.branch, attributes.attribute(attribute))
            }
            None => Ok(()),
        };
        outcome.map_err(|err| MapError::hook(rule.name(), HookPhase::Start, err))
    }

    /// Handle a characters event. Control characters and ASCII spaces are
    /// trimmed from both ends, so other Unicode whitespace such as NBSP is
    /// kept. Blank chunks are ignored; every other chunk is applied on its own.
    pub fn characters(&mut self, text: &str) -> Result<(), MapError> {
        if self.skip_depth > 0 {
            return Ok(());
        }
        let trimmed = text.trim_matches(|c: char| c <= ' ');
        if trimmed.is_empty() {
            return Ok(());
        }
        let rule = self.top();
        debug!(
            element = rule.name(),
            text = %truncate_for_log(trimmed, self.options.log_text_limit),
            "characters"
        );
        for unit in rule.text_units() {
            if unit.apply(rule.name(), trimmed, &mut self.branch)? {
                self.stats.text_units_applied += 1;
            } else {
                self.stats.missing_targets += 1;
            }
        }
        Ok(())
    }

    /// Handle an element-close event.
    pub fn end_element(&mut self, name: &str) -> Result<(), MapError> {
        if self.skip_depth > 0 {
            self.skip_depth -= 1;
            return Ok(());
        }
        let rule = self.top();
        if self.stack.len() < 2 || rule.name() != name {
            debug!(
                element = name,
                current = rule.name(),
                "close does not match the current rule, ignored"
            );
            self.stats.unmatched_closes += 1;
            return Ok(());
        }
        debug!(element = name, depth = self.stack.len(), "end element");
        if let Some(hook) = rule.end_hook() {
            hook(&mut self.branch).map_err(|err| MapError::hook(name, HookPhase::End, err))?;
        }
        self.stack.pop();
        self.stats.popped += 1;
        Ok(())
    }

    /// Dispatch one event.
    pub fn handle(&mut self, event: &MarkupEvent) -> Result<(), MapError> {
        match event {
            MarkupEvent::Start { name, attributes } => self.start_element(name, attributes),
            MarkupEvent::Text(text) => self.characters(text),
            MarkupEvent::End { name } => self.end_element(name),
        }
    }

    /// Pump every event of `source` through the driver.
    pub fn run<S>(&mut self, mut source: S) -> Result<(), RunError<S::Error>>
    where
        S: EventSource,
    {
        while let Some(event) = source.next_event().map_err(RunError::Source)? {
            self.handle(&event)?;
        }
        if self.stack.len() > 1 {
            warn!(
                depth = self.stack.len(),
                current = self.current_element(),
                "event source ended with open elements"
            );
        }
        Ok(())
    }

    /// Remove the result object of type `T` from the branch.
    pub fn take_result<T: Any>(&mut self) -> Option<T> {
        if self.branch.get::<T>().is_none() {
            warn!(
                kind = type_name::<T>(),
                "no object of the requested type was available on the branch"
            );
            return None;
        }
        self.branch.remove::<T>()
    }

    /// Consume the driver and take the result of type `T`.
    pub fn finish<T: Any>(mut self) -> Option<T> {
        self.take_result()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::branch::{ListBranch, TypeMapBranch};
    use crate::error::BoxError;
    use crate::mapping::{AttributeMapping, TextMapping};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Event {
        id: Option<String>,
        name: Option<String>,
        description: Option<String>,
        markets: Vec<Market>,
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Market {
        id: Option<String>,
        name: Option<String>,
        notes: Vec<String>,
    }

    fn first(values: &AttributeValues) -> Result<Option<String>, BoxError> {
        Ok(values.first().map(str::to_owned))
    }

    fn text(value: &str) -> Result<String, BoxError> {
        Ok(value.to_owned())
    }

    fn market_rule<C: BranchContext + 'static>() -> ElementRule<C> {
        ElementRule::new("market")
            .on_start(|branch: &mut C| {
                branch.insert(Market::default())?;
                Ok(())
            })
            .attribute(
                AttributeMapping::on()
                    .fields(["id"])
                    .map(first)
                    .set(|market: &mut Market, id| market.id = id),
            )
            .attribute(
                AttributeMapping::on()
                    .fields(["name"])
                    .map(first)
                    .set(|market: &mut Market, name| market.name = name),
            )
            .on_end(|branch: &mut C| {
                let market = branch.remove::<Market>().ok_or("market missing")?;
                branch
                    .get_mut::<Event>()
                    .ok_or("event missing")?
                    .markets
                    .push(market);
                Ok(())
            })
    }

    fn event_tree<C: BranchContext + 'static>() -> RuleTree<C> {
        let event = ElementRule::new("event")
            .on_start(|branch: &mut C| {
                branch.insert(Event::default())?;
                Ok(())
            })
            .attribute(
                AttributeMapping::on()
                    .fields(["id"])
                    .map(first)
                    .set(|event: &mut Event, id| event.id = id),
            )
            .attribute(
                AttributeMapping::on()
                    .fields(["name"])
                    .map(first)
                    .set(|event: &mut Event, name| event.name = name),
            )
            .text(TextMapping::new(text, |event: &mut Event, text| {
                event.description = Some(text)
            }))
            .child(market_rule());
        RuleTree::new(event).expect("event tree")
    }

    fn market_events() -> Vec<MarkupEvent> {
        vec![
            MarkupEvent::start_with("event", &[("id", "1"), ("name", "Foo")]),
            MarkupEvent::text("\n Some Description Text\n "),
            MarkupEvent::start_with("market", &[("id", "1"), ("name", "Mkt Foo")]),
            MarkupEvent::text("\n  "),
            MarkupEvent::end("market"),
            MarkupEvent::start_with("market", &[("id", "2"), ("name", "Mkt Bar")]),
            MarkupEvent::end("market"),
            MarkupEvent::end("event"),
        ]
    }

    #[test]
    fn maps_event_with_markets_in_document_order() {
        let tree = event_tree::<TypeMapBranch>();
        let mut driver = DocumentDriver::new(&tree);
        driver.run(market_events().into_iter()).expect("run");
        assert_eq!(driver.depth(), 1);

        let stats = driver.stats();
        assert_eq!(stats.matched, 3);
        assert_eq!(stats.popped, stats.matched);
        assert_eq!(stats.attribute_units_applied, 6);
        assert_eq!(stats.text_units_applied, 1);

        let event: Event = driver.finish().expect("event result");
        assert_eq!(event.id.as_deref(), Some("1"));
        assert_eq!(event.name.as_deref(), Some("Foo"));
        assert_eq!(event.description.as_deref(), Some("Some Description Text"));
        let markets: Vec<_> = event
            .markets
            .iter()
            .map(|m| (m.id.as_deref().unwrap(), m.name.as_deref().unwrap()))
            .collect();
        assert_eq!(markets, vec![("1", "Mkt Foo"), ("2", "Mkt Bar")]);
    }

    #[test]
    fn list_branch_drives_the_same_tree() {
        let tree = event_tree::<ListBranch>();
        let mut driver = DocumentDriver::new(&tree);
        driver.run(market_events().into_iter()).expect("run");
        let event: Event = driver.finish().expect("event result");
        assert_eq!(event.markets.len(), 2);
    }

    #[test]
    fn sibling_reinsert_without_removal_is_configuration_error() {
        let leaky = ElementRule::new("event")
            .on_start(|branch: &mut TypeMapBranch| {
                branch.insert(Event::default())?;
                Ok(())
            })
            .child(ElementRule::new("market").on_start(|branch: &mut TypeMapBranch| {
                branch.insert(Market::default())?;
                Ok(())
            }));
        let tree = RuleTree::new(leaky).expect("tree");
        let mut driver = DocumentDriver::new(&tree);
        driver.start_element("event", &[("id", "1")]).unwrap();
        driver.start_element("market", &[("id", "1")]).unwrap();
        driver.end_element("market").unwrap();
        let err = driver.start_element("market", &[("id", "2")]).unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(err, MapError::Branch { ref element, .. } if element == "market"));
    }

    #[test]
    fn text_chunks_apply_independently() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let rule = ElementRule::new("note")
            .on_start(|branch: &mut TypeMapBranch| {
                branch.insert(Market::default())?;
                Ok(())
            })
            .text(TextMapping::new(text, move |market: &mut Market, text| {
                seen.fetch_add(1, Ordering::SeqCst);
                market.notes.push(text);
            }));
        let tree = RuleTree::new(rule).expect("tree");
        let mut driver = DocumentDriver::new(&tree);
        driver.start_element("note", &[] as &[(&str, &str)]).unwrap();
        driver.characters("first ").unwrap();
        driver.characters("   ").unwrap();
        driver.characters(" second").unwrap();
        driver.end_element("note").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let market: Market = driver.finish().expect("market");
        assert_eq!(market.notes, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn text_trim_keeps_unicode_spaces() {
        let rule = ElementRule::new("note")
            .on_start(|branch: &mut TypeMapBranch| {
                branch.insert(Market::default())?;
                Ok(())
            })
            .text(TextMapping::new(text, |market: &mut Market, text| {
                market.notes.push(text)
            }));
        let tree = RuleTree::new(rule).expect("tree");
        let mut driver = DocumentDriver::new(&tree);
        driver.start_element("note", &[] as &[(&str, &str)]).unwrap();
        driver.characters("\u{00A0}").unwrap();
        driver.characters("\t\u{00A0}Foo\u{2003} \n").unwrap();
        driver.characters(" \r\n\t").unwrap();
        driver.end_element("note").unwrap();
        let market: Market = driver.finish().expect("market");
        assert_eq!(
            market.notes,
            vec!["\u{00A0}".to_string(), "\u{00A0}Foo\u{2003}".to_string()]
        );
    }

    #[test]
    fn missing_result_leaves_branch_untouched() {
        let tree = RuleTree::new(ElementRule::<TypeMapBranch>::new("event")).expect("tree");
        let mut driver = DocumentDriver::with_branch(&tree, TypeMapBranch::with(Market::default()));
        assert!(driver.take_result::<Event>().is_none());
        assert!(driver.branch().contains::<Market>());
        assert!(driver.take_result::<Market>().is_some());
        assert!(driver.branch().is_empty());
    }

    #[test]
    fn text_without_target_is_counted_and_dropped() {
        let tree = RuleTree::new(ElementRule::<TypeMapBranch>::new("event").text(
            TextMapping::new(text, |event: &mut Event, text| event.description = Some(text)),
        ))
        .expect("tree");
        let mut driver = DocumentDriver::new(&tree);
        driver.start_element("event", &[] as &[(&str, &str)]).unwrap();
        driver.characters("lost").unwrap();
        driver.end_element("event").unwrap();
        assert_eq!(driver.stats().missing_targets, 1);
        assert!(driver.finish::<Event>().is_none());
    }

    #[test]
    fn attribute_fed_start_hook_receives_value_or_none() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let rule = ElementRule::<TypeMapBranch>::new("event").child(
            ElementRule::new("market").on_start_with_attribute("id", move |_, id| {
                sink.lock().unwrap().push(id.map(str::to_owned));
                Ok(())
            }),
        );
        let tree = RuleTree::new(rule).expect("tree");
        let mut driver = DocumentDriver::new(&tree);
        driver
            .run(
                vec![
                    MarkupEvent::start("event"),
                    MarkupEvent::start_with("market", &[("id", "7")]),
                    MarkupEvent::end("market"),
                    MarkupEvent::start("market"),
                    MarkupEvent::end("market"),
                    MarkupEvent::end("event"),
                ]
                .into_iter(),
            )
            .expect("run");
        assert_eq!(*seen.lock().unwrap(), vec![Some("7".to_string()), None]);
    }

    fn skip_tree() -> RuleTree<TypeMapBranch> {
        RuleTree::new(
            event_tree_rule()
                .child(ElementRule::new("name").text(TextMapping::new(
                    text,
                    |event: &mut Event, text| event.name = Some(text),
                ))),
        )
        .expect("tree")
    }

    fn event_tree_rule() -> ElementRule<TypeMapBranch> {
        ElementRule::new("event").on_start(|branch: &mut TypeMapBranch| {
            branch.insert(Event::default())?;
            Ok(())
        })
    }

    fn skip_events() -> Vec<MarkupEvent> {
        vec![
            MarkupEvent::start("event"),
            MarkupEvent::start("meta"),
            MarkupEvent::start("name"),
            MarkupEvent::text("from meta"),
            MarkupEvent::end("name"),
            MarkupEvent::end("meta"),
            MarkupEvent::start("name"),
            MarkupEvent::text("Foo"),
            MarkupEvent::end("name"),
            MarkupEvent::end("event"),
        ]
    }

    #[test]
    fn isolated_skip_ignores_descendants_of_unmatched_elements() {
        let tree = skip_tree();
        let mut driver = DocumentDriver::new(&tree);
        let mut names = Vec::new();
        for event in skip_events() {
            driver.handle(&event).expect("handle");
            if let Some(current) = driver.branch().get::<Event>().and_then(|e| e.name.clone()) {
                names.push(current);
            }
        }
        assert_eq!(driver.depth(), 1);
        assert_eq!(driver.stats().skipped, 2);
        assert_eq!(driver.stats().unmatched_closes, 0);
        let event: Event = driver.finish().expect("event");
        assert_eq!(event.name.as_deref(), Some("Foo"));
        assert!(!names.iter().any(|n| n == "from meta"));
    }

    #[test]
    fn legacy_skip_matches_descendants_against_parent_rule() {
        let tree = skip_tree();
        let mut driver = DocumentDriver::new(&tree)
            .with_options(DriverOptions::default().skip_policy(SkipPolicy::Legacy));
        let mut seen_meta_name = false;
        for event in skip_events() {
            driver.handle(&event).expect("handle");
            if driver.branch().get::<Event>().and_then(|e| e.name.as_deref()) == Some("from meta") {
                seen_meta_name = true;
            }
        }
        assert!(seen_meta_name, "legacy policy lets <meta><name> hit the sibling rule");
        assert_eq!(driver.depth(), 1);
        assert_eq!(driver.stats().skipped, 1);
        assert_eq!(driver.stats().unmatched_closes, 1);
        let event: Event = driver.finish().expect("event");
        assert_eq!(event.name.as_deref(), Some("Foo"));
    }

    #[test]
    fn mismatched_close_is_ignored_and_root_never_pops() {
        let tree = event_tree::<TypeMapBranch>();
        let mut driver = DocumentDriver::new(&tree);
        driver.end_element("root").unwrap();
        driver.end_element("event").unwrap();
        assert_eq!(driver.depth(), 1);
        assert_eq!(driver.current_element(), crate::rule::ROOT_TAG);
        assert_eq!(driver.stats().unmatched_closes, 2);
    }

    #[test]
    fn hook_failure_aborts_with_element_name() {
        let tree = RuleTree::new(
            ElementRule::<TypeMapBranch>::new("event").on_end(|_| Err("cannot close".into())),
        )
        .expect("tree");
        let mut driver = DocumentDriver::new(&tree);
        let err = driver
            .run(vec![MarkupEvent::start("event"), MarkupEvent::end("event")].into_iter())
            .unwrap_err();
        match err {
            RunError::Map(MapError::Hook { element, phase, .. }) => {
                assert_eq!(element, "event");
                assert_eq!(phase, HookPhase::End);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn preseeded_branch_is_extended() {
        let tree = RuleTree::new(
            ElementRule::<TypeMapBranch>::new("event").child(market_rule()),
        )
        .expect("tree");
        let existing = Event {
            id: Some("1".into()),
            ..Event::default()
        };
        let mut driver = DocumentDriver::with_branch(&tree, TypeMapBranch::with(existing));
        driver
            .run(
                vec![
                    MarkupEvent::start("event"),
                    MarkupEvent::start_with("market", &[("id", "9")]),
                    MarkupEvent::end("market"),
                    MarkupEvent::end("event"),
                ]
                .into_iter(),
            )
            .expect("run");
        let event: Event = driver.finish().expect("event");
        assert_eq!(event.id.as_deref(), Some("1"));
        assert_eq!(event.markets.len(), 1);
        assert_eq!(event.markets[0].id.as_deref(), Some("9"));
    }

    #[test]
    fn shared_tree_serves_parallel_parses() {
        let tree = Arc::new(event_tree::<TypeMapBranch>());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tree = Arc::clone(&tree);
                std::thread::spawn(move || {
                    let mut driver = DocumentDriver::new(&tree);
                    driver.run(market_events().into_iter()).expect("run");
                    driver.finish::<Event>().map(|event| event.markets.len())
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("join"), Some(2));
        }
    }
}

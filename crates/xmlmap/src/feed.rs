//! Sports-feed model and the rule trees mapping feed documents onto it.
//!
//! Feeds come in a few layouts:
//!
//! * `<event>` with `<market>` children, optionally holding `<selection>`s
//!   priced by a nested `<price>` element ([`event_tree`]);
//! * the same wrapped in a `<sport>` element whose name is copied onto the
//!   event ([`sport_tree`]);
//! * markets nested inside markets, each `<selection>` attaching to the
//!   innermost open market ([`nested_selection_tree`]);
//! * incremental updates adding selections to markets of an event mapped
//!   earlier ([`update_tree`]).

use serde::{Deserialize, Serialize};
use tracing::debug;
use xmlmap_convert::{first, text};
use xmlmap_core::{
    AttributeMapping, BoxError, BranchContext, DocumentDriver, DriverOptions, DriverStats,
    ElementRule, ListBranch, MapError, RuleTree, TextMapping, TypeMapBranch,
};
use xmlmap_xml::{map_str, XmlError};

/// Deepest `<market>` nesting understood by [`nested_selection_tree`].
pub const MAX_MARKET_NESTING: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sport: Option<String>,
    #[serde(default)]
    pub markets: Vec<Market>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
    /// Sub-markets, only produced by the nested layout.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markets: Vec<Market>,
}

impl Market {
    pub fn find(&self, id: &str) -> Option<&Market> {
        self.markets.iter().find(|market| market.id.as_deref() == Some(id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odds: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odds_decimal: Option<String>,
}

/// Layout of a feed document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedLayout {
    #[default]
    Event,
    Sport,
    /// Nested markets with selections attached to the innermost one.
    Selection,
    /// Market names qualified with the event name: `Mkt Foo (Foo)`.
    Qualified,
}

/// Sport name carried from `<sport>` to the events it wraps.
#[derive(Debug, Default)]
struct SportScratch {
    name: Option<String>,
}

/// Index into `Event::markets` of the market an update is writing into.
#[derive(Debug)]
struct MarketCursor(usize);

type CloseHook<C> = fn(&mut C) -> Result<(), BoxError>;

fn insert_default<T, C>(branch: &mut C) -> Result<(), BoxError>
where
    T: Default + 'static,
    C: BranchContext,
{
    branch.insert(T::default())?;
    Ok(())
}

fn with_event_fields<C: BranchContext + 'static>(rule: ElementRule<C>) -> ElementRule<C> {
    rule.attribute(
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
}

fn event_rule<C: BranchContext + 'static>() -> ElementRule<C> {
    with_event_fields(ElementRule::new("event"))
        .on_start(insert_default::<Event, C>)
        .text(TextMapping::new(text, |event: &mut Event, text| {
            event.description = Some(text)
        }))
}

fn market_id<C: BranchContext + 'static>() -> AttributeMapping<Market, Option<String>, C> {
    AttributeMapping::on()
        .fields(["id"])
        .map(first)
        .set(|market: &mut Market, id| market.id = id)
}

fn market_rule<C: BranchContext + 'static>() -> ElementRule<C> {
    ElementRule::new("market")
        .on_start(insert_default::<Market, C>)
        .attribute(market_id())
        .attribute(
            AttributeMapping::on()
                .fields(["name"])
                .map(first)
                .set(|market: &mut Market, name| market.name = name),
        )
        .on_end(close_market::<C>)
}

fn close_market<C: BranchContext>(branch: &mut C) -> Result<(), BoxError> {
    let market = branch
        .remove::<Market>()
        .ok_or("market closed without an open market")?;
    branch
        .get_mut::<Event>()
        .ok_or("market outside an event")?
        .markets
        .push(market);
    Ok(())
}

fn outcome_rule<C: BranchContext + 'static>(close: CloseHook<C>) -> ElementRule<C> {
    let price = ElementRule::new("price")
        .attribute(
            AttributeMapping::on()
                .fields(["odds_frac"])
                .map(first)
                .set(|outcome: &mut Outcome, odds| outcome.odds = odds),
        )
        .attribute(
            AttributeMapping::on()
                .fields(["odds_dec"])
                .map(first)
                .set(|outcome: &mut Outcome, odds| outcome.odds_decimal = odds),
        );
    ElementRule::new("selection")
        .on_start(insert_default::<Outcome, C>)
        .attribute(
            AttributeMapping::on()
                .fields(["id"])
                .map(first)
                .set(|outcome: &mut Outcome, id| outcome.id = id),
        )
        .attribute(
            AttributeMapping::on()
                .fields(["name"])
                .map(first)
                .set(|outcome: &mut Outcome, name| outcome.name = name),
        )
        .attribute(
            AttributeMapping::on()
                .fields(["price"])
                .map(first)
                .set(|outcome: &mut Outcome, odds| {
                    if odds.is_some() {
                        outcome.odds = odds;
                    }
                }),
        )
        .child(price)
        .on_end(close)
}

fn close_outcome<C: BranchContext>(branch: &mut C) -> Result<(), BoxError> {
    let outcome = branch
        .remove::<Outcome>()
        .ok_or("selection closed without an open outcome")?;
    branch
        .get_mut::<Market>()
        .ok_or("selection outside a market")?
        .outcomes
        .push(outcome);
    Ok(())
}

/// Events with markets, selections and prices.
pub fn event_tree() -> Result<RuleTree<TypeMapBranch>, MapError> {
    RuleTree::new(event_rule().child(market_rule().child(outcome_rule(close_outcome))))
}

/// Events wrapped in a `<sport name="...">` element.
pub fn sport_tree() -> Result<RuleTree<TypeMapBranch>, MapError> {
    let event = with_event_fields(ElementRule::new("event"))
        .on_start(|branch: &mut TypeMapBranch| {
            let sport = branch
                .get::<SportScratch>()
                .and_then(|scratch| scratch.name.clone());
            branch.insert(Event {
                sport,
                ..Event::default()
            })?;
            Ok(())
        })
        .child(market_rule());
    let sport = ElementRule::new("sport")
        .on_start(insert_default::<SportScratch, TypeMapBranch>)
        .attribute(
            AttributeMapping::on()
                .fields(["name"])
                .map(first)
                .set(|scratch: &mut SportScratch, name| scratch.name = name),
        )
        .child(event)
        .on_end(|branch: &mut TypeMapBranch| {
            branch.remove::<SportScratch>();
            Ok(())
        });
    RuleTree::new(sport)
}

/// Events whose market names are suffixed with the event name.
pub fn qualified_names_tree() -> Result<RuleTree<TypeMapBranch>, MapError> {
    let market = ElementRule::new("market")
        .on_start(insert_default::<Market, TypeMapBranch>)
        .attribute(market_id())
        .attribute(
            AttributeMapping::on()
                .fields(["name"])
                .map_with_context(
                    |values, branch: &TypeMapBranch| -> Result<Option<String>, BoxError> {
                        let event = branch.get::<Event>().ok_or("market outside an event")?;
                        Ok(Some(format!(
                            "{} ({})",
                            values.get("name").unwrap_or_default(),
                            event.name.as_deref().unwrap_or_default()
                        )))
                    },
                )
                .set(|market: &mut Market, name| market.name = name),
        )
        .on_end(close_market::<TypeMapBranch>);
    RuleTree::new(event_rule().child(market))
}

fn nested_market(depth: usize) -> ElementRule<ListBranch> {
    let selection = ElementRule::new("selection").attribute(
        AttributeMapping::matching(|market: &Market| market.id.is_some())
            .fields(["id", "name", "price"])
            .map(|values| {
                Ok::<_, BoxError>(Outcome {
                    id: values.get("id").map(str::to_owned),
                    name: values.get("name").map(str::to_owned),
                    odds: values.get("price").map(str::to_owned),
                    odds_decimal: None,
                })
            })
            .set(|market: &mut Market, outcome| market.outcomes.push(outcome)),
    );
    let market = ElementRule::new("market")
        .on_start(insert_default::<Market, ListBranch>)
        .attribute(market_id())
        .attribute(
            AttributeMapping::on()
                .fields(["name"])
                .map(first)
                .set(|market: &mut Market, name| market.name = name),
        )
        .child(selection)
        .on_end(close_nested_market);
    if depth > 1 {
        market.child(nested_market(depth - 1))
    } else {
        market
    }
}

fn close_nested_market(branch: &mut ListBranch) -> Result<(), BoxError> {
    let market = branch
        .remove::<Market>()
        .ok_or("market closed without an open market")?;
    if let Some(parent) = branch.get_mut::<Market>() {
        parent.markets.push(market);
        return Ok(());
    }
    branch
        .get_mut::<Event>()
        .ok_or("market outside an event")?
        .markets
        .push(market);
    Ok(())
}

/// Events whose markets nest; selections attach to the innermost open market.
pub fn nested_selection_tree() -> Result<RuleTree<ListBranch>, MapError> {
    RuleTree::new(event_rule().child(nested_market(MAX_MARKET_NESTING)))
}

fn attach_at_cursor(branch: &mut TypeMapBranch) -> Result<(), BoxError> {
    let outcome = branch
        .remove::<Outcome>()
        .ok_or("selection closed without an open outcome")?;
    let index = branch
        .get::<MarketCursor>()
        .ok_or("selection outside a market")?
        .0;
    branch
        .get_mut::<Event>()
        .and_then(|event| event.markets.get_mut(index))
        .ok_or("market cursor out of range")?
        .outcomes
        .push(outcome);
    Ok(())
}

/// Adds selections to the markets of an event already on the branch; markets
/// are located by their `id` attribute.
pub fn update_tree() -> Result<RuleTree<TypeMapBranch>, MapError> {
    let market = ElementRule::new("market")
        .on_start_with_attribute("id", |branch: &mut TypeMapBranch, id| {
            let id = id.ok_or("market update without an id")?;
            let event = branch.get::<Event>().ok_or("no event to update")?;
            let index = event
                .markets
                .iter()
                .position(|market| market.id.as_deref() == Some(id))
                .ok_or_else(|| format!("event has no market with id {id}"))?;
            debug!(market = id, index, "updating market in place");
            branch.insert(MarketCursor(index))?;
            Ok(())
        })
        .child(outcome_rule(attach_at_cursor))
        .on_end(|branch: &mut TypeMapBranch| {
            branch.remove::<MarketCursor>();
            Ok(())
        });
    RuleTree::new(ElementRule::new("event").child(market))
}

/// Mapped event plus what the driver saw on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedReport {
    pub event: Option<Event>,
    pub stats: DriverStats,
}

fn run<C: BranchContext>(
    mut driver: DocumentDriver<'_, C>,
    xml: &str,
) -> Result<FeedReport, XmlError> {
    let event = map_str::<Event, C>(xml, &mut driver)?;
    Ok(FeedReport {
        event,
        stats: driver.stats(),
    })
}

/// Map a feed document laid out as `layout`.
pub fn map_feed(
    layout: FeedLayout,
    xml: &str,
    options: DriverOptions,
) -> Result<FeedReport, XmlError> {
    match layout {
        FeedLayout::Event => {
            let tree = event_tree()?;
            run(DocumentDriver::new(&tree).with_options(options), xml)
        }
        FeedLayout::Sport => {
            let tree = sport_tree()?;
            run(DocumentDriver::new(&tree).with_options(options), xml)
        }
        FeedLayout::Selection => {
            let tree = nested_selection_tree()?;
            run(DocumentDriver::new(&tree).with_options(options), xml)
        }
        FeedLayout::Qualified => {
            let tree = qualified_names_tree()?;
            run(DocumentDriver::new(&tree).with_options(options), xml)
        }
    }
}

/// Extend `existing` in place with the selections of an update document.
pub fn update_event(
    existing: Event,
    xml: &str,
    options: DriverOptions,
) -> Result<FeedReport, XmlError> {
    let tree = update_tree()?;
    let driver = DocumentDriver::with_branch(&tree, TypeMapBranch::with(existing))
        .with_options(options);
    run(driver, xml)
}

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use xmlmap::feed::{Event, FeedLayout, Market};
use xmlmap::{DriverOptions, DriverStats, SkipPolicy};

/// Rule tree selected on the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TreeKind {
    /// Events with markets, selections and prices
    #[default]
    Event,
    /// Events wrapped in a <sport> element
    Sport,
    /// Nested markets; selections attach to the innermost market
    Selection,
    /// Market names suffixed with the event name
    Qualified,
}

impl From<TreeKind> for FeedLayout {
    fn from(kind: TreeKind) -> Self {
        match kind {
            TreeKind::Event => FeedLayout::Event,
            TreeKind::Sport => FeedLayout::Sport,
            TreeKind::Selection => FeedLayout::Selection,
            TreeKind::Qualified => FeedLayout::Qualified,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsRecord {
    pub matched: u64,
    pub skipped: u64,
    pub popped: u64,
    pub unmatched_closes: u64,
    pub attribute_units_applied: u64,
    pub text_units_applied: u64,
    pub missing_targets: u64,
}

impl From<DriverStats> for StatsRecord {
    fn from(stats: DriverStats) -> Self {
        Self {
            matched: stats.matched,
            skipped: stats.skipped,
            popped: stats.popped,
            unmatched_closes: stats.unmatched_closes,
            attribute_units_applied: stats.attribute_units_applied,
            text_units_applied: stats.text_units_applied,
            missing_targets: stats.missing_targets,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MapRecord<'a> {
    pub event: &'a Event,
    pub stats: StatsRecord,
}

pub fn driver_options(legacy_skip: bool) -> DriverOptions {
    let policy = if legacy_skip {
        SkipPolicy::Legacy
    } else {
        SkipPolicy::Isolate
    };
    DriverOptions::default().skip_policy(policy)
}

pub async fn read_document(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{text}");
    Ok(())
}

fn label(id: Option<&str>, name: Option<&str>) -> String {
    match (id, name) {
        (Some(id), Some(name)) => format!("{id} \"{name}\""),
        (Some(id), None) => id.to_string(),
        (None, Some(name)) => format!("\"{name}\""),
        (None, None) => "-".to_string(),
    }
}

fn render_market(out: &mut String, market: &Market, depth: usize) {
    let indent = "  ".repeat(depth);
    let _ = writeln!(
        out,
        "{indent}market {}",
        label(market.id.as_deref(), market.name.as_deref())
    );
    for outcome in &market.outcomes {
        let _ = write!(
            out,
            "{indent}  selection {}",
            label(outcome.id.as_deref(), outcome.name.as_deref())
        );
        if let Some(odds) = &outcome.odds {
            let _ = write!(out, " @ {odds}");
        }
        if let Some(odds) = &outcome.odds_decimal {
            let _ = write!(out, " ({odds})");
        }
        out.push('\n');
    }
    for sub in &market.markets {
        render_market(out, sub, depth + 1);
    }
}

/// Human readable outline of an event.
pub fn render_event(event: &Event) -> String {
    let mut out = format!(
        "event {}",
        label(event.id.as_deref(), event.name.as_deref())
    );
    if let Some(sport) = &event.sport {
        let _ = write!(out, " [{sport}]");
    }
    out.push('\n');
    if let Some(description) = &event.description {
        let _ = writeln!(out, "  {description}");
    }
    for market in &event.markets {
        render_market(&mut out, market, 1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmlmap::feed::Outcome;

    #[test]
    fn outline_lists_markets_and_selections() {
        let event = Event {
            id: Some("1".into()),
            name: Some("Foo".into()),
            sport: Some("Football".into()),
            markets: vec![Market {
                id: Some("1".into()),
                name: Some("Mkt Foo".into()),
                outcomes: vec![Outcome {
                    id: Some("7".into()),
                    name: Some("Sel Foo".into()),
                    odds: Some("1/3".into()),
                    odds_decimal: Some("1.33".into()),
                }],
                markets: Vec::new(),
            }],
            ..Event::default()
        };
        assert_eq!(
            render_event(&event),
            "event 1 \"Foo\" [Football]\n  market 1 \"Mkt Foo\"\n    selection 7 \"Sel Foo\" @ 1/3 (1.33)\n"
        );
    }

    #[test]
    fn legacy_flag_selects_policy() {
        assert_eq!(driver_options(true).skip_policy, SkipPolicy::Legacy);
        assert_eq!(driver_options(false).skip_policy, SkipPolicy::Isolate);
    }
}

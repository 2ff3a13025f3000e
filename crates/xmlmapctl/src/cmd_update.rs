use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use xmlmap::feed::{self, FeedLayout};

use crate::common::{self, MapRecord};

pub async fn run(base: &Path, patch: &Path, legacy_skip: bool, json: bool) -> Result<()> {
    let base_xml = common::read_document(base).await?;
    let patch_xml = common::read_document(patch).await?;
    let options = common::driver_options(legacy_skip);

    let event = feed::map_feed(FeedLayout::Event, &base_xml, options.clone())
        .with_context(|| format!("map {}", base.display()))?
        .event
        .ok_or_else(|| anyhow!("{} produced no event", base.display()))?;
    info!(markets = event.markets.len(), "base event mapped");

    let report = feed::update_event(event, &patch_xml, options)
        .with_context(|| format!("apply {}", patch.display()))?;
    let event = report
        .event
        .ok_or_else(|| anyhow!("update lost the event"))?;
    info!(
        selections = report.stats.attribute_units_applied,
        "update applied"
    );

    if json {
        common::print_json(&MapRecord {
            event: &event,
            stats: report.stats.into(),
        })?;
    } else {
        print!("{}", common::render_event(&event));
    }
    Ok(())
}

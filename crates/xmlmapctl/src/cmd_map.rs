use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use xmlmap::feed;

use crate::common::{self, MapRecord, TreeKind};

pub async fn run(path: &Path, tree: TreeKind, legacy_skip: bool, json: bool) -> Result<()> {
    let xml = common::read_document(path).await?;
    let report = feed::map_feed(tree.into(), &xml, common::driver_options(legacy_skip))
        .with_context(|| format!("map {}", path.display()))?;
    info!(
        matched = report.stats.matched,
        skipped = report.stats.skipped,
        missing_targets = report.stats.missing_targets,
        "document mapped"
    );
    let event = report
        .event
        .ok_or_else(|| anyhow!("{} produced no event", path.display()))?;

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

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use xmlmapctl::cmd_events;
use xmlmapctl::cmd_map;
use xmlmapctl::cmd_update;
use xmlmapctl::common::TreeKind;

#[derive(Parser, Debug)]
#[command(name = "xmlmapctl", version, about = "Map sports-feed XML onto typed events")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Map a feed document and print the resulting event
    Map {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = TreeKind::Event)]
        tree: TreeKind,
        /// Match children of unknown elements against the enclosing rule
        #[arg(long)]
        legacy_skip: bool,
    },
    /// Map a base document, then add the selections of a patch document
    Update {
        base: PathBuf,
        patch: PathBuf,
        #[arg(long)]
        legacy_skip: bool,
    },
    /// Dump the markup events of a document
    Events { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { verbose, json, cmd } = Cli::parse();

    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cmd {
        Cmd::Map {
            file,
            tree,
            legacy_skip,
        } => cmd_map::run(&file, tree, legacy_skip, json).await?,
        Cmd::Update {
            base,
            patch,
            legacy_skip,
        } => cmd_update::run(&base, &patch, legacy_skip, json).await?,
        Cmd::Events { file } => cmd_events::run(&file, json).await?,
    };

    Ok(())
}

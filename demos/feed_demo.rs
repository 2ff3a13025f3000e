use std::env;
use std::error::Error;

use bytes::Bytes;
use tracing_subscriber::EnvFilter;
use xmlmap_rs::feed::{self, Event, FeedLayout};
use xmlmap_rs::xml::map_async;
use xmlmap_rs::{DocumentDriver, DriverOptions, EventSource, XmlEventSource};

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<event id="1" name="Foo">
  Some Description Text
  <market id="1" name="Mkt Foo"/>
  <market id="2" name="Mkt Bar">
    <selection id="21" name="Sel Bar">
      <price odds_frac="5/3" odds_dec="2.67"/>
    </selection>
  </market>
</event>"#;

const PATCH: &str = r#"<event id="1">
  <market id="1">
    <selection id="1" name="Sel Foo" price="7/5"/>
    <selection id="2" name="Sel Mitza" price="3/1"/>
  </market>
</event>"#;

fn print_event(event: &Event) {
    println!(
        "event {} {}",
        event.id.as_deref().unwrap_or("-"),
        event.name.as_deref().unwrap_or("-")
    );
    for market in &event.markets {
        println!(
            "  market {} {} ({} selections)",
            market.id.as_deref().unwrap_or("-"),
            market.name.as_deref().unwrap_or("-"),
            market.outcomes.len()
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    if env::args().any(|arg| arg == "--trace") {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_target(false)
            .init();
    }

    let mut tokens = XmlEventSource::from_bytes(Bytes::from_static(FEED.as_bytes()));
    let mut count = 0usize;
    while tokens.next_event()?.is_some() {
        count += 1;
    }
    println!("{count} markup events");

    let report = feed::map_feed(FeedLayout::Event, FEED, DriverOptions::default())?;
    println!("stats: {:?}", report.stats);
    let event = report.event.ok_or("feed produced no event")?;
    print_event(&event);

    let updated = feed::update_event(event, PATCH, DriverOptions::default())?
        .event
        .ok_or("update lost the event")?;
    print_event(&updated);

    let tree = feed::qualified_names_tree()?;
    let mut driver = DocumentDriver::new(&tree);
    let qualified: Option<Event> = map_async(FEED.as_bytes(), &mut driver).await?;
    if let Some(event) = qualified {
        print_event(&event);
    }
    Ok(())
}

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use xmlmap::{EventSource, MarkupEvent, XmlEventSource};

use crate::common;

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventRecord {
    Start {
        name: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        attributes: Vec<(String, String)>,
    },
    Text {
        text: String,
    },
    End {
        name: String,
    },
}

/// Markup events of `xml`, whitespace-only text dropped.
pub fn collect_events(xml: &str) -> Result<Vec<EventRecord>> {
    let mut source = XmlEventSource::from_str(xml);
    let mut records = Vec::new();
    while let Some(event) = source.next_event().context("tokenize document")? {
        let record = match event {
            MarkupEvent::Start { name, attributes } => EventRecord::Start { name, attributes },
            MarkupEvent::Text(text) => {
                let text = text.trim_matches(|c: char| c <= ' ');
                if text.is_empty() {
                    continue;
                }
                EventRecord::Text {
                    text: text.to_string(),
                }
            }
            MarkupEvent::End { name } => EventRecord::End { name },
        };
        records.push(record);
    }
    Ok(records)
}

pub async fn run(path: &Path, json: bool) -> Result<()> {
    let xml = common::read_document(path).await?;
    let records = collect_events(&xml).with_context(|| format!("read events of {}", path.display()))?;
    if json {
        return common::print_json(&records);
    }
    let mut depth = 0usize;
    for record in &records {
        match record {
            EventRecord::Start { name, attributes } => {
                let attrs: Vec<String> = attributes
                    .iter()
                    .map(|(key, value)| format!("{key}={value:?}"))
                    .collect();
                println!("{}+ {name} {}", "  ".repeat(depth), attrs.join(" "));
                depth += 1;
            }
            EventRecord::Text { text } => println!("{}\" {text}", "  ".repeat(depth)),
            EventRecord::End { name } => {
                depth = depth.saturating_sub(1);
                println!("{}- {name}", "  ".repeat(depth));
            }
        }
    }
    Ok(())
}

//! Declarative streaming mapper from nested XML onto typed object graphs.
//!
//! This crate bundles the mapping engine ([`xmlmap_core`]), the stock
//! converters ([`convert`]) and the quick-xml front end ([`xml`]), plus a
//! small sports-feed model in [`feed`] that exercises all of them.

pub use xmlmap_convert as convert;
pub use xmlmap_core::*;
pub use xmlmap_xml as xml;
pub use xmlmap_xml::{map_document, map_reader_with_encoding, map_str, XmlError, XmlEventSource};

pub mod feed;

//! Aggregator crate re-exporting [`xmlmap`] for the workspace demos.

pub use xmlmap::*;

pub mod cmd_events;
pub mod cmd_map;
pub mod cmd_update;
pub mod common;

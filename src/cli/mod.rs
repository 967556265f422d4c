pub mod config;
pub mod fetch;
pub mod format;
pub mod input;
pub mod logging;
pub mod sort;
pub mod tui;
pub mod types;

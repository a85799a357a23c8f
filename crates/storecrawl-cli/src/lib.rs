//! Command line surface of the `storecrawl` binary.

mod config;

pub use config::{Command, Config, version_info};

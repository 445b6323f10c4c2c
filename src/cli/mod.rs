//! CLI module
//!
//! Command-line interface for the ebook searcher.

pub mod args;
pub mod config;
pub mod progress;

pub use args::CliArgs;
pub use config::Config;
pub use progress::ProgressDisplay;

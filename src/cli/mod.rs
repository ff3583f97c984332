//! CLI module
//!
//! Command-line interface for mini-torrent.

pub mod args;
pub mod progress;

pub use args::{CliArgs, Command};
pub use progress::ProgressDisplay;

//! Cluster configuration store
//!
//! Reads and writes the INI file that drives both workflows, preserving
//! everything the workflows don't touch.

use pest_derive::Parser;
use std::path::PathBuf;
use thiserror::Error;

pub mod document;
pub mod cluster;
pub mod store;

pub use cluster::*;
pub use document::ConfigDocument;
pub use store::{ConfigFile, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct IniParser;

/// Errors raised while loading or saving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(String),

    #[error("missing key '{key}' in section [{section}]")]
    MissingKey { section: String, key: String },

    #[error("key '{key}' in section [{section}] is not a valid number: '{value}'")]
    InvalidNumber {
        section: String,
        key: String,
        value: String,
    },
}

// src/core/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the requested configuration, reported before any scanning.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown fingerprint '{name}'; fingerprints must be in: {}", available.join(", "))]
    UnknownFingerprint { name: String, available: Vec<String> },

    #[error("invalid scheme '{0}'; expected http or https")]
    InvalidScheme(String),

    #[error("at least one fingerprint must be selected")]
    NoFingerprints,

    #[error("at least one scheme must be selected")]
    NoSchemes,

    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("invalid timeout {0}; expected a positive number of seconds")]
    InvalidTimeout(f64),

    #[error("fingerprint '{name}' has an invalid pattern: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("fingerprint '{0}' has no output mode")]
    NoOutputMode(String),

    #[error("fingerprint '{0}' is defined more than once")]
    DuplicateFingerprint(String),

    #[error("failed to read fingerprint registry {path}: {source}")]
    RegistryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed fingerprint registry {path}: {source}")]
    RegistryFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Problems opening the input list or the output destination.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("'{path}' is not a readable input file: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open output file '{path}' for appending: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An unclassified failure inside one work unit. Never escapes the unit.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("unhandled request error for {url}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("fingerprint matching for {url} did not complete")]
    Matcher {
        url: String,
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("failed to write results")]
    Sink(#[from] std::io::Error),
}

/// Any error that keeps a run from starting.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Input(#[from] InputError),
}

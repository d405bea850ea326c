// src/lib.rs

//! Scans domains over HTTP(S) across scheme and subdomain prefixes and
//! reports which content fingerprints match each resolved URL.

pub mod app;
pub mod config;
pub mod core;
pub mod logging;

pub use crate::app::{App, AppState, ShutdownController};
pub use crate::config::ScanConfig;
pub use crate::core::error::{ConfigError, Error, InputError, ScanError};
pub use crate::core::models::ScanSummary;

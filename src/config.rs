// src/config.rs

use crate::core::error::ConfigError;
use crate::core::models::Scheme;
use crate::core::registry::Registry;
use crate::core::scanner::fingerprint_scanner::MatchExecutor;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use strum::IntoEnumIterator;

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: f64 = 10.0;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(500);

/// The validated settings for one run.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub workers: NonZeroUsize,
    pub timeout: Duration,
    pub fingerprints: Vec<String>,
    pub schemes: Vec<Scheme>,
    pub subdomains: Vec<String>,
    /// Extra rules merged over the built-in registry.
    pub registry_file: Option<PathBuf>,
    pub cooldown: Duration,
    pub color: bool,
    pub executor: MatchExecutor,
}

impl ScanConfig {
    /// A config with every optional setting at its default.
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        fingerprints: Vec<String>,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            workers: NonZeroUsize::new(DEFAULT_WORKERS).unwrap_or(NonZeroUsize::MIN),
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            fingerprints,
            schemes: Scheme::iter().collect(),
            subdomains: Vec::new(),
            registry_file: None,
            cooldown: DEFAULT_COOLDOWN,
            color: true,
            executor: MatchExecutor::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Result<Self, ConfigError> {
        self.workers = NonZeroUsize::new(workers).ok_or(ConfigError::ZeroWorkers)?;
        Ok(self)
    }

    pub fn with_timeout_secs(mut self, secs: f64) -> Result<Self, ConfigError> {
        if !(secs.is_finite() && secs > 0.0) {
            return Err(ConfigError::InvalidTimeout(secs));
        }
        self.timeout =
            Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidTimeout(secs))?;
        Ok(self)
    }

    pub fn with_schemes<S: AsRef<str>>(mut self, schemes: &[S]) -> Result<Self, ConfigError> {
        let schemes = schemes
            .iter()
            .map(|s| {
                let s = s.as_ref();
                Scheme::from_str(s).map_err(|_| ConfigError::InvalidScheme(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if schemes.is_empty() {
            return Err(ConfigError::NoSchemes);
        }
        self.schemes = schemes;
        Ok(self)
    }

    pub fn with_subdomains(mut self, subdomains: Vec<String>) -> Self {
        self.subdomains = subdomains;
        self
    }

    pub fn with_registry_file(mut self, path: Option<PathBuf>) -> Self {
        self.registry_file = path;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn with_executor(mut self, executor: MatchExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// The full registry available to this run: built-ins plus the file.
    pub fn available_registry(&self) -> Result<Registry, ConfigError> {
        let registry = Registry::builtin();
        match &self.registry_file {
            Some(path) => Ok(registry.merge(Registry::load_file(path)?)),
            None => Ok(registry),
        }
    }

    /// The rules selected for this run.
    pub fn selected_registry(&self) -> Result<Registry, ConfigError> {
        self.available_registry()?.select(&self.fingerprints)
    }
}

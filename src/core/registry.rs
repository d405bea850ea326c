// src/core/registry.rs

//! The fingerprint registry: a read-only table of named content signatures.
//!
//! Rules are compiled once when the registry is built and then shared by every
//! worker without locking. A small set of illustrative rules ships with the
//! binary; deployments load their own from a JSON file and merge it over them.

use crate::core::error::ConfigError;
use crate::core::models::{OutputKind, OutputMode};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A named signature tested against fetched page content.
#[derive(Debug)]
pub struct FingerprintRule {
    pub name: String,
    pub pattern: Regex,
    /// Only kept when `mode.matches` is set; filters benign matches out.
    pub exclusion: Option<Regex>,
    pub mode: OutputMode,
}

impl FingerprintRule {
    /// Compiles a rule, rejecting bad patterns and empty output modes.
    pub fn new(
        name: &str,
        pattern: &str,
        exclusion: Option<&str>,
        mode: OutputMode,
    ) -> Result<Self, ConfigError> {
        if mode.is_empty() {
            return Err(ConfigError::NoOutputMode(name.to_string()));
        }
        let compile = |source: &str| {
            Regex::new(source).map_err(|source| ConfigError::InvalidPattern {
                name: name.to_string(),
                source,
            })
        };
        let pattern = compile(pattern)?;
        let exclusion = match exclusion {
            Some(source) if mode.matches => Some(compile(source)?),
            _ => None,
        };
        Ok(Self {
            name: name.to_string(),
            pattern,
            exclusion,
            mode,
        })
    }
}

/// One rule as written in a registry file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleEntry {
    name: String,
    pattern: String,
    #[serde(default)]
    exclude: Option<String>,
    #[serde(default = "default_output")]
    output: Vec<OutputKind>,
}

fn default_output() -> Vec<OutputKind> {
    vec![OutputKind::Url]
}

/// A built-in rule definition, compiled into the default registry.
struct BuiltinRule {
    name: &'static str,
    pattern: &'static str,
    exclude: Option<&'static str>,
    mode: OutputMode,
}

static BUILTIN_RULES: &[BuiltinRule] = &[
    BuiltinRule {
        name: "wordpress",
        pattern: r"/wp-content/|/wp-includes/",
        exclude: None,
        mode: OutputMode::URL,
    },
    BuiltinRule {
        name: "joomla",
        pattern: r#"<meta name="generator" content="Joomla!"#,
        exclude: None,
        mode: OutputMode::URL,
    },
    BuiltinRule {
        name: "drupal",
        pattern: r"Drupal\.settings|/sites/default/files/",
        exclude: None,
        mode: OutputMode::URL,
    },
    BuiltinRule {
        name: "apache-default-page",
        pattern: r"Apache2 (?:Ubuntu|Debian) Default Page|<h1>It works!</h1>",
        exclude: None,
        mode: OutputMode::URL,
    },
    BuiltinRule {
        name: "directory-listing",
        pattern: r"<title>Index of /",
        exclude: None,
        mode: OutputMode::URL,
    },
    BuiltinRule {
        name: "phpinfo",
        pattern: r"<title>phpinfo\(\)</title>",
        exclude: None,
        mode: OutputMode::URL,
    },
    BuiltinRule {
        name: "jquery-version",
        pattern: r"jquery[.-]?(\d+\.\d+(?:\.\d+)?)(?:\.min)?\.js",
        exclude: None,
        mode: OutputMode::MATCHES,
    },
    BuiltinRule {
        name: "emails",
        pattern: r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        exclude: Some(r"(?i)@(?:example\.(?:com|net|org)|sentry\.io)$|\.(?:png|jpe?g|gif|svg|webp)$"),
        mode: OutputMode::MATCHES,
    },
    BuiltinRule {
        name: "aws-access-key",
        pattern: r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b",
        exclude: None,
        mode: OutputMode::BOTH,
    },
];

static BUILTIN: Lazy<Registry> = Lazy::new(|| {
    let rules = BUILTIN_RULES
        .iter()
        .map(|r| FingerprintRule::new(r.name, r.pattern, r.exclude, r.mode))
        .collect::<Result<Vec<_>, _>>()
        .expect("built-in fingerprint patterns are valid");
    Registry::from_rules(rules).expect("built-in fingerprint names are unique")
});

/// Normalizes a fingerprint name for lookup: case-insensitive, `_` == `-`.
fn lookup_key(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('_', "-")
}

/// An ordered, immutable collection of fingerprint rules.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    rules: Vec<Arc<FingerprintRule>>,
}

impl Registry {
    /// Builds a registry, rejecting duplicate names.
    pub fn from_rules(rules: Vec<FingerprintRule>) -> Result<Self, ConfigError> {
        let mut registry = Registry::default();
        for rule in rules {
            if registry.get(&rule.name).is_some() {
                return Err(ConfigError::DuplicateFingerprint(rule.name));
            }
            registry.rules.push(Arc::new(rule));
        }
        Ok(registry)
    }

    /// The rules that ship with the binary.
    pub fn builtin() -> Self {
        Registry::clone(&BUILTIN)
    }

    /// Parses a JSON registry document (an array of rule objects).
    pub fn from_json(path: &Path, json: &str) -> Result<Self, ConfigError> {
        let entries: Vec<RuleEntry> =
            serde_json::from_str(json).map_err(|source| ConfigError::RegistryFormat {
                path: path.to_path_buf(),
                source,
            })?;
        let rules = entries
            .into_iter()
            .map(|entry| {
                let mode: OutputMode = entry.output.into_iter().collect();
                FingerprintRule::new(&entry.name, &entry.pattern, entry.exclude.as_deref(), mode)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_rules(rules)
    }

    /// Reads and parses a registry file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::RegistryIo {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_json(path, &json)?;
        info!(path = %path.display(), rules = registry.len(), "Loaded fingerprint registry.");
        Ok(registry)
    }

    /// Overlays `other` on `self`: same-named rules are replaced in place,
    /// new ones are appended.
    pub fn merge(mut self, other: Registry) -> Self {
        for rule in other.rules {
            let key = lookup_key(&rule.name);
            match self.rules.iter_mut().find(|r| lookup_key(&r.name) == key) {
                Some(slot) => {
                    debug!(fingerprint = %rule.name, "Overriding built-in fingerprint.");
                    *slot = rule;
                }
                None => self.rules.push(rule),
            }
        }
        self
    }

    /// Narrows the registry to the named rules, in the order requested.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, ConfigError> {
        if names.is_empty() {
            return Err(ConfigError::NoFingerprints);
        }
        let mut selected = Registry::default();
        for name in names {
            let name = name.as_ref();
            let rule = self.get(name).ok_or_else(|| ConfigError::UnknownFingerprint {
                name: name.to_string(),
                available: self.names().map(str::to_string).collect(),
            })?;
            if selected.get(&rule.name).is_none() {
                selected.rules.push(Arc::clone(rule));
            }
        }
        Ok(selected)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<FingerprintRule>> {
        let key = lookup_key(name);
        self.rules.iter().find(|r| lookup_key(&r.name) == key)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FingerprintRule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_compile() {
        let registry = Registry::builtin();
        assert_eq!(registry.len(), BUILTIN_RULES.len());
        assert!(registry.get("wordpress").is_some());
    }

    #[test]
    fn lookup_ignores_case_and_separator_style() {
        let registry = Registry::builtin();
        let selected = registry.select(&["JQUERY_VERSION", "aws-access-key"]).unwrap();
        let names: Vec<_> = selected.names().collect();
        assert_eq!(names, vec!["jquery-version", "aws-access-key"]);
    }

    #[test]
    fn unknown_name_lists_valid_ones() {
        let err = Registry::builtin().select(&["nope"]).unwrap_err();
        match err {
            ConfigError::UnknownFingerprint { name, available } => {
                assert_eq!(name, "nope");
                assert!(available.contains(&"emails".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_selection_is_rejected() {
        let names: [&str; 0] = [];
        assert!(matches!(
            Registry::builtin().select(&names),
            Err(ConfigError::NoFingerprints)
        ));
    }

    #[test]
    fn exclusion_dropped_for_url_only_rules() {
        let rule = FingerprintRule::new("x", "a", Some("b"), OutputMode::URL).unwrap();
        assert!(rule.exclusion.is_none());
        let rule = FingerprintRule::new("x", "a", Some("b"), OutputMode::MATCHES).unwrap();
        assert!(rule.exclusion.is_some());
        let rule = FingerprintRule::new("x", "a", Some("b"), OutputMode::BOTH).unwrap();
        assert!(rule.exclusion.is_some());
    }

    #[test]
    fn json_registry_parses_modes_and_defaults() {
        let json = r#"[
            {"name": "foo", "pattern": "powered by Foo"},
            {"name": "tokens", "pattern": "tok_[a-z]+", "exclude": "tok_test", "output": ["url", "matches"]}
        ]"#;
        let registry = Registry::from_json(Path::new("rules.json"), json).unwrap();
        let foo = registry.get("foo").unwrap();
        assert_eq!(foo.mode, OutputMode::URL);
        let tokens = registry.get("tokens").unwrap();
        assert_eq!(tokens.mode, OutputMode::BOTH);
        assert!(tokens.exclusion.is_some());
    }

    #[test]
    fn json_registry_rejects_bad_rules() {
        let path = Path::new("rules.json");
        assert!(matches!(
            Registry::from_json(path, r#"[{"name": "x", "pattern": "("}]"#),
            Err(ConfigError::InvalidPattern { .. })
        ));
        assert!(matches!(
            Registry::from_json(path, r#"[{"name": "x", "pattern": "a", "output": []}]"#),
            Err(ConfigError::NoOutputMode(_))
        ));
        assert!(matches!(
            Registry::from_json(
                path,
                r#"[{"name": "x", "pattern": "a"}, {"name": "X", "pattern": "b"}]"#
            ),
            Err(ConfigError::DuplicateFingerprint(_))
        ));
        assert!(matches!(
            Registry::from_json(path, "{}"),
            Err(ConfigError::RegistryFormat { .. })
        ));
    }

    #[test]
    fn merge_overrides_by_name_and_appends_new() {
        let custom = Registry::from_json(
            Path::new("rules.json"),
            r#"[{"name": "WordPress", "pattern": "wp-json"}, {"name": "foo", "pattern": "Foo"}]"#,
        )
        .unwrap();
        let merged = Registry::builtin().merge(custom);
        assert_eq!(merged.len(), BUILTIN_RULES.len() + 1);
        assert_eq!(merged.get("wordpress").unwrap().pattern.as_str(), "wp-json");
        assert_eq!(merged.names().last(), Some("foo"));
    }
}

// src/core/scanner/fingerprint_scanner.rs

use crate::core::models::MatchRecord;
use crate::core::registry::{FingerprintRule, Registry};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::{JoinError, spawn_blocking};
use tracing::debug;

/// Where fingerprint matching runs relative to the network tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchExecutor {
    /// On the calling task. Fine for small bodies and tests.
    Inline,
    /// On tokio's blocking pool, so large bodies never stall the I/O workers.
    #[default]
    Blocking,
}

impl MatchExecutor {
    /// Runs [`match_content`] on this executor.
    pub async fn run(
        self,
        registry: Arc<Registry>,
        url: String,
        body: String,
    ) -> Result<Vec<MatchRecord>, JoinError> {
        match self {
            MatchExecutor::Inline => Ok(match_content(&url, &body, &registry)),
            MatchExecutor::Blocking => {
                spawn_blocking(move || match_content(&url, &body, &registry)).await
            }
        }
    }
}

/// Applies every rule in registry order to `body`.
///
/// A rule reporting in both modes yields a single record: its matched set when
/// non-empty, otherwise an empty set if the URL-mode search hit.
pub fn match_content(url: &str, body: &str, registry: &Registry) -> Vec<MatchRecord> {
    let mut records = Vec::new();
    for rule in registry.iter() {
        let url_hit = rule.mode.url && rule.pattern.is_match(body);
        let matched_strings = if rule.mode.matches {
            collect_matches(rule, body)
        } else {
            BTreeSet::new()
        };

        if url_hit || !matched_strings.is_empty() {
            debug!(url, fingerprint = %rule.name, matches = matched_strings.len(), "Rule matched.");
            records.push(MatchRecord {
                url: url.to_string(),
                fingerprint_name: rule.name.clone(),
                matched_strings,
            });
        }
    }
    records
}

/// Collects the distinct, non-excluded matches of a rule.
fn collect_matches(rule: &FingerprintRule, body: &str) -> BTreeSet<String> {
    find_all(&rule.pattern, body)
        .filter(|m| !is_excluded(rule.exclusion.as_ref(), m))
        .map(str::to_string)
        .collect()
}

/// Non-overlapping matches. When the pattern has capture groups the first
/// group's text is reported instead of the whole match.
fn find_all<'a>(re: &'a Regex, text: &'a str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
    if re.captures_len() > 1 {
        Box::new(
            re.captures_iter(text)
                .filter_map(|caps| caps.get(1).map(|m| m.as_str())),
        )
    } else {
        Box::new(re.find_iter(text).map(|m| m.as_str()))
    }
}

fn is_excluded(exclusion: Option<&Regex>, matched: &str) -> bool {
    exclusion.is_some_and(|re| re.is_match(matched))
}

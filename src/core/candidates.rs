// src/core/candidates.rs

//! Turns a raw input line into the ordered list of URLs to attempt.

use crate::core::models::{CandidateUrl, Scheme};
use std::net::IpAddr;
use url::{Host, Url};

/// The pieces of an input line after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTarget {
    /// Labels in front of the registrable domain (empty when none).
    pub subdomain: String,
    /// `domain.suffix`, an IP literal, or a bare name without a known suffix.
    pub registrable_domain: String,
    /// The recognised public suffix, if any. IP literals report `None` here
    /// but still count as fully qualified.
    pub suffix: Option<String>,
    pub port: Option<u16>,
    pub is_ip: bool,
}

impl ParsedTarget {
    /// Whether the host already names a concrete, fully-qualified target.
    pub fn is_qualified(&self) -> bool {
        self.is_ip || self.suffix.is_some()
    }
}

/// Best-effort parse of a domain or URL line.
///
/// Scheme, credentials, path, query and fragment are discarded. Returns
/// `None` for lines with no usable host.
pub fn parse_target(line: &str) -> Option<ParsedTarget> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let with_scheme = if line.contains("://") {
        line.to_string()
    } else {
        format!("http://{}", line)
    };
    let url = Url::parse(&with_scheme).ok()?;
    // `port()` drops the scheme default, `port_or_known_default` would not.
    let port = url.port();

    match url.host()? {
        Host::Ipv4(ip) => Some(ip_target(IpAddr::V4(ip), port)),
        Host::Ipv6(ip) => Some(ip_target(IpAddr::V6(ip), port)),
        Host::Domain(host) => {
            let host = host.trim_end_matches('.').to_ascii_lowercase();
            if host.is_empty() {
                return None;
            }
            Some(split_domain(&host, port))
        }
    }
}

fn ip_target(ip: IpAddr, port: Option<u16>) -> ParsedTarget {
    let registrable_domain = match ip {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => format!("[{}]", ip),
    };
    ParsedTarget {
        subdomain: String::new(),
        registrable_domain,
        suffix: None,
        port,
        is_ip: true,
    }
}

fn split_domain(host: &str, port: Option<u16>) -> ParsedTarget {
    // The list's implicit `*` rule gives every host a suffix, so only an
    // explicitly listed one makes the host qualified.
    let registrable = psl::domain(host.as_bytes())
        .filter(|domain| domain.suffix().is_known())
        .and_then(|domain| {
            let registrable = std::str::from_utf8(domain.as_bytes()).ok()?;
            let suffix = std::str::from_utf8(domain.suffix().as_bytes()).ok()?;
            Some((registrable.to_string(), suffix.to_string()))
        });

    match registrable {
        Some((registrable_domain, suffix)) => {
            let subdomain = host
                .strip_suffix(registrable_domain.as_str())
                .map(|rest| rest.trim_end_matches('.'))
                .unwrap_or_default()
                .to_string();
            ParsedTarget {
                subdomain,
                registrable_domain,
                suffix: Some(suffix),
                port,
                is_ip: false,
            }
        }
        None => ParsedTarget {
            subdomain: String::new(),
            registrable_domain: host.to_string(),
            suffix: None,
            port,
            is_ip: false,
        },
    }
}

/// Removes duplicates while keeping first-seen order.
fn distinct<T: PartialEq + Clone>(items: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// The subdomain set actually combined with bare names: the empty form first,
/// then the configured ones in order, without duplicates.
pub fn effective_subdomains(subdomains: &[String]) -> Vec<String> {
    let mut all = vec![String::new()];
    all.extend(
        subdomains
            .iter()
            .map(|s| s.trim().trim_matches('.').to_ascii_lowercase()),
    );
    distinct(&all)
}

/// Expands a line into its candidate URLs, scheme-major and subdomain-minor.
///
/// Qualified hosts get one candidate per scheme; bare names are combined with
/// every subdomain as well. Unparsable lines yield nothing.
pub fn expand(line: &str, schemes: &[Scheme], subdomains: &[String]) -> Vec<CandidateUrl> {
    let Some(target) = parse_target(line) else {
        return Vec::new();
    };
    let schemes = distinct(schemes);
    let subdomains = if target.is_qualified() {
        vec![String::new()]
    } else {
        effective_subdomains(subdomains)
    };

    let mut candidates = Vec::with_capacity(schemes.len() * subdomains.len());
    for scheme in &schemes {
        for subdomain in &subdomains {
            candidates.push(CandidateUrl {
                scheme: *scheme,
                subdomain: subdomain.clone(),
                registrable_domain: target.registrable_domain.clone(),
                port: target.port,
            });
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: &[Scheme] = &[Scheme::Http, Scheme::Https];

    fn urls(candidates: &[CandidateUrl]) -> Vec<String> {
        candidates.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn strips_scheme_path_and_subdomain() {
        let target = parse_target("https://Shop.Example.co.uk/login?next=/").unwrap();
        assert_eq!(target.registrable_domain, "example.co.uk");
        assert_eq!(target.subdomain, "shop");
        assert_eq!(target.suffix.as_deref(), Some("co.uk"));
    }

    #[test]
    fn qualified_host_gets_one_candidate_per_scheme() {
        let subs = vec!["www".to_string(), "dev".to_string()];
        let candidates = expand("www.example.com", BOTH, &subs);
        assert_eq!(urls(&candidates), vec!["http://example.com", "https://example.com"]);
    }

    #[test]
    fn bare_name_combines_schemes_and_subdomains() {
        let subs = vec!["www".to_string(), "".to_string(), "www".to_string()];
        let candidates = expand("intranet", BOTH, &subs);
        assert_eq!(
            urls(&candidates),
            vec![
                "http://intranet",
                "http://www.intranet",
                "https://intranet",
                "https://www.intranet",
            ]
        );
    }

    #[test]
    fn candidate_count_matches_set_sizes() {
        let subs: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        for schemes in [&[Scheme::Https][..], BOTH] {
            assert_eq!(expand("example.org", schemes, &subs).len(), schemes.len());
            assert_eq!(expand("fileserver", schemes, &subs).len(), schemes.len() * 4);
        }
    }

    #[test]
    fn duplicate_schemes_collapse() {
        let schemes = [Scheme::Https, Scheme::Http, Scheme::Https];
        assert_eq!(
            urls(&expand("example.com", &schemes, &[])),
            vec!["https://example.com", "http://example.com"]
        );
    }

    #[test]
    fn ip_literals_keep_port_and_skip_subdomains() {
        let subs = vec!["www".to_string()];
        let candidates = expand("10.0.0.5:8080/admin", BOTH, &subs);
        assert_eq!(urls(&candidates), vec!["http://10.0.0.5:8080", "https://10.0.0.5:8080"]);
    }

    #[test]
    fn any_listed_suffix_is_recognised() {
        let subs = vec!["www".to_string()];
        let candidates = expand("www.example.ninja", BOTH, &subs);
        assert_eq!(urls(&candidates), vec!["http://example.ninja", "https://example.ninja"]);
        for line in ["example.fm", "example.sh", "shop.example.nu", "blog.example.com.au"] {
            assert!(parse_target(line).unwrap().is_qualified(), "{line}");
            assert_eq!(expand(line, BOTH, &subs).len(), 2, "{line}");
        }
        let target = parse_target("shop.example.nu").unwrap();
        assert_eq!(target.subdomain, "shop");
        assert_eq!(target.registrable_domain, "example.nu");
    }

    #[test]
    fn unlisted_suffix_is_a_bare_name() {
        let target = parse_target("printer.corp-internal").unwrap();
        assert!(!target.is_qualified());
        assert_eq!(target.registrable_domain, "printer.corp-internal");
    }

    #[test]
    fn suffix_only_host_is_treated_as_bare() {
        let target = parse_target("com").unwrap();
        assert!(!target.is_qualified());
        assert_eq!(target.registrable_domain, "com");
    }

    #[test]
    fn unparsable_lines_yield_nothing() {
        assert!(expand("", BOTH, &[]).is_empty());
        assert!(expand("   ", BOTH, &[]).is_empty());
        assert!(expand("http://", BOTH, &[]).is_empty());
    }
}

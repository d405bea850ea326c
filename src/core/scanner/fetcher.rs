// src/core/scanner/fetcher.rs

use crate::core::error::ConfigError;
use crate::core::models::{FetchOutcome, SkipReason};
use encoding_rs::{Encoding, UTF_8};
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{LookupIpStrategy, ResolverConfig, ResolverOpts};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, StatusCode};
use std::borrow::Cow;
use std::error::Error as StdError;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sent with every request.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.1; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/40.0.2214.85 Safari/537.36";

/// Resolves names to A records only.
struct Ipv4Resolver {
    resolver: Arc<TokioAsyncResolver>,
}

impl Ipv4Resolver {
    fn new() -> Self {
        let (config, mut opts) =
            hickory_resolver::system_conf::read_system_conf().unwrap_or_else(|e| {
                warn!(error = %e, "Could not read system resolver configuration, using defaults.");
                (ResolverConfig::default(), ResolverOpts::default())
            });
        opts.ip_strategy = LookupIpStrategy::Ipv4Only;
        Self {
            resolver: Arc::new(TokioAsyncResolver::tokio(config, opts)),
        }
    }
}

impl Resolve for Ipv4Resolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = Arc::clone(&self.resolver);
        Box::pin(async move {
            let lookup = resolver.lookup_ip(name.as_str()).await?;
            let addrs: Vec<SocketAddr> = lookup
                .into_iter()
                .filter(IpAddr::is_ipv4)
                .map(|ip| SocketAddr::new(ip, 0))
                .collect();
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn StdError + Send + Sync>>(addrs)
        })
    }
}

/// Performs single bounded GETs and classifies every failure.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Builds the shared client: fixed user agent, IPv4 only, and no
    /// certificate validation since targets are routinely self-signed.
    pub fn new() -> Result<Self, ConfigError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .use_rustls_tls()
            .danger_accept_invalid_certs(true)
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .dns_resolver(Arc::new(Ipv4Resolver::new()))
            .build()
            .map_err(ConfigError::HttpClient)?;
        Ok(Self { client })
    }

    /// Fetches `url`. The timeout covers connecting through reading the body.
    pub async fn fetch(&self, url: &str, timeout: Duration) -> FetchOutcome {
        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => return classify(e),
        };

        let status = response.status();
        if status != StatusCode::OK {
            debug!(url, %status, "Non-200 response, skipping.");
            return FetchOutcome::Skip(SkipReason::Status(status));
        }

        let final_url = response.url().clone();
        let charset = charset_of(response.headers());
        let body = match response.bytes().await {
            Ok(bytes) => decode_body(&bytes, charset.as_deref()),
            Err(e) if e.is_decode() => {
                debug!(url, error = %e, "Response body could not be decoded.");
                None
            }
            Err(e) => return classify(e),
        };
        if body.is_none() {
            debug!(url, charset = ?charset, "Discarding undecodable body.");
        }

        FetchOutcome::Success {
            final_url,
            status,
            body,
        }
    }
}

/// Maps a request error onto skip / abandon / fatal.
fn classify(err: reqwest::Error) -> FetchOutcome {
    if err.is_builder() {
        return FetchOutcome::Abandon(format!("invalid request: {}", describe(&err)));
    }
    if err.is_timeout() {
        return FetchOutcome::Skip(SkipReason::Timeout);
    }
    match io_error_kind(&err) {
        Some(kind) if is_transient_io(kind) => {
            return FetchOutcome::Skip(SkipReason::Transient(describe(&err)));
        }
        Some(kind) if is_unreachable_io(kind) => return FetchOutcome::Abandon(describe(&err)),
        _ => {}
    }
    if err.is_connect() {
        return FetchOutcome::Abandon(describe(&err));
    }
    if err.is_request() || err.is_body() || err.is_decode() || err.is_redirect() {
        return FetchOutcome::Skip(SkipReason::Transient(describe(&err)));
    }
    FetchOutcome::Fatal(err)
}

fn io_error_kind(err: &reqwest::Error) -> Option<ErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = cause.source();
    }
    None
}

fn is_transient_io(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::TimedOut
    )
}

fn is_unreachable_io(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::AddrNotAvailable
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::NotFound
    )
}

/// The error and its whole source chain on one line.
fn describe(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// The lowercased `charset` parameter of the content type, if any.
fn charset_of(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    })
}

/// Decodes `bytes` with the declared charset, UTF-8 when none is given.
///
/// Labels are resolved the way browsers resolve them. Malformed input or an
/// unknown label yields `None`; nothing is replaced.
fn decode_body(bytes: &[u8], charset: Option<&str>) -> Option<String> {
    let encoding = match charset {
        Some(label) => Encoding::for_label(label.as_bytes())?,
        None => UTF_8,
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(Cow::into_owned)
}

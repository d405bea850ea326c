// src/core/scanner/mod.rs

// The scanning side of a run: fetching candidates, matching their content,
// and the per-line work unit that ties the two together.
pub mod fetcher;
pub mod fingerprint_scanner;

use crate::core::candidates::expand;
use crate::core::error::ScanError;
use crate::core::models::{CandidateUrl, FetchOutcome, LineOutcome, MatchRecord, Scheme};
use crate::core::registry::Registry;
use crate::core::sink::ResultSink;
use self::fetcher::Fetcher;
use self::fingerprint_scanner::MatchExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Everything a work unit needs, built once per run and shared read-only.
pub struct ScanContext {
    pub registry: Arc<Registry>,
    pub schemes: Vec<Scheme>,
    pub subdomains: Vec<String>,
    pub timeout: Duration,
    /// Pause after a line finishes normally, before the worker takes another.
    pub cooldown: Duration,
    pub executor: MatchExecutor,
    pub fetcher: Fetcher,
    pub sink: Arc<ResultSink>,
}

/// What to do after one candidate attempt.
enum Step {
    Next,
    Stop(LineOutcome),
}

/// Formats a response URL the way it is reported: a bare root path has its
/// trailing slash removed.
pub fn display_url(url: &Url) -> String {
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        url.as_str().trim_end_matches('/').to_string()
    } else {
        url.to_string()
    }
}

/// Processes one input line: tries its candidates in order until one yields
/// content, an abandon-class failure ends the line, or every candidate has
/// been skipped.
pub async fn scan_line(ctx: &ScanContext, line: &str, cancel: &CancellationToken) -> LineOutcome {
    let candidates = expand(line, &ctx.schemes, &ctx.subdomains);
    if candidates.is_empty() {
        warn!(line, "Could not parse a host from input line.");
        return LineOutcome::Unparsable;
    }
    scan_candidates(ctx, &candidates, cancel).await
}

/// The candidate loop behind [`scan_line`].
///
/// A status line is written after every attempt whatever its outcome.
/// Cancellation is checked between attempts.
async fn scan_candidates(
    ctx: &ScanContext,
    candidates: &[CandidateUrl],
    cancel: &CancellationToken,
) -> LineOutcome {
    let mut outcome = LineOutcome::Exhausted;
    for candidate in candidates {
        if cancel.is_cancelled() {
            return LineOutcome::Cancelled;
        }
        let uri = candidate.to_string();
        let (records, step) = attempt(ctx, &uri).await;

        if let Err(e) = ctx.sink.report_attempt(&uri, &records) {
            error!(url = %uri, error = %e, "Failed to write attempt results.");
            report_fatal(ctx, &ScanError::Sink(e));
            return LineOutcome::Failed;
        }
        if let Step::Stop(stop) = step {
            outcome = stop;
            break;
        }
    }

    if matches!(outcome, LineOutcome::Scanned { .. } | LineOutcome::Exhausted)
        && !ctx.cooldown.is_zero()
    {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(ctx.cooldown) => {}
        }
    }
    outcome
}

/// One candidate: fetch, classify, and match content when there is some.
async fn attempt(ctx: &ScanContext, uri: &str) -> (Vec<MatchRecord>, Step) {
    match ctx.fetcher.fetch(uri, ctx.timeout).await {
        FetchOutcome::Success {
            final_url,
            status,
            body: Some(body),
        } => {
            let url = display_url(&final_url);
            debug!(
                attempted = uri,
                resolved = %url,
                %status,
                bytes = body.len(),
                "Scanning content."
            );
            match ctx
                .executor
                .run(Arc::clone(&ctx.registry), url.clone(), body)
                .await
            {
                Ok(records) => {
                    let matched = !records.is_empty();
                    if matched {
                        info!(url = %url, hits = records.len(), "Fingerprints matched.");
                    }
                    (records, Step::Stop(LineOutcome::Scanned { matched }))
                }
                Err(source) => {
                    report_fatal(ctx, &ScanError::Matcher { url, source });
                    (Vec::new(), Step::Stop(LineOutcome::Failed))
                }
            }
        }
        FetchOutcome::Success { status, body: None, .. } => {
            debug!(url = uri, %status, "No usable content, trying next candidate.");
            (Vec::new(), Step::Next)
        }
        FetchOutcome::Skip(reason) => {
            debug!(url = uri, %reason, "Skipping candidate.");
            (Vec::new(), Step::Next)
        }
        FetchOutcome::Abandon(reason) => {
            debug!(url = uri, %reason, "Host unreachable, abandoning line.");
            (Vec::new(), Step::Stop(LineOutcome::Abandoned))
        }
        FetchOutcome::Fatal(source) => {
            let err = ScanError::Request {
                url: uri.to_string(),
                source,
            };
            report_fatal(ctx, &err);
            (Vec::new(), Step::Stop(LineOutcome::Failed))
        }
    }
}

/// The error followed by every cause in its source chain, one per line.
fn diagnostic_detail(err: &ScanError) -> String {
    let mut detail = format!("Unhandled error: {err}");
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        detail.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    detail
}

/// Logs an unclassified failure with its full source chain and echoes it.
fn report_fatal(ctx: &ScanContext, err: &ScanError) {
    let detail = diagnostic_detail(err);
    error!(error = ?err, "{}", detail);
    if let Err(e) = ctx.sink.diagnostic(&detail) {
        error!(error = %e, "Failed to write diagnostic.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::OutputMode;
    use crate::core::registry::FingerprintRule;
    use crate::core::sink::tests::SharedBuf;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(out: &SharedBuf, console: &SharedBuf) -> ScanContext {
        let registry = Registry::from_rules(vec![
            FingerprintRule::new("foo-fingerprint", "powered by Foo", None, OutputMode::URL).unwrap(),
        ])
        .unwrap();
        ScanContext {
            registry: Arc::new(registry),
            schemes: vec![Scheme::Http],
            subdomains: Vec::new(),
            timeout: Duration::from_secs(5),
            cooldown: Duration::ZERO,
            executor: MatchExecutor::Inline,
            fetcher: Fetcher::new().unwrap(),
            sink: Arc::new(ResultSink::new(out.clone(), console.clone(), false)),
        }
    }

    fn host_of(server: &MockServer) -> String {
        server.uri().trim_start_matches("http://").to_string()
    }

    #[test]
    fn display_url_trims_only_bare_root() {
        let root = Url::parse("https://example.com/").unwrap();
        assert_eq!(display_url(&root), "https://example.com");
        let page = Url::parse("https://example.com/app/").unwrap();
        assert_eq!(display_url(&page), "https://example.com/app/");
        let query = Url::parse("https://example.com/?a=1").unwrap();
        assert_eq!(display_url(&query), "https://example.com/?a=1");
    }

    #[tokio::test]
    async fn matching_content_is_written_and_stops_the_line() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>powered by Foo</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let (out, console) = (SharedBuf::default(), SharedBuf::default());
        let ctx = context(&out, &console);
        let outcome = scan_line(&ctx, &host_of(&server), &CancellationToken::new()).await;

        assert_eq!(outcome, LineOutcome::Scanned { matched: true });
        assert_eq!(out.contents(), format!("{}:foo-fingerprint\n", server.uri()));
        assert_eq!(console.contents(), format!("[+] {}\n", server.uri()));
    }

    #[tokio::test]
    async fn non_200_writes_status_but_no_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("powered by Foo"))
            .mount(&server)
            .await;

        let (out, console) = (SharedBuf::default(), SharedBuf::default());
        let ctx = context(&out, &console);
        let outcome = scan_line(&ctx, &host_of(&server), &CancellationToken::new()).await;

        assert_eq!(outcome, LineOutcome::Exhausted);
        assert!(out.contents().is_empty());
        assert_eq!(console.contents(), format!("[-] {}\n", server.uri()));
    }

    #[tokio::test]
    async fn refused_connection_abandons_after_one_status_line() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let (out, console) = (SharedBuf::default(), SharedBuf::default());
        let mut ctx = context(&out, &console);
        ctx.schemes = vec![Scheme::Http, Scheme::Https];

        let line = format!("127.0.0.1:{port}");
        let outcome = scan_line(&ctx, &line, &CancellationToken::new()).await;

        assert_eq!(outcome, LineOutcome::Abandoned);
        assert_eq!(console.contents(), format!("[-] http://127.0.0.1:{port}\n"));
    }

    fn local_candidate(server: &MockServer) -> CandidateUrl {
        CandidateUrl {
            scheme: Scheme::Http,
            subdomain: String::new(),
            registrable_domain: "127.0.0.1".into(),
            port: Some(server.address().port()),
        }
    }

    #[tokio::test]
    async fn skipped_candidates_fall_through_to_the_next() {
        let slow = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .expect(1)
            .mount(&slow)
            .await;
        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("powered by Foo"))
            .expect(1)
            .mount(&broken)
            .await;
        let good = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("powered by Foo"))
            .expect(1)
            .mount(&good)
            .await;

        let (out, console) = (SharedBuf::default(), SharedBuf::default());
        let mut ctx = context(&out, &console);
        ctx.timeout = Duration::from_millis(200);
        let candidates = [local_candidate(&slow), local_candidate(&broken), local_candidate(&good)];

        let outcome = scan_candidates(&ctx, &candidates, &CancellationToken::new()).await;

        assert_eq!(outcome, LineOutcome::Scanned { matched: true });
        assert_eq!(
            console.contents(),
            format!("[-] {}\n[-] {}\n[+] {}\n", slow.uri(), broken.uri(), good.uri())
        );
        assert_eq!(out.contents(), format!("{}:foo-fingerprint\n", good.uri()));
    }

    #[tokio::test]
    async fn diagnostic_names_each_cause_once() {
        let handle: tokio::task::JoinHandle<()> = tokio::spawn(async { panic!("matcher blew up") });
        let join_error = handle.await.unwrap_err();
        let err = ScanError::Matcher {
            url: "http://a.test".into(),
            source: join_error,
        };
        let detail = diagnostic_detail(&err);
        assert!(detail.starts_with("Unhandled error: fingerprint matching for http://a.test"));
        assert_eq!(detail.matches("matcher blew up").count(), 1, "{detail}");
    }

    #[tokio::test]
    async fn unparsable_line_is_a_no_op() {
        let (out, console) = (SharedBuf::default(), SharedBuf::default());
        let ctx = context(&out, &console);
        let outcome = scan_line(&ctx, "http://", &CancellationToken::new()).await;
        assert_eq!(outcome, LineOutcome::Unparsable);
        assert!(console.contents().is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_attempt() {
        let (out, console) = (SharedBuf::default(), SharedBuf::default());
        let ctx = context(&out, &console);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = scan_line(&ctx, "example.com", &cancel).await;
        assert_eq!(outcome, LineOutcome::Cancelled);
        assert!(console.contents().is_empty());
    }
}

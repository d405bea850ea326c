// src/app.rs

use crate::config::ScanConfig;
use crate::core::error::{Error, InputError};
use crate::core::models::{LineOutcome, ScanSummary};
use crate::core::pool::WorkerPool;
use crate::core::scanner::fetcher::Fetcher;
use crate::core::scanner::{ScanContext, scan_line};
use crate::core::sink::ResultSink;
use std::fs::File;
use std::future::Future;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a run. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AppState {
    Running,
    ShuttingDown,
    Stopped,
}

/// Owns the run's cancellation token and its lifecycle state.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    state: Arc<watch::Sender<AppState>>,
    token: CancellationToken,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AppState::Running);
        Self {
            state: Arc::new(state),
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn state(&self) -> AppState {
        *self.state.borrow()
    }

    /// `Running -> ShuttingDown`, cancelling all work. Returns whether this
    /// call made the transition.
    pub fn request_shutdown(&self) -> bool {
        let transitioned = self.state.send_if_modified(|state| {
            if *state == AppState::Running {
                *state = AppState::ShuttingDown;
                true
            } else {
                false
            }
        });
        if transitioned {
            self.token.cancel();
        }
        transitioned
    }

    /// Final transition, once every worker has released its resources.
    fn mark_stopped(&self) {
        self.state.send_modify(|state| *state = AppState::Stopped);
    }
}

/// Per-outcome counters shared by all work units.
#[derive(Default)]
struct ScanStats {
    matched: AtomicUsize,
    scanned_without_match: AtomicUsize,
    exhausted: AtomicUsize,
    abandoned: AtomicUsize,
    failed: AtomicUsize,
    unparsable: AtomicUsize,
    cancelled: AtomicUsize,
}

impl ScanStats {
    fn record(&self, outcome: LineOutcome) {
        let counter = match outcome {
            LineOutcome::Scanned { matched: true } => &self.matched,
            LineOutcome::Scanned { matched: false } => &self.scanned_without_match,
            LineOutcome::Exhausted => &self.exhausted,
            LineOutcome::Abandoned => &self.abandoned,
            LineOutcome::Failed => &self.failed,
            LineOutcome::Unparsable => &self.unparsable,
            LineOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Lines worth scanning from the input: trimmed, without blanks or `#` comments.
///
/// Bytes that are not UTF-8 are replaced rather than dropping the line. Only
/// a read error stops the input.
fn input_lines<R: BufRead>(reader: R) -> impl Iterator<Item = String> {
    reader
        .split(b'\n')
        .map_while(|line| {
            line.map_err(|e| warn!(error = %e, "Stopped reading input."))
                .ok()
        })
        .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

pub struct App {
    config: ScanConfig,
    shutdown: ShutdownController,
}

impl App {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            shutdown: ShutdownController::new(),
        }
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Runs the scan to completion without listening for interrupts.
    pub async fn run(&self) -> Result<ScanSummary, Error> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the scan, shutting down early if `interrupt` resolves first.
    ///
    /// Configuration and input problems are returned before any line is
    /// scanned. Failures inside a line never surface here.
    pub async fn run_until<S>(&self, interrupt: S) -> Result<ScanSummary, Error>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let registry = self.config.selected_registry()?;
        let input = File::open(&self.config.input).map_err(|source| InputError::Input {
            path: self.config.input.clone(),
            source,
        })?;
        let sink = Arc::new(ResultSink::open(&self.config.output, self.config.color)?);
        let fetcher = Fetcher::new()?;

        let ctx = Arc::new(ScanContext {
            registry: Arc::new(registry),
            schemes: self.config.schemes.clone(),
            subdomains: self.config.subdomains.clone(),
            timeout: self.config.timeout,
            cooldown: self.config.cooldown,
            executor: self.config.executor,
            fetcher,
            sink: Arc::clone(&sink),
        });

        info!(
            input = %self.config.input.display(),
            output = %self.config.output.display(),
            workers = self.config.workers.get(),
            fingerprints = ?ctx.registry.names().collect::<Vec<_>>(),
            "Starting scan."
        );

        let watcher = {
            let controller = self.shutdown.clone();
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                interrupt.await;
                if controller.request_shutdown() {
                    info!("Interrupt received, shutting down.");
                    let _ = sink.notice("\nShutting down");
                }
            })
        };

        // Shared with the pool so the backlog left by an interrupt can be counted.
        let backlog = Arc::new(Mutex::new(input_lines(BufReader::new(input))));
        let feed = {
            let backlog = Arc::clone(&backlog);
            std::iter::from_fn(move || {
                backlog.lock().unwrap_or_else(PoisonError::into_inner).next()
            })
        };

        let stats = Arc::new(ScanStats::default());
        let pool = WorkerPool::new(self.config.workers, self.shutdown.token());
        let report = {
            let ctx = Arc::clone(&ctx);
            let stats = Arc::clone(&stats);
            pool.run(feed, move |line: String, cancel| {
                let ctx = Arc::clone(&ctx);
                let stats = Arc::clone(&stats);
                async move {
                    let outcome = scan_line(&ctx, &line, &cancel).await;
                    debug!(line = %line, ?outcome, "Line finished.");
                    stats.record(outcome);
                }
            })
            .await
        };
        watcher.abort();

        let interrupted = self.shutdown.state() == AppState::ShuttingDown;
        let not_started = if interrupted {
            let _ = sink.notice(&format!("Cancelled {} tasks.", report.cancelled));
            backlog.lock().unwrap_or_else(PoisonError::into_inner).by_ref().count()
        } else {
            0
        };
        self.shutdown.mark_stopped();

        let load = |counter: &AtomicUsize| counter.load(Ordering::SeqCst);
        let summary = ScanSummary {
            lines: report.started,
            matched: load(&stats.matched),
            scanned_without_match: load(&stats.scanned_without_match),
            exhausted: load(&stats.exhausted),
            abandoned: load(&stats.abandoned),
            // A panicking unit is an unclassified failure of its line.
            failed: load(&stats.failed) + report.panicked,
            unparsable: load(&stats.unparsable),
            cancelled: load(&stats.cancelled) + report.cancelled,
            not_started,
            records_written: sink.records_written(),
            interrupted,
        };
        info!(?summary, "Scan finished.");
        let _ = sink.notice("Done!");
        Ok(summary)
    }
}

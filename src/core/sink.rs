// src/core/sink.rs

//! The single shared writer for results and progress.
//!
//! Every public method takes the lock once and performs its whole
//! decide-style-and-write sequence under it, so concurrent workers can never
//! interleave partial lines. Writes are flushed immediately.

use crate::core::error::InputError;
use crate::core::models::MatchRecord;
use crossterm::style::{Color, Stylize};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const HIT_MARKER: &str = "[+]";
const MISS_MARKER: &str = "[-]";

struct SinkInner {
    output: Box<dyn Write + Send>,
    console: Box<dyn Write + Send>,
    color: bool,
    records_written: usize,
}

impl SinkInner {
    fn echo(&mut self, text: &str, color: Color) -> io::Result<()> {
        if self.color {
            writeln!(self.console, "{}", text.with(color).bold())
        } else {
            writeln!(self.console, "{}", text)
        }
    }
}

pub struct ResultSink {
    inner: Mutex<SinkInner>,
}

impl ResultSink {
    pub fn new(
        output: impl Write + Send + 'static,
        console: impl Write + Send + 'static,
        color: bool,
    ) -> Self {
        Self {
            inner: Mutex::new(SinkInner {
                output: Box::new(output),
                console: Box::new(console),
                color,
                records_written: 0,
            }),
        }
    }

    /// Opens `path` for appending (creating it if needed) and echoes to stdout.
    pub fn open(path: &Path, color: bool) -> Result<Self, InputError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| InputError::Output {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(file, io::stdout(), color))
    }

    fn lock(&self) -> MutexGuard<'_, SinkInner> {
        // A panic mid-write leaves at worst a truncated line; keep going.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the records found for one attempt, then its status line:
    /// green when anything matched, red otherwise. Without colour the line is
    /// prefixed with `[+]` or `[-]` instead.
    pub fn report_attempt(&self, attempted_url: &str, records: &[MatchRecord]) -> io::Result<()> {
        let mut inner = self.lock();
        for record in records {
            inner.output.write_all(record.to_output_lines().as_bytes())?;
            if !record.matched_strings.is_empty() {
                let joined = record
                    .matched_strings
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join("\n");
                inner.echo(&joined, Color::Yellow)?;
            }
        }
        inner.output.flush()?;
        inner.records_written += records.len();

        if inner.color {
            let status = if records.is_empty() { Color::Red } else { Color::Green };
            inner.echo(attempted_url, status)?;
        } else {
            let marker = if records.is_empty() { MISS_MARKER } else { HIT_MARKER };
            writeln!(inner.console, "{marker} {attempted_url}")?;
        }
        inner.console.flush()
    }

    /// A lifecycle message such as shutdown progress.
    pub fn notice(&self, message: &str) -> io::Result<()> {
        let mut inner = self.lock();
        inner.echo(message, Color::Cyan)?;
        inner.console.flush()
    }

    /// Full diagnostic output for an unclassified failure.
    pub fn diagnostic(&self, message: &str) -> io::Result<()> {
        let mut inner = self.lock();
        inner.echo(message, Color::Magenta)?;
        inner.console.flush()
    }

    pub fn records_written(&self) -> usize {
        self.lock().records_written
    }
}

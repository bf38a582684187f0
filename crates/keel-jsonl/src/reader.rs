//! JSONL reading operations.
//!
//! This module provides async functionality for reading JSONL files line-by-line
//! with efficient buffering and line number tracking for error reporting.
//!
//! Two reading styles are supported:
//!
//! - **Strict**: [`JsonlReader::read_line`] returns the first decode error it hits.
//! - **Resilient**: [`JsonlReader::stream_resilient`] and [`read_jsonl_resilient`]
//!   skip lines that cannot be decoded and record a [`Warning`] for each one.

use crate::warning::{Warning, WarningCollector};
use crate::{Error, Result};
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Async reader for JSONL (JSON Lines) data.
///
/// `JsonlReader` wraps an async reader and provides buffered reading of JSONL
/// formatted data. It tracks line numbers to provide useful context in error
/// messages when parsing fails.
///
/// # Examples
///
/// ```no_run
/// use keel_jsonl::JsonlReader;
/// use tokio::fs::File;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let file = File::open("data.jsonl").await?;
/// let mut reader = JsonlReader::new(file);
/// while let Some(value) = reader.read_line::<serde_json::Value>().await? {
///     println!("{value}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct JsonlReader<R> {
    /// Buffered reader wrapping the underlying async reader.
    reader: BufReader<R>,
    /// Current line number (1-based counting, 0 before any lines are read).
    line_number: usize,
    /// Reusable byte buffer for line reads.
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> JsonlReader<R> {
    /// Creates a new `JsonlReader` wrapping the given async reader.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line_number: 0,
            buf: Vec::new(),
        }
    }

    /// Returns the current line number.
    ///
    /// Returns 0 before any lines have been read. After reading, returns the
    /// 1-based line number of the last line read.
    #[must_use]
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Reads the next raw line, without its trailing newline.
    ///
    /// Returns `Ok(None)` at end of input. Lines that are not valid UTF-8
    /// produce an [`Error::InvalidFormat`] but the line is still consumed,
    /// so callers may continue reading after the error.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or invalid UTF-8.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 {
            return Ok(None);
        }
        self.line_number += 1;

        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }

        match std::str::from_utf8(&self.buf) {
            Ok(line) => Ok(Some(line.to_string())),
            Err(e) => Err(Error::InvalidFormat(format!(
                "line {}: invalid UTF-8: {}",
                self.line_number, e
            ))),
        }
    }

    /// Reads and decodes the next non-empty line.
    ///
    /// Blank lines are skipped. Returns `Ok(None)` at end of input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] with the offending line number if the line is
    /// not a valid encoding of `T`.
    pub async fn read_line<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line)
                .map(Some)
                .map_err(|source| Error::Parse {
                    line_number: self.line_number,
                    source,
                });
        }
    }

    /// Consumes the reader and yields every decodable record.
    ///
    /// Lines that fail to decode are skipped and recorded in the returned
    /// [`WarningCollector`]. The collector is shared with the stream, so it
    /// is complete once the stream has been drained.
    pub fn stream_resilient<T>(self) -> (impl Stream<Item = T>, WarningCollector)
    where
        T: DeserializeOwned,
    {
        let collector = WarningCollector::new();
        let sink = collector.clone();

        let records = stream::unfold(self, move |mut reader| {
            let sink = sink.clone();
            async move {
                loop {
                    match reader.next_line().await {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<T>(&line) {
                                Ok(record) => return Some((record, reader)),
                                Err(e) => {
                                    tracing::debug!(
                                        line = reader.line_number(),
                                        error = %e,
                                        "Skipping malformed JSONL line"
                                    );
                                    sink.add(Warning::MalformedJson {
                                        line_number: reader.line_number(),
                                        error: e.to_string(),
                                    });
                                }
                            }
                        }
                        Ok(None) => return None,
                        Err(Error::InvalidFormat(reason)) => {
                            sink.add(Warning::SkippedLine {
                                line_number: reader.line_number(),
                                reason,
                            });
                        }
                        Err(e) => {
                            sink.add(Warning::SkippedLine {
                                line_number: reader.line_number() + 1,
                                reason: format!("read aborted: {}", e),
                            });
                            return None;
                        }
                    }
                }
            }
        });

        (records, collector)
    }
}

/// Reads every decodable record from a JSONL file.
///
/// Malformed lines do not abort the read; each produces a [`Warning`].
///
/// # Errors
///
/// Returns an error only if the file cannot be opened.
///
/// # Examples
///
/// ```no_run
/// use keel_jsonl::read_jsonl_resilient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (values, warnings) =
///     read_jsonl_resilient::<serde_json::Value, _>("issues.jsonl").await?;
/// for warning in &warnings {
///     eprintln!("{warning}");
/// }
/// # Ok(())
/// # }
/// ```
pub async fn read_jsonl_resilient<T, P>(path: P) -> Result<(Vec<T>, Vec<Warning>)>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref()).await?;
    let (records, collector) = JsonlReader::new(file).stream_resilient::<T>();
    let records: Vec<T> = std::pin::pin!(records).collect().await;
    let warnings = collector.into_warnings();

    if !warnings.is_empty() {
        tracing::warn!(
            path = %path.as_ref().display(),
            skipped = warnings.len(),
            "JSONL file contained lines that could not be decoded"
        );
    }

    Ok((records, warnings))
}

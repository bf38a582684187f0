//! JSON Lines I/O for keel.
//!
//! This crate provides buffered async reading and writing of JSONL data,
//! resilient loading that skips and reports malformed lines, and atomic
//! file replacement for crash-safe rewrites.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod atomic;
pub mod error;
pub mod reader;
pub mod warning;
pub mod writer;

pub use atomic::{write_bytes_atomic, write_jsonl_atomic, write_jsonl_atomic_iter, write_lines_atomic};
pub use error::{Error, Result};
pub use reader::{read_jsonl_resilient, JsonlReader};
pub use warning::{Warning, WarningCollector};
pub use writer::JsonlWriter;

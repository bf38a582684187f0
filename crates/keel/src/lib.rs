//! Keel - a local-first issue store.
//!
//! Issues live in a pluggable store and are mirrored to a sorted JSONL export
//! for version control. Around that core the crate provides:
//!
//! - [`id_generation`]: hash-based, sequential and hierarchical issue IDs
//! - [`graph`]: cycle-safe dependency edges plus ready, blocked and epic queries
//! - [`tombstone`]: soft deletion with a TTL, pruning and legacy manifest migration
//! - [`sync`]: export and import between the store and the JSONL file
//! - [`consistency`]: store vs. export divergence detection and repair advice
//! - [`federation`]: peer accounting over an optional replication port
//! - [`doctor`]: every check above gathered into one report
//!
//! The `keel` binary is a thin [`cli`] front over these modules.

#![forbid(unsafe_code)]

// Public modules for library usage
pub mod consistency;
pub mod domain;
pub mod error;
pub mod federation;
pub mod graph;
pub mod id_generation;
pub mod storage;
pub mod sync;
pub mod tombstone;

// Workspace plumbing
pub mod app;
pub mod config;
pub mod doctor;
pub mod paths;

// Public CLI module (needed by binary)
pub mod cli;

// Command implementations
pub mod commands;

// Output formatting
pub mod output;

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Observability: log initialization and cheap engine snapshots.
//!
//! Snapshots are plain data taken between ticks; they hold no references
//! into the engine and are safe to ship across threads or serialize.

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use super::ids::{AtomId, LinkId};

/// Initialize tracing for binaries and tests.
///
/// Logs go to stderr so stdout stays a data channel; the filter honors
/// `RUST_LOG` and defaults to `info`. Calling this twice is harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

/// Point-in-time view of one link and its atom's queues.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSnapshot {
    pub link: LinkId,
    pub atom: AtomId,
    pub atom_name: String,
    pub sink_depths: Vec<usize>,
    pub source_depths: Vec<usize>,
    pub stuck: bool,
    pub render: bool,
    pub sync: bool,
}

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub running: bool,
    pub ticks: u64,
    pub atom_count: usize,
    pub exchange_count: usize,
    pub links: Vec<LinkSnapshot>,
}

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

use super::ids::{AtomId, ExchangeId, LinkId};

/// A lookup through the engine arenas missed.
///
/// Stale ids are detectable, not dangling: callers decide whether a missing
/// node is fatal.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    #[error("{0} is not in the engine")]
    Atom(AtomId),

    #[error("{0} is not in the engine")]
    Link(LinkId),

    #[error("{0} is not in the engine")]
    Exchange(ExchangeId),

    #[error("channel {channel} does not exist on {link}")]
    Channel { link: LinkId, channel: usize },
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("format error: {0}")]
    Format(String),

    #[error("exchange failed: {0}")]
    Exchange(String),

    #[error("negotiation rejected: {0}")]
    Negotiation(String),

    #[error("wiring error: {0}")]
    Wiring(String),

    #[error("router error: {0}")]
    Router(String),

    #[error("atom initialization failed: {0}")]
    Initialize(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;

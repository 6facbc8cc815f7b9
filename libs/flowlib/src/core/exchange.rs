// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Exchange points - the connectors that move packets between two ports.
//!
//! An exchange point owns no queue of its own: it binds one source port to
//! one sink port by id and the engine resolves both through the arenas on
//! every visit, so a stale binding is a detected lookup failure instead of
//! a dangling pointer. The move loop itself lives in
//! [`EngineContext`](super::engine::EngineContext), which owns the arenas.

use super::ids::{ExchangeId, LinkId};

/// Non-owning reference to one channel of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRef {
    pub link: LinkId,
    pub channel: usize,
}

impl PortRef {
    pub fn new(link: LinkId, channel: usize) -> Self {
        Self { link, channel }
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.link, self.channel)
    }
}

/// Whether an exchange is a link's primary connection or a side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Primary,
    Side,
}

/// Binds one source provider to one sink provider.
#[derive(Debug)]
pub struct ExchangePoint {
    id: ExchangeId,
    kind: ExchangeKind,
    src: PortRef,
    sink: PortRef,
}

impl ExchangePoint {
    pub fn new(id: ExchangeId, kind: ExchangeKind, src: PortRef, sink: PortRef) -> Self {
        Self {
            id,
            kind,
            src,
            sink,
        }
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    /// The producing end: a source channel.
    pub fn src(&self) -> PortRef {
        self.src
    }

    /// The consuming end: a sink channel.
    pub fn sink(&self) -> PortRef {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_ref_display_is_link_colon_channel() {
        let p = PortRef::new(LinkId::new(4), 1);
        assert_eq!(p.to_string(), "link#4:1");
    }

    #[test]
    fn exchange_reports_its_ends() {
        let ex = ExchangePoint::new(
            ExchangeId::new(0),
            ExchangeKind::Primary,
            PortRef::new(LinkId::new(1), 0),
            PortRef::new(LinkId::new(2), 0),
        );
        assert_eq!(ex.src().link, LinkId::new(1));
        assert_eq!(ex.sink().link, LinkId::new(2));
        assert_eq!(ex.kind(), ExchangeKind::Primary);
    }
}

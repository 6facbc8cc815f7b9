// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Packets - the immutable, timestamped units of data moved by the engine.
//!
//! Payload bytes live behind an `Arc` so a packet clone is a reference-count
//! bump; the reply fast path reuses an inbound payload in place instead of
//! re-encoding. Every packet carries an opaque [`TrackingEnvelope`] that an
//! external [`PacketTracker`] collaborator can use for lifetime and
//! duplication auditing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::format::ValueFormat;

/// Opaque audit tag stamped onto every packet at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackingEnvelope {
    id: u64,
}

impl TrackingEnvelope {
    /// Mint a fresh, process-unique envelope.
    pub fn mint() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Lifetime/duplication auditing seam. The engine calls these hooks; it
/// never inspects what a tracker does with them.
pub trait PacketTracker: Send + Sync {
    fn created(&self, env: TrackingEnvelope) {
        let _ = env;
    }

    fn cloned(&self, env: TrackingEnvelope) {
        let _ = env;
    }

    fn consumed(&self, env: TrackingEnvelope) {
        let _ = env;
    }
}

/// Default tracker: does nothing.
#[derive(Debug, Default)]
pub struct NoopTracker;

impl PacketTracker for NoopTracker {}

/// One timestamped, format-tagged unit of data.
#[derive(Debug, Clone)]
pub struct Packet {
    format: ValueFormat,
    timestamp: f64,
    payload: Arc<[u8]>,
    envelope: TrackingEnvelope,
}

impl Packet {
    pub fn new(format: ValueFormat, timestamp: f64, payload: Vec<u8>) -> Self {
        Self {
            format,
            timestamp,
            payload: payload.into(),
            envelope: TrackingEnvelope::mint(),
        }
    }

    /// Build a packet around an already-shared payload (zero-copy reply path).
    pub fn with_shared_payload(format: ValueFormat, timestamp: f64, payload: Arc<[u8]>) -> Self {
        Self {
            format,
            timestamp,
            payload,
            envelope: TrackingEnvelope::mint(),
        }
    }

    /// The format this packet was produced under.
    pub fn format(&self) -> &ValueFormat {
        &self.format
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Shared handle to the payload, for in-place reuse.
    pub fn payload_arc(&self) -> &Arc<[u8]> {
        &self.payload
    }

    pub fn envelope(&self) -> TrackingEnvelope {
        self.envelope
    }

    /// Whether this packet's payload is shared with another packet.
    pub fn payload_is_shared(&self) -> bool {
        Arc::strong_count(&self.payload) > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::ValueKind;

    #[test]
    fn envelopes_are_unique() {
        let a = TrackingEnvelope::mint();
        let b = TrackingEnvelope::mint();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn clone_shares_the_payload() {
        let fmt = ValueFormat::default_for(ValueKind::Event);
        let p = Packet::new(fmt, 0.25, vec![1, 2, 3]);
        let q = p.clone();
        assert!(p.payload_is_shared());
        assert_eq!(q.payload(), &[1, 2, 3]);
        assert_eq!(p.envelope(), q.envelope());
    }

    #[test]
    fn shared_payload_constructor_reuses_bytes() {
        let fmt = ValueFormat::default_for(ValueKind::Audio);
        let p = Packet::new(fmt, 0.0, vec![0u8; 16]);
        let q = Packet::with_shared_payload(fmt, 1.0, p.payload_arc().clone());
        assert!(Arc::ptr_eq(p.payload_arc(), q.payload_arc()));
        assert_ne!(p.envelope(), q.envelope());
        assert_eq!(q.timestamp(), 1.0);
    }
}

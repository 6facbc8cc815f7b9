// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Value containers - the bounded packet FIFO behind every port.
//!
//! A container owns its queue and the negotiated format for one channel.
//! Appending into a full container is not an error: `offer` hands the packet
//! back as a [`QueueFull`] backpressure signal and the caller stops its move
//! loop for the tick. Nothing blocks, nothing is dropped.
//!
//! Containers are shared as `Arc<RwLock<ValueContainer>>` because producer
//! threads outside the engine (hardware capture callbacks) may append into a
//! source container while the scheduler thread is mid-tick. The engine
//! interior assumes single-threaded access once inside a tick.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use super::format::{ValueFormat, ValueKind};
use super::packet::Packet;

pub type SharedContainer = Arc<RwLock<ValueContainer>>;

/// Backpressure signal: the queue is at `max_packets`, the packet comes
/// back to the caller untouched.
#[derive(Debug)]
pub struct QueueFull(pub Packet);

#[derive(Debug)]
pub struct ValueContainer {
    kind: ValueKind,
    format: Option<ValueFormat>,
    locked: bool,
    min_packets: usize,
    max_packets: usize,
    queue: VecDeque<Packet>,
}

impl ValueContainer {
    /// Create a container for a channel of the given kind. Bounds are
    /// normalized so `min <= max` holds from the start.
    pub fn new(kind: ValueKind, min_packets: usize, max_packets: usize) -> Self {
        let max_packets = max_packets.max(min_packets).max(1);
        Self {
            kind,
            format: None,
            locked: false,
            min_packets,
            max_packets,
            queue: VecDeque::new(),
        }
    }

    /// Create a container pre-negotiated to the default format of its kind.
    pub fn with_default_format(kind: ValueKind, min_packets: usize, max_packets: usize) -> Self {
        let mut c = Self::new(kind, min_packets, max_packets);
        c.format = Some(ValueFormat::default_for(kind));
        c
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn format(&self) -> Option<&ValueFormat> {
        self.format.as_ref()
    }

    /// True once a valid format has been negotiated.
    pub fn has_valid_format(&self) -> bool {
        self.format.as_ref().is_some_and(ValueFormat::is_valid)
    }

    /// Replace the negotiated format.
    ///
    /// # Panics
    ///
    /// Panics if the format has been locked. Writing a format after lock is
    /// a wiring bug in graph construction, not a runtime condition.
    pub fn set_format(&mut self, format: ValueFormat) {
        assert!(
            !self.locked,
            "set_format on a format-locked container ({} channel)",
            self.kind
        );
        self.format = Some(format);
    }

    /// Mark the negotiated format immutable. Idempotent.
    pub fn lock_format(&mut self) {
        self.locked = true;
    }

    pub fn is_format_locked(&self) -> bool {
        self.locked
    }

    pub fn min_queue_size(&self) -> usize {
        self.min_packets
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_packets
    }

    /// Adjust the lower bound; raises `max` if needed so `min <= max`.
    pub fn set_min_queue_size(&mut self, n: usize) {
        self.min_packets = n;
        if self.max_packets < n {
            self.max_packets = n;
        }
    }

    /// Adjust the upper bound; lowers `min` if needed so `min <= max`.
    pub fn set_max_queue_size(&mut self, n: usize) {
        self.max_packets = n.max(1);
        if self.min_packets > self.max_packets {
            self.min_packets = self.max_packets;
        }
    }

    /// Append one packet, or hand it back as backpressure when full.
    pub fn offer(&mut self, packet: Packet) -> Result<(), QueueFull> {
        if self.queue.len() >= self.max_packets {
            return Err(QueueFull(packet));
        }
        self.queue.push_back(packet);
        Ok(())
    }

    /// Pop the oldest queued packet.
    pub fn take(&mut self) -> Option<Packet> {
        self.queue.pop_front()
    }

    /// Return a packet to the head of the queue (undo of `take`, used when a
    /// consumer refuses the packet and it must stay pending).
    pub fn put_back(&mut self, packet: Packet) {
        self.queue.push_front(packet);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_queue_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_queue_full(&self) -> bool {
        self.queue.len() >= self.max_packets
    }

    /// Room left before the queue hits its bound.
    pub fn queue_room(&self) -> usize {
        self.max_packets.saturating_sub(self.queue.len())
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }
}

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared test atoms and trackers for the integration suite.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use flowlib::{
    AtomBehavior, Packet, PacketTracker, RealtimeSourceConfig, TrackingEnvelope, ValueFormat,
};

/// Emits a fixed list of payloads, one per `send` call.
pub struct ProducerAtom {
    pub payloads: VecDeque<Vec<u8>>,
}

impl ProducerAtom {
    pub fn with_count(count: usize) -> Self {
        Self {
            payloads: (0..count).map(|i| vec![i as u8]).collect(),
        }
    }
}

impl AtomBehavior for ProducerAtom {
    fn send(&mut self, _cfg: &RealtimeSourceConfig, _src_ch: usize) -> Option<Vec<u8>> {
        self.payloads.pop_front()
    }
}

/// Buffers every received payload and replays it out its source channel.
#[derive(Default)]
pub struct RelayAtom {
    buffered: VecDeque<Vec<u8>>,
}

impl AtomBehavior for RelayAtom {
    fn recv(&mut self, _sink_ch: usize, packet: &Packet) -> bool {
        self.buffered.push_back(packet.payload().to_vec());
        true
    }

    fn send(&mut self, _cfg: &RealtimeSourceConfig, _src_ch: usize) -> Option<Vec<u8>> {
        self.buffered.pop_front()
    }
}

/// Terminal consumer. With `accept` false it refuses every packet, leaving
/// them queued in its sink container (a held/stuck consumer).
pub struct CollectorAtom {
    pub accept: bool,
    pub received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl CollectorAtom {
    pub fn accepting() -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                accept: true,
                received: received.clone(),
            },
            received,
        )
    }

    pub fn refusing() -> Self {
        Self {
            accept: false,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl AtomBehavior for CollectorAtom {
    fn recv(&mut self, _sink_ch: usize, packet: &Packet) -> bool {
        if self.accept {
            self.received.lock().push(packet.payload().to_vec());
            true
        } else {
            false
        }
    }
}

/// Refuses every format negotiation.
pub struct PickyAtom;

impl AtomBehavior for PickyAtom {
    fn accept_format(&mut self, _sink_ch: usize, _format: &ValueFormat) -> bool {
        false
    }
}

/// Records lifecycle events into a shared log, tagged by atom name.
pub struct LifecycleRecorder {
    pub name: &'static str,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl AtomBehavior for LifecycleRecorder {
    fn stop(&mut self) {
        self.log.lock().push(format!("stop:{}", self.name));
    }

    fn uninitialize(&mut self) {
        self.log.lock().push(format!("uninit:{}", self.name));
    }
}

/// Counts packet lifetime events.
#[derive(Default)]
pub struct CountingTracker {
    created: AtomicU64,
    consumed: AtomicU64,
}

impl CountingTracker {
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn consumed_count(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }
}

impl PacketTracker for CountingTracker {
    fn created(&self, _env: TrackingEnvelope) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    fn consumed(&self, _env: TrackingEnvelope) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }
}

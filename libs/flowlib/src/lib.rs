// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! flowlib - an in-process, tick-driven dataflow exchange engine.
//!
//! A graph of typed processing nodes ([`AtomBehavior`] implementations)
//! exchanges immutable [`Packet`]s through bounded, format-negotiated
//! queues. Exchange points move packets from producer queues to consumer
//! queues under explicit queue-depth backpressure; a credit-based flow
//! control protocol paces producers; and a single scheduler thread drives
//! the whole graph one `update(dt)` tick at a time.
//!
//! ```no_run
//! use flowlib::{AtomBehavior, EngineConfig, EngineContext, InterfaceDescriptor, ValueKind};
//!
//! struct Beeper;
//! impl AtomBehavior for Beeper {
//!     fn send(&mut self, _cfg: &flowlib::RealtimeSourceConfig, _ch: usize) -> Option<Vec<u8>> {
//!         Some(vec![0u8; 4])
//!     }
//! }
//!
//! let mut engine = EngineContext::new(EngineConfig::default());
//! let desc = InterfaceDescriptor::new().with_source("out", vec![ValueKind::Audio]);
//! let beeper = engine.add_atom("beeper", desc, Box::new(Beeper)).unwrap();
//! let link = engine.atom_link(beeper).unwrap();
//! engine.add_driver(link);
//! engine.start().unwrap();
//! engine.update(1.0 / 60.0);
//! engine.stop();
//! ```

pub mod core;

pub use core::{
    init_logging,
    AtomBehavior,
    AtomCore,
    AtomId,
    AtomInterface,
    AudioFormat,
    ChannelDescriptor,
    ChannelDirection,
    CreditPolicy,
    DefaultCreditPolicy,
    EngineConfig,
    EngineContext,
    EngineSnapshot,
    ExchangeId,
    ExchangeKind,
    ExchangePoint,
    FlowError,
    ForwarderId,
    FramebufferFormat,
    FwdScope,
    InterfaceDescriptor,
    Link,
    LinkId,
    LinkSnapshot,
    LinkSystem,
    LookupError,
    NoopTracker,
    OnceEntry,
    Packet,
    PacketRouter,
    PacketTracker,
    PortRef,
    QueueBoundsConfig,
    QueueFull,
    RealtimeSourceConfig,
    Result,
    RouterPortHandle,
    SampleType,
    SchedulingClass,
    SharedContainer,
    TimeSeries,
    TrackingEnvelope,
    ValueContainer,
    ValueFormat,
    ValueKind,
    VideoFormat,
    VolumeFormat,
    WorldState,
};

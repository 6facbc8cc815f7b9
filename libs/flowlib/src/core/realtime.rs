// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-link realtime pacing clock.
//!
//! Each link owns one [`RealtimeSourceConfig`], mutated exactly once per
//! tick. It decides whether the current tick is a sync pulse and whether
//! rendering/forwarding should happen at all - the pacing layer's own
//! backpressure signal, independent of queue-level backpressure.

/// Pacing state for one link's realtime source.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeSourceConfig {
    /// dt supplied for the current tick.
    pub time_delta: f64,
    /// Accumulated engine time.
    pub time_total: f64,
    /// Target sync period in seconds.
    pub sync_dt: f64,
    /// Time since the last sync pulse.
    pub sync_age: f64,
    /// Source frame counter at the last sync pulse (0 = never synced).
    pub last_sync_src_frame: u32,
    /// Frames elapsed since the last sync pulse.
    pub frames_after_sync: u32,
    /// Monotonic source frame counter, incremented every tick.
    pub src_frame: u32,
    /// Whether sync pulses are generated at all.
    pub enable_sync: bool,
    /// True on the tick where a sync pulse fires.
    pub sync: bool,
    /// Whether rendering/forwarding should occur this tick.
    pub render: bool,
}

impl Default for RealtimeSourceConfig {
    fn default() -> Self {
        Self::new(3.0)
    }
}

impl RealtimeSourceConfig {
    pub fn new(sync_dt: f64) -> Self {
        Self {
            time_delta: 0.0,
            time_total: 0.0,
            sync_dt,
            sync_age: 0.0,
            last_sync_src_frame: 0,
            frames_after_sync: 0,
            src_frame: 0,
            enable_sync: false,
            sync: false,
            render: false,
        }
    }

    /// Advance the clock by one tick.
    ///
    /// `buffer_full` is the downstream queue state: when no sync pulse is
    /// due and the buffer has no room, `render` goes false and the source
    /// skips this tick.
    pub fn update(&mut self, dt: f64, buffer_full: bool) {
        self.sync_age += dt;
        self.time_total += dt;
        self.time_delta = dt;
        self.src_frame = self.src_frame.wrapping_add(1);

        if self.enable_sync && self.sync_age >= self.sync_dt {
            // Clamp the age to at most one period so a stall does not fire
            // a burst of make-up pulses.
            if self.sync_age > 2.0 * self.sync_dt {
                self.sync_age = self.sync_dt;
            } else {
                self.sync_age %= self.sync_dt;
            }
            self.last_sync_src_frame = self.src_frame;
            self.frames_after_sync = 0;
            self.sync = true;
            self.render = true;
        } else if !buffer_full {
            self.sync = false;
            self.frames_after_sync = if self.last_sync_src_frame == 0 {
                0
            } else {
                self.src_frame.wrapping_sub(self.last_sync_src_frame)
            };
            self.render = true;
        } else {
            self.sync = false;
            self.render = false;
        }
    }
}

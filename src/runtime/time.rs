//! Time events: periodic or one-shot timers ticked at 1 kHz, each delivering
//! a fixed event to its owning active object when it expires.
//!
//! Disarming only stops future expirations; an expiration already posted to a
//! queue is still delivered (handlers are expected to tolerate one stale
//! tick).

use super::event::Event;

#[derive(Clone, Copy, Debug)]
pub struct TimeEvent {
    event: Event,
    interval_ms: u32,
    countdown_ms: u32,
    periodic: bool,
    armed: bool,
}

impl TimeEvent {
    pub const fn new(event: Event) -> Self {
        Self {
            event,
            interval_ms: 0,
            countdown_ms: 0,
            periodic: false,
            armed: false,
        }
    }

    /// Fires every `interval_ms`, starting one interval from now.
    pub fn arm_periodic(&mut self, interval_ms: u32) {
        debug_assert!(interval_ms > 0);
        self.interval_ms = interval_ms;
        self.countdown_ms = interval_ms;
        self.periodic = true;
        self.armed = true;
    }

    /// Fires once after `delay_ms`.
    pub fn arm_once(&mut self, delay_ms: u32) {
        debug_assert!(delay_ms > 0);
        self.interval_ms = delay_ms;
        self.countdown_ms = delay_ms;
        self.periodic = false;
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Advances by one millisecond. Returns the event on expiry.
    pub fn tick(&mut self) -> Option<Event> {
        if !self.armed {
            return None;
        }
        self.countdown_ms -= 1;
        if self.countdown_ms > 0 {
            return None;
        }
        if self.periodic {
            self.countdown_ms = self.interval_ms;
        } else {
            self.armed = false;
        }
        Some(self.event)
    }
}

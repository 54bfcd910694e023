//! Cooperative active-object runtime: bounded mailboxes, a post-router, and
//! time events. The run-to-completion loop itself lives with the application
//! wiring (`ao::App`), which owns the three concrete state machines; this
//! module supplies the moving parts.
//!
//! Ordering rules the pieces enforce together:
//! - per-AO FIFO delivery (the mailbox is a queue);
//! - an event posted from inside a handler lands in the router and is only
//!   moved into mailboxes after the handler returns;
//! - the highest-priority non-empty mailbox runs next (Comm > Motion >
//!   System), one event per wake.

pub mod event;
pub mod time;

pub use event::{AoId, Event, MotionStartEvt, Signal};
pub use time::TimeEvent;

use heapless::Deque;

/// Bounded event queue for one active object. Refuses when full.
pub struct Mailbox<const N: usize> {
    queue: Deque<Event, N>,
    /// Posts refused because the queue was full.
    pub dropped: u32,
}

impl<const N: usize> Mailbox<N> {
    pub fn new() -> Self {
        Self {
            queue: Deque::new(),
            dropped: 0,
        }
    }

    /// Enqueues an event. Returns false (and counts) when the queue is full.
    pub fn post(&mut self, event: Event) -> bool {
        match self.queue.push_back(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped = self.dropped.wrapping_add(1);
                crate::fmt::error!("mailbox full, event refused");
                false
            }
        }
    }

    pub fn take(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl<const N: usize> Default for Mailbox<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffer for events posted while a handler is running. The loop flushes it
/// into the target mailboxes after the handler returns, which is what makes
/// "posted during handling, delivered afterwards" hold.
pub struct Router {
    queue: Deque<(AoId, Event), 16>,
    pub dropped: u32,
}

impl Router {
    pub fn new() -> Self {
        Self {
            queue: Deque::new(),
            dropped: 0,
        }
    }

    pub fn post(&mut self, to: AoId, event: Event) -> bool {
        match self.queue.push_back((to, event)) {
            Ok(()) => true,
            Err(_) => {
                self.dropped = self.dropped.wrapping_add(1);
                crate::fmt::error!("router full, event refused");
                false
            }
        }
    }

    pub fn drain(&mut self) -> Option<(AoId, Event)> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

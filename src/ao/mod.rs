//! The application: three active objects, their mailboxes and time events,
//! and the cooperative run loop that threads them together on the control
//! core.
//!
//! Everything is constructed here and owned explicitly — the firmware entry
//! point builds an [`App`] from the hardware halves and then alternates
//! `tick_1ms` (from the 1 kHz timer) with `run_once` (the idle loop, which
//! sleeps on WFI when `run_once` reports no work).

pub mod autotest;
pub mod comm;
pub mod motion;
pub mod system;

pub use comm::CommAo;
pub use motion::{MotionAo, MotionAoState};
pub use system::{ServoSnapshot, SystemAo, SystemAoState};

use crate::bridge::HostPort;
use crate::command::servo_snapshot;
use crate::config::{
    COMM_QUEUE_DEPTH, COMM_TICK_MS, INTERP_TICK_MS, LED_TICK_MS, MOTION_QUEUE_DEPTH,
    SCHED_TICK_MS, SYSTEM_QUEUE_DEPTH,
};
use crate::hw::{FlashDevice, PwmBank, StatusLed};
use crate::runtime::{AoId, Event, Mailbox, Router, TimeEvent};

pub struct App<'a, P: PwmBank, F: FlashDevice, L: StatusLed> {
    now_ms: u32,
    comm: CommAo<'a>,
    motion: MotionAo<P>,
    system: SystemAo<F, L>,
    comm_mbx: Mailbox<COMM_QUEUE_DEPTH>,
    motion_mbx: Mailbox<MOTION_QUEUE_DEPTH>,
    system_mbx: Mailbox<SYSTEM_QUEUE_DEPTH>,
    router: Router,
    /// Comm poll cadence.
    te_comm: TimeEvent,
    /// Interpolation tick.
    te_interp: TimeEvent,
    /// Scheduler tick.
    te_sched: TimeEvent,
    /// LED cadence.
    te_led: TimeEvent,
}

impl<'a, P: PwmBank, F: FlashDevice, L: StatusLed> App<'a, P, F, L> {
    pub fn new(port: HostPort<'a>, pwm: P, flash: F, led: L) -> Self {
        let mut app = Self {
            now_ms: 0,
            comm: CommAo::new(port),
            motion: MotionAo::new(pwm),
            system: SystemAo::new(flash, led),
            comm_mbx: Mailbox::new(),
            motion_mbx: Mailbox::new(),
            system_mbx: Mailbox::new(),
            router: Router::new(),
            te_comm: TimeEvent::new(Event::Timeout),
            te_interp: TimeEvent::new(Event::InterpTick),
            te_sched: TimeEvent::new(Event::Timeout),
            te_led: TimeEvent::new(Event::LedUpdate),
        };

        app.te_comm.arm_periodic(COMM_TICK_MS);
        app.te_interp.arm_periodic(INTERP_TICK_MS);
        app.te_sched.arm_periodic(SCHED_TICK_MS);
        app.te_led.arm_periodic(LED_TICK_MS);

        // Boot-time parameter load, then the init-complete signal.
        app.system.init(&mut app.router);
        app.flush_router();
        app.system_mbx.post(Event::InitComplete);
        app
    }

    pub fn now_ms(&self) -> u32 {
        self.now_ms
    }

    pub fn motion(&self) -> &MotionAo<P> {
        &self.motion
    }

    pub fn system(&self) -> &SystemAo<F, L> {
        &self.system
    }

    /// 1 kHz tick, called from the hardware timer. Only moves time events
    /// into mailboxes; all real work happens in `run_once`.
    pub fn tick_1ms(&mut self) {
        self.now_ms = self.now_ms.wrapping_add(1);

        if let Some(event) = self.te_comm.tick() {
            self.comm_mbx.post(event);
        }
        if let Some(event) = self.te_interp.tick() {
            self.motion_mbx.post(event);
        }
        if let Some(event) = self.te_sched.tick() {
            self.motion_mbx.post(event);
        }
        if let Some(event) = self.te_led.tick() {
            self.system_mbx.post(event);
        }
    }

    /// Delivers one event to the highest-priority non-empty mailbox
    /// (Comm > Motion > System). Returns false when every queue is empty and
    /// the caller may sleep.
    pub fn run_once(&mut self) -> bool {
        let now = self.now_ms;

        if let Some(event) = self.comm_mbx.take() {
            self.comm
                .handle(event, now, &mut self.motion, &self.system, &mut self.router);
        } else if let Some(event) = self.motion_mbx.take() {
            self.motion.handle(event, now, &mut self.router);
        } else if let Some(event) = self.system_mbx.take() {
            let snapshot = servo_snapshot(&self.motion);
            self.system.handle(event, now, &snapshot, &mut self.router);
        } else {
            return false;
        }

        // Events posted during the handler are delivered strictly after it.
        self.flush_router();
        true
    }

    /// Drains every pending event. Convenience for tests and the idle loop.
    pub fn run_to_idle(&mut self) {
        while self.run_once() {}
    }

    fn flush_router(&mut self) {
        while let Some((to, event)) = self.router.drain() {
            match to {
                AoId::Comm => {
                    self.comm_mbx.post(event);
                }
                AoId::Motion => {
                    self.motion_mbx.post(event);
                }
                AoId::System => {
                    self.system_mbx.post(event);
                }
            }
        }
    }
}

//! Auto-test cycling: all axes sweep 0° ↔ 180° for a number of cycles, then
//! settle at 90°. Driven entirely from the Motion AO's completion hook, so it
//! needs no timer of its own and can never fight the event loop.

use crate::config::SERVO_COUNT;
use crate::runtime::MotionStartEvt;

/// Duration of each full-travel leg.
const LEG_DURATION_MS: u32 = 2_000;
const DEFAULT_CYCLES: u32 = 20;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    TowardMax,
    TowardMin,
    Homing,
}

pub struct AutoTest {
    active: bool,
    phase: Phase,
    cycles_done: u32,
    cycles_total: u32,
}

impl AutoTest {
    pub const fn new() -> Self {
        Self {
            active: false,
            phase: Phase::TowardMax,
            cycles_done: 0,
            cycles_total: DEFAULT_CYCLES,
        }
    }

    /// Arms the test. The first leg is returned here; subsequent legs come
    /// out of [`on_motion_complete`](Self::on_motion_complete).
    pub fn start(&mut self, cycles: u32) -> MotionStartEvt {
        self.active = true;
        self.phase = Phase::TowardMax;
        self.cycles_done = 0;
        self.cycles_total = if cycles == 0 { DEFAULT_CYCLES } else { cycles };
        crate::fmt::info!("auto-test started");
        MotionStartEvt::all_axes([180.; SERVO_COUNT], LEG_DURATION_MS)
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_running(&self) -> bool {
        self.active
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycles_done
    }

    /// Completion hook: hands back the next leg, or `None` once the test has
    /// homed and finished.
    pub fn on_motion_complete(&mut self) -> Option<MotionStartEvt> {
        if !self.active {
            return None;
        }
        match self.phase {
            Phase::TowardMax => {
                self.phase = Phase::TowardMin;
                Some(MotionStartEvt::all_axes([0.; SERVO_COUNT], LEG_DURATION_MS))
            }
            Phase::TowardMin => {
                self.cycles_done += 1;
                if self.cycles_done >= self.cycles_total {
                    self.phase = Phase::Homing;
                    Some(MotionStartEvt::all_axes([90.; SERVO_COUNT], LEG_DURATION_MS))
                } else {
                    self.phase = Phase::TowardMax;
                    Some(MotionStartEvt::all_axes([180.; SERVO_COUNT], LEG_DURATION_MS))
                }
            }
            Phase::Homing => {
                crate::fmt::info!("auto-test finished");
                self.active = false;
                None
            }
        }
    }
}

impl Default for AutoTest {
    fn default() -> Self {
        Self::new()
    }
}

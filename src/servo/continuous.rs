//! 360° continuous-rotation servo: speed↔pulse map with deadband
//! compensation, ramped speed changes, direction-change lockout, soft stop,
//! and a command safety timeout.
//!
//! Speeds are percentages in [−100, +100]; the pulse map centers on the
//! axis's calibrated neutral and jumps over the deadband so small commands
//! actually turn the shaft.

use num_traits::Float;

use crate::config::{
    SERVO_360_ACCEL_PCT_S, SERVO_360_DEADBAND_US, SERVO_360_DECEL_PCT_S, SERVO_360_DIR_CHANGE_MS,
    SERVO_360_MIN_SPEED_PCT, SERVO_360_NEUTRAL_US, SERVO_360_SAFETY_TIMEOUT_MS,
    SERVO_MAX_PULSE_US, SERVO_MIN_PULSE_US,
};

/// Soft-stop decay applied per update pass; reads as an exponential tail-off.
const SOFT_STOP_FACTOR: f32 = 0.85;

/// Per-axis calibration for a continuous-rotation servo.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration360 {
    /// Measured stop point, µs. Rarely exactly 1500 on real hardware.
    pub neutral_pulse_us: u16,
    pub pulse_min_us: u16,
    pub pulse_max_us: u16,
    /// Band around neutral where the shaft does not turn, ±µs.
    pub deadband_us: u16,
    pub reversed: bool,
}

impl Default for Calibration360 {
    fn default() -> Self {
        Self {
            neutral_pulse_us: SERVO_360_NEUTRAL_US,
            pulse_min_us: SERVO_MIN_PULSE_US,
            pulse_max_us: SERVO_MAX_PULSE_US,
            deadband_us: SERVO_360_DEADBAND_US,
            reversed: false,
        }
    }
}

/// State of one continuous-rotation axis.
#[derive(Clone, Copy, Debug)]
pub struct ContinuousServo {
    pub calibration: Calibration360,
    /// Current ramped speed, percent.
    pub current_speed: f32,
    /// Speed the ramp is heading toward, percent.
    pub target_speed: f32,
    pub current_pulse_us: u16,
    /// Ramp-up rate, percent per second.
    pub accel_rate: f32,
    /// Ramp-down rate, percent per second.
    pub decel_rate: f32,
    pub enabled: bool,
    soft_stopping: bool,
    /// Speed waiting for the direction-change dwell to finish.
    pending_reverse: Option<f32>,
    /// Earliest time the pending reverse may start.
    dir_hold_until_ms: u32,
    last_update_ms: u32,
    last_cmd_ms: u32,
    timed_out: bool,
}

impl Default for ContinuousServo {
    fn default() -> Self {
        Self {
            calibration: Calibration360::default(),
            current_speed: 0.,
            target_speed: 0.,
            current_pulse_us: SERVO_360_NEUTRAL_US,
            accel_rate: SERVO_360_ACCEL_PCT_S,
            decel_rate: SERVO_360_DECEL_PCT_S,
            enabled: false,
            soft_stopping: false,
            pending_reverse: None,
            dir_hold_until_ms: 0,
            last_update_ms: 0,
            last_cmd_ms: 0,
            timed_out: false,
        }
    }
}

impl ContinuousServo {
    /// Commands a new speed. A command that reverses the current rotation
    /// first ramps to neutral and dwells there before heading the other way.
    pub fn set_speed(&mut self, speed_pct: i8, now_ms: u32) {
        let speed = (speed_pct as f32).clamp(-100., 100.);
        self.last_cmd_ms = now_ms;
        self.timed_out = false;
        self.soft_stopping = false;

        let reverses = speed != 0.
            && self.current_speed != 0.
            && (speed > 0.) != (self.current_speed > 0.);
        if reverses {
            self.pending_reverse = Some(speed);
            self.target_speed = 0.;
        } else {
            self.pending_reverse = None;
            self.target_speed = speed;
        }
    }

    /// Ramp the speed to zero with an exponential tail instead of the linear
    /// decel rate.
    pub fn soft_stop(&mut self, now_ms: u32) {
        self.last_cmd_ms = now_ms;
        self.pending_reverse = None;
        self.target_speed = 0.;
        self.soft_stopping = true;
    }

    /// Immediate stop: neutral now, ramp state cleared.
    pub fn hard_stop(&mut self) {
        self.current_speed = 0.;
        self.target_speed = 0.;
        self.pending_reverse = None;
        self.soft_stopping = false;
        self.current_pulse_us = self.calibration.neutral_pulse_us;
    }

    /// True once the safety timeout has forced neutral.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Advances the ramp and returns the pulse to drive. Call every
    /// interpolation tick.
    pub fn update(&mut self, now_ms: u32) -> u16 {
        let dt_ms = now_ms.wrapping_sub(self.last_update_ms);
        self.last_update_ms = now_ms;
        let dt = dt_ms as f32 / 1_000.;

        // Safety: a servo left spinning with a dead host is a gearbox
        // grinder. No fresh command within the window forces neutral.
        if self.target_speed != 0. || self.current_speed != 0. {
            if now_ms.wrapping_sub(self.last_cmd_ms) > SERVO_360_SAFETY_TIMEOUT_MS {
                if !self.timed_out {
                    crate::fmt::warn!("360 servo command timeout, forcing neutral");
                }
                self.timed_out = true;
                self.pending_reverse = None;
                self.target_speed = 0.;
            }
        }

        if self.soft_stopping {
            self.current_speed *= SOFT_STOP_FACTOR;
            if self.current_speed.abs() < 1. {
                self.current_speed = 0.;
                self.soft_stopping = false;
            }
        } else {
            self.ramp_toward_target(dt);
        }

        // Reached neutral with a reverse queued: start (or finish) the dwell.
        if let Some(pending) = self.pending_reverse {
            if self.current_speed == 0. {
                if self.dir_hold_until_ms == 0 {
                    self.dir_hold_until_ms = now_ms.wrapping_add(SERVO_360_DIR_CHANGE_MS);
                } else if now_ms.wrapping_sub(self.dir_hold_until_ms) as i32 >= 0 {
                    self.target_speed = pending;
                    self.pending_reverse = None;
                    self.dir_hold_until_ms = 0;
                }
            }
        } else {
            self.dir_hold_until_ms = 0;
        }

        self.current_pulse_us = self.speed_to_pulse(self.current_speed);
        self.current_pulse_us
    }

    fn ramp_toward_target(&mut self, dt: f32) {
        let delta = self.target_speed - self.current_speed;
        if delta == 0. {
            return;
        }
        // Growing magnitude uses the accel rate, shrinking uses decel.
        let growing = self.target_speed.abs() > self.current_speed.abs();
        let rate = if growing { self.accel_rate } else { self.decel_rate };
        let step = rate * dt;
        if delta.abs() <= step {
            self.current_speed = self.target_speed;
        } else {
            self.current_speed += step * delta.signum();
        }
    }

    /// Maps a percent speed to a pulse width: neutral inside the min-speed
    /// window, otherwise a linear map pushed out past the deadband.
    pub fn speed_to_pulse(&self, speed_pct: f32) -> u16 {
        let cal = &self.calibration;
        let speed = speed_pct.clamp(-100., 100.);
        let speed = if cal.reversed { -speed } else { speed };

        if speed.abs() < SERVO_360_MIN_SPEED_PCT as f32 {
            return cal.neutral_pulse_us;
        }

        let half_span = (cal.pulse_max_us - cal.pulse_min_us) as f32 / 2.;
        let neutral = cal.neutral_pulse_us as f32;
        let mut pulse = neutral + speed / 100. * half_span;

        // Jump the deadband so commanded motion actually happens.
        if speed > 0. {
            pulse = pulse.max(neutral + cal.deadband_us as f32);
        } else {
            pulse = pulse.min(neutral - cal.deadband_us as f32);
        }

        (pulse as i32).clamp(cal.pulse_min_us as i32, cal.pulse_max_us as i32) as u16
    }
}

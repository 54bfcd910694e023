//! Unified servo bank: 18 axes, each either a 180° positional servo or a
//! 360° continuous-rotation one, in front of the hardware PWM bank.
//!
//! The bank is the single writer of PWM pulse registers. Everything above it
//! (interpolators, planner, command handlers) deals in degrees or percent.

pub mod continuous;
pub mod positional;

pub use continuous::{Calibration360, ContinuousServo};
pub use positional::{Calibration, PositionalServo};

use crate::config::{SERVO_COUNT, SERVO_ID_ALL};
use crate::error::ErrorCode;
use crate::hw::PwmBank;

/// What kind of servo is wired to an output channel.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ServoMode {
    #[default]
    Pos180,
    Cont360,
}

/// Operations on the bank fail with one of the servo-class error codes.
pub type ServoResult<T> = Result<T, ErrorCode>;

pub struct ServoBank<P: PwmBank> {
    pwm: P,
    modes: [ServoMode; SERVO_COUNT],
    positional: [PositionalServo; SERVO_COUNT],
    continuous: [ContinuousServo; SERVO_COUNT],
}

impl<P: PwmBank> ServoBank<P> {
    /// All axes default to positional mode, centered, outputs disabled.
    pub fn new(pwm: P) -> Self {
        Self {
            pwm,
            modes: [ServoMode::Pos180; SERVO_COUNT],
            positional: [PositionalServo::default(); SERVO_COUNT],
            continuous: [ContinuousServo::default(); SERVO_COUNT],
        }
    }

    /// Read access to the PWM bank, for diagnostics.
    pub fn pwm(&self) -> &P {
        &self.pwm
    }

    fn check_id(id: u8) -> ServoResult<usize> {
        let idx = id as usize;
        if idx < SERVO_COUNT {
            Ok(idx)
        } else {
            Err(ErrorCode::CmdId)
        }
    }

    pub fn mode(&self, id: u8) -> ServoResult<ServoMode> {
        Ok(self.modes[Self::check_id(id)?])
    }

    pub fn set_mode(&mut self, id: u8, mode: ServoMode) -> ServoResult<()> {
        let idx = Self::check_id(id)?;
        if self.modes[idx] != mode {
            // Park the axis before it changes personality.
            self.continuous[idx].hard_stop();
            self.modes[idx] = mode;
            self.refresh_output(idx);
        }
        Ok(())
    }

    /// Enables or disables outputs. `id` 0xFF addresses every axis.
    pub fn set_enabled(&mut self, id: u8, enabled: bool) -> ServoResult<()> {
        if id == SERVO_ID_ALL {
            for idx in 0..SERVO_COUNT {
                self.set_one_enabled(idx, enabled);
            }
            return Ok(());
        }
        let idx = Self::check_id(id)?;
        self.set_one_enabled(idx, enabled);
        Ok(())
    }

    fn set_one_enabled(&mut self, idx: usize, enabled: bool) {
        self.positional[idx].enabled = enabled;
        self.continuous[idx].enabled = enabled;
        self.pwm.set_enabled(idx, enabled);
        if enabled {
            self.refresh_output(idx);
        }
    }

    pub fn is_enabled(&self, id: u8) -> ServoResult<bool> {
        let idx = Self::check_id(id)?;
        Ok(match self.modes[idx] {
            ServoMode::Pos180 => self.positional[idx].enabled,
            ServoMode::Cont360 => self.continuous[idx].enabled,
        })
    }

    /// Drives a positional axis to an angle. This is the motion pipeline's
    /// per-tick output call; it also serves direct (uninterpolated) moves.
    pub fn apply_angle(&mut self, id: u8, angle: f32) -> ServoResult<()> {
        let idx = Self::check_id(id)?;
        if self.modes[idx] != ServoMode::Pos180 {
            return Err(ErrorCode::CmdParam);
        }
        if !(0. ..=180.).contains(&angle) {
            return Err(ErrorCode::ServoAngle);
        }

        let servo = &mut self.positional[idx];
        servo.current_angle = angle;
        servo.current_pulse_us = servo.angle_to_pulse(angle);
        if servo.enabled {
            self.pwm.set_pulse_us(idx, servo.current_pulse_us);
        }
        Ok(())
    }

    pub fn set_target_angle(&mut self, id: u8, angle: f32) -> ServoResult<()> {
        let idx = Self::check_id(id)?;
        self.positional[idx].target_angle = angle;
        Ok(())
    }

    pub fn angle(&self, id: u8) -> ServoResult<f32> {
        let idx = Self::check_id(id)?;
        Ok(self.positional[idx].current_angle)
    }

    /// Current angles of all axes; continuous axes report their last
    /// positional angle, which the motion planner treats as frozen.
    pub fn snapshot_angles(&self) -> [f32; SERVO_COUNT] {
        let mut angles = [0.; SERVO_COUNT];
        for (angle, servo) in angles.iter_mut().zip(self.positional.iter()) {
            *angle = servo.current_angle;
        }
        angles
    }

    /// Commands a speed on a continuous axis.
    pub fn set_speed(&mut self, id: u8, speed_pct: i8, now_ms: u32) -> ServoResult<()> {
        let idx = Self::check_id(id)?;
        if self.modes[idx] != ServoMode::Cont360 {
            return Err(ErrorCode::CmdParam);
        }
        self.continuous[idx].set_speed(speed_pct, now_ms);
        Ok(())
    }

    pub fn speed(&self, id: u8) -> ServoResult<f32> {
        let idx = Self::check_id(id)?;
        Ok(self.continuous[idx].current_speed)
    }

    /// Ramps every continuous axis and refreshes its pulse. Call on the
    /// interpolation tick.
    pub fn update_continuous(&mut self, now_ms: u32) {
        for idx in 0..SERVO_COUNT {
            if self.modes[idx] != ServoMode::Cont360 {
                continue;
            }
            let pulse = self.continuous[idx].update(now_ms);
            if self.continuous[idx].enabled {
                self.pwm.set_pulse_us(idx, pulse);
            }
        }
    }

    /// Stops all motion output immediately: continuous axes to neutral,
    /// every channel disabled. Used by EStop.
    pub fn emergency_stop(&mut self) {
        for idx in 0..SERVO_COUNT {
            self.continuous[idx].hard_stop();
            self.positional[idx].enabled = false;
            self.continuous[idx].enabled = false;
            self.pwm.set_enabled(idx, false);
        }
    }

    pub fn calibration(&self, id: u8) -> ServoResult<Calibration> {
        let idx = Self::check_id(id)?;
        Ok(self.positional[idx].calibration)
    }

    pub fn set_calibration(&mut self, id: u8, cal: Calibration) -> ServoResult<()> {
        let idx = Self::check_id(id)?;
        if !cal.is_valid() {
            return Err(ErrorCode::CmdParam);
        }
        self.positional[idx].calibration = cal;
        self.refresh_output(idx);
        Ok(())
    }

    /// Re-derives the output pulse from current state, e.g. after a
    /// calibration change or re-enable.
    fn refresh_output(&mut self, idx: usize) {
        match self.modes[idx] {
            ServoMode::Pos180 => {
                let servo = &mut self.positional[idx];
                servo.current_pulse_us = servo.angle_to_pulse(servo.current_angle);
                if servo.enabled {
                    self.pwm.set_pulse_us(idx, servo.current_pulse_us);
                }
            }
            ServoMode::Cont360 => {
                let servo = &self.continuous[idx];
                if servo.enabled {
                    self.pwm.set_pulse_us(idx, servo.current_pulse_us);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Records the last pulse and enable state per channel.
    #[derive(Debug)]
    pub struct MockPwm {
        pub pulses: [u16; SERVO_COUNT],
        pub enabled: [bool; SERVO_COUNT],
        pub writes: usize,
    }

    impl MockPwm {
        pub fn new() -> Self {
            Self {
                pulses: [0; SERVO_COUNT],
                enabled: [false; SERVO_COUNT],
                writes: 0,
            }
        }
    }

    impl PwmBank for MockPwm {
        fn set_pulse_us(&mut self, channel: usize, pulse_us: u16) {
            self.pulses[channel] = pulse_us;
            self.writes += 1;
        }

        fn set_enabled(&mut self, channel: usize, enabled: bool) {
            self.enabled[channel] = enabled;
        }
    }

    pub fn bank() -> ServoBank<MockPwm> {
        ServoBank::new(MockPwm::new())
    }
}

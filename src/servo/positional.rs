//! 180° positional servo: linear angle↔pulse map with per-axis calibration.
//!
//! Calibration narrows the usable pulse band and can reverse the direction or
//! shift the center; the map clamps everything so no combination of inputs
//! produces a pulse outside the calibrated band.

use crate::config::{SERVO_MAX_ANGLE, SERVO_MAX_PULSE_US, SERVO_MIN_PULSE_US};

/// Per-axis calibration for a positional servo.
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    /// Smallest pulse the horn may be driven to, µs.
    pub pulse_min_us: u16,
    /// Largest pulse the horn may be driven to, µs.
    pub pulse_max_us: u16,
    /// Center trim added after scaling, µs.
    pub offset_us: i16,
    /// Mirror the angle axis (0° ↔ 180°).
    pub reversed: bool,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            pulse_min_us: SERVO_MIN_PULSE_US,
            pulse_max_us: SERVO_MAX_PULSE_US,
            offset_us: 0,
            reversed: false,
        }
    }
}

impl Calibration {
    /// A calibration is usable when its band is non-empty and inside the
    /// hardware's absolute 500–2500 µs range.
    pub fn is_valid(&self) -> bool {
        self.pulse_min_us >= SERVO_MIN_PULSE_US
            && self.pulse_max_us <= SERVO_MAX_PULSE_US
            && self.pulse_min_us < self.pulse_max_us
    }
}

/// State of one positional axis.
#[derive(Clone, Copy, Debug)]
pub struct PositionalServo {
    pub calibration: Calibration,
    pub current_angle: f32,
    pub target_angle: f32,
    pub current_pulse_us: u16,
    pub enabled: bool,
}

impl Default for PositionalServo {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            current_angle: 90.,
            target_angle: 90.,
            current_pulse_us: crate::config::SERVO_CENTER_PULSE_US,
            enabled: false,
        }
    }
}

impl PositionalServo {
    /// Maps an angle in degrees to a pulse width in µs under this axis's
    /// calibration. Input is clamped to [0, 180], output to the calibrated
    /// band.
    pub fn angle_to_pulse(&self, angle: f32) -> u16 {
        let cal = &self.calibration;
        let angle = angle.clamp(0., SERVO_MAX_ANGLE);
        let effective = if cal.reversed {
            SERVO_MAX_ANGLE - angle
        } else {
            angle
        };

        let span = (cal.pulse_max_us - cal.pulse_min_us) as f32;
        let pulse = cal.pulse_min_us as f32 + effective / SERVO_MAX_ANGLE * span + cal.offset_us as f32;

        (pulse as i32).clamp(cal.pulse_min_us as i32, cal.pulse_max_us as i32) as u16
    }

    /// Inverse of [`angle_to_pulse`](Self::angle_to_pulse), with the same
    /// reversal and offset handling.
    pub fn pulse_to_angle(&self, pulse_us: u16) -> f32 {
        let cal = &self.calibration;
        let pulse = (pulse_us as i32).clamp(cal.pulse_min_us as i32, cal.pulse_max_us as i32) as f32;

        let span = (cal.pulse_max_us - cal.pulse_min_us) as f32;
        let effective =
            ((pulse - cal.offset_us as f32 - cal.pulse_min_us as f32) / span * SERVO_MAX_ANGLE)
                .clamp(0., SERVO_MAX_ANGLE);

        if cal.reversed {
            SERVO_MAX_ANGLE - effective
        } else {
            effective
        }
    }
}

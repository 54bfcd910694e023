//! Fixed system parameters. Everything here is a compile-time constant; runtime
//! calibration lives in the flash record (`store`), not here.

/// Number of PWM output channels, and therefore axes.
pub const SERVO_COUNT: usize = 18;

/// Firmware version reported by `Ping`.
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;
pub const VERSION_PATCH: u8 = 0;

// Positional (180°) servo pulse range. Calibration may narrow these per axis,
// but never widen them.
pub const SERVO_MIN_PULSE_US: u16 = 500;
pub const SERVO_MAX_PULSE_US: u16 = 2_500;
pub const SERVO_CENTER_PULSE_US: u16 = 1_500;
pub const SERVO_MAX_ANGLE: f32 = 180.;

// Continuous-rotation (360°) servo defaults.
pub const SERVO_360_NEUTRAL_US: u16 = 1_500;
/// Pulse band around neutral within which the servo does not rotate, in µs.
pub const SERVO_360_DEADBAND_US: u16 = 50;
/// Commands below this magnitude (percent) snap to neutral.
pub const SERVO_360_MIN_SPEED_PCT: i8 = 5;
/// Default ramp rates, in percent per second.
pub const SERVO_360_ACCEL_PCT_S: f32 = 50.;
pub const SERVO_360_DECEL_PCT_S: f32 = 80.;
/// Dwell at neutral when the commanded direction flips, in ms.
pub const SERVO_360_DIR_CHANGE_MS: u32 = 200;
/// With no fresh speed command for this long, force neutral.
pub const SERVO_360_SAFETY_TIMEOUT_MS: u32 = 3_000;

// Tick cadences. The 1 ms system tick drives the AO time events; the other
// two are derived from it.
pub const SYS_TICK_MS: u32 = 1;
pub const INTERP_TICK_MS: u32 = 20;
pub const SCHED_TICK_MS: u32 = 10;
pub const COMM_TICK_MS: u32 = 10;
pub const LED_TICK_MS: u32 = 50;

// Wire protocol.
pub const PROTOCOL_HEADER_1: u8 = 0xFF;
pub const PROTOCOL_HEADER_2: u8 = 0xFE;
pub const PROTOCOL_MAX_DATA_LEN: usize = 128;
/// Header(2) + id + cmd + len + data + crc(2).
pub const PROTOCOL_MAX_FRAME_LEN: usize = 7 + PROTOCOL_MAX_DATA_LEN;
/// Inter-byte timeout before the parser gives up on a partial frame.
pub const PROTOCOL_TIMEOUT_MS: u32 = 1_000;
/// Id 0x00 is broadcast: commands are executed but never answered.
pub const PROTOCOL_ID_BROADCAST: u8 = 0x00;
/// Id wildcard used in Enable/Disable payloads to address every axis.
pub const SERVO_ID_ALL: u8 = 0xFF;

// Cross-core USB rings.
pub const USB_TX_RING_SIZE: usize = 1_024;
pub const USB_RX_RING_SIZE: usize = 512;

// Motion planner.
pub const PLANNER_BUFFER_SIZE: usize = 32;
/// Cornering aggressiveness for the junction-speed rule.
pub const JUNCTION_DEVIATION: f32 = 0.05;
/// Junctions never plan below this, in deg/s.
pub const MIN_JUNCTION_SPEED: f32 = 5.;
/// Below this distance (deg) a block is fitted as a no-op.
pub const MIN_PLAN_DISTANCE: f32 = 0.01;

/// Per-axis trajectory queue depth. Independent of the planner ring.
pub const MAX_TRAJECTORY_POINTS: usize = 50;

// AO event queue depths.
pub const COMM_QUEUE_DEPTH: usize = 8;
pub const MOTION_QUEUE_DEPTH: usize = 8;
pub const SYSTEM_QUEUE_DEPTH: usize = 4;

// LED blink half-periods per system state, in ms.
pub const LED_BLINK_NORMAL_MS: u32 = 1_000;
pub const LED_BLINK_MOVING_MS: u32 = 250;
pub const LED_BLINK_ERROR_MS: u32 = 100;
pub const LED_BLINK_ESTOP_MS: u32 = 50;

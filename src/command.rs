//! Command dispatch: parsed frames in, response payloads and AO events out.
//!
//! The dispatcher runs inside the Communication AO's run-to-completion step.
//! Reads answer synchronously from the Motion AO's state; state-machine
//! transitions (moves, stops, flash traffic) are posted as events and take
//! effect after this handler returns. Data-plane structures the Motion AO
//! owns outright (planner buffer, trajectory queues, the servo bank's
//! enable/mode/speed surface) are called directly so failure results such as
//! a full buffer reach the host in the same response frame.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use num_traits::Float;

use crate::ao::{MotionAo, ServoSnapshot, SystemAo, SystemAoState};
use crate::config::{SERVO_COUNT, SERVO_ID_ALL, VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH};
use crate::error::SystemState;
use crate::hw::{FlashDevice, PwmBank, StatusLed};
use crate::motion::{MotionParams, TrajectoryError, TrajectoryPoint};
use crate::protocol::Frame;
use crate::runtime::{AoId, Event, MotionStartEvt, Router};
use crate::servo::ServoMode;

/// Command bytes on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    MoveSingle = 0x01,
    SetSpeed = 0x02,
    MoveAll = 0x03,
    MoveTrapezoid = 0x04,
    TrajAddPoint = 0x05,
    TrajStart = 0x06,
    TrajStop = 0x07,
    TrajClear = 0x08,
    TrajGetInfo = 0x09,
    GetSingle = 0x10,
    GetAll = 0x11,
    GetStats = 0x12,
    Enable = 0x20,
    Disable = 0x21,
    SetMode = 0x22,
    SaveFlash = 0x30,
    LoadFlash = 0x31,
    FactoryReset = 0x32,
    BufAddMove = 0x40,
    BufStart = 0x41,
    BufStop = 0x42,
    BufPause = 0x43,
    BufClear = 0x44,
    BufStatus = 0x45,
    BufAddSpeed = 0x46,
    Ping = 0xFE,
    EStop = 0xFF,
}

/// Response codes, first byte of every response payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Response {
    Ok = 0,
    Error = 1,
    InvalidCmd = 2,
    InvalidParam = 3,
    Crc = 4,
    Timeout = 5,
    Busy = 6,
}

/// Link counters reported by `GetStats`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkStats {
    pub frames: u32,
    pub crc_errors: u32,
    pub timeouts: u32,
    pub rx_overflow: u32,
    pub cmd_errors: u32,
}

/// Outcome of one command: the response code plus optional payload.
pub struct CommandResult {
    pub resp: Response,
    pub data: heapless::Vec<u8, 96>,
}

impl CommandResult {
    fn ok() -> Self {
        Self {
            resp: Response::Ok,
            data: heapless::Vec::new(),
        }
    }

    fn err(resp: Response) -> Self {
        Self {
            resp,
            data: heapless::Vec::new(),
        }
    }

    fn push(&mut self, byte: u8) {
        // Payload sizes are bounded by construction; a full Vec here is a
        // bug, not a runtime condition.
        let _ = self.data.push(byte);
    }

    fn push_u16(&mut self, value: u16) {
        self.push((value >> 8) as u8);
        self.push(value as u8);
    }

    fn push_u32(&mut self, value: u32) {
        for byte in value.to_be_bytes() {
            self.push(byte);
        }
    }
}

fn be_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_i16(bytes: &[u8]) -> i16 {
    i16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn valid_servo_id(id: u8) -> bool {
    (id as usize) < SERVO_COUNT
}

/// Angle wire format: degrees × 100, so 0..=18000.
fn angle_from_wire(raw: u16) -> Option<f32> {
    if raw > 18_000 {
        None
    } else {
        Some(raw as f32 / 100.)
    }
}

fn angle_to_wire(angle: f32) -> u16 {
    (angle.clamp(0., 180.) * 100.).round() as u16
}

/// Handles one validated frame. Returns the response to send (the Comm AO
/// suppresses it for broadcast frames).
pub fn dispatch<P: PwmBank, F: FlashDevice, L: StatusLed>(
    frame: &Frame,
    now_ms: u32,
    motion: &mut MotionAo<P>,
    system: &SystemAo<F, L>,
    stats: &LinkStats,
    router: &mut Router,
) -> CommandResult {
    let cmd = match Command::try_from(frame.cmd) {
        Ok(cmd) => cmd,
        Err(_) => {
            crate::fmt::warn!("unknown command byte");
            return CommandResult::err(Response::InvalidCmd);
        }
    };
    let data = frame.data();

    match cmd {
        Command::MoveSingle => cmd_move_single(data, motion, system, router),
        Command::SetSpeed => cmd_set_speed(data, now_ms, motion, system),
        Command::MoveAll => cmd_move_all(data, motion, system, router),
        Command::MoveTrapezoid => cmd_move_trapezoid(data, motion, system, router),
        Command::TrajAddPoint => cmd_traj_add_point(data, motion),
        Command::TrajStart => cmd_traj_start(data, motion, system),
        Command::TrajStop => cmd_traj_simple(data, motion, |m, id| m.traj_stop(id)),
        Command::TrajClear => cmd_traj_simple(data, motion, |m, id| m.traj_clear(id)),
        Command::TrajGetInfo => cmd_traj_get_info(data, motion),
        Command::GetSingle => cmd_get_single(data, motion),
        Command::GetAll => cmd_get_all(motion),
        Command::GetStats => cmd_get_stats(stats),
        Command::Enable => cmd_enable(data, true, motion, router),
        Command::Disable => cmd_enable(data, false, motion, router),
        Command::SetMode => cmd_set_mode(data, motion),
        Command::SaveFlash => {
            router.post(AoId::System, Event::CmdFlashSave);
            CommandResult::ok()
        }
        Command::LoadFlash => {
            router.post(AoId::System, Event::CmdFlashLoad);
            CommandResult::ok()
        }
        Command::FactoryReset => {
            router.post(AoId::System, Event::FactoryReset);
            CommandResult::ok()
        }
        Command::BufAddMove => cmd_buf_add_move(data, motion, system),
        Command::BufAddSpeed => cmd_buf_add_speed(data, motion, system),
        Command::BufStart => {
            if system.is_estopped() {
                return CommandResult::err(Response::Error);
            }
            motion.buffer_start(now_ms);
            CommandResult::ok()
        }
        Command::BufStop => {
            motion.buffer_stop();
            CommandResult::ok()
        }
        Command::BufPause => {
            if data.is_empty() {
                return CommandResult::err(Response::InvalidParam);
            }
            motion.buffer_pause(data[0] != 0);
            CommandResult::ok()
        }
        Command::BufClear => {
            motion.buffer_clear();
            CommandResult::ok()
        }
        Command::BufStatus => {
            let (count, free, running, paused) = motion.buffer_status();
            let mut result = CommandResult::ok();
            result.push(count);
            result.push(free);
            result.push(running as u8);
            result.push(paused as u8);
            result
        }
        Command::Ping => cmd_ping(motion, system),
        Command::EStop => {
            router.post(AoId::Motion, Event::EStop);
            router.post(AoId::System, Event::EStop);
            CommandResult::ok()
        }
    }
}

fn reject_while_estopped<F: FlashDevice, L: StatusLed>(
    system: &SystemAo<F, L>,
) -> Option<CommandResult> {
    if system.is_estopped() {
        Some(CommandResult::err(Response::Error))
    } else {
        None
    }
}

/// MoveSingle: every axis is targeted at its current angle, with only the
/// commanded axis overwritten, so a partial event can never drag bystander
/// axes along.
fn cmd_move_single<P: PwmBank, F: FlashDevice, L: StatusLed>(
    data: &[u8],
    motion: &mut MotionAo<P>,
    system: &SystemAo<F, L>,
    router: &mut Router,
) -> CommandResult {
    if data.len() < 5 {
        return CommandResult::err(Response::InvalidParam);
    }
    let id = data[0];
    if !valid_servo_id(id) {
        return CommandResult::err(Response::InvalidParam);
    }
    let angle = match angle_from_wire(be_u16(&data[1..3])) {
        Some(angle) => angle,
        None => return CommandResult::err(Response::InvalidParam),
    };
    if let Some(result) = reject_while_estopped(system) {
        return result;
    }
    let duration_ms = be_u16(&data[3..5]) as u32;

    let mut targets = motion.current_angles();
    targets[id as usize] = angle;
    router.post(
        AoId::Motion,
        Event::MotionStart(MotionStartEvt::all_axes(targets, duration_ms)),
    );
    CommandResult::ok()
}

fn cmd_move_all<P: PwmBank, F: FlashDevice, L: StatusLed>(
    data: &[u8],
    motion: &mut MotionAo<P>,
    system: &SystemAo<F, L>,
    router: &mut Router,
) -> CommandResult {
    if data.len() < SERVO_COUNT * 2 + 2 {
        return CommandResult::err(Response::InvalidParam);
    }
    let mut targets = motion.current_angles();
    for (i, target) in targets.iter_mut().enumerate() {
        match angle_from_wire(be_u16(&data[i * 2..i * 2 + 2])) {
            Some(angle) => *target = angle,
            None => return CommandResult::err(Response::InvalidParam),
        }
    }
    if let Some(result) = reject_while_estopped(system) {
        return result;
    }
    let duration_ms = be_u16(&data[SERVO_COUNT * 2..SERVO_COUNT * 2 + 2]) as u32;

    router.post(
        AoId::Motion,
        Event::MotionStart(MotionStartEvt::all_axes(targets, duration_ms)),
    );
    CommandResult::ok()
}

fn cmd_move_trapezoid<P: PwmBank, F: FlashDevice, L: StatusLed>(
    data: &[u8],
    motion: &mut MotionAo<P>,
    system: &SystemAo<F, L>,
    router: &mut Router,
) -> CommandResult {
    if data.len() < 9 {
        return CommandResult::err(Response::InvalidParam);
    }
    let id = data[0];
    if !valid_servo_id(id) {
        return CommandResult::err(Response::InvalidParam);
    }
    let target = be_i16(&data[1..3]) as f32 / 100.;
    let v_max = be_u16(&data[3..5]) as f32 / 10.;
    let accel = be_u16(&data[5..7]) as f32 / 10.;
    let decel = be_u16(&data[7..9]) as f32 / 10.;
    if !(0. ..=180.).contains(&target) || v_max <= 0. || accel <= 0. {
        return CommandResult::err(Response::InvalidParam);
    }
    if let Some(result) = reject_while_estopped(system) {
        return result;
    }

    router.post(
        AoId::Motion,
        Event::CmdMoveTrapezoid {
            servo_id: id,
            target_angle: target,
            params: MotionParams {
                max_velocity: v_max,
                acceleration: accel,
                deceleration: decel,
            },
        },
    );
    // The follow-up MotionStart flips the AO into Moving while preserving
    // the staged profile.
    let targets = motion.current_angles();
    router.post(
        AoId::Motion,
        Event::MotionStart(MotionStartEvt::all_axes(targets, 0)),
    );
    CommandResult::ok()
}

fn cmd_set_speed<P: PwmBank, F: FlashDevice, L: StatusLed>(
    data: &[u8],
    now_ms: u32,
    motion: &mut MotionAo<P>,
    system: &SystemAo<F, L>,
) -> CommandResult {
    if data.len() < 2 {
        return CommandResult::err(Response::InvalidParam);
    }
    if let Some(result) = reject_while_estopped(system) {
        return result;
    }
    let speed = data[1] as i8;
    if !(-100..=100).contains(&speed) {
        return CommandResult::err(Response::InvalidParam);
    }
    match motion.set_speed(data[0], speed, now_ms) {
        Ok(()) => CommandResult::ok(),
        Err(_) => CommandResult::err(Response::InvalidParam),
    }
}

fn cmd_traj_add_point<P: PwmBank>(data: &[u8], motion: &mut MotionAo<P>) -> CommandResult {
    if data.len() < 11 {
        return CommandResult::err(Response::InvalidParam);
    }
    let id = data[0];
    if !valid_servo_id(id) {
        return CommandResult::err(Response::InvalidParam);
    }
    let position = be_i16(&data[1..3]) as f32 / 100.;
    if !(0. ..=180.).contains(&position) {
        return CommandResult::err(Response::InvalidParam);
    }
    let point = TrajectoryPoint {
        position,
        params: MotionParams {
            max_velocity: be_u16(&data[3..5]) as f32 / 10.,
            acceleration: be_u16(&data[5..7]) as f32 / 10.,
            deceleration: be_u16(&data[7..9]) as f32 / 10.,
        },
        dwell_ms: be_u16(&data[9..11]) as u32,
    };
    match motion.traj_add(id, point) {
        Ok(()) => CommandResult::ok(),
        Err(TrajectoryError::Full) => CommandResult::err(Response::Busy),
        Err(_) => CommandResult::err(Response::Error),
    }
}

fn cmd_traj_start<P: PwmBank, F: FlashDevice, L: StatusLed>(
    data: &[u8],
    motion: &mut MotionAo<P>,
    system: &SystemAo<F, L>,
) -> CommandResult {
    if data.len() < 2 {
        return CommandResult::err(Response::InvalidParam);
    }
    let id = data[0];
    if !valid_servo_id(id) {
        return CommandResult::err(Response::InvalidParam);
    }
    if let Some(result) = reject_while_estopped(system) {
        return result;
    }
    match motion.traj_start(id, data[1] != 0) {
        Ok(()) => CommandResult::ok(),
        Err(_) => CommandResult::err(Response::InvalidParam),
    }
}

fn cmd_traj_simple<P: PwmBank>(
    data: &[u8],
    motion: &mut MotionAo<P>,
    op: impl FnOnce(&mut MotionAo<P>, u8),
) -> CommandResult {
    if data.is_empty() || !valid_servo_id(data[0]) {
        return CommandResult::err(Response::InvalidParam);
    }
    op(motion, data[0]);
    CommandResult::ok()
}

fn cmd_traj_get_info<P: PwmBank>(data: &[u8], motion: &MotionAo<P>) -> CommandResult {
    if data.is_empty() || !valid_servo_id(data[0]) {
        return CommandResult::err(Response::InvalidParam);
    }
    let (count, index, running, looping) = motion.traj_info(data[0]);
    let mut result = CommandResult::ok();
    result.push(count);
    result.push(index);
    result.push(running as u8);
    result.push(looping as u8);
    result
}

fn cmd_get_single<P: PwmBank>(data: &[u8], motion: &MotionAo<P>) -> CommandResult {
    if data.is_empty() {
        return CommandResult::err(Response::InvalidParam);
    }
    let id = data[0];
    let (angle, enabled) = match (motion.angle(id), motion.is_enabled(id)) {
        (Ok(angle), Ok(enabled)) => (angle, enabled),
        _ => return CommandResult::err(Response::InvalidParam),
    };

    let mut result = CommandResult::ok();
    result.push(id);
    result.push_u16(angle_to_wire(angle));
    result.push(enabled as u8);
    result
}

fn cmd_get_all<P: PwmBank>(motion: &MotionAo<P>) -> CommandResult {
    let angles = motion.current_angles();
    let mut result = CommandResult::ok();
    for (i, &angle) in angles.iter().enumerate() {
        result.push(i as u8);
        result.push_u16(angle_to_wire(angle));
    }
    result
}

fn cmd_get_stats(stats: &LinkStats) -> CommandResult {
    let mut result = CommandResult::ok();
    result.push_u32(stats.frames);
    result.push_u32(stats.crc_errors);
    result.push_u32(stats.timeouts);
    result.push_u32(stats.rx_overflow);
    result.push_u32(stats.cmd_errors);
    result
}

fn cmd_enable<P: PwmBank>(
    data: &[u8],
    enable: bool,
    motion: &mut MotionAo<P>,
    router: &mut Router,
) -> CommandResult {
    if data.is_empty() {
        return CommandResult::err(Response::InvalidParam);
    }
    let id = data[0];
    if id != SERVO_ID_ALL && !valid_servo_id(id) {
        return CommandResult::err(Response::InvalidParam);
    }
    match motion.set_enabled(id, enable) {
        Ok(()) => {
            // The System AO watches enable-all to release the EStop latch.
            router.post(AoId::System, Event::CmdEnable { id, enable });
            CommandResult::ok()
        }
        Err(_) => CommandResult::err(Response::InvalidParam),
    }
}

fn cmd_set_mode<P: PwmBank>(data: &[u8], motion: &mut MotionAo<P>) -> CommandResult {
    if data.len() < 2 || !valid_servo_id(data[0]) {
        return CommandResult::err(Response::InvalidParam);
    }
    let mode = match data[1] {
        0 => ServoMode::Pos180,
        1 => ServoMode::Cont360,
        _ => return CommandResult::err(Response::InvalidParam),
    };
    match motion.set_mode(data[0], mode) {
        Ok(()) => CommandResult::ok(),
        Err(_) => CommandResult::err(Response::InvalidParam),
    }
}

fn cmd_buf_add_move<P: PwmBank, F: FlashDevice, L: StatusLed>(
    data: &[u8],
    motion: &mut MotionAo<P>,
    system: &SystemAo<F, L>,
) -> CommandResult {
    if data.len() < 13 {
        return CommandResult::err(Response::InvalidParam);
    }
    let id = data[0];
    if !valid_servo_id(id) {
        return CommandResult::err(Response::InvalidParam);
    }
    let target = be_i16(&data[1..3]) as f32 / 100.;
    let v_max = be_u16(&data[3..5]) as f32 / 10.;
    let accel = be_u16(&data[5..7]) as f32 / 10.;
    let decel = be_u16(&data[7..9]) as f32 / 10.;
    let timestamp_ms = be_u32(&data[9..13]);
    if !(0. ..=180.).contains(&target) || v_max <= 0. || accel <= 0. {
        return CommandResult::err(Response::InvalidParam);
    }
    if let Some(result) = reject_while_estopped(system) {
        return result;
    }
    match motion.buffer_add_move(timestamp_ms, id, target, v_max, accel, decel) {
        Ok(()) => CommandResult::ok(),
        Err(_) => CommandResult::err(Response::Busy),
    }
}

fn cmd_buf_add_speed<P: PwmBank, F: FlashDevice, L: StatusLed>(
    data: &[u8],
    motion: &mut MotionAo<P>,
    system: &SystemAo<F, L>,
) -> CommandResult {
    if data.len() < 12 {
        return CommandResult::err(Response::InvalidParam);
    }
    let id = data[0];
    if !valid_servo_id(id) || motion.mode(id) != Ok(ServoMode::Cont360) {
        return CommandResult::err(Response::InvalidParam);
    }
    let speed = data[1] as i8;
    if !(-100..=100).contains(&speed) {
        return CommandResult::err(Response::InvalidParam);
    }
    if let Some(result) = reject_while_estopped(system) {
        return result;
    }
    let accel = data[2] as f32;
    let decel = data[3] as f32;
    let duration_ms = be_u32(&data[4..8]);
    let timestamp_ms = be_u32(&data[8..12]);
    match motion.buffer_add_speed(timestamp_ms, id, speed as f32, accel, decel, duration_ms) {
        Ok(()) => CommandResult::ok(),
        Err(_) => CommandResult::err(Response::Busy),
    }
}

fn cmd_ping<P: PwmBank, F: FlashDevice, L: StatusLed>(
    motion: &MotionAo<P>,
    system: &SystemAo<F, L>,
) -> CommandResult {
    let state = match system.state() {
        SystemAoState::EStop => SystemState::EmergencyStop,
        SystemAoState::Error => SystemState::Error,
        SystemAoState::Normal if motion.is_moving() => SystemState::Moving,
        SystemAoState::Normal => SystemState::Idle,
    };
    let mut result = CommandResult::ok();
    result.push(VERSION_MAJOR);
    result.push(VERSION_MINOR);
    result.push(VERSION_PATCH);
    result.push(state.into());
    result
}

/// Builds the snapshot the System AO needs when its events are delivered.
pub fn servo_snapshot<P: PwmBank>(motion: &MotionAo<P>) -> ServoSnapshot {
    ServoSnapshot {
        angles: motion.current_angles(),
        calibrations: motion.calibrations(),
        moving: motion.is_moving(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ao::system::test_support::MockLed;
    use crate::protocol::{build_frame, FrameParser};
    use crate::servo::test_support::MockPwm;
    use crate::store::test_support::MockFlash;

    struct Fixture {
        motion: MotionAo<MockPwm>,
        system: SystemAo<MockFlash, MockLed>,
        stats: LinkStats,
        router: Router,
    }

    impl Fixture {
        fn new() -> Self {
            let mut motion = MotionAo::new(MockPwm::new());
            motion.set_enabled(SERVO_ID_ALL, true).unwrap();
            Self {
                motion,
                system: SystemAo::new(MockFlash::new(), MockLed::new()),
                stats: LinkStats::default(),
                router: Router::new(),
            }
        }

        fn run(&mut self, cmd: u8, payload: &[u8]) -> CommandResult {
            let frame = make_frame(cmd, payload);
            dispatch(
                &frame,
                0,
                &mut self.motion,
                &self.system,
                &self.stats,
                &mut self.router,
            )
        }
    }

    fn make_frame(cmd: u8, payload: &[u8]) -> Frame {
        let mut wire = [0u8; 160];
        let n = build_frame(&mut wire, 0x01, cmd, payload).unwrap();
        let mut parser = FrameParser::new();
        let mut frame = None;
        for &byte in &wire[..n] {
            if let Some(f) = parser.push(byte, 0) {
                frame = Some(f);
            }
        }
        frame.expect("test frame did not parse")
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut fx = Fixture::new();
        let result = fx.run(0x77, &[]);
        assert_eq!(result.resp, Response::InvalidCmd);
    }

    #[test]
    fn move_single_validates_and_posts() {
        let mut fx = Fixture::new();
        // Servo 1 to 90.00° over 500 ms.
        let result = fx.run(0x01, &[0x01, 0x23, 0x28, 0x01, 0xF4]);
        assert_eq!(result.resp, Response::Ok);

        match fx.router.drain() {
            Some((AoId::Motion, Event::MotionStart(evt))) => {
                assert_eq!(evt.target_positions[1], 90.);
                assert_eq!(evt.duration_ms, 500);
                // Bystander axes keep their current angle.
                assert_eq!(evt.target_positions[0], 90.);
                assert_eq!(evt.axis_count as usize, SERVO_COUNT);
            }
            _ => panic!("expected a MotionStart for the Motion AO"),
        }
    }

    #[test]
    fn move_single_rejects_bad_inputs() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run(0x01, &[0x01, 0x23]).resp, Response::InvalidParam);
        assert_eq!(
            fx.run(0x01, &[18, 0x23, 0x28, 0x01, 0xF4]).resp,
            Response::InvalidParam
        );
        // 200.00° is out of range.
        let raw = 20_000u16.to_be_bytes();
        assert_eq!(
            fx.run(0x01, &[0x00, raw[0], raw[1], 0x01, 0xF4]).resp,
            Response::InvalidParam
        );
        assert!(fx.router.is_empty());
    }

    #[test]
    fn get_single_payload_layout() {
        let mut fx = Fixture::new();
        let result = fx.run(0x10, &[3]);
        assert_eq!(result.resp, Response::Ok);
        // 90.00° = 9000 = 0x2328, enabled.
        assert_eq!(&result.data[..], &[3, 0x23, 0x28, 1]);
    }

    /// Repeated reads of an idle system are identical; re-enabling an
    /// enabled servo is a no-op Ok.
    #[test]
    fn idempotent_reads_and_enables() {
        let mut fx = Fixture::new();
        let first = fx.run(0x11, &[]);
        let second = fx.run(0x11, &[]);
        assert_eq!(first.resp, Response::Ok);
        assert_eq!(first.data, second.data);
        assert_eq!(first.data.len(), SERVO_COUNT * 3);

        assert_eq!(fx.run(0x20, &[5]).resp, Response::Ok);
        assert_eq!(fx.run(0x20, &[5]).resp, Response::Ok);
        assert_eq!(fx.motion.is_enabled(5), Ok(true));
    }

    #[test]
    fn estop_posts_to_both_aos() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run(0xFF, &[]).resp, Response::Ok);

        let mut to_motion = false;
        let mut to_system = false;
        while let Some((to, event)) = fx.router.drain() {
            assert!(matches!(event, Event::EStop));
            match to {
                AoId::Motion => to_motion = true,
                AoId::System => to_system = true,
                AoId::Comm => {}
            }
        }
        assert!(to_motion && to_system);
    }

    #[test]
    fn motion_commands_refused_while_estopped() {
        let mut fx = Fixture::new();
        fx.system.handle(
            Event::EStop,
            0,
            &ServoSnapshot::default(),
            &mut fx.router,
        );

        assert_eq!(
            fx.run(0x01, &[0x01, 0x23, 0x28, 0x01, 0xF4]).resp,
            Response::Error
        );
        assert_eq!(fx.run(0x41, &[]).resp, Response::Error);
        // Reads still work.
        assert_eq!(fx.run(0x10, &[0]).resp, Response::Ok);
    }

    #[test]
    fn planner_full_reports_busy() {
        let mut fx = Fixture::new();
        let payload = |ts: u32| {
            let mut p = vec![0u8]; // id
            p.extend_from_slice(&9_000i16.to_be_bytes());
            p.extend_from_slice(&900u16.to_be_bytes());
            p.extend_from_slice(&1_800u16.to_be_bytes());
            p.extend_from_slice(&1_800u16.to_be_bytes());
            p.extend_from_slice(&ts.to_be_bytes());
            p
        };
        for i in 0..32 {
            assert_eq!(fx.run(0x40, &payload(i * 100)).resp, Response::Ok);
        }
        assert_eq!(fx.run(0x40, &payload(3_200)).resp, Response::Busy);
    }

    #[test]
    fn ping_reports_version_and_state() {
        let mut fx = Fixture::new();
        let result = fx.run(0xFE, &[]);
        assert_eq!(result.resp, Response::Ok);
        assert_eq!(
            &result.data[..],
            &[VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH, 0]
        );

        fx.system.handle(
            Event::EStop,
            0,
            &ServoSnapshot::default(),
            &mut fx.router,
        );
        let result = fx.run(0xFE, &[]);
        assert_eq!(result.data[3], u8::from(SystemState::EmergencyStop));
    }

    #[test]
    fn trapezoid_command_stages_then_starts() {
        let mut fx = Fixture::new();
        // Servo 2 to 120.00°, v 60.0, a 120.0, d 120.0.
        let mut payload = vec![2u8];
        payload.extend_from_slice(&12_000i16.to_be_bytes());
        payload.extend_from_slice(&600u16.to_be_bytes());
        payload.extend_from_slice(&1_200u16.to_be_bytes());
        payload.extend_from_slice(&1_200u16.to_be_bytes());
        assert_eq!(fx.run(0x04, &payload).resp, Response::Ok);

        let (to, first) = fx.router.drain().unwrap();
        assert_eq!(to, AoId::Motion);
        assert!(matches!(first, Event::CmdMoveTrapezoid { servo_id: 2, .. }));
        let (_, second) = fx.router.drain().unwrap();
        assert!(matches!(second, Event::MotionStart(_)));
    }

    #[test]
    fn set_mode_gates_speed_commands() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run(0x02, &[6, 50]).resp, Response::InvalidParam);
        assert_eq!(fx.run(0x22, &[6, 1]).resp, Response::Ok);
        assert_eq!(fx.run(0x02, &[6, 50]).resp, Response::Ok);
        // Unknown mode byte.
        assert_eq!(fx.run(0x22, &[6, 9]).resp, Response::InvalidParam);
    }

    #[test]
    fn trajectory_command_surface() {
        let mut fx = Fixture::new();
        let mut payload = vec![4u8];
        payload.extend_from_slice(&9_000i16.to_be_bytes());
        payload.extend_from_slice(&900u16.to_be_bytes());
        payload.extend_from_slice(&1_800u16.to_be_bytes());
        payload.extend_from_slice(&1_800u16.to_be_bytes());
        payload.extend_from_slice(&100u16.to_be_bytes());
        assert_eq!(fx.run(0x05, &payload).resp, Response::Ok);

        // Info: one point, not running.
        let info = fx.run(0x09, &[4]);
        assert_eq!(&info.data[..], &[1, 0, 0, 0]);

        assert_eq!(fx.run(0x06, &[4, 0]).resp, Response::Ok);
        assert_eq!(fx.run(0x09, &[4]).data[2], 1);

        assert_eq!(fx.run(0x07, &[4]).resp, Response::Ok);
        assert_eq!(fx.run(0x08, &[4]).resp, Response::Ok);
        assert_eq!(fx.run(0x09, &[4]).data[0], 0);

        // Starting an empty trajectory fails.
        assert_eq!(fx.run(0x06, &[4, 0]).resp, Response::InvalidParam);
    }

    #[test]
    fn get_stats_serializes_counters() {
        let mut fx = Fixture::new();
        fx.stats = LinkStats {
            frames: 7,
            crc_errors: 2,
            timeouts: 1,
            rx_overflow: 300,
            cmd_errors: 4,
        };
        let result = fx.run(0x12, &[]);
        assert_eq!(result.data.len(), 20);
        assert_eq!(&result.data[..4], &7u32.to_be_bytes());
        assert_eq!(&result.data[12..16], &300u32.to_be_bytes());
    }

    #[test]
    fn buffer_status_roundtrip() {
        let mut fx = Fixture::new();
        let status = fx.run(0x45, &[]);
        assert_eq!(&status.data[..], &[0, 32, 0, 0]);

        assert_eq!(fx.run(0x44, &[]).resp, Response::Ok);
        assert_eq!(fx.run(0x42, &[]).resp, Response::Ok);
    }
}

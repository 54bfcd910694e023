//! Motion active object.
//!
//! Owns the servo bank, one interpolator and one trajectory slot per axis,
//! and the planner/scheduler pair. Two states: Idle and Moving. The 20 ms
//! `InterpTick` advances every axis and the 360° ramps; the 10 ms `Timeout`
//! runs the scheduler in both states, so buffered motion fires even while
//! Idle.

use super::autotest::AutoTest;
use crate::config::{INTERP_TICK_MS, SERVO_COUNT};
use crate::error::ErrorCode;
use crate::hw::PwmBank;
use crate::motion::{
    BlockKind, Dispatch, Interpolator, MotionParams, PlannerError, Profile, Scheduler,
    Trajectory, TrajectoryError, TrajectoryPoint,
};
use crate::runtime::{AoId, Event, MotionStartEvt, Router};
use crate::servo::{ServoBank, ServoMode, ServoResult};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionAoState {
    #[default]
    Idle,
    Moving,
}

pub struct MotionAo<P: PwmBank> {
    state: MotionAoState,
    bank: ServoBank<P>,
    interp: [Interpolator; SERVO_COUNT],
    traj: [Trajectory; SERVO_COUNT],
    scheduler: Scheduler,
    autotest: AutoTest,
    /// Axes with a trapezoid staged ahead of the next MotionStart.
    staged: [bool; SERVO_COUNT],
    /// Scheduled stop times for continuous blocks with a duration.
    cont_stop_at: [Option<u32>; SERVO_COUNT],
}

impl<P: PwmBank> MotionAo<P> {
    pub fn new(pwm: P) -> Self {
        const TRAJ: Trajectory = Trajectory::new();
        let mut interp = [Interpolator::default(); SERVO_COUNT];
        for axis in interp.iter_mut() {
            *axis = Interpolator::new(90.);
        }
        Self {
            state: MotionAoState::Idle,
            bank: ServoBank::new(pwm),
            interp,
            traj: [TRAJ; SERVO_COUNT],
            scheduler: Scheduler::new(),
            autotest: AutoTest::new(),
            staged: [false; SERVO_COUNT],
            cont_stop_at: [None; SERVO_COUNT],
        }
    }

    pub fn state(&self) -> MotionAoState {
        self.state
    }

    pub fn is_moving(&self) -> bool {
        self.state == MotionAoState::Moving
    }

    // ---- synchronous command surface (runs in the dispatcher's RTC step) --

    pub fn current_angles(&self) -> [f32; SERVO_COUNT] {
        self.bank.snapshot_angles()
    }

    pub fn angle(&self, id: u8) -> ServoResult<f32> {
        self.bank.angle(id)
    }

    pub fn is_enabled(&self, id: u8) -> ServoResult<bool> {
        self.bank.is_enabled(id)
    }

    pub fn mode(&self, id: u8) -> ServoResult<ServoMode> {
        self.bank.mode(id)
    }

    /// Read access to the PWM bank, for diagnostics.
    pub fn pwm(&self) -> &P {
        self.bank.pwm()
    }

    pub fn calibrations(&self) -> [crate::servo::Calibration; SERVO_COUNT] {
        let mut cals = [crate::servo::Calibration::default(); SERVO_COUNT];
        for (i, cal) in cals.iter_mut().enumerate() {
            *cal = self.bank.calibration(i as u8).unwrap_or_default();
        }
        cals
    }

    pub fn set_enabled(&mut self, id: u8, enabled: bool) -> ServoResult<()> {
        self.bank.set_enabled(id, enabled)
    }

    pub fn set_mode(&mut self, id: u8, mode: ServoMode) -> ServoResult<()> {
        self.bank.set_mode(id, mode)
    }

    pub fn set_speed(&mut self, id: u8, speed_pct: i8, now_ms: u32) -> ServoResult<()> {
        let result = self.bank.set_speed(id, speed_pct, now_ms);
        if result.is_ok() {
            self.cont_stop_at[id as usize] = None;
        }
        result
    }

    pub fn traj_add(&mut self, id: u8, point: TrajectoryPoint) -> Result<(), TrajectoryError> {
        self.traj[id as usize].add_point(point)
    }

    pub fn traj_start(&mut self, id: u8, looping: bool) -> Result<(), TrajectoryError> {
        self.traj[id as usize].start(looping)
    }

    pub fn traj_stop(&mut self, id: u8) {
        self.traj[id as usize].stop();
    }

    pub fn traj_clear(&mut self, id: u8) {
        self.traj[id as usize].clear();
    }

    /// (count, current index, running, looping)
    pub fn traj_info(&self, id: u8) -> (u8, u8, bool, bool) {
        let traj = &self.traj[id as usize];
        (
            traj.len() as u8,
            traj.current_index() as u8,
            traj.is_running(),
            traj.is_looping(),
        )
    }

    pub fn buffer_add_move(
        &mut self,
        timestamp_ms: u32,
        id: u8,
        target: f32,
        v_max: f32,
        accel: f32,
        decel: f32,
    ) -> Result<(), PlannerError> {
        let current = self.bank.angle(id).unwrap_or(90.);
        self.scheduler
            .planner
            .add_move(timestamp_ms, id, target, v_max, accel, decel, current)
    }

    pub fn buffer_add_speed(
        &mut self,
        timestamp_ms: u32,
        id: u8,
        target_pct: f32,
        accel: f32,
        decel: f32,
        duration_ms: u32,
    ) -> Result<(), PlannerError> {
        self.scheduler
            .planner
            .add_continuous(timestamp_ms, id, target_pct, accel, decel, duration_ms)
    }

    pub fn buffer_start(&mut self, now_ms: u32) {
        self.scheduler.start(now_ms);
    }

    pub fn buffer_stop(&mut self) {
        self.scheduler.stop();
    }

    pub fn buffer_pause(&mut self, resume: bool) {
        if resume {
            self.scheduler.resume();
        } else {
            self.scheduler.pause();
        }
    }

    pub fn buffer_clear(&mut self) {
        self.scheduler.clear();
    }

    /// (count, free, running, paused)
    pub fn buffer_status(&self) -> (u8, u8, bool, bool) {
        (
            self.scheduler.planner.count() as u8,
            self.scheduler.planner.free() as u8,
            self.scheduler.is_running(),
            self.scheduler.is_paused(),
        )
    }

    pub fn planner_free(&self) -> usize {
        self.scheduler.planner.free()
    }

    /// Arms the auto-test; the resulting first leg is posted like any other
    /// MotionStart.
    pub fn autotest_start(&mut self, cycles: u32, router: &mut Router) {
        let leg = self.autotest.start(cycles);
        router.post(AoId::Motion, Event::MotionStart(leg));
    }

    pub fn autotest_stop(&mut self) {
        self.autotest.stop();
    }

    pub fn autotest_running(&self) -> bool {
        self.autotest.is_running()
    }

    // ---- event handling ---------------------------------------------------

    pub fn handle(&mut self, event: Event, now_ms: u32, router: &mut Router) {
        match event {
            Event::MotionStart(evt) => self.on_motion_start(&evt),
            Event::CmdMoveTrapezoid {
                servo_id,
                target_angle,
                params,
            } => self.stage_trapezoid(servo_id, target_angle, params),
            Event::InterpTick => self.on_interp_tick(now_ms, router),
            Event::Timeout => self.run_scheduler(now_ms),
            Event::MotionStop => self.stop_all(),
            Event::EStop => self.on_estop(),
            Event::FlashLoaded(record) => self.apply_record(&record),
            Event::CmdEnable { id, enable } => {
                let _ = self.bank.set_enabled(id, enable);
            }
            _ => {}
        }
    }

    /// Idle/Moving → Moving. Staged trapezoids survive; every other axis
    /// follows the event's smoothstep targets (or parks, when a stage is
    /// active).
    fn on_motion_start(&mut self, evt: &MotionStartEvt) {
        let any_staged = self.staged.iter().any(|&s| s);
        let angles = self.bank.snapshot_angles();

        if any_staged {
            for i in 0..SERVO_COUNT {
                if !self.staged[i] {
                    self.interp[i].park(angles[i]);
                }
            }
            self.staged = [false; SERVO_COUNT];
        } else {
            let count = (evt.axis_count as usize).min(SERVO_COUNT);
            for &id in evt.axis_ids[..count].iter() {
                let i = id as usize;
                if i >= SERVO_COUNT {
                    continue;
                }
                if self.bank.mode(id).ok() != Some(ServoMode::Pos180) {
                    continue;
                }
                self.interp[i].set_motion(
                    angles[i],
                    evt.target_positions[i],
                    evt.duration_ms,
                    Profile::Smoothstep,
                );
            }
        }
        self.state = MotionAoState::Moving;
    }

    fn stage_trapezoid(&mut self, servo_id: u8, target_angle: f32, params: MotionParams) {
        let i = servo_id as usize;
        if i >= SERVO_COUNT {
            return;
        }
        let start = self.bank.angle(servo_id).unwrap_or(90.);
        self.interp[i].set_trapezoid(start, target_angle, params);
        self.staged[i] = true;
    }

    fn on_interp_tick(&mut self, now_ms: u32, router: &mut Router) {
        self.bank.update_continuous(now_ms);

        // Expire continuous-block stop deadlines.
        for i in 0..SERVO_COUNT {
            if let Some(at) = self.cont_stop_at[i] {
                if now_ms.wrapping_sub(at) as i32 >= 0 {
                    self.cont_stop_at[i] = None;
                    let _ = self.bank.set_speed(i as u8, 0, now_ms);
                }
            }
        }

        // Trajectory chaining runs regardless of AO state: a reached axis
        // with queued waypoints starts its next leg.
        for i in 0..SERVO_COUNT {
            let axis_state = self.interp[i].state;
            if let Some(point) = self.traj[i].poll(now_ms, axis_state) {
                let start = self.interp[i].current_pos;
                self.interp[i].set_trapezoid(start, point.position, point.params);
                self.state = MotionAoState::Moving;
            }
        }

        if self.state != MotionAoState::Moving {
            return;
        }

        let mut any_moving = false;
        for i in 0..SERVO_COUNT {
            if !self.interp[i].is_moving() {
                continue;
            }
            let pos = self.interp[i].update(INTERP_TICK_MS);

            // A poisoned value must never reach a pulse register.
            if !pos.is_finite() || !(-180. ..=180.).contains(&pos) {
                crate::fmt::error!("interpolator produced invalid position, aborting");
                self.stop_all();
                router.post(
                    AoId::System,
                    Event::Error {
                        code: ErrorCode::ServoAngle,
                        source: AoId::Motion,
                    },
                );
                return;
            }

            let _ = self.bank.apply_angle(i as u8, pos.clamp(0., 180.));
            if self.interp[i].is_moving() {
                any_moving = true;
            }
        }

        if !any_moving {
            // All axes reached (or parked). Completion hook, then Idle.
            self.state = MotionAoState::Idle;
            if let Some(next_leg) = self.autotest.on_motion_complete() {
                router.post(AoId::Motion, Event::MotionStart(next_leg));
            }
        }
    }

    fn run_scheduler(&mut self, now_ms: u32) {
        let MotionAo {
            scheduler,
            interp,
            bank,
            cont_stop_at,
            state,
            ..
        } = self;

        scheduler.update(now_ms, |block| match &block.kind {
            BlockKind::Position(p) => {
                let i = block.servo_id as usize;
                if i >= SERVO_COUNT {
                    return Dispatch::Executed; // drop malformed block
                }
                // One block per axis at a time: wait out the current move.
                if interp[i].is_moving() {
                    return Dispatch::Hold;
                }
                interp[i].set_fitted(p.start_angle, p.target_angle, p.fit);
                *state = MotionAoState::Moving;
                Dispatch::Executed
            }
            BlockKind::Continuous(c) => {
                let i = block.servo_id as usize;
                if i >= SERVO_COUNT {
                    return Dispatch::Executed;
                }
                let _ = bank.set_speed(block.servo_id, c.target_speed_pct as i8, now_ms);
                cont_stop_at[i] = if c.duration_ms > 0 {
                    Some(now_ms.wrapping_add(c.duration_ms))
                } else {
                    None
                };
                Dispatch::Executed
            }
        });
    }

    /// MotionStop: freeze everything where it is.
    fn stop_all(&mut self) {
        for i in 0..SERVO_COUNT {
            self.interp[i].stop();
            self.traj[i].stop();
        }
        self.scheduler.stop();
        self.staged = [false; SERVO_COUNT];
        self.cont_stop_at = [None; SERVO_COUNT];
        self.autotest.stop();
        self.state = MotionAoState::Idle;
    }

    /// EStop: everything MotionStop does, plus dead outputs and a flushed
    /// buffer.
    fn on_estop(&mut self) {
        self.stop_all();
        self.scheduler.clear();
        self.bank.emergency_stop();
        crate::fmt::warn!("motion emergency stop");
    }

    fn apply_record(&mut self, record: &crate::store::StoreRecord) {
        for (i, cal) in record.calibrations.iter().enumerate() {
            let _ = self.bank.set_calibration(i as u8, *cal);
        }
        if record.positions_valid {
            for (i, &pos) in record.saved_positions.iter().enumerate() {
                let id = i as u8;
                if self.bank.mode(id).ok() == Some(ServoMode::Pos180) {
                    let _ = self.bank.apply_angle(id, pos.clamp(0., 180.));
                    self.interp[i].park(pos.clamp(0., 180.));
                }
            }
        }
        crate::fmt::info!("flash record applied to servo bank");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SCHED_TICK_MS;
    use crate::servo::test_support::MockPwm;

    fn ao() -> MotionAo<MockPwm> {
        let mut ao = MotionAo::new(MockPwm::new());
        ao.set_enabled(crate::config::SERVO_ID_ALL, true).unwrap();
        ao
    }

    /// Run interp ticks (20 ms) and scheduler ticks (10 ms) for `ms`.
    fn run(ao: &mut MotionAo<MockPwm>, router: &mut Router, start_ms: u32, ms: u32) -> u32 {
        let mut now = start_ms;
        for _ in 0..ms {
            now += 1;
            if now % SCHED_TICK_MS == 0 {
                ao.handle(Event::Timeout, now, router);
            }
            if now % INTERP_TICK_MS == 0 {
                ao.handle(Event::InterpTick, now, router);
            }
            // Deliver self-posted events (autotest legs etc.).
            while let Some((to, event)) = router.drain() {
                if to == AoId::Motion {
                    ao.handle(event, now, router);
                }
            }
        }
        now
    }

    #[test]
    fn smoothstep_move_reaches_target() {
        let mut ao = ao();
        let mut router = Router::new();

        let mut targets = ao.current_angles();
        targets[3] = 45.;
        ao.handle(
            Event::MotionStart(MotionStartEvt::all_axes(targets, 1_000)),
            0,
            &mut router,
        );
        assert!(ao.is_moving());

        run(&mut ao, &mut router, 0, 1_100);
        assert!(!ao.is_moving());
        assert!((ao.angle(3).unwrap() - 45.).abs() < 0.05);
        // Unmoved axes stay put.
        assert!((ao.angle(0).unwrap() - 90.).abs() < 1e-4);
    }

    #[test]
    fn staged_trapezoid_survives_motion_start() {
        let mut ao = ao();
        let mut router = Router::new();

        ao.handle(
            Event::CmdMoveTrapezoid {
                servo_id: 2,
                target_angle: 120.,
                params: MotionParams {
                    max_velocity: 60.,
                    acceleration: 120.,
                    deceleration: 120.,
                },
            },
            0,
            &mut router,
        );
        // The follow-up MotionStart must not flatten the staged profile into
        // a smoothstep.
        let targets = ao.current_angles();
        ao.handle(
            Event::MotionStart(MotionStartEvt::all_axes(targets, 500)),
            0,
            &mut router,
        );
        assert!(ao.is_moving());
        assert_eq!(ao.interp[2].profile, Profile::Trapezoid);

        run(&mut ao, &mut router, 0, 2_000);
        assert!((ao.angle(2).unwrap() - 120.).abs() < 0.05);
    }

    #[test]
    fn estop_preempts_and_disables() {
        let mut ao = ao();
        let mut router = Router::new();

        let mut targets = ao.current_angles();
        targets[0] = 180.;
        ao.handle(
            Event::MotionStart(MotionStartEvt::all_axes(targets, 3_000)),
            0,
            &mut router,
        );
        let now = run(&mut ao, &mut router, 0, 500);
        let mid = ao.angle(0).unwrap();
        assert!(mid > 90. && mid < 180.);

        ao.handle(Event::EStop, now, &mut router);
        assert!(!ao.is_moving());
        assert!(!ao.is_enabled(0).unwrap());

        // Nothing moves afterwards.
        run(&mut ao, &mut router, now, 500);
        assert_eq!(ao.angle(0).unwrap(), mid);
    }

    #[test]
    fn buffered_moves_fire_while_idle() {
        let mut ao = ao();
        let mut router = Router::new();

        ao.buffer_add_move(0, 5, 120., 90., 180., 180.).unwrap();
        ao.buffer_add_move(2_000, 5, 60., 90., 180., 180.).unwrap();
        ao.buffer_start(0);

        // Idle: the scheduler tick alone must fire the blocks.
        run(&mut ao, &mut router, 0, 1_800);
        assert!((ao.angle(5).unwrap() - 120.).abs() < 0.5);

        run(&mut ao, &mut router, 1_800, 2_500);
        assert!((ao.angle(5).unwrap() - 60.).abs() < 0.5);
        // Drained buffer stops the scheduler.
        assert!(!ao.buffer_status().2);
    }

    #[test]
    fn one_block_per_axis_is_enforced() {
        let mut ao = ao();
        let mut router = Router::new();

        // Two blocks for the same axis with overlapping timestamps: the
        // second must wait for the first to finish.
        ao.buffer_add_move(0, 1, 150., 60., 120., 120.).unwrap();
        ao.buffer_add_move(10, 1, 30., 60., 120., 120.).unwrap();
        ao.buffer_start(0);

        let now = run(&mut ao, &mut router, 0, 100);
        // First block in flight; second held even though its timestamp
        // passed.
        assert_eq!(ao.buffer_status().0, 1);
        assert!(ao.interp[1].is_moving());

        run(&mut ao, &mut router, now, 6_000);
        assert!((ao.angle(1).unwrap() - 30.).abs() < 0.5);
    }

    #[test]
    fn trajectory_chains_waypoints() {
        let mut ao = ao();
        let mut router = Router::new();

        let params = MotionParams {
            max_velocity: 180.,
            acceleration: 360.,
            deceleration: 360.,
        };
        ao.traj_add(
            4,
            TrajectoryPoint {
                position: 120.,
                params,
                dwell_ms: 40,
            },
        )
        .unwrap();
        ao.traj_add(
            4,
            TrajectoryPoint {
                position: 70.,
                params,
                dwell_ms: 0,
            },
        )
        .unwrap();
        ao.traj_start(4, false).unwrap();

        run(&mut ao, &mut router, 0, 3_000);
        assert!((ao.angle(4).unwrap() - 70.).abs() < 0.5);
        assert!(!ao.traj_info(4).2);
    }

    #[test]
    fn invalid_interpolator_output_aborts_to_idle() {
        let mut ao = ao();
        let mut router = Router::new();

        let mut targets = ao.current_angles();
        targets[0] = 150.;
        ao.handle(
            Event::MotionStart(MotionStartEvt::all_axes(targets, 1_000)),
            0,
            &mut router,
        );
        // Poison the axis mid-flight.
        ao.interp[0].target_pos = f32::NAN;
        ao.interp[0].start_pos = f32::NAN;
        ao.handle(Event::InterpTick, 20, &mut router);

        assert!(!ao.is_moving());
        let mut saw_error = false;
        while let Some((to, event)) = router.drain() {
            if to == AoId::System {
                if let Event::Error { code, source } = event {
                    assert_eq!(code, ErrorCode::ServoAngle);
                    assert_eq!(source, AoId::Motion);
                    saw_error = true;
                }
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn autotest_runs_legs_through_completion_hook() {
        let mut ao = ao();
        let mut router = Router::new();

        ao.autotest_start(1, &mut router);
        // Leg 1 event is queued; the run helper delivers it and every
        // follow-up leg the completion hook posts.
        run(&mut ao, &mut router, 0, 7_000);
        assert!(!ao.autotest_running());
        // Final pose is the 90° home.
        assert!((ao.angle(0).unwrap() - 90.).abs() < 0.5);
    }

    #[test]
    fn continuous_block_stops_after_duration() {
        let mut ao = ao();
        let mut router = Router::new();
        ao.set_mode(7, ServoMode::Cont360).unwrap();

        ao.buffer_add_speed(0, 7, 60., 50., 80., 400).unwrap();
        ao.buffer_start(0);

        run(&mut ao, &mut router, 0, 200);
        // Ramping up toward 60%.
        assert!(ao.bank.speed(7).unwrap() > 0.);

        run(&mut ao, &mut router, 200, 2_500);
        // Duration elapsed: commanded back to zero and ramped down.
        assert_eq!(ao.bank.speed(7).unwrap(), 0.);
    }

    #[test]
    fn flash_record_applies_calibration_and_pose() {
        let mut ao = ao();
        let mut router = Router::new();

        let mut record = crate::store::StoreRecord::default();
        record.calibrations[0].pulse_min_us = 1_000;
        record.calibrations[0].pulse_max_us = 2_000;
        record.saved_positions[0] = 45.;
        record.positions_valid = true;

        ao.handle(Event::FlashLoaded(record), 0, &mut router);
        assert_eq!(ao.angle(0).unwrap(), 45.);
        // 45° in a 1000..2000 band: 1000 + 45/180·1000 = 1250.
        assert_eq!(ao.bank.pwm().pulses[0], 1_250);
    }
}

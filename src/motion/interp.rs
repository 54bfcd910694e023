//! Per-axis motion interpolation.
//!
//! Three profiles: linear, smoothstep (3t² − 2t³), and trapezoidal velocity.
//! The trapezoid fit is shared with the planner, which re-fits blocks under
//! non-zero entry/exit speeds; everything is 32-bit float with clamped sqrt
//! arguments and guarded denominators.

use num_traits::Float;

use crate::config::MIN_PLAN_DISTANCE;

/// Interpolation profile for a move.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Profile {
    #[default]
    Linear,
    Smoothstep,
    Trapezoid,
}

/// Axis motion state.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionState {
    #[default]
    Idle,
    Moving,
    Reached,
}

/// Kinematic limits for a trapezoidal move, in deg/s and deg/s².
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotionParams {
    pub max_velocity: f32,
    pub acceleration: f32,
    /// Zero means "use `acceleration`".
    pub deceleration: f32,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            max_velocity: 90.,
            acceleration: 180.,
            deceleration: 0.,
        }
    }
}

impl MotionParams {
    pub fn decel(&self) -> f32 {
        if self.deceleration > 0. {
            self.deceleration
        } else {
            self.acceleration
        }
    }
}

/// A fitted trapezoidal (or triangular) velocity profile over an unsigned
/// distance. Phase times in seconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrapezoidFit {
    pub distance: f32,
    pub entry_speed: f32,
    pub exit_speed: f32,
    pub v_peak: f32,
    pub t_accel: f32,
    pub t_const: f32,
    pub t_decel: f32,
    pub duration_ms: u32,
}

/// Guard for divisions: kinematic rates at or below zero get a floor instead
/// of poisoning the fit with infinities.
fn rate_floor(rate: f32) -> f32 {
    if rate > 1e-6 {
        rate
    } else {
        1e-6
    }
}

impl TrapezoidFit {
    /// Fits a velocity profile over `distance` (unsigned, degrees) under the
    /// given limits and boundary speeds.
    ///
    /// Degenerate inputs (no distance, no nominal speed) produce a no-op fit
    /// with zero duration rather than an error: the planner treats such
    /// blocks as already complete.
    pub fn fit(
        distance: f32,
        v_nom: f32,
        accel: f32,
        decel: f32,
        entry_speed: f32,
        exit_speed: f32,
    ) -> Self {
        if v_nom <= 0. || distance <= MIN_PLAN_DISTANCE {
            return Self {
                distance: distance.max(0.),
                entry_speed,
                exit_speed,
                v_peak: entry_speed,
                ..Self::default()
            };
        }

        let accel = rate_floor(accel);
        let decel = rate_floor(decel);
        let entry = entry_speed.clamp(0., v_nom);
        let exit = exit_speed.clamp(0., v_nom);

        let d_accel = ((v_nom * v_nom - entry * entry) / (2. * accel)).max(0.);
        let d_decel = ((v_nom * v_nom - exit * exit) / (2. * decel)).max(0.);

        let (v_peak, t_accel, t_const, t_decel);
        if d_accel + d_decel <= distance {
            // Full trapezoid: cruise at nominal speed.
            v_peak = v_nom;
            t_accel = (v_nom - entry) / accel;
            t_decel = (v_nom - exit) / decel;
            t_const = (distance - d_accel - d_decel) / v_nom;
        } else {
            // Triangular: solve for the reachable peak.
            let v_sq = (distance + entry * entry / (2. * accel) + exit * exit / (2. * decel))
                / (1. / (2. * accel) + 1. / (2. * decel));
            if v_sq <= 0. {
                // Pathological boundary speeds; bleed from entry to exit.
                v_peak = entry;
                t_accel = 0.;
                t_const = 0.;
                t_decel = ((entry - exit) / decel).max(0.);
            } else {
                let v = v_sq.max(0.).sqrt().min(v_nom).max(entry.max(exit));
                v_peak = v;
                t_accel = (v - entry) / accel;
                t_decel = (v - exit) / decel;
                t_const = 0.;
            }
        }

        let total = t_accel + t_const + t_decel;
        Self {
            distance,
            entry_speed: entry,
            exit_speed: exit,
            v_peak,
            t_accel,
            t_const,
            t_decel,
            duration_ms: (total * 1_000.).round() as u32,
        }
    }

    pub fn duration_secs(&self) -> f32 {
        self.t_accel + self.t_const + self.t_decel
    }

    /// Displacement along the move at time `t` seconds, clamped to
    /// [0, distance]. Uses the effective phase accelerations so the piecewise
    /// segments join exactly even for clamped fits.
    pub fn displacement_at(&self, t: f32) -> f32 {
        if t <= 0. {
            return 0.;
        }
        let total = self.duration_secs();
        if t >= total || total <= 0. {
            return self.distance;
        }

        let s_accel = 0.5 * (self.entry_speed + self.v_peak) * self.t_accel;
        let s_const = self.v_peak * self.t_const;

        let s = if t < self.t_accel {
            let a_eff = (self.v_peak - self.entry_speed) / self.t_accel;
            self.entry_speed * t + 0.5 * a_eff * t * t
        } else if t < self.t_accel + self.t_const {
            s_accel + self.v_peak * (t - self.t_accel)
        } else {
            let td = t - self.t_accel - self.t_const;
            let d_eff = if self.t_decel > 0. {
                (self.v_peak - self.exit_speed) / self.t_decel
            } else {
                0.
            };
            s_accel + s_const + self.v_peak * td - 0.5 * d_eff * td * td
        };

        s.clamp(0., self.distance)
    }
}

/// Linear interpolation between two values.
pub fn interpolate_linear(start: f32, end: f32, ratio: f32) -> f32 {
    let ratio = ratio.clamp(0., 1.);
    start + (end - start) * ratio
}

/// Smoothstep: zero end-point velocities via 3t² − 2t³.
pub fn interpolate_smoothstep(start: f32, end: f32, ratio: f32) -> f32 {
    let ratio = ratio.clamp(0., 1.);
    let smooth = ratio * ratio * (3. - 2. * ratio);
    start + (end - start) * smooth
}

/// One axis's interpolator. Owned by the Motion AO; evaluated on the
/// interpolation tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct Interpolator {
    pub profile: Profile,
    pub state: MotionState,
    pub start_pos: f32,
    pub target_pos: f32,
    pub current_pos: f32,
    pub duration_ms: u32,
    pub elapsed_ms: u32,
    trap: Option<TrapezoidFit>,
}

impl Interpolator {
    pub fn new(position: f32) -> Self {
        Self {
            start_pos: position,
            target_pos: position,
            current_pos: position,
            ..Self::default()
        }
    }

    /// Starts a timed move. A `Trapezoid` profile set through here has no
    /// kinematic parameters and degrades to linear; use
    /// [`set_trapezoid`](Self::set_trapezoid) for real velocity profiles.
    pub fn set_motion(&mut self, start: f32, target: f32, duration_ms: u32, profile: Profile) {
        self.start_pos = start;
        self.target_pos = target;
        self.current_pos = start;
        self.duration_ms = duration_ms;
        self.elapsed_ms = 0;
        self.profile = profile;
        self.trap = None;
        self.state = MotionState::Moving;
    }

    /// Starts a trapezoidal move with zero entry/exit speeds.
    pub fn set_trapezoid(&mut self, start: f32, target: f32, params: MotionParams) {
        self.set_trapezoid_with_speeds(start, target, params, 0., 0.);
    }

    /// Starts a trapezoidal move with planner-supplied boundary speeds.
    pub fn set_trapezoid_with_speeds(
        &mut self,
        start: f32,
        target: f32,
        params: MotionParams,
        entry_speed: f32,
        exit_speed: f32,
    ) {
        let fit = TrapezoidFit::fit(
            (target - start).abs(),
            params.max_velocity,
            params.acceleration,
            params.decel(),
            entry_speed,
            exit_speed,
        );
        self.start_pos = start;
        self.target_pos = target;
        self.current_pos = start;
        self.duration_ms = fit.duration_ms;
        self.elapsed_ms = 0;
        self.profile = Profile::Trapezoid;
        self.trap = Some(fit);
        self.state = MotionState::Moving;
    }

    /// Starts a move from a profile someone else already fitted (the planner
    /// refits blocks under junction speeds; the scheduler hands them here
    /// untouched).
    pub fn set_fitted(&mut self, start: f32, target: f32, fit: TrapezoidFit) {
        self.start_pos = start;
        self.target_pos = target;
        self.current_pos = start;
        self.duration_ms = fit.duration_ms;
        self.elapsed_ms = 0;
        self.profile = Profile::Trapezoid;
        self.trap = Some(fit);
        self.state = MotionState::Moving;
    }

    /// Advances by `dt_ms` and returns the current position. Returns the
    /// exact target once the duration has elapsed.
    pub fn update(&mut self, dt_ms: u32) -> f32 {
        if self.state != MotionState::Moving {
            return self.current_pos;
        }

        self.elapsed_ms = self.elapsed_ms.saturating_add(dt_ms);

        let ratio = if self.duration_ms > 0 {
            self.elapsed_ms as f32 / self.duration_ms as f32
        } else {
            1.
        };

        if ratio >= 1. {
            self.current_pos = self.target_pos;
            self.state = MotionState::Reached;
            return self.current_pos;
        }

        self.current_pos = match self.profile {
            Profile::Linear => interpolate_linear(self.start_pos, self.target_pos, ratio),
            Profile::Smoothstep => interpolate_smoothstep(self.start_pos, self.target_pos, ratio),
            Profile::Trapezoid => match &self.trap {
                Some(fit) => {
                    let t = self.elapsed_ms as f32 / 1_000.;
                    let dir = if self.target_pos >= self.start_pos { 1. } else { -1. };
                    self.start_pos + dir * fit.displacement_at(t)
                }
                None => interpolate_linear(self.start_pos, self.target_pos, ratio),
            },
        };
        self.current_pos
    }

    /// Freezes the axis where it is.
    pub fn stop(&mut self) {
        self.target_pos = self.current_pos;
        self.state = MotionState::Idle;
    }

    pub fn is_reached(&self) -> bool {
        self.state == MotionState::Reached
    }

    pub fn is_moving(&self) -> bool {
        self.state == MotionState::Moving
    }

    /// Parks the axis at a known position, Idle.
    pub fn park(&mut self, position: f32) {
        self.start_pos = position;
        self.target_pos = position;
        self.current_pos = position;
        self.state = MotionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_profile_tracks_ratio() {
        let mut interp = Interpolator::new(0.);
        interp.set_motion(0., 100., 1_000, Profile::Linear);
        assert!((interp.update(250) - 25.).abs() < 1e-4);
        assert!((interp.update(250) - 50.).abs() < 1e-4);
        assert!((interp.update(250) - 75.).abs() < 1e-4);
        assert_eq!(interp.update(250), 100.);
        assert!(interp.is_reached());
    }

    #[test]
    fn smoothstep_midpoint_and_slow_ends() {
        let mut interp = Interpolator::new(0.);
        interp.set_motion(0., 100., 1_000, Profile::Smoothstep);
        // 3t²−2t³ at t=0.1 is 0.028.
        assert!((interp.update(100) - 2.8).abs() < 1e-3);
        // Midpoint is exact by symmetry.
        assert!((interp.update(400) - 50.).abs() < 1e-3);
    }

    /// An update at exactly the duration returns the exact target.
    #[test]
    fn endpoint_exactness() {
        for profile in [Profile::Linear, Profile::Smoothstep] {
            let mut interp = Interpolator::new(10.);
            interp.set_motion(10., 37.21, 777, profile);
            assert_eq!(interp.update(777), 37.21);
            assert_eq!(interp.state, MotionState::Reached);
        }

        let mut interp = Interpolator::new(0.);
        interp.set_trapezoid(
            0.,
            45.,
            MotionParams {
                max_velocity: 90.,
                acceleration: 180.,
                deceleration: 180.,
            },
        );
        let duration = interp.duration_ms;
        assert_eq!(interp.update(duration), 45.);
        assert!(interp.is_reached());
    }

    /// Output is monotone along the direction of travel.
    #[test]
    fn monotone_in_time() {
        let params = MotionParams {
            max_velocity: 120.,
            acceleration: 240.,
            deceleration: 300.,
        };
        let mut interp = Interpolator::new(170.);
        interp.set_trapezoid(170., 20., params);

        let mut last = 170.;
        while interp.is_moving() {
            let pos = interp.update(7);
            assert!(pos <= last + 1e-4, "position went backwards: {} -> {}", last, pos);
            assert!((20. ..=170.).contains(&pos));
            last = pos;
        }
        assert_eq!(last, 20.);
    }

    /// Triangular fit: the peak falls out of the closed form.
    #[test]
    fn triangular_fit() {
        let fit = TrapezoidFit::fit(10., 100., 100., 100., 0., 0.);
        assert!((fit.v_peak - 31.6228).abs() < 1e-3);
        assert!((fit.t_accel - 0.31623).abs() < 1e-4);
        assert!((fit.t_decel - 0.31623).abs() < 1e-4);
        assert_eq!(fit.t_const, 0.);
        assert_eq!(fit.duration_ms, 632);
    }

    #[test]
    fn full_trapezoid_fit() {
        // 90° at v=30, a=d=90: d_accel = d_decel = 5°, cruise covers 80°.
        let fit = TrapezoidFit::fit(90., 30., 90., 90., 0., 0.);
        assert_eq!(fit.v_peak, 30.);
        assert!((fit.t_accel - 1. / 3.).abs() < 1e-5);
        assert!((fit.t_const - 80. / 30.).abs() < 1e-5);
    }

    /// Phase displacements account for the whole distance.
    #[test]
    fn mass_balance() {
        for (dist, v, a, d, entry, exit) in [
            (90., 60., 120., 180., 0., 0.),
            (90., 60., 120., 180., 20., 10.),
            (5., 200., 100., 100., 0., 0.),
            (30., 45., 90., 45., 40., 5.),
        ] {
            let fit = TrapezoidFit::fit(dist, v, a, d, entry, exit);
            let sum = 0.5 * (fit.entry_speed + fit.v_peak) * fit.t_accel
                + fit.v_peak * fit.t_const
                + 0.5 * (fit.v_peak + fit.exit_speed) * fit.t_decel;
            assert!(
                (sum - dist).abs() < 1e-3,
                "mass balance off: {} vs {} for {:?}",
                sum,
                dist,
                (dist, v, a, d, entry, exit)
            );
        }
    }

    #[test]
    fn degenerate_fits_are_noops() {
        let fit = TrapezoidFit::fit(0.005, 90., 180., 180., 0., 0.);
        assert_eq!(fit.duration_ms, 0);
        let fit = TrapezoidFit::fit(10., 0., 180., 180., 0., 0.);
        assert_eq!(fit.duration_ms, 0);
        // Zero rates get floored, not divided by.
        let fit = TrapezoidFit::fit(10., 50., 0., 0., 0., 0.);
        assert!(fit.duration_ms > 0);
        assert!(fit.v_peak.is_finite());
    }

    #[test]
    fn stop_freezes_position() {
        let mut interp = Interpolator::new(0.);
        interp.set_motion(0., 100., 1_000, Profile::Linear);
        interp.update(300);
        interp.stop();
        let held = interp.current_pos;
        assert_eq!(interp.update(500), held);
        assert_eq!(interp.target_pos, held);
        assert_eq!(interp.state, MotionState::Idle);
    }

    #[test]
    fn zero_duration_reaches_immediately() {
        let mut interp = Interpolator::new(5.);
        interp.set_motion(5., 95., 0, Profile::Smoothstep);
        assert_eq!(interp.update(1), 95.);
        assert!(interp.is_reached());
    }
}

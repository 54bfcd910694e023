//! Per-axis trajectory queue: a chained sequence of trapezoidal waypoints
//! with per-point dwell, optionally looping.
//!
//! The queue never reaches into the interpolator; the Motion AO polls it with
//! the axis state and starts the next trapezoid itself, so there is no
//! lifetime coupling between the two.

use heapless::Vec;

use super::interp::{MotionParams, MotionState};
use crate::config::MAX_TRAJECTORY_POINTS;

/// One waypoint.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrajectoryPoint {
    pub position: f32,
    pub params: MotionParams,
    /// Hold at the point before moving on, ms.
    pub dwell_ms: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    /// `start` was called; the first point hasn't been issued yet.
    Start,
    /// A point has been issued and the axis is on its way.
    Travelling,
    /// The axis arrived; holding until the dwell elapses.
    Dwelling { since_ms: u32 },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrajectoryError {
    Full,
    Empty,
}

/// Waypoint queue for one axis.
#[derive(Debug)]
pub struct Trajectory {
    points: Vec<TrajectoryPoint, MAX_TRAJECTORY_POINTS>,
    index: usize,
    looping: bool,
    running: bool,
    phase: Phase,
}

impl Trajectory {
    pub const fn new() -> Self {
        Self {
            points: Vec::new(),
            index: 0,
            looping: false,
            running: false,
            phase: Phase::Start,
        }
    }

    pub fn add_point(&mut self, point: TrajectoryPoint) -> Result<(), TrajectoryError> {
        self.points.push(point).map_err(|_| TrajectoryError::Full)
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.index = 0;
        self.running = false;
        self.phase = Phase::Start;
    }

    pub fn start(&mut self, looping: bool) -> Result<(), TrajectoryError> {
        if self.points.is_empty() {
            return Err(TrajectoryError::Empty);
        }
        self.index = 0;
        self.looping = looping;
        self.running = true;
        self.phase = Phase::Start;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.phase = Phase::Start;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Drives the sequence. Returns a waypoint when the axis should start
    /// moving toward it: the first point right after `start`, and each
    /// subsequent point once the previous one was reached and its dwell has
    /// elapsed.
    pub fn poll(&mut self, now_ms: u32, axis_state: MotionState) -> Option<TrajectoryPoint> {
        if !self.running {
            return None;
        }

        match self.phase {
            Phase::Start => {
                self.phase = Phase::Travelling;
                Some(self.points[self.index])
            }
            Phase::Travelling => {
                if axis_state == MotionState::Reached {
                    self.phase = Phase::Dwelling { since_ms: now_ms };
                }
                None
            }
            Phase::Dwelling { since_ms } => {
                let dwell = self.points[self.index].dwell_ms;
                if now_ms.wrapping_sub(since_ms) < dwell {
                    return None;
                }
                self.index += 1;
                if self.index >= self.points.len() {
                    if self.looping {
                        self.index = 0;
                    } else {
                        self.running = false;
                        return None;
                    }
                }
                self.phase = Phase::Travelling;
                Some(self.points[self.index])
            }
        }
    }
}

impl Default for Trajectory {
    fn default() -> Self {
        Self::new()
    }
}

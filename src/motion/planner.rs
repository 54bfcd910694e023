//! Look-ahead motion planner.
//!
//! Buffered blocks are re-planned on every addition: a reverse pass walks
//! newest→oldest propagating how fast each block may *enter* given where it
//! must end up, then a forward pass walks oldest→newest enforcing what the
//! acceleration can actually deliver and re-fitting each trapezoid under the
//! final entry/exit speeds. Junctions between consecutive blocks of the same
//! servo are smoothed through the junction-deviation rule; everything else is
//! a full stop.
//!
//! The structure follows the classic grbl-style planner: per-block
//! `entry_speed` bounded by `max_entry_speed`, which is itself bounded by the
//! junction at the block's entry.

use num_traits::Float;

use super::interp::TrapezoidFit;
use crate::config::{
    JUNCTION_DEVIATION, MIN_JUNCTION_SPEED, MIN_PLAN_DISTANCE, PLANNER_BUFFER_SIZE,
};

/// Position-mode payload of a block.
#[derive(Clone, Copy, Debug, Default)]
pub struct PositionMove {
    pub start_angle: f32,
    pub target_angle: f32,
    /// Signed, degrees.
    pub distance: f32,
    pub abs_distance: f32,
    /// Commanded cruise speed, deg/s.
    pub nominal_speed: f32,
    pub acceleration: f32,
    pub deceleration: f32,
    pub entry_speed: f32,
    pub exit_speed: f32,
    /// Junction-and-kinematics ceiling on `entry_speed`.
    pub max_entry_speed: f32,
    /// Junction ceiling at this block's entry (0 = full stop boundary).
    pub max_junction_speed: f32,
    pub fit: TrapezoidFit,
    pub duration_ms: u32,
}

/// Continuous-mode payload of a block.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContinuousMove {
    pub target_speed_pct: f32,
    pub entry_speed_pct: f32,
    pub exit_speed_pct: f32,
    pub accel_rate_pct_s: f32,
    pub decel_rate_pct_s: f32,
    pub duration_ms: u32,
}

#[derive(Clone, Copy, Debug)]
pub enum BlockKind {
    Position(PositionMove),
    Continuous(ContinuousMove),
}

impl Default for BlockKind {
    fn default() -> Self {
        Self::Position(PositionMove::default())
    }
}

/// One buffered motion command for one axis at an absolute timestamp within
/// the planner run.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanBlock {
    pub timestamp_ms: u32,
    pub servo_id: u8,
    pub kind: BlockKind,
    pub recalculate: bool,
    /// A same-servo junction was found at this block's entry.
    pub junction_valid: bool,
    /// The fitted profile reaches the commanded cruise speed.
    pub nominal_length: bool,
}

impl PlanBlock {
    pub fn is_continuous(&self) -> bool {
        matches!(self.kind, BlockKind::Continuous(_))
    }

    pub fn duration_ms(&self) -> u32 {
        match &self.kind {
            BlockKind::Position(p) => p.duration_ms,
            BlockKind::Continuous(c) => c.duration_ms,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlannerError {
    /// All 32 slots in use; the caller surfaces RESP_BUSY.
    BufferFull,
}

/// Ring buffer of blocks plus the look-ahead passes.
pub struct Planner {
    blocks: [PlanBlock; PLANNER_BUFFER_SIZE],
    head: usize,
    tail: usize,
    count: usize,
    /// Set by every addition; consumed by the scheduler before dispatching.
    pub recalculate_flag: bool,
    last_servo_id: Option<u8>,
    last_target_angle: f32,
}

impl Planner {
    pub fn new() -> Self {
        Self {
            blocks: [PlanBlock::default(); PLANNER_BUFFER_SIZE],
            head: 0,
            tail: 0,
            count: 0,
            recalculate_flag: false,
            last_servo_id: None,
            last_target_angle: 0.,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn free(&self) -> usize {
        PLANNER_BUFFER_SIZE - self.count
    }

    pub fn is_full(&self) -> bool {
        self.count == PLANNER_BUFFER_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
        self.recalculate_flag = false;
        self.last_servo_id = None;
    }

    /// Index of the i-th buffered block, oldest first.
    fn slot(&self, i: usize) -> usize {
        (self.tail + i) % PLANNER_BUFFER_SIZE
    }

    /// Queues a position move. `current_angle` is the axis's executed angle
    /// from the servo map, used as the start when this servo has no earlier
    /// block still buffered.
    #[allow(clippy::too_many_arguments)]
    pub fn add_move(
        &mut self,
        timestamp_ms: u32,
        servo_id: u8,
        target_angle: f32,
        v_max: f32,
        accel: f32,
        decel: f32,
        current_angle: f32,
    ) -> Result<(), PlannerError> {
        if self.is_full() {
            return Err(PlannerError::BufferFull);
        }

        let start_angle = if self.count > 0 && self.last_servo_id == Some(servo_id) {
            self.last_target_angle
        } else {
            current_angle
        };

        let distance = target_angle - start_angle;
        let abs_distance = distance.abs();

        let mut mv = PositionMove {
            start_angle,
            target_angle,
            distance,
            abs_distance,
            nominal_speed: v_max,
            acceleration: accel,
            deceleration: if decel > 0. { decel } else { accel },
            entry_speed: 0.,
            exit_speed: 0.,
            max_entry_speed: v_max,
            max_junction_speed: 0.,
            fit: TrapezoidFit::default(),
            duration_ms: 0,
        };

        // Provisional 0→0 fit; the passes refine it.
        mv.fit = TrapezoidFit::fit(abs_distance, v_max, mv.acceleration, mv.deceleration, 0., 0.);
        mv.duration_ms = mv.fit.duration_ms;

        let block = PlanBlock {
            timestamp_ms,
            servo_id,
            kind: BlockKind::Position(mv),
            recalculate: true,
            junction_valid: false,
            nominal_length: false,
        };

        self.blocks[self.head] = block;
        self.head = (self.head + 1) % PLANNER_BUFFER_SIZE;
        self.count += 1;
        self.recalculate_flag = true;

        self.last_servo_id = Some(servo_id);
        self.last_target_angle = target_angle;
        Ok(())
    }

    /// Queues a continuous-rotation speed segment. The entry speed inherits
    /// the previous block's exit when that block is a continuous one for the
    /// same servo.
    pub fn add_continuous(
        &mut self,
        timestamp_ms: u32,
        servo_id: u8,
        target_speed_pct: f32,
        accel_rate_pct_s: f32,
        decel_rate_pct_s: f32,
        duration_ms: u32,
    ) -> Result<(), PlannerError> {
        if self.is_full() {
            return Err(PlannerError::BufferFull);
        }

        let entry = if self.count > 0 {
            let prev = &self.blocks[self.slot(self.count - 1)];
            match (&prev.kind, prev.servo_id == servo_id) {
                (BlockKind::Continuous(c), true) => c.exit_speed_pct,
                _ => 0.,
            }
        } else {
            0.
        };

        let block = PlanBlock {
            timestamp_ms,
            servo_id,
            kind: BlockKind::Continuous(ContinuousMove {
                target_speed_pct,
                entry_speed_pct: entry,
                exit_speed_pct: 0.,
                accel_rate_pct_s,
                decel_rate_pct_s,
                duration_ms,
            }),
            recalculate: true,
            junction_valid: false,
            nominal_length: false,
        };

        self.blocks[self.head] = block;
        self.head = (self.head + 1) % PLANNER_BUFFER_SIZE;
        self.count += 1;
        self.recalculate_flag = true;

        self.last_servo_id = Some(servo_id);
        Ok(())
    }

    /// Oldest buffered block, if any.
    pub fn peek(&self) -> Option<&PlanBlock> {
        if self.count == 0 {
            None
        } else {
            Some(&self.blocks[self.tail])
        }
    }

    /// Removes and returns the oldest block.
    pub fn pop(&mut self) -> Option<PlanBlock> {
        if self.count == 0 {
            return None;
        }
        let block = self.blocks[self.tail];
        self.tail = (self.tail + 1) % PLANNER_BUFFER_SIZE;
        self.count -= 1;
        if self.count == 0 {
            self.last_servo_id = None;
        }
        Some(block)
    }

    /// Junction speed permitted between two adjacent blocks.
    fn junction_speed(prev: &PlanBlock, cur: &PlanBlock) -> f32 {
        if prev.servo_id != cur.servo_id {
            return 0.;
        }
        match (&prev.kind, &cur.kind) {
            (BlockKind::Continuous(a), BlockKind::Continuous(b)) => {
                let delta = (a.target_speed_pct - b.target_speed_pct).abs();
                if delta < 5. {
                    a.target_speed_pct.abs().min(b.target_speed_pct.abs())
                } else {
                    ((a.target_speed_pct + b.target_speed_pct) / 2.).abs()
                }
            }
            (BlockKind::Position(a), BlockKind::Position(b)) => {
                if a.abs_distance <= MIN_PLAN_DISTANCE || b.abs_distance <= MIN_PLAN_DISTANCE {
                    return 0.;
                }
                let a_min = a.acceleration.min(b.acceleration);
                let v_nom = a.nominal_speed.min(b.nominal_speed);
                let avg_dist = 0.5 * (a.abs_distance + b.abs_distance);
                let v_dev = (2. * a_min * JUNCTION_DEVIATION * avg_dist).max(0.).sqrt();
                v_nom.min(v_dev).max(MIN_JUNCTION_SPEED)
            }
            // Mixed modes: full stop.
            _ => 0.,
        }
    }

    /// The look-ahead recomputation. Runs over the whole buffer; cheap at 32
    /// blocks.
    pub fn recalculate(&mut self) {
        let n = self.count;
        if n == 0 {
            return;
        }

        // Junction ceilings at each block's entry.
        for i in 0..n {
            let slot = self.slot(i);
            if i == 0 {
                self.blocks[slot].junction_valid = false;
                if let BlockKind::Position(ref mut p) = self.blocks[slot].kind {
                    p.max_junction_speed = 0.;
                }
                continue;
            }
            let prev = self.blocks[self.slot(i - 1)];
            let cur = self.blocks[slot];
            let vj = Self::junction_speed(&prev, &cur);
            let same = prev.servo_id == cur.servo_id;
            let block = &mut self.blocks[slot];
            block.junction_valid = same && vj > 0.;
            match block.kind {
                BlockKind::Position(ref mut p) => p.max_junction_speed = vj,
                BlockKind::Continuous(ref mut c) => c.entry_speed_pct = vj.min(100.),
            }
        }

        // Reverse pass: newest → oldest, propagating entry ceilings back.
        for i in (0..n).rev() {
            let next_entry = if i + 1 < n {
                let next = &self.blocks[self.slot(i + 1)];
                match &next.kind {
                    BlockKind::Position(p) => Some((p.entry_speed, p.max_junction_speed)),
                    BlockKind::Continuous(c) => Some((c.entry_speed_pct, c.entry_speed_pct)),
                }
            } else {
                None
            };

            let slot = self.slot(i);
            let first = i == 0;
            match self.blocks[slot].kind {
                BlockKind::Position(ref mut p) => {
                    p.exit_speed = match next_entry {
                        // The junction stored on the next block caps the
                        // shared boundary speed.
                        Some((entry, junction)) => entry.min(junction),
                        None => 0.,
                    };
                    let v_entry_max =
                        (p.exit_speed * p.exit_speed + 2. * p.acceleration * p.abs_distance)
                            .max(0.)
                            .sqrt();
                    p.max_entry_speed = p.nominal_speed.min(p.max_junction_speed);
                    p.entry_speed = if first {
                        0.
                    } else {
                        p.max_entry_speed.min(v_entry_max)
                    };
                }
                BlockKind::Continuous(ref mut c) => {
                    // Entry speeds for continuous blocks come from the
                    // junction pre-pass (or the add-time inheritance for the
                    // oldest block); only the exit needs propagating here.
                    c.exit_speed_pct = match next_entry {
                        Some((entry, _)) => entry.min(c.target_speed_pct.abs()),
                        None => 0.,
                    };
                }
            }
        }

        // Forward pass: oldest → newest, limited by what acceleration can
        // actually deliver; refit each trapezoid.
        let mut prev_exit: Option<(u8, f32, bool)> = None;
        for i in 0..n {
            let slot = self.slot(i);
            let block = &mut self.blocks[slot];
            match block.kind {
                BlockKind::Position(ref mut p) => {
                    p.entry_speed = match prev_exit {
                        None => 0.,
                        // Continuity: enter exactly as fast as the previous
                        // block leaves. A cross-servo or cross-mode boundary
                        // carries zero.
                        Some((id, exit, position)) if id == block.servo_id && position => exit,
                        Some(_) => 0.,
                    };
                    if i == 0 {
                        p.entry_speed = 0.;
                    }

                    let v_exit_max =
                        (p.entry_speed * p.entry_speed + 2. * p.acceleration * p.abs_distance)
                            .max(0.)
                            .sqrt();
                    p.exit_speed = p.exit_speed.min(v_exit_max).min(p.nominal_speed);

                    p.fit = TrapezoidFit::fit(
                        p.abs_distance,
                        p.nominal_speed,
                        p.acceleration,
                        p.deceleration,
                        p.entry_speed,
                        p.exit_speed,
                    );
                    p.duration_ms = p.fit.duration_ms;
                    block.nominal_length = p.fit.v_peak >= p.nominal_speed;
                    block.recalculate = false;
                    prev_exit = Some((block.servo_id, p.exit_speed, true));
                }
                BlockKind::Continuous(ref mut c) => {
                    block.recalculate = false;
                    prev_exit = Some((block.servo_id, c.exit_speed_pct, false));
                }
            }
        }
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

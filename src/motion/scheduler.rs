//! Timestamp-driven dispatch of planner blocks.
//!
//! The scheduler owns the planner. `update` runs on the Motion AO's 10 ms
//! tick: it re-plans when the buffer changed, then fires every block whose
//! timestamp has come due, in order, through the supplied executor.

use super::planner::{PlanBlock, Planner};

/// Executor verdict for a due block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dispatch {
    /// Block consumed; move on to the next due one.
    Executed,
    /// Target axis is still busy; leave the block queued and stop this pass.
    Hold,
}

pub struct Scheduler {
    pub planner: Planner,
    running: bool,
    paused: bool,
    start_time_ms: u32,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            planner: Planner::new(),
            running: false,
            paused: false,
            start_time_ms: 0,
        }
    }

    /// Begins executing the buffer; block timestamps are measured from this
    /// call.
    pub fn start(&mut self, now_ms: u32) {
        self.start_time_ms = now_ms;
        self.running = true;
        self.paused = false;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.paused = false;
    }

    pub fn pause(&mut self) {
        if self.running {
            self.paused = true;
        }
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn clear(&mut self) {
        self.planner.clear();
        self.stop();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// One scheduling pass. Multiple due blocks dispatch in FIFO order within
    /// a single call; an executor returning [`Dispatch::Hold`] keeps its
    /// block (and everything behind it) for a later pass, which is what keeps
    /// an axis from being handed a second block mid-move.
    pub fn update(&mut self, now_ms: u32, mut execute: impl FnMut(&PlanBlock) -> Dispatch) {
        if self.planner.recalculate_flag && !self.planner.is_empty() {
            self.planner.recalculate();
            self.planner.recalculate_flag = false;
        }

        if !self.running || self.paused {
            return;
        }

        if self.planner.is_empty() {
            self.stop();
            return;
        }

        let elapsed = now_ms.wrapping_sub(self.start_time_ms);
        while let Some(&block) = self.planner.peek() {
            if block.timestamp_ms > elapsed {
                break;
            }
            match execute(&block) {
                Dispatch::Hold => break,
                Dispatch::Executed => {
                    self.planner.pop();
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_three(sched: &mut Scheduler) {
        sched.planner.add_move(0, 0, 100., 90., 180., 180., 90.).unwrap();
        sched.planner.add_move(500, 0, 50., 90., 180., 180., 90.).unwrap();
        sched.planner.add_move(1_200, 1, 80., 90., 180., 180., 90.).unwrap();
    }

    #[test]
    fn fires_blocks_by_timestamp() {
        let mut sched = Scheduler::new();
        queue_three(&mut sched);
        sched.start(10_000);

        let mut fired: Vec<u32> = Vec::new();
        sched.update(10_000, |b| { fired.push(b.timestamp_ms); Dispatch::Executed });
        assert_eq!(fired, [0]);

        sched.update(10_400, |b| { fired.push(b.timestamp_ms); Dispatch::Executed });
        assert_eq!(fired, [0]);

        // Two blocks due at once dispatch in order in one pass.
        sched.update(11_300, |b| { fired.push(b.timestamp_ms); Dispatch::Executed });
        assert_eq!(fired, [0, 500, 1_200]);
    }

    #[test]
    fn recalculates_before_dispatch() {
        let mut sched = Scheduler::new();
        queue_three(&mut sched);
        sched.start(0);
        assert!(sched.planner.recalculate_flag);

        let mut count = 0;
        sched.update(0, |_| { count += 1; Dispatch::Executed });
        assert!(!sched.planner.recalculate_flag);
        assert_eq!(count, 1);
        // The dispatched block went through the passes.
        assert!(!sched.planner.peek().unwrap().recalculate);
    }

    #[test]
    fn does_nothing_unless_started() {
        let mut sched = Scheduler::new();
        queue_three(&mut sched);

        let mut count = 0;
        sched.update(5_000, |_| { count += 1; Dispatch::Executed });
        assert_eq!(count, 0);
        assert_eq!(sched.planner.count(), 3);
    }

    #[test]
    fn pause_holds_resume_releases() {
        let mut sched = Scheduler::new();
        queue_three(&mut sched);
        sched.start(0);
        sched.pause();

        let mut count = 0;
        sched.update(2_000, |_| { count += 1; Dispatch::Executed });
        assert_eq!(count, 0);
        assert!(sched.is_paused());

        sched.resume();
        sched.update(2_000, |_| { count += 1; Dispatch::Executed });
        assert_eq!(count, 3);
    }

    #[test]
    fn hold_defers_the_block_and_its_successors() {
        let mut sched = Scheduler::new();
        queue_three(&mut sched);
        sched.start(0);

        let mut fired: Vec<u32> = Vec::new();
        sched.update(2_000, |b| {
            if b.timestamp_ms == 500 {
                Dispatch::Hold
            } else {
                fired.push(b.timestamp_ms);
                Dispatch::Executed
            }
        });
        // Block 500 held; 1200 must not jump the queue.
        assert_eq!(fired, [0]);
        assert_eq!(sched.planner.count(), 2);

        sched.update(2_010, |b| {
            fired.push(b.timestamp_ms);
            Dispatch::Executed
        });
        assert_eq!(fired, [0, 500, 1_200]);
    }

    #[test]
    fn stops_itself_when_drained() {
        let mut sched = Scheduler::new();
        sched.planner.add_move(0, 0, 100., 90., 180., 180., 90.).unwrap();
        sched.start(0);

        sched.update(0, |_| Dispatch::Executed);
        assert!(sched.is_running());

        // Next pass sees the empty buffer and stops.
        sched.update(10, |_| Dispatch::Executed);
        assert!(!sched.is_running());
    }
}

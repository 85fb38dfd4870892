//! Timed link-impairment schedules.
//!
//! A [`ConstraintSchedule`] is consumed front to back while a run is active.
//! A [`Constraint::Boundary`] ends the current sub-run; whatever follows it
//! stays queued for the next run.

use std::collections::VecDeque;
use std::time::Duration;

use tunnel_types::Link;

/// One timed impairment step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStep {
    /// How long the impairment stays in effect
    pub duration: Duration,
    /// Bitrate cap in kbps
    pub bitrate: u32,
    /// Added one-way delay in milliseconds
    pub delay_ms: u32,
    /// Packet loss in percent
    pub loss_percent: u32,
}

impl LinkStep {
    /// Create a step lasting `seconds`.
    pub fn new(seconds: u64, bitrate: u32, delay_ms: u32, loss_percent: u32) -> Self {
        Self {
            duration: Duration::from_secs(seconds),
            bitrate,
            delay_ms,
            loss_percent,
        }
    }

    /// The `link` command payload for this step.
    pub fn link(&self) -> Link {
        Link {
            bitrate: self.bitrate,
            delay: self.delay_ms,
            loss: self.loss_percent,
        }
    }
}

/// Schedule element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Apply an impairment for a while.
    Step(LinkStep),
    /// End of a sub-run. Never sent on the wire.
    Boundary,
}

impl From<LinkStep> for Constraint {
    fn from(step: LinkStep) -> Self {
        Constraint::Step(step)
    }
}

/// FIFO of constraints, consumed destructively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintSchedule {
    queue: VecDeque<Constraint>,
}

impl ConstraintSchedule {
    /// Create an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a timed step.
    pub fn push_step(&mut self, step: LinkStep) {
        self.queue.push_back(Constraint::Step(step));
    }

    /// Append a sub-run boundary.
    pub fn push_boundary(&mut self) {
        self.queue.push_back(Constraint::Boundary);
    }

    /// Take the next constraint.
    pub fn pop(&mut self) -> Option<Constraint> {
        self.queue.pop_front()
    }

    /// Number of queued constraints (boundaries included).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the schedule is drained.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Iterate without consuming.
    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.queue.iter()
    }

    /// Number of sub-runs a fresh copy of this schedule yields.
    pub fn sub_runs(&self) -> usize {
        let mut runs = 0;
        let mut open = false;
        for constraint in &self.queue {
            match constraint {
                Constraint::Step(_) => open = true,
                Constraint::Boundary => {
                    runs += 1;
                    open = false;
                }
            }
        }
        if open {
            runs += 1;
        }
        runs
    }

    /// Sum of all step durations.
    pub fn total_duration(&self) -> Duration {
        self.queue
            .iter()
            .filter_map(|c| match c {
                Constraint::Step(step) => Some(step.duration),
                Constraint::Boundary => None,
            })
            .sum()
    }
}

impl FromIterator<Constraint> for ConstraintSchedule {
    fn from_iter<I: IntoIterator<Item = Constraint>>(iter: I) -> Self {
        Self {
            queue: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ConstraintSchedule {
    type Item = &'a Constraint;
    type IntoIter = std::collections::vec_deque::Iter<'a, Constraint>;

    fn into_iter(self) -> Self::IntoIter {
        self.queue.iter()
    }
}

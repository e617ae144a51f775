//! Retransmission scheduler ordered by deadline

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use tokio::time::Instant;
use log::trace;

use lossline_core::Sequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Job {
    deadline: Instant,
    sequence: Sequence,
}

// reversed so the BinaryHeap pops the earliest deadline first
impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outstanding frames keyed by their next retransmit deadline.
///
/// A sequence is queued at most once. The caller decides on every pop whether
/// the frame still needs sending and, if so, schedules it again.
#[derive(Debug, Default)]
pub struct RetransmitScheduler {
    jobs: BinaryHeap<Job>,
    pending: HashSet<Sequence>,
}

impl RetransmitScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `sequence` for `deadline`. Returns false if it is already queued.
    pub fn schedule(&mut self, sequence: Sequence, deadline: Instant) -> bool {
        if !self.pending.insert(sequence) {
            return false;
        }
        self.jobs.push(Job { deadline, sequence });
        trace!("Scheduled frame {} ({} pending)", sequence, self.jobs.len());
        true
    }

    /// Remove and return the earliest job if its deadline has passed.
    pub fn pop_due(&mut self, now: Instant) -> Option<Sequence> {
        match self.jobs.peek() {
            Some(job) if job.deadline <= now => {
                let job = self.jobs.pop()?;
                self.pending.remove(&job.sequence);
                Some(job.sequence)
            }
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.jobs.peek().map(|job| job.deadline)
    }

    pub fn contains(&self, sequence: Sequence) -> bool {
        self.pending.contains(&sequence)
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }
}

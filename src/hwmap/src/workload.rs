//! The computation timed by the measurement task.
use std::{
    hint::black_box,
    time::{Duration, Instant},
};

/// The opaque unit of work timed by the measurement task.
pub trait Workload: Send {
    fn run(&mut self);
}

impl<F: FnMut() + Send> Workload for F {
    fn run(&mut self) {
        self()
    }
}

/// The default length of the scratch buffer used by [`SyntheticWorkload`].
pub const SCRATCH_WORDS: usize = 4096;

/// Keeps the processor busy for a fixed duration, mapping a bit pattern into a
/// scratch buffer as it goes.
///
/// The output is never inspected. The point is a repeatable load with a known
/// duration profile and a realistic memory footprint.
#[derive(Debug, Clone)]
pub struct SyntheticWorkload {
    duration: Duration,
    scratch: Vec<u32>,
    state: u32,
}

impl SyntheticWorkload {
    pub fn new(duration: Duration) -> Self {
        Self::with_scratch(duration, SCRATCH_WORDS)
    }

    pub fn with_scratch(duration: Duration, words: usize) -> Self {
        Self {
            duration,
            scratch: vec![0; words.max(1)],
            state: 0x1234_5678,
        }
    }
}

impl Workload for SyntheticWorkload {
    fn run(&mut self) {
        let start = Instant::now();
        loop {
            for slot in self.scratch.iter_mut() {
                // xorshift32
                self.state ^= self.state << 13;
                self.state ^= self.state >> 17;
                self.state ^= self.state << 5;
                *slot = black_box(self.state & 0x3);
            }
            if start.elapsed() >= self.duration {
                break;
            }
        }
        black_box(&self.scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_for_at_least_its_duration() {
        let mut w = SyntheticWorkload::with_scratch(Duration::from_millis(5), 64);
        let start = Instant::now();
        w.run();
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn zero_duration_makes_one_pass() {
        let mut w = SyntheticWorkload::with_scratch(Duration::ZERO, 16);
        w.run();
        assert!(w.scratch.iter().all(|&x| x <= 3));
        assert!(w.scratch.iter().any(|&x| x != 0));
    }

    #[test]
    fn closures_are_workloads() {
        let mut count = 0;
        {
            let mut w = || count += 1;
            Workload::run(&mut w);
            Workload::run(&mut w);
        }
        assert_eq!(count, 2);
    }
}

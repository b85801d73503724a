//! Real-time scheduling setup for the calling thread.
//!
//! Everything here is best effort from the caller's point of view: a failure
//! degrades timing determinism but never stops a run. [`RtPolicy::apply`]
//! logs each failure and carries on.
use std::{io, ops::RangeInclusive};

#[cfg(target_os = "linux")]
#[path = "rt_linux.rs"]
mod imp;
#[cfg(not(target_os = "linux"))]
#[path = "rt_unsupported.rs"]
mod imp;

#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    #[error("Insufficient privilege to use the fixed-priority policy at priority {priority}.")]
    InsufficientPrivilege {
        priority: i32,
        #[source]
        source: io::Error,
    },
    #[error("Priority {priority} is outside of the valid range {min}..={max}.")]
    InvalidPriority { priority: i32, min: i32, max: i32 },
    #[error("Could not select the fixed-priority policy at priority {priority}.")]
    Policy {
        priority: i32,
        #[source]
        source: io::Error,
    },
    #[error("Processor {0} does not exist or is not available.")]
    InvalidProcessor(usize),
    #[error("Not permitted to bind to processor {processor}.")]
    PermissionDenied {
        processor: usize,
        #[source]
        source: io::Error,
    },
    #[error("Could not bind to processor {processor}.")]
    Affinity {
        processor: usize,
        #[source]
        source: io::Error,
    },
    #[error("Could not query the processor affinity.")]
    QueryAffinity(#[source] io::Error),
    #[error("Could not lock the process memory.")]
    LockFailed(#[source] io::Error),
    #[error("Real-time scheduling is not supported on this platform.")]
    Unsupported,
}

/// Switch the calling thread to the fixed-priority, run-to-block policy
/// (`SCHED_FIFO`) at `priority`.
pub fn set_fixed_priority_policy(priority: i32) -> Result<(), SchedError> {
    imp::set_fixed_priority_policy(priority)
}

/// Restrict the calling thread to the processor `processor`.
pub fn pin_to_processor(processor: usize) -> Result<(), SchedError> {
    imp::pin_to_processor(processor)
}

/// Lock every current and future page of the process into RAM.
pub fn lock_memory() -> Result<(), SchedError> {
    imp::lock_memory()
}

/// The processors the calling thread is allowed to run on, in ascending
/// order.
pub fn processor_affinity() -> Result<Vec<usize>, SchedError> {
    imp::processor_affinity()
}

/// The processor the calling thread is running on right now, if known.
pub fn current_processor() -> Option<usize> {
    imp::current_processor()
}

/// The valid priorities for [`set_fixed_priority_policy`].
pub fn priority_range() -> RangeInclusive<i32> {
    imp::priority_range()
}

/// The real-time setup applied by a timing-sensitive thread before it starts
/// measuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtPolicy {
    /// Select the fixed-priority policy at this priority.
    pub priority: Option<i32>,
    /// Bind the thread to this processor.
    pub processor: Option<usize>,
    /// Lock the process memory to prevent paging.
    pub lock_memory: bool,
}

impl Default for RtPolicy {
    fn default() -> Self {
        Self {
            priority: Some(99),
            processor: Some(1),
            lock_memory: true,
        }
    }
}

impl RtPolicy {
    /// Leave the thread's scheduling alone.
    pub const NONE: Self = Self {
        priority: None,
        processor: None,
        lock_memory: false,
    };

    /// Apply the policy to the calling thread. Processor binding comes first,
    /// then the scheduling policy, then memory locking.
    ///
    /// Failures are logged and collected; they never abort the caller.
    pub fn apply(&self) -> RtOutcome {
        let mut outcome = RtOutcome::default();

        if let Some(processor) = self.processor {
            log::debug!("binding to processor {processor}");
            outcome.record(pin_to_processor(processor));
            match processor_affinity() {
                Ok(cpus) => log::debug!("hard affinity is now {cpus:?}"),
                Err(e) => log::debug!("{e}"),
            }
        }

        if let Some(priority) = self.priority {
            log::debug!("selecting SCHED_FIFO at priority {priority}");
            outcome.record(set_fixed_priority_policy(priority));
        }

        if self.lock_memory {
            log::debug!("locking memory");
            outcome.record(lock_memory());
        }

        outcome
    }
}

/// The result of [`RtPolicy::apply`].
#[derive(Debug, Default)]
pub struct RtOutcome {
    pub failures: Vec<SchedError>,
}

impl RtOutcome {
    fn record(&mut self, result: Result<(), SchedError>) {
        if let Err(e) = result {
            match std::error::Error::source(&e) {
                Some(source) => log::warn!("{e} ({source}); continuing with degraded timing"),
                None => log::warn!("{e}; continuing with degraded timing"),
            }
            self.failures.push(e);
        }
    }

    /// Returns `true` if any part of the policy couldn't be applied.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_policy_changes_nothing() {
        let outcome = RtPolicy::NONE.apply();
        assert!(!outcome.is_degraded());
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        std::thread::spawn(|| {
            let range = priority_range();
            match set_fixed_priority_policy(range.end().saturating_add(1)) {
                Err(SchedError::InvalidPriority { .. } | SchedError::Unsupported) => {}
                other => panic!("{other:?}"),
            }
        })
        .join()
        .unwrap();
    }

    #[test]
    fn nonexistent_processor_is_rejected() {
        std::thread::spawn(|| match pin_to_processor(usize::MAX) {
            Err(SchedError::InvalidProcessor(usize::MAX) | SchedError::Unsupported) => {}
            other => panic!("{other:?}"),
        })
        .join()
        .unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pin_to_an_allowed_processor() {
        // Run on a scratch thread so the test harness's thread isn't affected
        std::thread::spawn(|| {
            let allowed = processor_affinity().unwrap();
            assert!(!allowed.is_empty());
            let target = *allowed.last().unwrap();
            pin_to_processor(target).unwrap();
            assert_eq!(processor_affinity().unwrap(), vec![target]);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn failures_degrade_but_do_not_abort() {
        std::thread::spawn(|| {
            let outcome = RtPolicy {
                priority: None,
                processor: Some(usize::MAX),
                lock_memory: false,
            }
            .apply();
            assert!(outcome.is_degraded());
            assert_eq!(outcome.failures.len(), 1);
        })
        .join()
        .unwrap();
    }
}

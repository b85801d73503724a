use std::ops::RangeInclusive;

use super::SchedError;

pub fn set_fixed_priority_policy(_priority: i32) -> Result<(), SchedError> {
    Err(SchedError::Unsupported)
}

pub fn pin_to_processor(_processor: usize) -> Result<(), SchedError> {
    Err(SchedError::Unsupported)
}

pub fn lock_memory() -> Result<(), SchedError> {
    Err(SchedError::Unsupported)
}

pub fn processor_affinity() -> Result<Vec<usize>, SchedError> {
    Err(SchedError::Unsupported)
}

pub fn current_processor() -> Option<usize> {
    None
}

pub fn priority_range() -> RangeInclusive<i32> {
    0..=0
}

//! Linux implementation of `crate::rt`, built on the pthread scheduling and
//! affinity extensions.
use std::{io, mem, ops::RangeInclusive, os::raw::c_int};

use super::SchedError;

pub fn set_fixed_priority_policy(priority: i32) -> Result<(), SchedError> {
    let range = priority_range();
    if !range.contains(&priority) {
        return Err(SchedError::InvalidPriority {
            priority,
            min: *range.start(),
            max: *range.end(),
        });
    }

    let param = libc::sched_param {
        sched_priority: priority,
        // Some targets have additional (deprecated) fields
        ..unsafe { mem::zeroed() }
    };

    match code_to_result(unsafe {
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param)
    }) {
        Ok(()) => Ok(()),
        Err(errno::Errno(libc::EPERM)) => Err(SchedError::InsufficientPrivilege {
            priority,
            source: to_io(errno::Errno(libc::EPERM)),
        }),
        Err(e) => Err(SchedError::Policy {
            priority,
            source: to_io(e),
        }),
    }
}

pub fn pin_to_processor(processor: usize) -> Result<(), SchedError> {
    if processor >= libc::CPU_SETSIZE as usize {
        return Err(SchedError::InvalidProcessor(processor));
    }

    let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
    unsafe {
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(processor, &mut set);
    }

    match code_to_result(unsafe {
        libc::pthread_setaffinity_np(
            libc::pthread_self(),
            mem::size_of::<libc::cpu_set_t>(),
            &set,
        )
    }) {
        Ok(()) => Ok(()),
        Err(errno::Errno(libc::EINVAL)) => Err(SchedError::InvalidProcessor(processor)),
        Err(errno::Errno(libc::EPERM)) => Err(SchedError::PermissionDenied {
            processor,
            source: to_io(errno::Errno(libc::EPERM)),
        }),
        Err(e) => Err(SchedError::Affinity {
            processor,
            source: to_io(e),
        }),
    }
}

pub fn lock_memory() -> Result<(), SchedError> {
    ok_or_errno(unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) })
        .map(drop)
        .map_err(|e| SchedError::LockFailed(to_io(e)))
}

pub fn processor_affinity() -> Result<Vec<usize>, SchedError> {
    let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
    code_to_result(unsafe {
        libc::pthread_getaffinity_np(
            libc::pthread_self(),
            mem::size_of::<libc::cpu_set_t>(),
            &mut set,
        )
    })
    .map_err(|e| SchedError::QueryAffinity(to_io(e)))?;

    Ok((0..libc::CPU_SETSIZE as usize)
        .filter(|&i| unsafe { libc::CPU_ISSET(i, &set) })
        .collect())
}

pub fn current_processor() -> Option<usize> {
    ok_or_errno(unsafe { libc::sched_getcpu() })
        .ok()
        .map(|cpu| cpu as usize)
}

pub fn priority_range() -> RangeInclusive<i32> {
    let min = unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) };
    let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    if min < 0 || max < 0 {
        // Linux has always used 1..=99
        return 1..=99;
    }
    min..=max
}

/// Interpret the return value of a function that returns `-1` and sets
/// `errno` on failure.
fn ok_or_errno(x: c_int) -> Result<c_int, errno::Errno> {
    if x >= 0 {
        Ok(x)
    } else {
        Err(errno::errno())
    }
}

/// Interpret the return value of a pthread function, which returns the error
/// code directly.
fn code_to_result(x: c_int) -> Result<(), errno::Errno> {
    if x == 0 {
        Ok(())
    } else {
        Err(errno::Errno(x))
    }
}

fn to_io(e: errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e.0)
}

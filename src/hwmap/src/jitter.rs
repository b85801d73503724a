//! Sleep-latency probe.
//!
//! Repeatedly sleeps for a fixed duration and tracks how far each wake-up
//! deviates from the requested duration. Running it with and without
//! [`RtPolicy`] shows what the fixed-priority policy and memory locking buy.
use std::{
    fmt,
    io::{self, BufRead},
    thread,
    time::{Duration, Instant},
};

use crate::{rt::RtPolicy, sync::CancelToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterConfig {
    /// The requested sleep duration.
    pub wait: Duration,
    /// Stop after this many wake-ups. `None` runs until cancelled.
    pub iterations: Option<u64>,
    /// Applied to the calling thread before the first sleep.
    pub rt: RtPolicy,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_millis(50),
            iterations: Some(100),
            rt: RtPolicy::NONE,
        }
    }
}

impl JitterConfig {
    /// The fixed-priority policy at the highest priority with memory locked,
    /// leaving the processor affinity alone.
    pub fn high_priority(mut self) -> Self {
        self.rt = RtPolicy {
            priority: Some(*crate::rt::priority_range().end()),
            processor: None,
            lock_memory: true,
        };
        self
    }
}

/// Statistics of the absolute wake-up deviation, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterStats {
    pub count: u64,
    /// `u64::MAX` until the first sample.
    pub min: u64,
    pub max: u64,
    /// A running average: each sample is averaged with the previous value.
    pub avg: u64,
    /// The signed deviation of the latest sample.
    pub last: i64,
}

impl Default for JitterStats {
    fn default() -> Self {
        Self {
            count: 0,
            min: u64::MAX,
            max: 0,
            avg: 0,
            last: 0,
        }
    }
}

impl JitterStats {
    /// Account for a wake-up that came `deviation` microseconds late
    /// (negative: early).
    pub fn record(&mut self, deviation: i64) {
        let abs = deviation.unsigned_abs();
        self.count += 1;
        self.min = self.min.min(abs);
        self.max = self.max.max(abs);
        self.avg = if self.avg == 0 {
            abs
        } else {
            (self.avg + abs) / 2
        };
        self.last = deviation;
    }
}

impl fmt::Display for JitterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            return f.write_str("no samples");
        }
        write!(
            f,
            "min {} us, max {} us, avg {} us, current {} us",
            self.min, self.max, self.avg, self.last
        )
    }
}

/// Run the probe on the calling thread until `config.iterations` wake-ups
/// have been measured or `token` is cancelled. `on_sample` is called after
/// every wake-up.
pub fn probe(
    config: &JitterConfig,
    token: &CancelToken,
    mut on_sample: impl FnMut(&JitterStats),
) -> JitterStats {
    if config.rt.apply().is_degraded() {
        log::warn!("measuring without the full real-time policy");
    }

    let wait_us = config.wait.as_micros() as i64;
    let mut stats = JitterStats::default();
    let mut last = Instant::now();

    while config.iterations.map_or(true, |n| stats.count < n) {
        if token.sleep(config.wait).is_err() {
            break;
        }
        let now = Instant::now();
        let interval = now.duration_since(last).as_micros() as i64;
        last = now;

        stats.record(interval - wait_us);
        log::trace!("{stats}");
        on_sample(&stats);
    }

    log::debug!("jitter probe finished after {} samples", stats.count);
    stats
}

/// Cancel `token` once a line (typically an Enter press on standard input)
/// arrives on `input`. End of input leaves the token alone.
///
/// The reader runs on its own thread, which is returned.
pub fn cancel_on_enter(
    token: CancelToken,
    mut input: impl BufRead + Send + 'static,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("cancel on enter".to_owned())
        .spawn(move || match input.read_line(&mut String::new()) {
            Ok(0) => log::debug!("input closed; run until interrupted"),
            Ok(_) => token.cancel(),
            Err(e) => log::warn!("could not read the input: {e}"),
        })
}

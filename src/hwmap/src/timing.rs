//! Interval measurement and the sample store in shared memory.
use std::{
    fmt, io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::window::RegisterWindow;

/// A clock reading split into whole seconds and the sub-second part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub secs: i64,
    /// Always less than 1,000,000,000.
    pub nanos: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("Could not read the {clock} clock.")]
pub struct ClockError {
    pub clock: &'static str,
    #[source]
    pub source: io::Error,
}

/// A source of [`Timestamp`]s.
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<Timestamp, ClockError>;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> Result<Timestamp, ClockError> {
        (**self).now()
    }
}

impl<T: Clock + ?Sized> Clock for Box<T> {
    fn now(&self) -> Result<Timestamp, ClockError> {
        (**self).now()
    }
}

/// Selects one of the system clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockKind {
    /// `CLOCK_MONOTONIC`. Unaffected by wall-clock adjustments.
    #[default]
    Monotonic,
    /// `CLOCK_REALTIME`. Steps whenever the wall clock is set.
    Realtime,
}

impl ClockKind {
    pub fn clock(self) -> SystemClock {
        SystemClock(self)
    }
}

/// A system clock selected by [`ClockKind`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock(pub ClockKind);

#[cfg(unix)]
impl Clock for SystemClock {
    fn now(&self) -> Result<Timestamp, ClockError> {
        let (id, clock) = match self.0 {
            ClockKind::Monotonic => (libc::CLOCK_MONOTONIC, "monotonic"),
            ClockKind::Realtime => (libc::CLOCK_REALTIME, "realtime"),
        };
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        if unsafe { libc::clock_gettime(id, &mut ts) } != 0 {
            return Err(ClockError {
                clock,
                source: io::Error::from_raw_os_error(errno::errno().0),
            });
        }
        Ok(Timestamp {
            secs: ts.tv_sec as i64,
            nanos: ts.tv_nsec as u32,
        })
    }
}

#[cfg(not(unix))]
impl Clock for SystemClock {
    fn now(&self) -> Result<Timestamp, ClockError> {
        use std::{
            sync::OnceLock,
            time::{Instant, SystemTime},
        };
        let elapsed = match self.0 {
            ClockKind::Monotonic => {
                static ORIGIN: OnceLock<Instant> = OnceLock::new();
                ORIGIN.get_or_init(Instant::now).elapsed()
            }
            ClockKind::Realtime => SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| ClockError {
                    clock: "realtime",
                    source: io::Error::new(io::ErrorKind::Other, e),
                })?,
        };
        Ok(Timestamp {
            secs: elapsed.as_secs() as i64,
            nanos: elapsed.subsec_nanos(),
        })
    }
}

/// Compute the elapsed nanoseconds between two readings the way the
/// measurement loop always has: by subtracting the sub-second parts only.
///
/// Returns `None` unless `end.nanos > start.nanos`. The seconds fields are
/// ignored, so an interval that crosses a second boundary is dropped even if
/// it's perfectly valid, and an interval longer than one second is reported
/// modulo one second. Both are known limitations kept for comparability with
/// earlier measurement runs.
pub fn sub_second_elapsed(start: Timestamp, end: Timestamp) -> Option<u32> {
    (end.nanos > start.nanos).then(|| end.nanos - start.nanos)
}

// ----------------------------------------------------------------------------

/// A fixed-capacity array of `u32` intervals stored in a [`RegisterWindow`].
///
/// The array contents are visible to anyone else looking at the same memory
/// (e.g., a debugger attached to the FPGA). The length is kept by the process.
#[derive(Debug)]
pub struct SampleBuffer {
    window: Arc<RegisterWindow>,
    offset: usize,
    capacity: usize,
    len: AtomicUsize,
}

impl SampleBuffer {
    /// Construct an empty buffer of `capacity` words starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the array doesn't fit in `window` or `offset` isn't 4-byte
    /// aligned.
    pub fn new(window: Arc<RegisterWindow>, offset: usize, capacity: usize) -> Self {
        let end = capacity
            .checked_mul(4)
            .and_then(|size| size.checked_add(offset));
        assert!(
            end.map_or(false, |end| end <= window.len()),
            "{} samples at {offset:#x} don't fit in {}",
            capacity,
            window.spec(),
        );
        assert_eq!(offset % 4, 0, "sample array at {offset:#x} is misaligned");
        Self {
            window,
            offset,
            capacity,
            len: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Append `sample`. Returns its index, or `None` if the buffer is full.
    ///
    /// Only one thread may push at a time.
    pub fn push(&self, sample: u32) -> Option<usize> {
        let index = self.len.load(Ordering::Relaxed);
        if index >= self.capacity {
            return None;
        }
        self.window.write_word(self.offset + index * 4, sample);
        self.len.store(index + 1, Ordering::Release);
        Some(index)
    }

    /// Read the sample at `index` back from the window.
    pub fn get(&self, index: usize) -> Option<u32> {
        (index < self.len()).then(|| self.window.read_word(self.offset + index * 4))
    }

    /// Read every recorded sample back from the window, in recording order.
    pub fn to_vec(&self) -> Vec<u32> {
        (0..self.len())
            .map(|i| self.window.read_word(self.offset + i * 4))
            .collect()
    }
}

// ----------------------------------------------------------------------------

/// What [`TimingRecorder::measure`] did with a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureOutcome {
    /// Appended to the buffer at `index`.
    Recorded { index: usize, nanos: u32 },
    /// Measured, but the buffer was already full.
    BufferFull { nanos: u32 },
    /// Dropped because the end reading's sub-second part didn't exceed the
    /// start reading's.
    Wraparound,
    /// A clock read failed; nothing was measured.
    ClockFailed,
}

/// Times a workload and stores the interval in a [`SampleBuffer`].
pub struct TimingRecorder<C = SystemClock> {
    clock: C,
    buffer: SampleBuffer,
}

impl<C> fmt::Debug for TimingRecorder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimingRecorder")
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl<C: Clock> TimingRecorder<C> {
    pub fn new(clock: C, buffer: SampleBuffer) -> Self {
        Self { clock, buffer }
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> SampleBuffer {
        self.buffer
    }

    /// Read the clock, run `workload`, and read the clock again.
    ///
    /// The workload always runs. A failed clock read is reported and the
    /// measurement is skipped. A wraparound (see [`sub_second_elapsed`]) is
    /// dropped silently.
    pub fn measure(&self, workload: impl FnOnce()) -> MeasureOutcome {
        let start = self.clock.now();
        workload();
        let end = self.clock.now();

        let (start, end) = match (start, end) {
            (Ok(start), Ok(end)) => (start, end),
            (Err(e), _) | (_, Err(e)) => {
                log::error!("{e}: {}", e.source);
                return MeasureOutcome::ClockFailed;
            }
        };

        let Some(nanos) = sub_second_elapsed(start, end) else {
            return MeasureOutcome::Wraparound;
        };

        match self.buffer.push(nanos) {
            Some(index) => MeasureOutcome::Recorded { index, nanos },
            None => MeasureOutcome::BufferFull { nanos },
        }
    }
}

/// Summary statistics of a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleStats {
    pub count: usize,
    pub min: u32,
    pub max: u32,
    pub mean: u32,
}

impl SampleStats {
    pub fn of(samples: &[u32]) -> Option<Self> {
        let min = *samples.iter().min()?;
        let max = *samples.iter().max()?;
        let sum: u64 = samples.iter().map(|&x| x as u64).sum();
        Some(Self {
            count: samples.len(),
            min,
            max,
            mean: (sum / samples.len() as u64) as u32,
        })
    }
}

impl fmt::Display for SampleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples, min {} ns, max {} ns, mean {} ns",
            self.count, self.min, self.max, self.mean
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{AccessPolicy, WindowSpec};
    use quickcheck_macros::quickcheck;
    use std::sync::Mutex;

    const RAM: WindowSpec = WindowSpec::new("RAM", 0, 256);

    fn buffer(capacity: usize) -> SampleBuffer {
        let window = Arc::new(RegisterWindow::simulated(RAM, AccessPolicy::Serialized));
        SampleBuffer::new(window, 0x10, capacity)
    }

    /// Replays a fixed list of readings.
    struct ScriptedClock(Mutex<Vec<Result<Timestamp, ()>>>);

    impl ScriptedClock {
        fn new(readings: impl IntoIterator<Item = Result<Timestamp, ()>>) -> Self {
            let mut readings: Vec<_> = readings.into_iter().collect();
            readings.reverse();
            Self(Mutex::new(readings))
        }
    }

    impl Clock for ScriptedClock {
        fn now(&self) -> Result<Timestamp, ClockError> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .expect("clock read more times than scripted")
                .map_err(|()| ClockError {
                    clock: "scripted",
                    source: io::Error::from_raw_os_error(22),
                })
        }
    }

    fn ts(secs: i64, nanos: u32) -> Timestamp {
        Timestamp { secs, nanos }
    }

    #[test]
    fn records_in_order() {
        let clock = ScriptedClock::new([
            Ok(ts(5, 100)),
            Ok(ts(5, 350)),
            Ok(ts(6, 1_000)),
            Ok(ts(6, 1_010)),
        ]);
        let recorder = TimingRecorder::new(clock, buffer(4));
        let mut ran = 0;
        assert_eq!(
            recorder.measure(|| ran += 1),
            MeasureOutcome::Recorded {
                index: 0,
                nanos: 250
            }
        );
        assert_eq!(
            recorder.measure(|| ran += 1),
            MeasureOutcome::Recorded { index: 1, nanos: 10 }
        );
        assert_eq!(ran, 2);
        assert_eq!(recorder.buffer().to_vec(), vec![250, 10]);
    }

    #[test]
    fn crossing_a_second_boundary_is_discarded() {
        let clock = ScriptedClock::new([
            Ok(ts(5, 999_999_000)),
            Ok(ts(6, 500)),
            Ok(ts(7, 42)),
            Ok(ts(7, 42)),
        ]);
        let recorder = TimingRecorder::new(clock, buffer(4));
        let mut ran = false;
        assert_eq!(recorder.measure(|| ran = true), MeasureOutcome::Wraparound);
        assert!(ran);
        // Equal sub-second parts are discarded as well
        assert_eq!(recorder.measure(|| {}), MeasureOutcome::Wraparound);
        assert!(recorder.buffer().is_empty());
    }

    #[test]
    fn clock_failure_skips_the_sample() {
        let clock = ScriptedClock::new([Ok(ts(0, 1)), Err(()), Err(()), Ok(ts(0, 9))]);
        let recorder = TimingRecorder::new(clock, buffer(4));
        assert_eq!(recorder.measure(|| {}), MeasureOutcome::ClockFailed);
        assert_eq!(recorder.measure(|| {}), MeasureOutcome::ClockFailed);
        assert!(recorder.buffer().is_empty());
    }

    #[quickcheck]
    fn qc_wraparound_law(s1: i64, n1: u32, s2: i64, n2: u32) {
        let (start, end) = (ts(s1, n1 % 1_000_000_000), ts(s2, n2 % 1_000_000_000));
        let clock = ScriptedClock::new([Ok(start), Ok(end)]);
        let recorder = TimingRecorder::new(clock, buffer(1));
        let outcome = recorder.measure(|| {});
        if end.nanos <= start.nanos {
            assert_eq!(outcome, MeasureOutcome::Wraparound);
            assert!(recorder.buffer().is_empty());
        } else {
            let nanos = end.nanos - start.nanos;
            assert_eq!(outcome, MeasureOutcome::Recorded { index: 0, nanos });
            assert_eq!(recorder.buffer().to_vec(), vec![nanos]);
        }
    }

    #[quickcheck]
    fn qc_length_never_exceeds_capacity(capacity: u8, extra: u8) {
        let capacity = capacity as usize % 32;
        let calls = capacity + extra as usize % 16;
        let clock = ScriptedClock::new((0..calls).flat_map(|i| {
            let base = i as u32 * 1_000;
            [Ok(ts(0, base)), Ok(ts(0, base + 7))]
        }));
        let recorder = TimingRecorder::new(clock, buffer(capacity));
        for i in 0..calls {
            let outcome = recorder.measure(|| {});
            if i < capacity {
                assert_eq!(outcome, MeasureOutcome::Recorded { index: i, nanos: 7 });
            } else {
                assert_eq!(outcome, MeasureOutcome::BufferFull { nanos: 7 });
            }
            assert!(recorder.buffer().len() <= capacity);
            assert_eq!(recorder.buffer().is_full(), i + 1 >= capacity);
        }
        assert_eq!(recorder.buffer().len(), capacity);
    }

    #[test]
    fn samples_live_in_the_window() {
        let window = Arc::new(RegisterWindow::simulated(RAM, AccessPolicy::Serialized));
        let samples = SampleBuffer::new(Arc::clone(&window), 0x10, 3);
        samples.push(0xdead);
        samples.push(0xbeef);
        assert_eq!(window.read_word(0x10), 0xdead);
        assert_eq!(window.read_word(0x14), 0xbeef);
        assert_eq!(window.read_word(0x18), 0);
        assert_eq!(samples.get(1), Some(0xbeef));
        assert_eq!(samples.get(2), None);
    }

    #[test]
    #[should_panic(expected = "don't fit")]
    fn oversized_buffer_panics() {
        buffer(RAM.len / 4);
    }

    #[test]
    fn system_clock_advances() {
        let clock = ClockKind::Monotonic.clock();
        let a = clock.now().unwrap();
        let b = clock.now().unwrap();
        assert!(b >= a);
        assert!(a.nanos < 1_000_000_000);
        ClockKind::Realtime.clock().now().unwrap();
    }

    #[test]
    fn stats() {
        assert_eq!(SampleStats::of(&[]), None);
        assert_eq!(
            SampleStats::of(&[30, 10, 20]),
            Some(SampleStats {
                count: 3,
                min: 10,
                max: 30,
                mean: 20
            })
        );
    }
}

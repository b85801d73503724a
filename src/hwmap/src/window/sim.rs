//! In-process stand-in for device memory.
use std::{
    io,
    sync::atomic::{AtomicU32, Ordering},
};

use super::Backing;

/// Zero-initialized, word-aligned memory that behaves like a little-endian
/// register file.
///
/// Each access is a sequentially-consistent atomic operation on the
/// containing word, so concurrent use is sound even under
/// [`AccessPolicy::Unsynchronized`](super::AccessPolicy::Unsynchronized).
/// Unsynchronized read-modify-write sequences can still lose updates, exactly
/// as they would on hardware.
#[derive(Debug)]
pub struct Simulated {
    words: Box<[AtomicU32]>,
}

impl Simulated {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: (0..(len + 3) / 4).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Split a byte offset into the containing word and the bit shift of the
    /// byte within that word.
    #[inline]
    fn locate(&self, offset: usize) -> (&AtomicU32, u32) {
        (&self.words[offset / 4], (offset % 4) as u32 * 8)
    }
}

unsafe impl Backing for Simulated {
    unsafe fn read_u32(&self, offset: usize) -> u32 {
        self.words[offset / 4].load(Ordering::SeqCst)
    }

    unsafe fn write_u32(&self, offset: usize, value: u32) {
        self.words[offset / 4].store(value, Ordering::SeqCst);
    }

    unsafe fn read_u8(&self, offset: usize) -> u8 {
        let (word, shift) = self.locate(offset);
        (word.load(Ordering::SeqCst) >> shift) as u8
    }

    unsafe fn write_u8(&self, offset: usize, value: u8) {
        let (word, shift) = self.locate(offset);
        let mask = 0xffu32 << shift;
        // A byte store must not disturb the neighboring bytes
        let _ = word.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |old| {
            Some((old & !mask) | ((value as u32) << shift))
        });
    }

    fn unmap(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

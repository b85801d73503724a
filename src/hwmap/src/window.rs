//! Register windows: mapped views of a physical address range.
use std::{
    fmt,
    io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

#[cfg(unix)]
mod devmem;
mod sim;

#[cfg(unix)]
pub use self::devmem::DevMem;
pub use self::sim::Simulated;

/// The device file used by [`RegisterWindow::map`].
pub const DEV_MEM: &str = "/dev/mem";

/// A physical address range to be mapped as a [`RegisterWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub name: &'static str,
    /// The physical base address. Must be page-aligned to be mappable.
    pub base: u64,
    /// The length in bytes.
    pub len: usize,
}

impl WindowSpec {
    pub const fn new(name: &'static str, base: u64, len: usize) -> Self {
        Self { name, base, len }
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#010x}..{:#010x})", self.name, self.base, self.base + self.len as u64)
    }
}

/// The access width of a [`Bit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
}

/// A control or status bit: a mask applied to the byte or word at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bit {
    pub offset: usize,
    pub mask: u32,
    pub width: Width,
}

impl Bit {
    pub const fn word(offset: usize, mask: u32) -> Self {
        Self {
            offset,
            mask,
            width: Width::Word,
        }
    }

    pub const fn byte(offset: usize, mask: u8) -> Self {
        Self {
            offset,
            mask: mask as u32,
            width: Width::Byte,
        }
    }
}

/// Controls whether read-modify-write sequences on a window are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Every read-modify-write and every plain write takes a per-window lock,
    /// so two threads setting different bits of the same register can't lose
    /// each other's update.
    #[default]
    Serialized,
    /// No locking. A read-modify-write racing with another writer of the same
    /// register may silently undo the other writer's change. This is how the
    /// hardware is driven when every task does its own `*reg = *reg | bit`.
    Unsynchronized,
}

/// The memory behind a [`RegisterWindow`].
///
/// # Safety
///
/// For every `offset` satisfying the preconditions of each method, the access
/// must be sound when performed concurrently from any number of threads, and
/// it must not be elided, merged, or reordered with other accesses through the
/// same backing.
pub unsafe trait Backing: Send + Sync + fmt::Debug {
    /// Read the word at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be 4-byte aligned and `offset + 4` must not exceed the
    /// length the backing was created with.
    unsafe fn read_u32(&self, offset: usize) -> u32;

    /// Write the word at `offset`.
    ///
    /// # Safety
    ///
    /// See [`Self::read_u32`].
    unsafe fn write_u32(&self, offset: usize, value: u32);

    /// Read the byte at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be less than the length the backing was created with.
    unsafe fn read_u8(&self, offset: usize) -> u8;

    /// Write the byte at `offset`.
    ///
    /// # Safety
    ///
    /// See [`Self::read_u8`].
    unsafe fn write_u8(&self, offset: usize, value: u8);

    /// Release the backing memory.
    fn unmap(self: Box<Self>) -> io::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Could not open {path:?} for the {name} window.")]
    Open {
        name: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Could not map the {name} window at {base:#x}.")]
    Mmap {
        name: &'static str,
        base: u64,
        #[source]
        source: io::Error,
    },
    #[error("The {name} window at {base:#x} is not addressable on this platform.")]
    BadAddress { name: &'static str, base: u64 },
    #[error("Mapping physical memory is not supported on this platform.")]
    Unsupported,
}

#[derive(Debug, thiserror::Error)]
#[error("Could not unmap the {name} window at {base:#x}.")]
pub struct UnmapError {
    pub name: &'static str,
    pub base: u64,
    #[source]
    pub source: io::Error,
}

/// A mapped view of a physical memory-mapped-I/O range.
///
/// All accesses are volatile. Share a window between threads with `Arc`.
///
/// # Panics
///
/// Every accessor panics if the accessed range doesn't lie within
/// `0..self.len()`, or if a word access isn't 4-byte aligned. This is checked
/// in release builds too.
pub struct RegisterWindow {
    spec: WindowSpec,
    policy: AccessPolicy,
    /// `None` only while the window is being torn down.
    backing: Option<Box<dyn Backing>>,
    rmw_lock: Mutex<()>,
}

impl fmt::Debug for RegisterWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterWindow")
            .field("spec", &self.spec)
            .field("policy", &self.policy)
            .field("backing", &self.backing)
            .finish()
    }
}

impl RegisterWindow {
    /// Map `spec` from [`DEV_MEM`].
    pub fn map(spec: WindowSpec, policy: AccessPolicy) -> Result<Self, MapError> {
        Self::map_from(Path::new(DEV_MEM), spec, policy)
    }

    /// Map `spec` from the physical-memory device at `path`.
    pub fn map_from(path: &Path, spec: WindowSpec, policy: AccessPolicy) -> Result<Self, MapError> {
        log::debug!("mapping {spec} from {path:?}");

        #[cfg(unix)]
        {
            let backing = DevMem::open(path, &spec)?;
            Ok(Self::with_backing(spec, Box::new(backing), policy))
        }

        #[cfg(not(unix))]
        {
            let _ = (path, policy);
            Err(MapError::Unsupported)
        }
    }

    /// Construct a window over a zero-filled in-process store.
    pub fn simulated(spec: WindowSpec, policy: AccessPolicy) -> Self {
        log::debug!("simulating {spec}");
        Self::with_backing(spec, Box::new(Simulated::zeroed(spec.len)), policy)
    }

    /// Construct a window over an arbitrary backing store. `backing` must be
    /// at least `spec.len` bytes long.
    pub fn with_backing(spec: WindowSpec, backing: Box<dyn Backing>, policy: AccessPolicy) -> Self {
        Self {
            spec,
            policy,
            backing: Some(backing),
            rmw_lock: Mutex::new(()),
        }
    }

    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    pub fn len(&self) -> usize {
        self.spec.len
    }

    pub fn is_empty(&self) -> bool {
        self.spec.len == 0
    }

    pub fn read_word(&self, offset: usize) -> u32 {
        self.check(offset, 4);
        // Safety: checked above
        unsafe { self.backing().read_u32(offset) }
    }

    pub fn write_word(&self, offset: usize, value: u32) {
        self.check(offset, 4);
        let _guard = self.lock_rmw();
        // Safety: checked above
        unsafe { self.backing().write_u32(offset, value) };
    }

    pub fn read_byte(&self, offset: usize) -> u8 {
        self.check(offset, 1);
        // Safety: checked above
        unsafe { self.backing().read_u8(offset) }
    }

    pub fn write_byte(&self, offset: usize, value: u8) {
        self.check(offset, 1);
        let _guard = self.lock_rmw();
        // Safety: checked above
        unsafe { self.backing().write_u8(offset, value) };
    }

    /// Replace the word at `offset` with `f(old)`. Returns the new value.
    ///
    /// This is atomic with respect to other writers of this window only under
    /// [`AccessPolicy::Serialized`].
    pub fn modify_word(&self, offset: usize, f: impl FnOnce(u32) -> u32) -> u32 {
        self.check(offset, 4);
        let _guard = self.lock_rmw();
        let backing = self.backing();
        // Safety: checked above
        unsafe {
            let value = f(backing.read_u32(offset));
            backing.write_u32(offset, value);
            value
        }
    }

    /// Replace the byte at `offset` with `f(old)`. Returns the new value.
    ///
    /// See [`Self::modify_word`] for atomicity.
    pub fn modify_byte(&self, offset: usize, f: impl FnOnce(u8) -> u8) -> u8 {
        self.check(offset, 1);
        let _guard = self.lock_rmw();
        let backing = self.backing();
        // Safety: checked above
        unsafe {
            let value = f(backing.read_u8(offset));
            backing.write_u8(offset, value);
            value
        }
    }

    /// Set `bit`, leaving the other bits of the register unchanged.
    pub fn set_bit(&self, bit: Bit) {
        match bit.width {
            Width::Word => {
                self.modify_word(bit.offset, |x| x | bit.mask);
            }
            Width::Byte => {
                self.modify_byte(bit.offset, |x| x | bit.mask as u8);
            }
        }
    }

    /// Clear `bit`, leaving the other bits of the register unchanged.
    pub fn clear_bit(&self, bit: Bit) {
        match bit.width {
            Width::Word => {
                self.modify_word(bit.offset, |x| x & !bit.mask);
            }
            Width::Byte => {
                self.modify_byte(bit.offset, |x| x & !(bit.mask as u8));
            }
        }
    }

    pub fn is_set(&self, bit: Bit) -> bool {
        let value = match bit.width {
            Width::Word => self.read_word(bit.offset),
            Width::Byte => self.read_byte(bit.offset) as u32,
        };
        value & bit.mask != 0
    }

    /// Read an active-low input. Returns `true` if the input is pulled low.
    pub fn is_pressed(&self, bit: Bit) -> bool {
        !self.is_set(bit)
    }

    /// Release the mapping.
    pub fn unmap(mut self) -> Result<(), UnmapError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), UnmapError> {
        let Some(backing) = self.backing.take() else {
            return Ok(());
        };
        log::debug!("unmapping {}", self.spec);
        backing.unmap().map_err(|source| UnmapError {
            name: self.spec.name,
            base: self.spec.base,
            source,
        })
    }

    #[inline]
    fn backing(&self) -> &dyn Backing {
        match &self.backing {
            Some(backing) => &**backing,
            None => unreachable!("{} was used after unmapping", self.spec.name),
        }
    }

    #[inline]
    fn lock_rmw(&self) -> Option<MutexGuard<'_, ()>> {
        match self.policy {
            AccessPolicy::Serialized => {
                Some(self.rmw_lock.lock().unwrap_or_else(PoisonError::into_inner))
            }
            AccessPolicy::Unsynchronized => None,
        }
    }

    #[inline]
    fn check(&self, offset: usize, size: usize) {
        assert!(
            offset
                .checked_add(size)
                .map_or(false, |end| end <= self.spec.len),
            "{}: access at {offset:#x} (+{size}) is outside of 0..{:#x}",
            self.spec.name,
            self.spec.len,
        );
        assert!(
            offset % size == 0,
            "{}: access at {offset:#x} is not {size}-byte aligned",
            self.spec.name,
        );
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("{e}: {}", e.source);
        }
    }
}

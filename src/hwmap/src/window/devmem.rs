//! `mmap`-backed physical memory.
use std::{
    fs::OpenOptions,
    io,
    os::unix::{fs::OpenOptionsExt, io::AsRawFd},
    path::Path,
    ptr::{null_mut, NonNull},
};

use super::{Backing, MapError, WindowSpec};

/// A shared, read-write mapping of a range of a physical-memory device.
#[derive(Debug)]
pub struct DevMem {
    ptr: NonNull<u8>,
    len: usize,
}

// Safety: The mapping is process-wide and is only ever accessed with volatile
// loads and stores.
unsafe impl Send for DevMem {}
unsafe impl Sync for DevMem {}

impl DevMem {
    pub fn open(path: &Path, spec: &WindowSpec) -> Result<Self, MapError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|source| MapError::Open {
                name: spec.name,
                path: path.to_owned(),
                source,
            })?;

        // The mapping outlives `file`; closing the descriptor doesn't unmap.
        let ptr = unsafe { mmap_shared(spec, file.as_raw_fd())? };

        Ok(Self { ptr, len: spec.len })
    }

    #[inline]
    fn at<T>(&self, offset: usize) -> *mut T {
        // Safety: The caller upholds `offset < self.len`
        unsafe { self.ptr.as_ptr().add(offset).cast() }
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
unsafe fn mmap_shared(spec: &WindowSpec, fd: libc::c_int) -> Result<NonNull<u8>, MapError> {
    // Use the 64-bit variant so that bases above 2 GiB work on 32-bit hosts
    let offset = libc::off64_t::try_from(spec.base).map_err(|_| MapError::BadAddress {
        name: spec.name,
        base: spec.base,
    })?;
    let ptr = unsafe {
        libc::mmap64(
            null_mut(),
            spec.len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            offset,
        )
    };
    ok_or_map_failed(ptr, spec)
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
unsafe fn mmap_shared(spec: &WindowSpec, fd: libc::c_int) -> Result<NonNull<u8>, MapError> {
    let offset = libc::off_t::try_from(spec.base).map_err(|_| MapError::BadAddress {
        name: spec.name,
        base: spec.base,
    })?;
    let ptr = unsafe {
        libc::mmap(
            null_mut(),
            spec.len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            offset,
        )
    };
    ok_or_map_failed(ptr, spec)
}

fn ok_or_map_failed(ptr: *mut libc::c_void, spec: &WindowSpec) -> Result<NonNull<u8>, MapError> {
    if ptr == libc::MAP_FAILED {
        return Err(MapError::Mmap {
            name: spec.name,
            base: spec.base,
            source: last_os_error(),
        });
    }
    NonNull::new(ptr.cast()).ok_or(MapError::BadAddress {
        name: spec.name,
        base: spec.base,
    })
}

fn last_os_error() -> io::Error {
    io::Error::from_raw_os_error(errno::errno().0)
}

unsafe impl Backing for DevMem {
    #[inline]
    unsafe fn read_u32(&self, offset: usize) -> u32 {
        unsafe { self.at::<u32>(offset).read_volatile() }
    }

    #[inline]
    unsafe fn write_u32(&self, offset: usize, value: u32) {
        unsafe { self.at::<u32>(offset).write_volatile(value) }
    }

    #[inline]
    unsafe fn read_u8(&self, offset: usize) -> u8 {
        unsafe { self.at::<u8>(offset).read_volatile() }
    }

    #[inline]
    unsafe fn write_u8(&self, offset: usize, value: u8) {
        unsafe { self.at::<u8>(offset).write_volatile(value) }
    }

    fn unmap(self: Box<Self>) -> io::Result<()> {
        if unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) } != 0 {
            return Err(last_os_error());
        }
        Ok(())
    }
}

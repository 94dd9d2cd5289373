// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! File-backed read-write memory mappings.
//!
//! The command-and-control file and every log buffer are plain files mapped
//! shared between the driver and its clients. `MappedFile` wraps `mmap` on a
//! regular file descriptor and unmaps on drop; `AlignedBuffer` provides an
//! anonymous cache-aligned region for in-process use.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;

use crate::util::bit::CACHE_LINE_LENGTH;

/// A read-write shared mapping of a regular file.
///
/// The mapping is released on drop. The file itself is never deleted; the
/// creator of a file owns its lifecycle.
#[derive(Debug)]
pub struct MappedFile {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapped region is shared memory whose concurrently accessed
// fields are only touched through atomic operations (see AtomicBuffer).
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Map an existing file read-write for its full length.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is empty, or the
    /// mapping fails.
    pub fn map_existing(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;

        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("cannot map empty file: {}", path.display()),
            ));
        }

        Self::map_fd(file.as_raw_fd(), len)
    }

    /// Create a new file of `len` zeroed bytes and map it read-write.
    ///
    /// An existing file at `path` is truncated.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, sized, or mapped.
    pub fn map_new(path: &Path, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        // set_len extends with zeroes, matching a freshly laid-out buffer file.
        file.set_len(len as u64)?;

        Self::map_fd(file.as_raw_fd(), len)
    }

    fn map_fd(fd: i32, len: usize) -> io::Result<Self> {
        // SAFETY:
        // - First argument is null, letting the kernel choose the address
        // - len matches the file length checked by the caller
        // - PROT_READ | PROT_WRITE with MAP_SHARED creates a mapping visible
        //   to every process that maps the same file
        // - fd is a valid descriptor for the duration of the call; the
        //   mapping keeps its own reference afterwards
        // - mmap returns MAP_FAILED on error (checked below)
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            len,
        })
    }

    /// Raw pointer to the start of the mapping.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Length of the mapping in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty (never true for a successful map).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        // SAFETY:
        // - self.ptr was returned by a successful mmap of exactly self.len bytes
        // - Drop runs at most once, so the region is unmapped at most once
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

/// A cache-line-aligned, zero-initialized heap region.
///
/// Stands in for a mapped file when the command-and-control layout is hosted
/// in process memory, which is how the conductor is exercised without a
/// driver process.
pub struct AlignedBuffer {
    ptr: *mut u8,
    layout: Layout,
}

// SAFETY: same contract as MappedFile; concurrent fields go through atomics.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes aligned to a cache line.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or the allocation fails; an aligned region is
    /// a precondition for every buffer built on top of it.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        assert!(len > 0, "aligned buffer length must be non-zero");

        let layout = match Layout::from_size_align(len, CACHE_LINE_LENGTH) {
            Ok(layout) => layout,
            Err(_) => panic!("invalid layout for {len} bytes"),
        };

        // SAFETY: layout has non-zero size (asserted above).
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null(), "allocation of {len} bytes failed");

        Self { ptr, layout }
    }

    /// Raw pointer to the start of the region.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Length of the region in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Whether the region is empty (never true; zero length is rejected).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr/layout come from the alloc_zeroed call in zeroed().
        unsafe {
            dealloc(self.ptr, self.layout);
        }
    }
}

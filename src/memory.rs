// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Backing memory for buffer headers.
//!
//! A header's payload lives in a [`Memory`] region. Regions are either
//! allocated by the component (see [`crate::component::Component::allocate_buffer`])
//! or supplied by the host through a [`MemoryAllocator`] when a port uses
//! `UseBuffer` allocation.
//!
//! ## Safety
//!
//! Regions hand out raw pointers. Exclusive access is guaranteed by the
//! buffer protocol: a header is owned by exactly one of the component, the
//! port queue or the pipeline at any time, and only the owner touches its
//! payload.

use crate::error::Result;
use dma_heap::{Heap, HeapKind};
use libc::{mmap, munmap, MAP_FAILED, MAP_SHARED, PROT_READ, PROT_WRITE};
use std::{
    cell::UnsafeCell,
    fmt, io,
    os::fd::{AsRawFd, OwnedFd},
    ptr::null_mut,
    sync::Arc,
};
use tracing::{debug, warn};

/// A contiguous region a component can read or write.
pub trait Memory: Send + Sync {
    fn as_ptr(&self) -> *mut u8;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Heap allocated region.
pub struct HostMemory {
    data: UnsafeCell<Box<[u8]>>,
    len: usize,
}

// SAFETY: see the module documentation, ownership of a region is exclusive by
// protocol.
unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

impl HostMemory {
    pub fn new(len: usize) -> Self {
        HostMemory {
            data: UnsafeCell::new(vec![0u8; len].into_boxed_slice()),
            len,
        }
    }
}

impl Memory for HostMemory {
    fn as_ptr(&self) -> *mut u8 {
        // SAFETY: the box is never reallocated, only its contents change.
        unsafe { (*self.data.get()).as_mut_ptr() }
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostMemory({:p}, {})", self.as_ptr(), self.len)
    }
}

/// DMA heap backing a [`DmaMemory`] region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmaHeap {
    /// Physically contiguous memory, required by most codec engines.
    #[default]
    Cma,
    System,
}

/// DMA heap region mapped into the process.
///
/// The mapping is released when the region is dropped, the file descriptor
/// is closed after it.
pub struct DmaMemory {
    fd: OwnedFd,
    ptr: *mut u8,
    len: usize,
}

unsafe impl Send for DmaMemory {}
unsafe impl Sync for DmaMemory {}

impl DmaMemory {
    /// Allocates `len` bytes from the CMA heap, matching the memory used for
    /// camera frames on i.MX platforms.
    ///
    /// # Errors
    ///
    /// Returns an error if the DMA heap device cannot be opened, is out of
    /// memory, or the buffer cannot be mapped.
    pub fn new(len: usize) -> Result<Self> {
        Self::with_heap(DmaHeap::Cma, len)
    }

    pub fn with_heap(heap: DmaHeap, len: usize) -> Result<Self> {
        let kind = match heap {
            DmaHeap::Cma => HeapKind::Cma,
            DmaHeap::System => HeapKind::System,
        };
        let heap = Heap::new(kind).map_err(|e| io::Error::other(e.to_string()))?;
        let fd = heap
            .allocate(len)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let ptr = unsafe {
            mmap(
                null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }
        debug!("DMA buffer alloc'd: {} bytes", len);
        Ok(DmaMemory {
            fd,
            ptr: ptr as *mut u8,
            len,
        })
    }

    pub fn fd(&self) -> &OwnedFd {
        &self.fd
    }
}

impl Memory for DmaMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for DmaMemory {
    fn drop(&mut self) {
        if unsafe { munmap(self.ptr as *mut libc::c_void, self.len) } != 0 {
            warn!("munmap failed: {}", io::Error::last_os_error());
        }
        debug!("DMA buffer freed")
    }
}

/// Supplies host memory for ports that hand their own buffers to the
/// component.
pub trait MemoryAllocator: Send + Sync {
    fn allocate(&self, len: usize) -> Result<Arc<dyn Memory>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl MemoryAllocator for HeapAllocator {
    fn allocate(&self, len: usize) -> Result<Arc<dyn Memory>> {
        Ok(Arc::new(HostMemory::new(len)))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DmaAllocator {
    heap: DmaHeap,
}

impl DmaAllocator {
    pub fn new(heap: DmaHeap) -> Self {
        DmaAllocator { heap }
    }
}

impl MemoryAllocator for DmaAllocator {
    fn allocate(&self, len: usize) -> Result<Arc<dyn Memory>> {
        Ok(Arc::new(DmaMemory::with_heap(self.heap, len)?))
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{buffer::Buffer, component::BufferFlags, memory::Memory};
use parking_lot::{Mutex, MutexGuard};
use std::{
    ffi::c_void,
    fmt,
    ptr::{copy_nonoverlapping, null_mut},
    slice::from_raw_parts,
    sync::{
        atomic::{AtomicPtr, Ordering},
        Arc,
    },
};

/// Shared handle to a buffer header.
pub type HeaderRef = Arc<BufferHeader>;

/// Which side currently owns a header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Holder {
    /// In a port queue or referenced by a pipeline buffer.
    Host,
    /// Submitted with `EmptyThisBuffer` or `FillThisBuffer`.
    Component,
}

/// Mutable header fields, exchanged with the component on every
/// submission and completion.
pub struct Fields {
    pub filled_len: u32,
    pub offset: u32,
    pub flags: BufferFlags,
    /// Presentation time in OpenMAX ticks, `-1` when unknown.
    pub timestamp: i64,
    /// Pipeline buffer kept alive while the component works on its memory.
    pub app_private: Option<Buffer>,
    pub(crate) generation: u64,
    pub(crate) holder: Holder,
}

/// Descriptor of one component buffer.
///
/// The memory region and capacity are fixed for the header's lifetime; the
/// remaining fields travel with each submission.
pub struct BufferHeader {
    port: u32,
    memory: Arc<dyn Memory>,
    alloc_len: u32,
    native: AtomicPtr<c_void>,
    fields: Mutex<Fields>,
}

impl BufferHeader {
    pub fn new(port: u32, memory: Arc<dyn Memory>) -> HeaderRef {
        let alloc_len = u32::try_from(memory.len()).unwrap_or(u32::MAX);
        Arc::new(BufferHeader {
            port,
            memory,
            alloc_len,
            native: AtomicPtr::new(null_mut()),
            fields: Mutex::new(Fields {
                filled_len: 0,
                offset: 0,
                flags: BufferFlags::EMPTY,
                timestamp: -1,
                app_private: None,
                generation: 0,
                holder: Holder::Host,
            }),
        })
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    pub fn memory(&self) -> &Arc<dyn Memory> {
        &self.memory
    }

    pub fn data_ptr(&self) -> *mut u8 {
        self.memory.as_ptr()
    }

    pub fn alloc_len(&self) -> u32 {
        self.alloc_len
    }

    /// Component specific token, the raw `OMX_BUFFERHEADERTYPE` for IL
    /// components.
    pub fn native(&self) -> *mut c_void {
        self.native.load(Ordering::Acquire)
    }

    pub fn set_native(&self, native: *mut c_void) {
        self.native.store(native, Ordering::Release);
    }

    pub fn lock(&self) -> MutexGuard<'_, Fields> {
        self.fields.lock()
    }

    pub fn filled_len(&self) -> u32 {
        self.fields.lock().filled_len
    }

    pub fn offset(&self) -> u32 {
        self.fields.lock().offset
    }

    pub fn flags(&self) -> BufferFlags {
        self.fields.lock().flags
    }

    pub fn timestamp(&self) -> i64 {
        self.fields.lock().timestamp
    }

    pub fn holder(&self) -> Holder {
        self.fields.lock().holder
    }

    pub(crate) fn set_holder(&self, holder: Holder) {
        self.fields.lock().holder = holder;
    }

    pub fn generation(&self) -> u64 {
        self.fields.lock().generation
    }

    /// Detaches the pipeline buffer referenced by the header. The caller
    /// drops it outside of the header lock.
    pub fn take_app_private(&self) -> Option<Buffer> {
        self.fields.lock().app_private.take()
    }

    /// Copies `data` into the region starting at `offset`, clamped to the
    /// remaining capacity. Returns the number of bytes written.
    pub fn write(&self, offset: u32, data: &[u8]) -> usize {
        let offset = offset.min(self.alloc_len) as usize;
        let len = data.len().min(self.alloc_len as usize - offset);
        if len > 0 {
            // SAFETY: bounds clamped above and the owner of the header has
            // exclusive access to its memory.
            unsafe { copy_nonoverlapping(data.as_ptr(), self.data_ptr().add(offset), len) };
        }
        len
    }

    /// Borrows `len` bytes at `offset`, clamped to the capacity.
    ///
    /// # Safety
    ///
    /// The caller must own the header for the lifetime of the slice; the
    /// component must not be writing to it.
    pub unsafe fn bytes(&self, offset: u32, len: u32) -> &[u8] {
        let offset = offset.min(self.alloc_len) as usize;
        let len = (len as usize).min(self.alloc_len as usize - offset);
        if len == 0 {
            return &[];
        }
        from_raw_parts(self.data_ptr().add(offset), len)
    }

    /// Copies the filled payload out of the region.
    pub fn payload(&self) -> Vec<u8> {
        let (offset, len) = {
            let fields = self.fields.lock();
            (fields.offset, fields.filled_len)
        };
        // SAFETY: payload is only called by the current owner.
        unsafe { self.bytes(offset, len).to_vec() }
    }
}

impl fmt::Debug for BufferHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields.lock();
        f.debug_struct("BufferHeader")
            .field("port", &self.port)
            .field("data", &self.data_ptr())
            .field("alloc_len", &self.alloc_len)
            .field("filled_len", &fields.filled_len)
            .field("offset", &fields.offset)
            .field("flags", &fields.flags)
            .field("timestamp", &fields.timestamp)
            .field("holder", &fields.holder)
            .finish()
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{Error, Result},
    header::HeaderRef,
    port::Port,
};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{Arc, Weak},
};
use tracing::{trace, warn};

/// Teardown guard shared between a port and the transports it handed out.
///
/// The port clears the guard under its lock while freeing its buffers, so a
/// transport dropped afterwards never touches a freed header. A fresh guard
/// is armed with every allocation.
pub struct PortGuard {
    port: Mutex<Option<Weak<Port>>>,
}

impl PortGuard {
    pub(crate) fn armed(port: Weak<Port>) -> Arc<PortGuard> {
        Arc::new(PortGuard {
            port: Mutex::new(Some(port)),
        })
    }

    pub(crate) fn disarmed() -> Arc<PortGuard> {
        Arc::new(PortGuard {
            port: Mutex::new(None),
        })
    }

    /// Runs `f` with the guard held, then detaches the port.
    pub(crate) fn teardown<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut port = self.port.lock();
        let result = f();
        *port = None;
        result
    }

    pub fn is_live(&self) -> bool {
        self.port
            .lock()
            .as_ref()
            .map(|port| port.strong_count() > 0)
            .unwrap_or(false)
    }
}

/// Zero-copy view of a component output buffer.
///
/// While any pipeline [`crate::buffer::Buffer`] references the transport the
/// header stays with the host. Dropping the last reference resubmits it to
/// the component. Transports attached to a composite are released after it,
/// each through its own port.
pub struct BufferTransport {
    header: HeaderRef,
    extra: Mutex<Vec<Arc<BufferTransport>>>,
    guard: Arc<PortGuard>,
    offset: u32,
    len: u32,
}

impl BufferTransport {
    pub(crate) fn new(header: HeaderRef, guard: Arc<PortGuard>) -> Arc<BufferTransport> {
        let (offset, len) = {
            let fields = header.lock();
            (fields.offset, fields.filled_len)
        };
        Arc::new(BufferTransport {
            header,
            extra: Mutex::new(Vec::new()),
            guard,
            offset,
            len,
        })
    }

    pub fn header(&self) -> &HeaderRef {
        &self.header
    }

    /// Keeps `other` out of its pool until this transport is dropped.
    ///
    /// Fails if this transport is already reachable from `other`.
    pub fn attach(&self, other: Arc<BufferTransport>) -> Result<()> {
        if other.reaches(self) {
            return Err(Error::InvalidArgument(
                "transport cannot be attached to itself".to_owned(),
            ));
        }
        trace!("attaching {:?}", other);
        self.extra.lock().push(other);
        Ok(())
    }

    fn reaches(&self, target: &BufferTransport) -> bool {
        std::ptr::eq(self, target) || self.extra.lock().iter().any(|t| t.reaches(target))
    }

    /// The transports attached with [`BufferTransport::attach`], in order.
    pub fn extra(&self) -> Vec<Arc<BufferTransport>> {
        self.extra.lock().clone()
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload length of this transport and everything attached to it.
    pub fn total_len(&self) -> usize {
        self.len() + self.extra.lock().iter().map(|t| t.total_len()).sum::<usize>()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the header belongs to the host until this transport is
        // dropped, the component does not write to it meanwhile.
        unsafe { self.header.bytes(self.offset, self.len) }
    }

    pub fn is_live(&self) -> bool {
        self.guard.is_live()
    }
}

impl Drop for BufferTransport {
    fn drop(&mut self) {
        let slot = self.guard.port.lock();
        let Some(port) = slot.as_ref().and_then(Weak::upgrade) else {
            trace!("transport dropped after port teardown");
            return;
        };
        if let Err(err) = port.release(&self.header) {
            warn!("{}: failed to return buffer: {}", port.name(), err);
        }
        // Attached transports drop with the fields, once the guard is free.
    }
}

impl fmt::Debug for BufferTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferTransport")
            .field("header", &self.header)
            .field("extra", &self.extra.lock().len())
            .field("live", &self.is_live())
            .finish()
    }
}

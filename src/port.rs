// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Component ports and the buffer send/receive protocol.
//!
//! A [`Port`] owns the pool of buffer headers for one component port and
//! moves them between three owners: the component, the port's queue and the
//! pipeline. Input ports hand free headers to [`Port::send`]; output ports
//! deliver filled headers through [`Port::recv`], or joined per frame through
//! [`Port::recv_frame`].
//!
//! ## Copy modes
//!
//! - [`CopyMode::AlwaysCopy`]: payloads are copied into and out of header
//!   memory. Headers never leave the port.
//! - [`CopyMode::Share`]: output headers are wrapped in a
//!   [`BufferTransport`] and returned to the component when the pipeline
//!   drops them. An input port in this mode is set up over the memory of an
//!   upstream port ([`Port::use_shared_memory`]) and submits the upstream
//!   buffers in place.

use crate::{
    buffer::{from_ticks, to_ticks, Buffer, Item, TICKS_NONE},
    component::{BufferFlags, Command, Component, Direction, PortDefinition, State},
    core::CoreInner,
    error::{Error, Result},
    header::{BufferHeader, HeaderRef, Holder},
    memory::{HeapAllocator, Memory, MemoryAllocator},
    queue::BoundedQueue,
    sync::Wake,
    transport::{BufferTransport, PortGuard},
};
use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tracing::{debug, error, trace, warn};

/// Who allocates header memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Allocation {
    /// `AllocateBuffer`: the component owns the memory.
    Component,
    /// `UseBuffer`: the host supplies the memory.
    Host,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CopyMode {
    AlwaysCopy,
    Share,
}

/// Allocates pipeline memory for copied output and for the sizing
/// allocation made by [`Port::prepare`].
///
/// Downstream elements use this hook to negotiate buffer sizes before the
/// component commits to its pool.
pub trait BufferAllocator: Send + Sync {
    fn allocate(&self, port: &Port, size: usize) -> Result<Vec<u8>>;
}

impl<F> BufferAllocator for F
where
    F: Fn(&Port, usize) -> Result<Vec<u8>> + Send + Sync,
{
    fn allocate(&self, port: &Port, size: usize) -> Result<Vec<u8>> {
        self(port, size)
    }
}

const EOS_NONE: u8 = 0;
const EOS_PENDING: u8 = 1;
const EOS_DELIVERED: u8 = 2;

/// How long a zero-copy EOS waits for an idle header before re-checking the
/// port state.
const RELEASE_POLL: Duration = Duration::from_millis(50);

struct Settings {
    direction: Option<Direction>,
    num_buffers: u32,
    allocation: Allocation,
    copy_mode: CopyMode,
    shared: Option<Vec<Arc<dyn Memory>>>,
    memory: Arc<dyn MemoryAllocator>,
    allocator: Option<Arc<dyn BufferAllocator>>,
}

pub struct Port {
    core: Weak<CoreInner>,
    this: Weak<Port>,
    index: u32,
    name: String,
    enabled: AtomicBool,
    settings: Mutex<Settings>,
    headers: Mutex<Option<Vec<HeaderRef>>>,
    queue: BoundedQueue<HeaderRef>,
    ignore_count: AtomicU32,
    generation: AtomicU64,
    guard: Mutex<Arc<PortGuard>>,
    eos: AtomicU8,
    released: Mutex<()>,
    released_cond: Condvar,
}

impl Port {
    pub(crate) fn new(core: Weak<CoreInner>, name: &str, index: u32) -> Arc<Port> {
        Arc::new_cyclic(|this| Port {
            core,
            this: this.clone(),
            index,
            name: format!("{}:{}", name, index),
            enabled: AtomicBool::new(true),
            settings: Mutex::new(Settings {
                direction: None,
                num_buffers: 0,
                allocation: Allocation::Component,
                copy_mode: CopyMode::AlwaysCopy,
                shared: None,
                memory: Arc::new(HeapAllocator),
                allocator: None,
            }),
            headers: Mutex::new(None),
            queue: BoundedQueue::new(0),
            ignore_count: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            guard: Mutex::new(PortGuard::disarmed()),
            eos: AtomicU8::new(EOS_NONE),
            released: Mutex::new(()),
            released_cond: Condvar::new(),
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Option<Direction> {
        self.settings.lock().direction
    }

    pub fn num_buffers(&self) -> u32 {
        self.settings.lock().num_buffers
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn allocation(&self) -> Allocation {
        self.settings.lock().allocation
    }

    pub fn copy_mode(&self) -> CopyMode {
        self.settings.lock().copy_mode
    }

    pub fn set_allocation(&self, allocation: Allocation) {
        self.settings.lock().allocation = allocation;
    }

    pub fn set_copy_mode(&self, copy_mode: CopyMode) {
        self.settings.lock().copy_mode = copy_mode;
    }

    /// Memory used for `UseBuffer` pools in copy mode.
    pub fn set_memory_provider(&self, memory: Arc<dyn MemoryAllocator>) {
        self.settings.lock().memory = memory;
    }

    pub fn set_allocator(&self, allocator: Option<Arc<dyn BufferAllocator>>) {
        self.settings.lock().allocator = allocator;
    }

    pub fn ignore_count(&self) -> u32 {
        self.ignore_count.load(Ordering::Acquire)
    }

    /// Number of headers currently with the component.
    pub fn outstanding(&self) -> usize {
        self.headers
            .lock()
            .as_ref()
            .map(|headers| {
                headers
                    .iter()
                    .filter(|h| h.holder() == Holder::Component)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Number of headers waiting in the port queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_allocated(&self) -> bool {
        self.headers.lock().is_some()
    }

    pub fn headers(&self) -> Vec<HeaderRef> {
        self.headers.lock().clone().unwrap_or_default()
    }

    fn core(&self) -> Result<Arc<CoreInner>> {
        self.core.upgrade().ok_or(Error::NoComponent)
    }

    fn component(&self) -> Result<Arc<dyn Component>> {
        self.core()?.component()
    }

    fn check_error(&self) -> Result<()> {
        match self.core.upgrade().and_then(|core| core.error()) {
            Some(code) => Err(Error::Component(code)),
            None => Ok(()),
        }
    }

    pub fn definition(&self) -> Result<PortDefinition> {
        self.component()?.port_definition(self.index)
    }

    pub fn set_definition(&self, definition: &PortDefinition) -> Result<()> {
        self.component()?.set_port_definition(definition)
    }

    /// Adopts direction and buffer count from the component's definition.
    pub fn setup(&self, definition: &PortDefinition) {
        debug_assert!(!self.is_allocated(), "setup with allocated buffers");
        let mut settings = self.settings.lock();
        settings.direction = Some(definition.direction);
        settings.num_buffers = definition.buffer_count_actual;
        self.queue
            .set_capacity(definition.buffer_count_actual as usize);
        debug!(
            "{}: direction={:?}, num_buffers={}",
            self.name, definition.direction, definition.buffer_count_actual
        );
    }

    pub(crate) fn is_setup(&self) -> bool {
        self.settings.lock().direction.is_some()
    }

    /// Switches to zero-copy input over memory exported by an upstream port.
    pub fn use_shared_memory(&self, memory: Vec<Arc<dyn Memory>>) {
        let mut settings = self.settings.lock();
        settings.allocation = Allocation::Host;
        settings.copy_mode = CopyMode::Share;
        settings.shared = Some(memory);
    }

    /// Memory regions of the current pool, for a downstream port to adopt.
    pub fn shared_memory(&self) -> Vec<Arc<dyn Memory>> {
        self.headers()
            .iter()
            .map(|header| header.memory().clone())
            .collect()
    }

    fn alloc_pipeline(&self, size: usize) -> Result<Vec<u8>> {
        let allocator = self.settings.lock().allocator.clone();
        match allocator {
            Some(allocator) => allocator.allocate(self, size),
            None => Ok(vec![0; size]),
        }
    }

    /// Performs the sizing allocation and re-reads the buffer count, which
    /// may have changed while downstream negotiated.
    pub fn prepare(&self) -> Result<()> {
        debug!("{}: prepare", self.name);
        let size = self.definition()?.buffer_size as usize;
        let trigger = self.alloc_pipeline(size)?;
        if trigger.len() != size {
            debug!("{}: buffer size changed, {}->{}", self.name, size, trigger.len());
        }
        drop(trigger);

        let definition = self.definition()?;
        self.settings.lock().num_buffers = definition.buffer_count_actual;
        self.queue
            .set_capacity(definition.buffer_count_actual as usize);
        Ok(())
    }

    /// Allocates the header pool. A no-op if the pool exists.
    pub fn allocate_buffers(&self) -> Result<()> {
        if self.is_allocated() {
            return Ok(());
        }
        let component = self.component()?;
        let size = self.definition()?.buffer_size as usize;
        let (count, allocation, copy_mode, shared, memory) = {
            let settings = self.settings.lock();
            (
                settings.num_buffers as usize,
                settings.allocation,
                settings.copy_mode,
                settings.shared.clone(),
                settings.memory.clone(),
            )
        };
        debug!(
            "{}: allocating {} buffers of {} bytes ({:?}, {:?})",
            self.name, count, size, allocation, copy_mode
        );

        let mut headers = Vec::with_capacity(count);
        for i in 0..count {
            let header = match allocation {
                Allocation::Component => component.allocate_buffer(self.index, size),
                Allocation::Host => {
                    let region = match (copy_mode, &shared) {
                        (CopyMode::Share, Some(shared)) => {
                            shared.get(i).cloned().ok_or(Error::NotShared(self.index))
                        }
                        (CopyMode::Share, None) => Err(Error::NotShared(self.index)),
                        (CopyMode::AlwaysCopy, _) => memory.allocate(size),
                    };
                    region.and_then(|region| component.use_buffer(self.index, region))
                }
            };
            match header {
                Ok(header) => headers.push(header),
                Err(err) => {
                    error!("{}: buffer {} allocation failed: {}", self.name, i, err);
                    for header in &headers {
                        let _ = component.free_buffer(header);
                    }
                    return Err(err);
                }
            }
        }

        self.queue.set_capacity(count);
        *self.guard.lock() = PortGuard::armed(self.this.clone());
        *self.headers.lock() = Some(headers);
        Ok(())
    }

    /// Frees the header pool. Transports still referencing headers of this
    /// pool become inert.
    pub fn free_buffers(&self) -> Result<()> {
        if !self.is_allocated() {
            return Ok(());
        }
        debug!("{}: freeing buffers", self.name);
        let component = self.component();
        let guard = self.guard.lock().clone();
        let detached = guard.teardown(|| {
            let headers = self.headers.lock().take().unwrap_or_default();
            let mut detached = Vec::new();
            for header in &headers {
                detached.extend(header.take_app_private());
                if let Ok(component) = &component {
                    if let Err(err) = component.free_buffer(header) {
                        warn!("{}: FreeBuffer failed: {}", self.name, err);
                    }
                }
            }
            detached
        });
        drop(detached);
        self.queue.drain();
        self.notify_released();
        component.map(|_| ())
    }

    /// Hands the pool to the pipeline (input) or the component (output).
    pub fn start_buffers(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let headers = self.headers.lock().clone();
        let Some(headers) = headers else {
            error!("{}: start without buffers", self.name);
            debug_assert!(false, "start without buffers");
            return Err(Error::NoBuffer(self.index));
        };
        debug!("{}: starting {} buffers", self.name, headers.len());
        // Every header is with the host here, the queue is rebuilt from the
        // pool.
        self.queue.drain();
        self.eos.store(EOS_NONE, Ordering::Release);
        let direction = self.direction();
        for header in headers {
            match direction {
                Some(Direction::Input) => self.push_buffer(header),
                _ => self.submit_fill(&header)?,
            }
        }
        Ok(())
    }

    /// Completion entry point: a header came back from the component.
    pub fn push_buffer(&self, header: HeaderRef) {
        let known = self
            .headers
            .lock()
            .as_ref()
            .map(|headers| headers.iter().any(|h| Arc::ptr_eq(h, &header)))
            .unwrap_or(false);
        if !known {
            debug!("{}: dropping buffer returned after free", self.name);
            drop(header.take_app_private());
            return;
        }
        header.set_holder(Holder::Host);

        let (direction, copy_mode) = {
            let settings = self.settings.lock();
            (settings.direction, settings.copy_mode)
        };
        if direction == Some(Direction::Input) && copy_mode == CopyMode::Share {
            // The upstream buffer goes back to its own port.
            drop(header.take_app_private());
            self.notify_released();
        } else {
            self.queue.push(header);
        }
    }

    fn notify_released(&self) {
        let _lock = self.released.lock();
        self.released_cond.notify_all();
    }

    /// Returns a header to the component. Empty input headers go back to
    /// the queue instead.
    pub fn release(&self, header: &HeaderRef) -> Result<()> {
        match self.direction() {
            Some(Direction::Input) => {
                let (filled, flags) = {
                    let fields = header.lock();
                    (fields.filled_len, fields.flags)
                };
                if filled != 0
                    || flags.contains(BufferFlags::EOS)
                    || flags.contains(BufferFlags::CODECCONFIG)
                {
                    self.submit_empty(header)
                } else {
                    trace!("{}: filled length is zero, back into queue", self.name);
                    self.push_buffer(header.clone());
                    Ok(())
                }
            }
            _ => self.submit_fill(header),
        }
    }

    fn submit_empty(&self, header: &HeaderRef) -> Result<()> {
        {
            let mut fields = header.lock();
            fields.holder = Holder::Component;
            fields.generation = self.generation.load(Ordering::Acquire);
            trace!(
                "{}: ETB len={} flags={:?} ts={}",
                self.name,
                fields.filled_len,
                fields.flags,
                fields.timestamp
            );
        }
        self.submit(header, |component, header| component.empty_this_buffer(header))
    }

    fn submit_fill(&self, header: &HeaderRef) -> Result<()> {
        {
            let mut fields = header.lock();
            fields.holder = Holder::Component;
            fields.generation = self.generation.load(Ordering::Acquire);
            fields.filled_len = 0;
            fields.flags = BufferFlags::EMPTY;
        }
        trace!("{}: FTB", self.name);
        self.submit(header, |component, header| component.fill_this_buffer(header))
    }

    fn submit(
        &self,
        header: &HeaderRef,
        call: impl FnOnce(&dyn Component, &HeaderRef) -> Result<()>,
    ) -> Result<()> {
        let result = self
            .component()
            .and_then(|component| call(component.as_ref(), header));
        if let Err(err) = &result {
            warn!("{}: buffer submission failed: {}", self.name, err);
            // Rejected headers rejoin the pool.
            self.push_buffer(header.clone());
        }
        result
    }

    /// Sends a buffer or the EOS marker to the component.
    ///
    /// Returns the number of payload bytes accepted. If the buffer exceeds a
    /// header's capacity the remainder can be sent with
    /// [`Buffer::slice_from`]. Must not be called concurrently for one port.
    pub fn send(&self, item: &Item) -> Result<usize> {
        self.check_error()?;
        if self.direction() != Some(Direction::Input) {
            return Err(Error::WrongDirection(self.index));
        }
        if !self.is_enabled() {
            return Err(Error::PortDisabled(self.index));
        }
        let use_timestamps = self.core()?.config().use_timestamps;
        match self.copy_mode() {
            CopyMode::AlwaysCopy => self.send_copy(item, use_timestamps),
            CopyMode::Share => self.send_shared(item, use_timestamps),
        }
    }

    fn unavailable(&self) -> Error {
        if let Err(err) = self.check_error() {
            return err;
        }
        if !self.is_enabled() {
            return Error::PortDisabled(self.index);
        }
        Error::NoBuffer(self.index)
    }

    fn send_copy(&self, item: &Item, use_timestamps: bool) -> Result<usize> {
        let Some(header) = self.queue.pop() else {
            debug!("{}: null buffer", self.name);
            return Err(self.unavailable());
        };

        let (stale, len) = {
            let mut fields = header.lock();
            fields.flags = BufferFlags::EMPTY;
            let stale = fields.app_private.take();
            match item {
                Item::Eos => {
                    fields.flags.insert(BufferFlags::EOS);
                    fields.filled_len = 0;
                    fields.timestamp = TICKS_NONE;
                }
                Item::Buffer(buffer) => {
                    let written = header.write(fields.offset, buffer.as_slice());
                    fields.filled_len = written as u32;
                    if buffer.is_codec_config() {
                        fields.flags.insert(BufferFlags::CODECCONFIG);
                    }
                    fields.timestamp = if use_timestamps {
                        to_ticks(buffer.pts())
                    } else {
                        TICKS_NONE
                    };
                }
            }
            (stale, fields.filled_len as usize)
        };
        drop(stale);

        self.release(&header)?;
        Ok(len)
    }

    fn send_shared(&self, item: &Item, use_timestamps: bool) -> Result<usize> {
        let header = match item {
            Item::Buffer(buffer) => self.shared_header(buffer)?,
            Item::Eos => self.idle_header()?,
        };
        let len = {
            let mut fields = header.lock();
            fields.flags = BufferFlags::EMPTY;
            match item {
                Item::Eos => {
                    fields.flags.insert(BufferFlags::EOS);
                    fields.filled_len = 0;
                    fields.offset = 0;
                    fields.timestamp = TICKS_NONE;
                }
                Item::Buffer(buffer) => {
                    let upstream = buffer
                        .transport()
                        .map(|transport| transport.offset())
                        .unwrap_or(0);
                    fields.offset = upstream + buffer.view_offset() as u32;
                    fields.filled_len = buffer.len() as u32;
                    if buffer.is_codec_config() {
                        fields.flags.insert(BufferFlags::CODECCONFIG);
                    }
                    fields.timestamp = if use_timestamps {
                        to_ticks(buffer.pts())
                    } else {
                        TICKS_NONE
                    };
                    fields.app_private = Some(buffer.clone());
                }
            }
            fields.filled_len as usize
        };
        self.submit_empty(&header)?;
        Ok(len)
    }

    /// Finds the header set up over the same memory as `buffer`.
    fn shared_header(&self, buffer: &Buffer) -> Result<HeaderRef> {
        let ptr = buffer.memory_ptr().ok_or(Error::NotShared(self.index))?;
        let headers = self.headers.lock();
        let header = headers
            .as_ref()
            .and_then(|headers| headers.iter().find(|h| h.data_ptr() == ptr))
            .cloned()
            .ok_or(Error::NotShared(self.index))?;
        debug_assert_eq!(header.holder(), Holder::Host, "shared header in use");
        Ok(header)
    }

    /// Waits for a header not referencing an upstream buffer.
    fn idle_header(&self) -> Result<HeaderRef> {
        let mut lock = self.released.lock();
        loop {
            self.check_error()?;
            if !self.is_enabled() {
                return Err(Error::PortDisabled(self.index));
            }
            let idle = self.headers.lock().as_ref().and_then(|headers| {
                headers
                    .iter()
                    .find(|h| {
                        let fields = h.lock();
                        fields.holder == Holder::Host && fields.app_private.is_none()
                    })
                    .cloned()
            });
            if let Some(header) = idle {
                return Ok(header);
            }
            if !self.is_allocated() {
                return Err(Error::NoBuffer(self.index));
            }
            self.released_cond.wait_for(&mut lock, RELEASE_POLL);
        }
    }

    /// Receives the next buffer or EOS marker from the component.
    ///
    /// Returns `Ok(None)` when the port is disabled or paused while waiting,
    /// and after EOS was delivered until the port is flushed.
    pub fn recv(&self) -> Result<Option<Item>> {
        Ok(self.receive()?.map(|(item, _)| item))
    }

    /// Receives one frame, joining the buffers a component delivers for it
    /// up to the one flagged end of frame.
    ///
    /// In copy mode the payloads are concatenated into one buffer. In share
    /// mode the later buffers are attached to the transport of the first,
    /// see [`BufferTransport::extra`]. Only for components that flag frame
    /// ends; otherwise use [`Port::recv`].
    pub fn recv_frame(&self) -> Result<Option<Item>> {
        let (first, flags) = match self.receive()? {
            Some((Item::Buffer(buffer), flags)) => (buffer, flags),
            other => return Ok(other.map(|(item, _)| item)),
        };
        if frame_done(flags) || first.is_codec_config() {
            return Ok(Some(Item::Buffer(first)));
        }

        let mut joined = first.transport().is_none().then(|| first.as_slice().to_vec());
        let mut parts = 1;
        loop {
            match self.receive()? {
                Some((Item::Buffer(part), flags)) => {
                    match joined.as_mut() {
                        Some(data) => data.extend_from_slice(part.as_slice()),
                        None => first.attach(&part)?,
                    }
                    parts += 1;
                    if frame_done(flags) {
                        break;
                    }
                }
                Some((Item::Eos, _)) => {
                    // The frame goes out first, EOS on the next call.
                    self.eos.store(EOS_PENDING, Ordering::Release);
                    break;
                }
                None => break,
            }
        }
        trace!("{}: joined {} buffers into one frame", self.name, parts);

        Ok(Some(Item::Buffer(match joined {
            Some(data) => Buffer::from_vec(data).with_pts(first.pts()),
            None => first,
        })))
    }

    fn receive(&self) -> Result<Option<(Item, BufferFlags)>> {
        self.check_error()?;
        if self.direction() != Some(Direction::Output) {
            return Err(Error::WrongDirection(self.index));
        }
        match self.eos.load(Ordering::Acquire) {
            EOS_DELIVERED => return Ok(None),
            EOS_PENDING => {
                self.eos.store(EOS_DELIVERED, Ordering::Release);
                return Ok(Some((Item::Eos, BufferFlags::EOS)));
            }
            _ => {}
        }
        let use_timestamps = self.core()?.config().use_timestamps;

        while self.is_enabled() {
            let Some(header) = self.queue.pop() else {
                return Ok(None);
            };

            if self.is_stale(&header) {
                self.release(&header)?;
                continue;
            }

            let (filled, flags, timestamp) = {
                let fields = header.lock();
                (fields.filled_len, fields.flags, fields.timestamp)
            };
            trace!(
                "{}: got buffer len={} flags={:?} ts={}",
                self.name,
                filled,
                flags,
                timestamp
            );

            if flags.contains(BufferFlags::EOS) && filled == 0 {
                debug!("{}: got eos", self.name);
                self.release_received(&header);
                self.eos.store(EOS_DELIVERED, Ordering::Release);
                return Ok(Some((Item::Eos, flags)));
            }

            if filled == 0 {
                drop(header.take_app_private());
                trace!("{}: empty buffer", self.name);
                self.release(&header)?;
                continue;
            }

            let codec_config = flags.contains(BufferFlags::CODECCONFIG);
            let share = self.copy_mode() == CopyMode::Share && !codec_config;
            let buffer = if share {
                let guard = self.guard.lock().clone();
                Buffer::from_transport(BufferTransport::new(header, guard))
            } else {
                let mut data = self.alloc_pipeline(filled as usize)?;
                data.resize(filled as usize, 0);
                // SAFETY: the header is owned by this port until released.
                let payload = unsafe { header.bytes(header.offset(), filled) };
                data[..payload.len()].copy_from_slice(payload);
                self.release_received(&header);
                Buffer::from_vec(data)
            };

            if flags.contains(BufferFlags::EOS) {
                debug!("{}: got eos with data", self.name);
                self.eos.store(EOS_PENDING, Ordering::Release);
            }

            let pts = if use_timestamps {
                from_ticks(timestamp)
            } else {
                None
            };
            let buffer = buffer.with_pts(pts).with_codec_config(codec_config);
            return Ok(Some((Item::Buffer(buffer), flags)));
        }
        Ok(None)
    }

    /// Returns a header whose content was already taken. A failed
    /// resubmission leaves it queued and does not cost the delivery.
    fn release_received(&self, header: &HeaderRef) {
        if let Err(err) = self.release(header) {
            warn!("{}: buffer kept after failed release: {}", self.name, err);
        }
    }

    /// Whether a header was submitted before the last flush.
    ///
    /// The submit generation decides; the ignore counter is kept in step and
    /// a disagreement is logged.
    fn is_stale(&self, header: &BufferHeader) -> bool {
        let stale = header.generation() < self.generation.load(Ordering::Acquire);
        let ignore = self.ignore_count.load(Ordering::Acquire);
        if stale {
            if ignore > 0 {
                self.ignore_count.store(ignore - 1, Ordering::Release);
            } else {
                warn!("{}: stale buffer beyond the ignore count", self.name);
            }
            debug!("{}: discarding stale buffer, ignore_count={}", self.name, ignore);
        } else if ignore > 0 {
            warn!(
                "{}: {} stale buffers expected but none arrived, clearing",
                self.name, ignore
            );
            self.ignore_count.store(0, Ordering::Release);
        }
        stale
    }

    /// Discards in-flight buffers and resynchronizes with the component.
    pub fn flush(&self) -> Result<()> {
        debug!("{}: flush", self.name);
        let core = self.core()?;
        if self.direction() == Some(Direction::Output) {
            for header in self.queue.drain() {
                header.lock().filled_len = 0;
                if let Err(err) = self.release(&header) {
                    warn!("{}: failed to return buffer during flush: {}", self.name, err);
                }
            }
        }

        let command = Command::Flush(self.index);
        core.component()?.send_command(command)?;
        match core.flush_sem.down(core.config().wait.command_timeout) {
            Wake::Signaled => {}
            Wake::TimedOut => return Err(Error::CommandTimeout(command)),
            Wake::Interrupted => return Err(core.interrupted()),
        }

        if self.direction() == Some(Direction::Output) {
            self.ignore_count
                .store(self.num_buffers(), Ordering::Release);
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.eos.store(EOS_NONE, Ordering::Release);
        debug!("{}: flush done", self.name);
        Ok(())
    }

    /// Enables the port and allocates its pool. A no-op if enabled.
    pub fn enable(&self) -> Result<()> {
        if self.is_enabled() {
            debug!("{}: already enabled", self.name);
            return Ok(());
        }
        debug!("{}: enable", self.name);
        let core = self.core()?;
        self.prepare()?;
        let command = Command::PortEnable(self.index);
        core.component()?.send_command(command)?;
        self.allocate_buffers()?;
        match core.port_sem.down(core.config().wait.command_timeout) {
            Wake::Signaled => {}
            Wake::TimedOut => return Err(Error::CommandTimeout(command)),
            Wake::Interrupted => return Err(core.interrupted()),
        }
        self.enabled.store(true, Ordering::Release);
        self.eos.store(EOS_NONE, Ordering::Release);
        self.queue.enable();
        if core.state() == State::Executing {
            self.start_buffers()?;
        }
        Ok(())
    }

    /// Disables the port and frees its pool. A no-op if disabled.
    pub fn disable(&self) -> Result<()> {
        if !self.is_enabled() {
            debug!("{}: already disabled", self.name);
            return Ok(());
        }
        debug!("{}: disable", self.name);
        self.enabled.store(false, Ordering::Release);
        self.queue.disable();
        self.notify_released();

        let core = self.core()?;
        let command = Command::PortDisable(self.index);
        core.component()?.send_command(command)?;
        self.free_buffers()?;
        match core.port_sem.down(core.config().wait.command_timeout) {
            Wake::Signaled => Ok(()),
            Wake::TimedOut => Err(Error::CommandTimeout(command)),
            Wake::Interrupted => Err(core.interrupted()),
        }
    }

    /// Stops delivery: blocked and future `send`/`recv` calls return
    /// immediately.
    pub fn pause(&self) {
        debug!("{}: pause", self.name);
        self.queue.disable();
        self.notify_released();
    }

    pub fn resume(&self) {
        debug!("{}: resume", self.name);
        self.queue.enable();
    }

    /// Marks the port finished at end of stream or shutdown.
    pub fn finish(&self) {
        debug!("{}: finish", self.name);
        self.enabled.store(false, Ordering::Release);
        self.queue.disable();
        self.notify_released();
    }
}

fn frame_done(flags: BufferFlags) -> bool {
    flags.contains(BufferFlags::ENDOFFRAME) || flags.contains(BufferFlags::EOS)
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("direction", &self.direction())
            .field("enabled", &self.is_enabled())
            .field("num_buffers", &self.num_buffers())
            .field("queued", &self.queued())
            .finish()
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! A software component that copies its input port to its output port.
//!
//! The loopback follows the IL component rules the engine depends on: state
//! changes to and from Loaded complete once the ports are populated or
//! emptied, flush and port disable return every held buffer before
//! completing, and end of stream is propagated with a `BufferFlag` event. All
//! completions are delivered from the component's own worker thread.
//!
//! Register it with the [`crate::registry`] to use it in place of a vendor
//! library:
//!
//! ```
//! use edgefirst_omx::{loopback::LoopbackImplementation, registry};
//! use std::sync::Arc;
//!
//! registry::provide("loopback-doc", Arc::new(LoopbackImplementation::default()));
//! # registry::withdraw("loopback-doc");
//! ```

use crate::{
    component::{
        BufferFlags, Callbacks, Command, Component, Direction, Domain, Event, Implementation,
        PortDefinition, State,
    },
    error::{Error, ErrorCode, Result},
    header::{BufferHeader, HeaderRef},
    memory::{HostMemory, Memory},
};
use omx_sys::OMX_ALL;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
    thread::{self, JoinHandle, ThreadId},
};
use tracing::{debug, trace, warn};

pub const COMPONENT_NAME: &str = "OMX.edgefirst.loopback";
pub const INPUT_PORT: u32 = 0;
pub const OUTPUT_PORT: u32 = 1;

/// Port geometry of new loopback components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopbackConfig {
    pub input_buffers: u32,
    pub output_buffers: u32,
    pub input_size: u32,
    pub output_size: u32,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        LoopbackConfig {
            input_buffers: 4,
            output_buffers: 4,
            input_size: 4096,
            output_size: 4096,
        }
    }
}

enum Message {
    Command(Command),
    Empty(HeaderRef),
    Fill(HeaderRef),
    /// Population changed, pending transitions may complete.
    Populated,
    Raise(Event),
    Resume,
    Shutdown,
}

enum Notify {
    Event(Event),
    EmptyDone(HeaderRef),
    FillDone(HeaderRef),
}

struct PortState {
    definition: PortDefinition,
    headers: Vec<HeaderRef>,
    held: VecDeque<HeaderRef>,
    /// Enable or disable awaiting population.
    pending: Option<Command>,
}

impl PortState {
    fn new(index: u32, direction: Direction, count: u32, size: u32) -> Self {
        PortState {
            definition: PortDefinition {
                index,
                direction,
                buffer_count_actual: count,
                buffer_count_min: 1,
                buffer_size: size,
                enabled: true,
                populated: false,
                domain: Domain::Other,
                video: None,
            },
            headers: Vec::new(),
            held: VecDeque::new(),
            pending: None,
        }
    }

    fn is_populated(&self) -> bool {
        self.headers.len() >= self.definition.buffer_count_actual as usize
    }

    /// Returns every held buffer to the host.
    fn return_held(&mut self, notes: &mut Vec<Notify>) {
        for header in self.held.drain(..) {
            match self.definition.direction {
                Direction::Input => notes.push(Notify::EmptyDone(header)),
                Direction::Output => {
                    {
                        let mut fields = header.lock();
                        fields.filled_len = 0;
                        fields.flags = BufferFlags::EMPTY;
                    }
                    notes.push(Notify::FillDone(header));
                }
            }
        }
    }
}

struct Shared {
    state: State,
    /// Transition waiting for the ports to (de)populate.
    pending: Option<State>,
    ports: [PortState; 2],
    /// Bytes of the front input buffer already copied out.
    consumed: usize,
    hold: bool,
    unresponsive: bool,
    /// Flag the output of the next input buffer with EOS.
    end_stream: bool,
    role: Option<String>,
    parameters: HashMap<u32, Vec<u8>>,
    configs: HashMap<u32, Vec<u8>>,
}

impl Shared {
    fn port(&self, index: u32) -> Result<&PortState> {
        self.ports
            .get(index as usize)
            .ok_or(Error::Component(ErrorCode::BAD_PORT_INDEX))
    }

    fn port_mut(&mut self, index: u32) -> Result<&mut PortState> {
        self.ports
            .get_mut(index as usize)
            .ok_or(Error::Component(ErrorCode::BAD_PORT_INDEX))
    }

    fn indices(port: u32) -> Vec<u32> {
        match port {
            OMX_ALL => vec![INPUT_PORT, OUTPUT_PORT],
            port => vec![port],
        }
    }

    fn handle(&mut self, message: Message, notes: &mut Vec<Notify>) {
        match message {
            Message::Command(command) => self.command(command, notes),
            Message::Empty(header) => {
                if let Some(port) = self.ports.get_mut(INPUT_PORT as usize) {
                    port.held.push_back(header);
                }
            }
            Message::Fill(header) => {
                if let Some(port) = self.ports.get_mut(OUTPUT_PORT as usize) {
                    port.held.push_back(header);
                }
            }
            Message::Raise(event) => notes.push(Notify::Event(event)),
            Message::Populated | Message::Resume | Message::Shutdown => {}
        }
        self.complete_pending(notes);
        self.pump(notes);
    }

    fn command(&mut self, command: Command, notes: &mut Vec<Notify>) {
        trace!("loopback: {:?}", command);
        if self.unresponsive {
            debug!("loopback: ignoring {:?}", command);
            return;
        }
        match command {
            Command::StateSet(target) => self.transition(target, notes),
            Command::Flush(port) => {
                for index in Self::indices(port) {
                    self.flush(index, notes);
                }
            }
            Command::PortDisable(port) => {
                for index in Self::indices(port) {
                    if index == INPUT_PORT {
                        self.consumed = 0;
                    }
                    if let Ok(state) = self.port_mut(index) {
                        state.definition.enabled = false;
                        state.return_held(notes);
                        state.pending = Some(Command::PortDisable(index));
                    }
                }
            }
            Command::PortEnable(port) => {
                for index in Self::indices(port) {
                    if let Ok(state) = self.port_mut(index) {
                        state.definition.enabled = true;
                        state.pending = Some(Command::PortEnable(index));
                    }
                }
            }
            Command::MarkBuffer(_) => notes.push(Notify::Event(Event::CmdComplete(command))),
        }
    }

    fn transition(&mut self, target: State, notes: &mut Vec<Notify>) {
        let from = self.state;
        if from == target {
            notes.push(Notify::Event(Event::Error(ErrorCode::SAME_STATE)));
            return;
        }
        match (from, target) {
            (_, State::Invalid) => {
                self.state = State::Invalid;
                notes.push(Notify::Event(Event::Error(ErrorCode::INVALID_STATE)));
            }
            (State::Loaded, State::Idle) | (State::Idle, State::Loaded) => {
                self.pending = Some(target);
            }
            (State::Executing, State::Idle) | (State::Pause, State::Idle) => {
                self.consumed = 0;
                for port in self.ports.iter_mut() {
                    port.return_held(notes);
                }
                self.enter(target, notes);
            }
            (State::Idle, State::Executing)
            | (State::Idle, State::Pause)
            | (State::Executing, State::Pause)
            | (State::Pause, State::Executing)
            | (State::Loaded, State::WaitForResources)
            | (State::WaitForResources, State::Loaded)
            | (State::WaitForResources, State::Idle) => self.enter(target, notes),
            _ => notes.push(Notify::Event(Event::Error(
                ErrorCode::INCORRECT_STATE_TRANSITION,
            ))),
        }
    }

    fn enter(&mut self, state: State, notes: &mut Vec<Notify>) {
        debug!("loopback: {:?} -> {:?}", self.state, state);
        self.state = state;
        notes.push(Notify::Event(Event::CmdComplete(Command::StateSet(state))));
    }

    fn flush(&mut self, index: u32, notes: &mut Vec<Notify>) {
        if index == INPUT_PORT {
            self.consumed = 0;
        }
        match self.port_mut(index) {
            Ok(port) => {
                port.return_held(notes);
                notes.push(Notify::Event(Event::CmdComplete(Command::Flush(index))));
            }
            Err(_) => notes.push(Notify::Event(Event::Error(ErrorCode::BAD_PORT_INDEX))),
        }
    }

    fn complete_pending(&mut self, notes: &mut Vec<Notify>) {
        for port in self.ports.iter_mut() {
            port.definition.populated = port.is_populated();
            let done = match port.pending {
                Some(Command::PortEnable(_)) => {
                    self.state == State::Loaded || port.is_populated()
                }
                Some(Command::PortDisable(_)) => port.headers.is_empty(),
                _ => false,
            };
            if done {
                if let Some(command) = port.pending.take() {
                    notes.push(Notify::Event(Event::CmdComplete(command)));
                }
            }
        }

        let done = match self.pending {
            Some(State::Idle) => self
                .ports
                .iter()
                .filter(|p| p.definition.enabled)
                .all(PortState::is_populated),
            Some(State::Loaded) => self.ports.iter().all(|p| p.headers.is_empty()),
            _ => false,
        };
        if done {
            if let Some(target) = self.pending.take() {
                self.enter(target, notes);
            }
        }
    }

    /// Moves payload from held input buffers into held output buffers.
    fn pump(&mut self, notes: &mut Vec<Notify>) {
        if self.state != State::Executing || self.hold {
            return;
        }
        let [input, output] = &mut self.ports;
        if !input.definition.enabled || !output.definition.enabled {
            return;
        }
        while let Some(source) = input.held.front().cloned() {
            let (filled, offset, flags, timestamp) = {
                let fields = source.lock();
                (
                    fields.filled_len as usize,
                    fields.offset,
                    fields.flags,
                    fields.timestamp,
                )
            };
            let eos = flags.contains(BufferFlags::EOS);
            if filled == 0 && !eos {
                input.held.pop_front();
                notes.push(Notify::EmptyDone(source));
                continue;
            }
            let Some(sink) = output.held.pop_front() else {
                break;
            };

            let remaining = filled - self.consumed;
            let len = remaining.min(sink.alloc_len() as usize);
            if len > 0 {
                // SAFETY: both headers are held by the component.
                let data = unsafe {
                    source
                        .bytes(offset + self.consumed as u32, len as u32)
                        .to_vec()
                };
                sink.write(0, &data);
            }
            self.consumed += len;
            let last = self.consumed >= filled;
            let end_stream = last && (eos || self.end_stream);

            let mut out_flags = flags;
            out_flags.remove(BufferFlags::EOS);
            out_flags.remove(BufferFlags::ENDOFFRAME);
            if last {
                out_flags.insert(BufferFlags::ENDOFFRAME);
            }
            if end_stream {
                out_flags.insert(BufferFlags::EOS);
            }
            {
                let mut fields = sink.lock();
                fields.filled_len = len as u32;
                fields.offset = 0;
                fields.flags = out_flags;
                fields.timestamp = timestamp;
            }
            notes.push(Notify::FillDone(sink));

            if last {
                self.consumed = 0;
                self.end_stream = false;
                input.held.pop_front();
                notes.push(Notify::EmptyDone(source));
                if end_stream {
                    notes.push(Notify::Event(Event::BufferFlag {
                        port: OUTPUT_PORT,
                        flags: BufferFlags::EOS,
                    }));
                }
            }
        }
    }
}

/// A running loopback component.
pub struct Loopback {
    shared: Arc<Mutex<Shared>>,
    tx: kanal::Sender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl Loopback {
    fn spawn(config: &LoopbackConfig, callbacks: Arc<dyn Callbacks>) -> Result<Arc<Loopback>> {
        let shared = Arc::new(Mutex::new(Shared {
            state: State::Loaded,
            pending: None,
            ports: [
                PortState::new(
                    INPUT_PORT,
                    Direction::Input,
                    config.input_buffers,
                    config.input_size,
                ),
                PortState::new(
                    OUTPUT_PORT,
                    Direction::Output,
                    config.output_buffers,
                    config.output_size,
                ),
            ],
            consumed: 0,
            hold: false,
            unresponsive: false,
            end_stream: false,
            role: None,
            parameters: HashMap::new(),
            configs: HashMap::new(),
        }));
        let (tx, rx) = kanal::unbounded::<Message>();

        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("loopback".to_owned())
                .spawn(move || {
                    while let Ok(message) = rx.recv() {
                        if matches!(message, Message::Shutdown) {
                            break;
                        }
                        let mut notes = Vec::new();
                        shared.lock().handle(message, &mut notes);
                        for note in notes {
                            match note {
                                Notify::Event(event) => callbacks.event(event),
                                Notify::EmptyDone(header) => callbacks.empty_buffer_done(header),
                                Notify::FillDone(header) => callbacks.fill_buffer_done(header),
                            }
                        }
                    }
                    trace!("loopback worker exit");
                })?
        };
        let worker_id = worker.thread().id();
        Ok(Arc::new(Loopback {
            shared,
            tx,
            worker: Mutex::new(Some(worker)),
            worker_id,
        }))
    }

    fn post(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::Component(ErrorCode::INVALID_STATE))
    }

    /// Delivers `event` from the component thread, e.g. to inject errors.
    pub fn raise(&self, event: Event) -> Result<()> {
        self.post(Message::Raise(event))
    }

    /// Holds submitted buffers without processing them while set.
    pub fn set_hold(&self, hold: bool) -> Result<()> {
        self.shared.lock().hold = hold;
        self.post(Message::Resume)
    }

    /// Accepts commands without ever completing them while set.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.shared.lock().unresponsive = unresponsive;
    }

    /// Marks the output of the next input buffer with EOS, the way a
    /// decoder flags the last frame of a stream.
    pub fn end_stream_on_next(&self) -> Result<()> {
        self.shared.lock().end_stream = true;
        self.post(Message::Resume)
    }

    /// Updates an output definition the way a decoder does after parsing
    /// the stream header, then reports it.
    pub fn change_output(&self, buffers: u32, size: u32) -> Result<()> {
        {
            let mut shared = self.shared.lock();
            let port = shared.port_mut(OUTPUT_PORT)?;
            port.definition.buffer_count_actual = buffers;
            port.definition.buffer_size = size;
        }
        self.raise(Event::PortSettingsChanged(OUTPUT_PORT))
    }

    /// Number of (input, output) buffers currently held.
    pub fn held(&self) -> (usize, usize) {
        let shared = self.shared.lock();
        (shared.ports[0].held.len(), shared.ports[1].held.len())
    }

    pub fn role(&self) -> Option<String> {
        self.shared.lock().role.clone()
    }

    fn populate(&self, port: u32, header: HeaderRef) -> Result<HeaderRef> {
        {
            let mut shared = self.shared.lock();
            let state = shared.port_mut(port)?;
            if state.headers.len() >= state.definition.buffer_count_actual as usize {
                return Err(Error::Component(ErrorCode::INSUFFICIENT_RESOURCES));
            }
            state.headers.push(header.clone());
        }
        self.post(Message::Populated)?;
        Ok(header)
    }

    fn submit(&self, header: &HeaderRef, direction: Direction) -> Result<()> {
        {
            let shared = self.shared.lock();
            if !matches!(shared.state, State::Idle | State::Executing | State::Pause) {
                return Err(Error::Component(ErrorCode::INCORRECT_STATE_OPERATION));
            }
            let port = shared.port(header.port())?;
            if port.definition.direction != direction {
                return Err(Error::Component(ErrorCode::BAD_PORT_INDEX));
            }
            if !port.definition.enabled {
                return Err(Error::Component(ErrorCode::INCORRECT_STATE_OPERATION));
            }
            if !port.headers.iter().any(|h| Arc::ptr_eq(h, header)) {
                return Err(Error::Component(ErrorCode::BAD_PARAMETER));
            }
        }
        match direction {
            Direction::Input => self.post(Message::Empty(header.clone())),
            Direction::Output => self.post(Message::Fill(header.clone())),
        }
    }
}

impl Component for Loopback {
    fn send_command(&self, command: Command) -> Result<()> {
        self.post(Message::Command(command))
    }

    fn state(&self) -> Result<State> {
        Ok(self.shared.lock().state)
    }

    fn port_definition(&self, port: u32) -> Result<PortDefinition> {
        Ok(self.shared.lock().port(port)?.definition.clone())
    }

    fn set_port_definition(&self, definition: &PortDefinition) -> Result<()> {
        let mut shared = self.shared.lock();
        let loaded = shared.state == State::Loaded;
        let port = shared.port_mut(definition.index)?;
        if !loaded && port.definition.enabled {
            return Err(Error::Component(ErrorCode::INCORRECT_STATE_OPERATION));
        }
        if definition.buffer_count_actual < port.definition.buffer_count_min {
            return Err(Error::Component(ErrorCode::BAD_PARAMETER));
        }
        port.definition.buffer_count_actual = definition.buffer_count_actual;
        port.definition.buffer_size = definition.buffer_size;
        port.definition.video = definition.video;
        Ok(())
    }

    fn get_parameter(&self, index: u32, data: &mut [u8]) -> Result<()> {
        let shared = self.shared.lock();
        let value = shared
            .parameters
            .get(&index)
            .ok_or(Error::Component(ErrorCode::UNSUPPORTED_INDEX))?;
        let len = value.len().min(data.len());
        data[..len].copy_from_slice(&value[..len]);
        Ok(())
    }

    fn set_parameter(&self, index: u32, data: &[u8]) -> Result<()> {
        self.shared.lock().parameters.insert(index, data.to_vec());
        Ok(())
    }

    fn get_config(&self, index: u32, data: &mut [u8]) -> Result<()> {
        let shared = self.shared.lock();
        let value = shared
            .configs
            .get(&index)
            .ok_or(Error::Component(ErrorCode::UNSUPPORTED_INDEX))?;
        let len = value.len().min(data.len());
        data[..len].copy_from_slice(&value[..len]);
        Ok(())
    }

    fn set_config(&self, index: u32, data: &[u8]) -> Result<()> {
        self.shared.lock().configs.insert(index, data.to_vec());
        Ok(())
    }

    fn set_role(&self, role: &str) -> Result<()> {
        self.shared.lock().role = Some(role.to_owned());
        Ok(())
    }

    fn allocate_buffer(&self, port: u32, size: usize) -> Result<HeaderRef> {
        let required = self.shared.lock().port(port)?.definition.buffer_size as usize;
        if size < required {
            return Err(Error::Component(ErrorCode::BAD_PARAMETER));
        }
        self.populate(port, BufferHeader::new(port, Arc::new(HostMemory::new(size))))
    }

    fn use_buffer(&self, port: u32, memory: Arc<dyn Memory>) -> Result<HeaderRef> {
        let required = self.shared.lock().port(port)?.definition.buffer_size as usize;
        if memory.len() < required {
            return Err(Error::Component(ErrorCode::BAD_PARAMETER));
        }
        self.populate(port, BufferHeader::new(port, memory))
    }

    fn free_buffer(&self, header: &HeaderRef) -> Result<()> {
        {
            let mut shared = self.shared.lock();
            let port = shared.port_mut(header.port())?;
            let before = port.headers.len();
            port.headers.retain(|h| !Arc::ptr_eq(h, header));
            port.held.retain(|h| !Arc::ptr_eq(h, header));
            if port.headers.len() == before {
                return Err(Error::Component(ErrorCode::BAD_PARAMETER));
            }
        }
        self.post(Message::Populated)
    }

    fn empty_this_buffer(&self, header: &HeaderRef) -> Result<()> {
        self.submit(header, Direction::Input)
    }

    fn fill_this_buffer(&self, header: &HeaderRef) -> Result<()> {
        self.submit(header, Direction::Output)
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            if thread::current().id() == self.worker_id {
                return;
            }
            if worker.join().is_err() {
                warn!("loopback worker panicked");
            }
        }
    }
}

impl fmt::Debug for Loopback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("Loopback")
            .field("state", &shared.state)
            .field("pending", &shared.pending)
            .finish()
    }
}

/// Implementation handing out [`Loopback`] components.
#[derive(Default)]
pub struct LoopbackImplementation {
    config: LoopbackConfig,
    inits: AtomicUsize,
    deinits: AtomicUsize,
    components: Mutex<Vec<Weak<Loopback>>>,
}

impl LoopbackImplementation {
    pub fn new(config: LoopbackConfig) -> Self {
        LoopbackImplementation {
            config,
            ..Default::default()
        }
    }

    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::Acquire)
    }

    pub fn deinit_count(&self) -> usize {
        self.deinits.load(Ordering::Acquire)
    }

    /// The most recently created component that is still alive.
    pub fn component(&self) -> Option<Arc<Loopback>> {
        self.components
            .lock()
            .iter()
            .rev()
            .find_map(Weak::upgrade)
    }
}

impl Implementation for LoopbackImplementation {
    fn init(&self) -> Result<()> {
        self.inits.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn deinit(&self) {
        self.deinits.fetch_add(1, Ordering::AcqRel);
    }

    fn get_handle(
        &self,
        name: &str,
        callbacks: Arc<dyn Callbacks>,
    ) -> Result<Arc<dyn Component>> {
        if name != COMPONENT_NAME {
            return Err(Error::ComponentNotFound(name.to_owned()));
        }
        let component = Loopback::spawn(&self.config, callbacks)?;
        let mut components = self.components.lock();
        components.retain(|c| c.strong_count() > 0);
        components.push(Arc::downgrade(&component));
        Ok(component)
    }
}

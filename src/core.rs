// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The component state machine.
//!
//! A [`Core`] owns one component handle and its ports. Control operations
//! run on the caller's thread and block until the component confirms them on
//! its callback thread:
//!
//! ```text
//! Invalid -init-> Loaded -prepare-> Idle -start-> Executing <-> Pause
//!                    ^                 |                 |
//!                    +-----unload------+<------stop------+
//! ```

use crate::{
    component::{
        Callbacks, Command, Component, Event, PortConfigurator, PortDefinition, State,
    },
    error::{Error, ErrorCode, Result},
    header::HeaderRef,
    port::Port,
    registry::{self, ImpHandle},
    sync::{Semaphore, StateCell, Wake},
};
use omx_sys as sys;
use parking_lot::{Mutex, RwLock};
use std::{
    fmt,
    mem::{size_of, zeroed},
    slice,
    sync::{Arc, Weak},
    time::Duration,
};
use tracing::{debug, error, info, instrument, trace, warn};

/// Bounds for the blocking waits of control operations. `None` waits
/// forever.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WaitPolicy {
    pub state_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy {
            state_timeout: Some(Duration::from_millis(100)),
            command_timeout: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreConfig {
    /// Implementation name, resolved through the [`crate::registry`].
    pub library: String,
    pub component: String,
    pub role: Option<String>,
    pub wait: WaitPolicy,
    /// Forward presentation timestamps to and from the component.
    pub use_timestamps: bool,
}

impl CoreConfig {
    pub fn new(library: impl Into<String>, component: impl Into<String>) -> Self {
        CoreConfig {
            library: library.into(),
            component: component.into(),
            role: None,
            wait: WaitPolicy::default(),
            use_timestamps: true,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }
}

type SettingsChanged = Arc<dyn Fn(&Core, u32) + Send + Sync>;
type IndexChanged = Arc<dyn Fn(&Core, u32, u32) + Send + Sync>;

pub(crate) struct CoreInner {
    config: CoreConfig,
    this: Weak<CoreInner>,
    imp: Mutex<Option<ImpHandle>>,
    component: RwLock<Option<Arc<dyn Component>>>,
    state: StateCell,
    ports: RwLock<Vec<Option<Arc<Port>>>>,
    pub(crate) done_sem: Semaphore,
    pub(crate) flush_sem: Semaphore,
    pub(crate) port_sem: Semaphore,
    settings_changed: Mutex<Option<SettingsChanged>>,
    index_changed: Mutex<Option<IndexChanged>>,
    configurator: Mutex<Option<Arc<dyn PortConfigurator>>>,
}

impl CoreInner {
    pub(crate) fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> State {
        self.state.get()
    }

    pub(crate) fn error(&self) -> Option<ErrorCode> {
        self.state.error()
    }

    /// The error reported when a fatal error interrupted a wait.
    pub(crate) fn interrupted(&self) -> Error {
        match self.error() {
            Some(code) => Error::Component(code),
            None => Error::NoComponent,
        }
    }

    /// The component handle, created on first use.
    pub(crate) fn component(&self) -> Result<Arc<dyn Component>> {
        if let Some(component) = self.component.read().as_ref() {
            return Ok(component.clone());
        }
        self.init()?;
        self.component.read().clone().ok_or(Error::NoComponent)
    }

    fn ports(&self) -> Vec<Arc<Port>> {
        self.ports.read().iter().flatten().cloned().collect()
    }

    fn port(&self, index: u32) -> Option<Arc<Port>> {
        self.ports.read().get(index as usize).cloned().flatten()
    }

    fn init(&self) -> Result<()> {
        let mut imp_slot = self.imp.lock();
        if self.component.read().is_some() {
            return Ok(());
        }
        debug!("loading {} from {}", self.config.component, self.config.library);
        let imp = registry::acquire(&self.config.library).map_err(|err| {
            error!("failed to load '{}': {}", self.config.library, err);
            err
        })?;
        let callbacks = Arc::new(Dispatch {
            core: self.this.clone(),
        });
        let component = imp
            .implementation()
            .get_handle(&self.config.component, callbacks)
            .map_err(|err| {
                error!("failed to get handle for '{}': {}", self.config.component, err);
                err
            })?;
        if let Some(role) = &self.config.role {
            if let Err(err) = component.set_role(role) {
                warn!("failed to set role '{}': {}", role, err);
            }
        }

        self.done_sem.reset();
        self.flush_sem.reset();
        self.port_sem.reset();
        self.state.clear_error();
        *self.component.write() = Some(component);
        *imp_slot = Some(imp);
        self.state.set(State::Loaded);
        info!("{}: loaded", self.config.component);
        Ok(())
    }

    /// Records a fatal error and releases every blocked caller.
    fn fail(&self, code: ErrorCode) {
        error!("{}: {}", self.config.component, code);
        self.state.set_error(code);
        for port in self.ports() {
            port.pause();
        }
        self.flush_sem.interrupt();
        self.port_sem.interrupt();
        self.done_sem.interrupt();
    }

    fn handle_event(&self, event: Event) {
        match event {
            Event::CmdComplete(Command::StateSet(state)) => {
                debug!("{}: state {:?}", self.config.component, state);
                self.state.set(state);
            }
            Event::CmdComplete(Command::Flush(port)) => {
                debug!("{}: flush complete on {}", self.config.component, port);
                self.flush_sem.up();
            }
            Event::CmdComplete(Command::PortEnable(port))
            | Event::CmdComplete(Command::PortDisable(port)) => {
                debug!("{}: port {} command complete", self.config.component, port);
                self.port_sem.up();
            }
            Event::CmdComplete(Command::MarkBuffer(_)) | Event::Mark => {
                trace!("{}: mark", self.config.component);
            }
            Event::BufferFlag { port, flags } => {
                if flags.contains(crate::component::BufferFlags::EOS) {
                    debug!("{}: eos on {}", self.config.component, port);
                    self.done_sem.up();
                }
            }
            Event::PortSettingsChanged(port) => {
                info!("{}: settings changed on port {}", self.config.component, port);
                let callback = self.settings_changed.lock().clone();
                if let (Some(callback), Some(core)) = (callback, self.this.upgrade()) {
                    callback(&Core { inner: core }, port);
                }
            }
            Event::IndexSettingChanged(data1, data2) => {
                debug!(
                    "{}: index setting changed {:#x} {:#x}",
                    self.config.component, data1, data2
                );
                let callback = self.index_changed.lock().clone();
                if let (Some(callback), Some(core)) = (callback, self.this.upgrade()) {
                    callback(&Core { inner: core }, data1, data2);
                }
            }
            Event::Error(code) if code.is_stream_corrupt() => {
                warn!("{}: {}, ignoring", self.config.component, code);
            }
            Event::Error(code) => self.fail(code),
            Event::Other {
                event,
                data1,
                data2,
            } => {
                warn!(
                    "{}: unhandled event {:#x} ({:#x}, {:#x})",
                    self.config.component, event, data1, data2
                );
            }
        }
    }

    fn buffer_done(&self, header: HeaderRef) {
        match self.port(header.port()) {
            Some(port) => port.push_buffer(header),
            None => warn!(
                "{}: completion for unknown port {}",
                self.config.component,
                header.port()
            ),
        }
    }
}

/// Routes component callbacks into the core without keeping it alive.
struct Dispatch {
    core: Weak<CoreInner>,
}

impl Callbacks for Dispatch {
    fn event(&self, event: Event) {
        if let Some(core) = self.core.upgrade() {
            core.handle_event(event);
        }
    }

    fn empty_buffer_done(&self, header: HeaderRef) {
        if let Some(core) = self.core.upgrade() {
            core.buffer_done(header);
        }
    }

    fn fill_buffer_done(&self, header: HeaderRef) {
        if let Some(core) = self.core.upgrade() {
            core.buffer_done(header);
        }
    }
}

/// Parameter and config structures that begin with the OpenMAX
/// `nSize`/`nVersion` header.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, start with `nSize: u32` followed by
/// `nVersion`, and be valid when zero initialized.
pub unsafe trait Param: Copy {}

unsafe impl Param for sys::OMX_PARAM_PORTDEFINITIONTYPE {}
unsafe impl Param for sys::OMX_PARAM_COMPONENTROLETYPE {}

/// Writes the `nSize`/`nVersion` header of a raw parameter structure.
pub fn init_param(data: &mut [u8]) {
    if data.len() < 8 {
        return;
    }
    let size = data.len() as u32;
    let version = sys::OMX_VERSIONTYPE::spec();
    data[..4].copy_from_slice(&size.to_ne_bytes());
    data[4..8].copy_from_slice(&[
        version.nVersionMajor,
        version.nVersionMinor,
        version.nRevision,
        version.nStep,
    ]);
}

fn param_bytes<T: Param>(param: &mut T) -> &mut [u8] {
    // SAFETY: `Param` types are plain repr(C) data.
    unsafe { slice::from_raw_parts_mut(param as *mut T as *mut u8, size_of::<T>()) }
}

/// Handle to a component and its ports. Clones share the same component.
#[derive(Clone)]
pub struct Core {
    inner: Arc<CoreInner>,
}

impl Core {
    pub fn new(config: CoreConfig) -> Core {
        Core {
            inner: Arc::new_cyclic(|this| CoreInner {
                config,
                this: this.clone(),
                imp: Mutex::new(None),
                component: RwLock::new(None),
                state: StateCell::new(),
                ports: RwLock::new(Vec::new()),
                done_sem: Semaphore::new(),
                flush_sem: Semaphore::new(),
                port_sem: Semaphore::new(),
                settings_changed: Mutex::new(None),
                index_changed: Mutex::new(None),
                configurator: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    /// The sticky error raised by the component, if any.
    pub fn error(&self) -> Option<ErrorCode> {
        self.inner.error()
    }

    pub fn component(&self) -> Result<Arc<dyn Component>> {
        self.inner.component()
    }

    /// Loads the implementation and creates the component handle.
    #[instrument(skip(self), fields(component = %self.inner.config.component))]
    pub fn init(&self) -> Result<()> {
        self.inner.init()
    }

    /// Frees the ports and the handle and releases the implementation.
    /// Calling it again is a no-op.
    #[instrument(skip(self), fields(component = %self.inner.config.component))]
    pub fn deinit(&self) {
        let mut imp = self.inner.imp.lock();
        let ports = std::mem::take(&mut *self.inner.ports.write());
        for port in ports.into_iter().flatten() {
            port.finish();
            if let Err(err) = port.free_buffers() {
                warn!("{}: {}", port.name(), err);
            }
        }

        let state = self.state();
        let component = self.inner.component.write().take();
        if let Some(component) = component {
            if !matches!(state, State::Loaded | State::Invalid) {
                warn!("freeing handle in {:?}", state);
            }
            drop(component);
        }
        if imp.take().is_some() {
            debug!("released {}", self.inner.config.library);
        }
        self.inner.state.set(State::Invalid);
    }

    /// Returns the port at `index`, creating it on first reference.
    pub fn get_port(&self, name: &str, index: u32) -> Arc<Port> {
        if let Some(port) = self.inner.port(index) {
            return port;
        }
        let mut ports = self.inner.ports.write();
        if ports.len() <= index as usize {
            ports.resize(index as usize + 1, None);
        }
        ports[index as usize]
            .get_or_insert_with(|| Port::new(self.inner.this.clone(), name, index))
            .clone()
    }

    pub fn port(&self, index: u32) -> Option<Arc<Port>> {
        self.inner.port(index)
    }

    pub fn ports(&self) -> Vec<Arc<Port>> {
        self.inner.ports()
    }

    pub fn set_configurator(&self, configurator: Option<Arc<dyn PortConfigurator>>) {
        *self.inner.configurator.lock() = configurator;
    }

    /// Called with the port index when the component reports new port
    /// settings.
    pub fn on_settings_changed<F>(&self, callback: F)
    where
        F: Fn(&Core, u32) + Send + Sync + 'static,
    {
        *self.inner.settings_changed.lock() = Some(Arc::new(callback));
    }

    pub fn on_index_settings_changed<F>(&self, callback: F)
    where
        F: Fn(&Core, u32, u32) + Send + Sync + 'static,
    {
        *self.inner.index_changed.lock() = Some(Arc::new(callback));
    }

    /// Configures, sizes and allocates the ports, then moves to Idle.
    #[instrument(skip(self), fields(component = %self.inner.config.component))]
    pub fn prepare(&self) -> Result<()> {
        let component = self.component()?;
        let configurator = self.inner.configurator.lock().clone();
        if let Some(configurator) = configurator {
            configurator.configure(self)?;
        }

        let ports = self.ports();
        for port in &ports {
            if !port.is_setup() {
                port.setup(&port.definition()?);
            }
        }
        for port in ports.iter().filter(|p| p.is_enabled()) {
            port.prepare()?;
        }

        component.send_command(Command::StateSet(State::Idle))?;
        for port in ports.iter().filter(|p| p.is_enabled()) {
            port.allocate_buffers()?;
        }
        self.wait_for(State::Idle)
    }

    /// Moves to Executing. Coming from Idle every enabled port is primed, a
    /// resume from Pause keeps the buffers where they are.
    #[instrument(skip(self), fields(component = %self.inner.config.component))]
    pub fn start(&self) -> Result<()> {
        let from = self.state();
        self.change_state(State::Executing)?;
        if from == State::Idle {
            for port in self.ports() {
                port.start_buffers()?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(component = %self.inner.config.component))]
    pub fn pause(&self) -> Result<()> {
        self.change_state(State::Pause)
    }

    /// Returns to Idle. Only acts from Executing or Pause.
    #[instrument(skip(self), fields(component = %self.inner.config.component))]
    pub fn stop(&self) -> Result<()> {
        match self.state() {
            State::Executing | State::Pause => self.change_state(State::Idle),
            state => {
                debug!("stop ignored in {:?}", state);
                Ok(())
            }
        }
    }

    /// Frees every port pool and returns to Loaded.
    #[instrument(skip(self), fields(component = %self.inner.config.component))]
    pub fn unload(&self) -> Result<()> {
        let state = self.state();
        if !matches!(
            state,
            State::Idle | State::WaitForResources | State::Invalid
        ) {
            debug!("unload ignored in {:?}", state);
            return Ok(());
        }
        if state != State::Invalid {
            self.component()?
                .send_command(Command::StateSet(State::Loaded))?;
        }
        for port in self.ports() {
            if let Err(err) = port.free_buffers() {
                warn!("{}: {}", port.name(), err);
            }
        }
        if state != State::Invalid {
            self.wait_for(State::Loaded)?;
        }
        Ok(())
    }

    /// Requests `target` and waits for the component to confirm it.
    pub fn change_state(&self, target: State) -> Result<()> {
        debug!("changing to {:?}", target);
        self.component()?
            .send_command(Command::StateSet(target))?;
        self.wait_for(target)
    }

    fn wait_for(&self, target: State) -> Result<()> {
        self.inner
            .state
            .wait_for(target, self.inner.config.wait.state_timeout)
            .map_err(|err| {
                error!("{}", err);
                err
            })
    }

    /// Blocks until the component reports end of stream on a port.
    pub fn wait_for_done(&self) -> Result<()> {
        match self.inner.done_sem.down(None) {
            Wake::Signaled => Ok(()),
            Wake::TimedOut => Err(Error::CommandTimeout(Command::StateSet(self.state()))),
            Wake::Interrupted => Err(self.inner.interrupted()),
        }
    }

    pub fn set_done(&self) {
        self.inner.done_sem.up();
    }

    /// Unblocks the pipeline threads ahead of a flush.
    pub fn flush_start(&self) {
        for port in self.ports() {
            port.pause();
        }
    }

    /// Flushes every port and resumes delivery.
    pub fn flush_stop(&self) -> Result<()> {
        for port in self.ports() {
            port.flush()?;
        }
        for port in self.ports() {
            port.resume();
        }
        Ok(())
    }

    pub fn port_definition(&self, index: u32) -> Result<PortDefinition> {
        self.component()?.port_definition(index)
    }

    pub fn set_port_definition(&self, definition: &PortDefinition) -> Result<()> {
        self.component()?.set_port_definition(definition)
    }

    /// Reads a typed parameter with its header initialized.
    pub fn get_parameter<T: Param>(&self, index: u32) -> Result<T> {
        // SAFETY: `Param` types are valid when zeroed.
        let mut param: T = unsafe { zeroed() };
        let bytes = param_bytes(&mut param);
        init_param(bytes);
        self.component()?.get_parameter(index, bytes)?;
        Ok(param)
    }

    pub fn set_parameter<T: Param>(&self, index: u32, param: &T) -> Result<()> {
        let mut param = *param;
        let bytes = param_bytes(&mut param);
        init_param(bytes);
        self.component()?.set_parameter(index, bytes)
    }

    pub fn get_config<T: Param>(&self, index: u32) -> Result<T> {
        // SAFETY: `Param` types are valid when zeroed.
        let mut config: T = unsafe { zeroed() };
        let bytes = param_bytes(&mut config);
        init_param(bytes);
        self.component()?.get_config(index, bytes)?;
        Ok(config)
    }

    pub fn set_config<T: Param>(&self, index: u32, config: &T) -> Result<()> {
        let mut config = *config;
        let bytes = param_bytes(&mut config);
        init_param(bytes);
        self.component()?.set_config(index, bytes)
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("component", &self.inner.config.component)
            .field("state", &self.state())
            .field("error", &self.error())
            .field("ports", &self.ports().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_header() {
        let mut role: sys::OMX_PARAM_COMPONENTROLETYPE = unsafe { zeroed() };
        init_param(param_bytes(&mut role));
        assert_eq!(role.nSize, sys::struct_size::<sys::OMX_PARAM_COMPONENTROLETYPE>());
        assert_eq!(role.nVersion, sys::OMX_VERSIONTYPE::spec());
    }

    #[test]
    fn default_wait() {
        let wait = WaitPolicy::default();
        assert_eq!(wait.state_timeout, Some(Duration::from_millis(100)));
        assert_eq!(wait.command_timeout, None);
    }
}

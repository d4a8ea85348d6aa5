// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! OpenMAX IL components loaded from a vendor core library.

use crate::{
    component::{
        Callbacks, Command, Component, Direction, Domain, Event, Implementation, PortDefinition,
        State, VideoFormat,
    },
    error::{Error, ErrorCode, Result},
    header::{BufferHeader, HeaderRef},
    memory::Memory,
};
use omx_sys::{self as sys, OmxLibrary};
use std::{
    ffi::{c_void, CString},
    fmt,
    mem::zeroed,
    ptr::null_mut,
    sync::Arc,
};
use tracing::{debug, error, trace, warn};

/// An IL core shared library.
pub struct OmxImplementation {
    path: String,
    lib: Arc<OmxLibrary>,
}

impl OmxImplementation {
    pub fn open(path: &str) -> Result<Self> {
        // SAFETY: the library is an OpenMAX IL core, its initializers are
        // trusted like any linked vendor library.
        let library = unsafe { libloading::Library::new(path) }.map_err(|err| {
            debug!("{}: {}", path, err);
            Error::LibraryNotFound(path.to_owned())
        })?;
        let lib = unsafe { OmxLibrary::from_library(library) }?;
        Ok(OmxImplementation {
            path: path.to_owned(),
            lib: Arc::new(lib),
        })
    }
}

impl Implementation for OmxImplementation {
    fn init(&self) -> Result<()> {
        ErrorCode::check(unsafe { self.lib.OMX_Init() })
    }

    fn deinit(&self) {
        let err = unsafe { self.lib.OMX_Deinit() };
        if err != sys::OMX_ErrorNone {
            warn!("{}: OMX_Deinit: {}", self.path, ErrorCode(err));
        }
    }

    fn get_handle(
        &self,
        name: &str,
        callbacks: Arc<dyn Callbacks>,
    ) -> Result<Arc<dyn Component>> {
        let cname = CString::new(name)
            .map_err(|_| Error::InvalidArgument(format!("component name '{}'", name)))?;
        let context = Box::into_raw(Box::new(Context { callbacks }));
        let mut table = Box::new(sys::OMX_CALLBACKTYPE {
            EventHandler: Some(event_handler),
            EmptyBufferDone: Some(empty_buffer_done),
            FillBufferDone: Some(fill_buffer_done),
        });
        let mut handle: sys::OMX_HANDLETYPE = null_mut();
        let err = unsafe {
            self.lib.OMX_GetHandle(
                &mut handle,
                cname.as_ptr() as sys::OMX_STRING,
                context.cast(),
                &mut *table,
            )
        };
        if err != sys::OMX_ErrorNone || handle.is_null() {
            // SAFETY: the component never saw a valid handle for this
            // context.
            drop(unsafe { Box::from_raw(context) });
            return Err(match ErrorCode(err) {
                ErrorCode::COMPONENT_NOT_FOUND | ErrorCode::INVALID_COMPONENT_NAME => {
                    Error::ComponentNotFound(name.to_owned())
                }
                ErrorCode::NONE => Error::ComponentNotFound(name.to_owned()),
                code => Error::Component(code),
            });
        }
        debug!("{}: got handle {:?}", name, handle);
        Ok(Arc::new(IlComponent {
            name: name.to_owned(),
            handle,
            context,
            _table: table,
            lib: self.lib.clone(),
        }))
    }
}

struct Context {
    callbacks: Arc<dyn Callbacks>,
}

/// A live `OMX_HANDLETYPE`.
pub struct IlComponent {
    name: String,
    handle: sys::OMX_HANDLETYPE,
    context: *mut Context,
    _table: Box<sys::OMX_CALLBACKTYPE>,
    lib: Arc<OmxLibrary>,
}

// SAFETY: OpenMAX IL components are callable from any thread.
unsafe impl Send for IlComponent {}
unsafe impl Sync for IlComponent {}

impl Drop for IlComponent {
    fn drop(&mut self) {
        let err = unsafe { self.lib.OMX_FreeHandle(self.handle) };
        if err != sys::OMX_ErrorNone {
            error!("{}: OMX_FreeHandle: {}", self.name, ErrorCode(err));
        }
        // SAFETY: no callbacks arrive after the handle was freed.
        drop(unsafe { Box::from_raw(self.context) });
    }
}

impl fmt::Debug for IlComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IlComponent")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish()
    }
}

/// Memory owned by the component (`OMX_AllocateBuffer`).
struct ForeignMemory {
    ptr: *mut u8,
    len: usize,
}

unsafe impl Send for ForeignMemory {}
unsafe impl Sync for ForeignMemory {}

impl Memory for ForeignMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }
}

fn native(header: &BufferHeader) -> *mut sys::OMX_BUFFERHEADERTYPE {
    header.native().cast()
}

/// Copies the host fields into the native header before a submission.
fn sync_to_native(header: &BufferHeader) {
    let fields = header.lock();
    // SAFETY: the native header lives until FreeBuffer.
    if let Some(raw) = unsafe { native(header).as_mut() } {
        raw.nFilledLen = fields.filled_len;
        raw.nOffset = fields.offset;
        raw.nFlags = fields.flags.0;
        raw.nTimeStamp = fields.timestamp;
    }
}

/// Copies the native fields back after a completion.
fn sync_from_native(header: &BufferHeader) {
    let mut fields = header.lock();
    // SAFETY: see `sync_to_native`.
    if let Some(raw) = unsafe { native(header).as_ref() } {
        fields.filled_len = raw.nFilledLen;
        fields.offset = raw.nOffset;
        fields.flags = crate::component::BufferFlags(raw.nFlags);
        fields.timestamp = raw.nTimeStamp;
    }
}

/// Binds a fresh native header to a host header. The native
/// `pAppPrivate` carries one strong reference until FreeBuffer.
fn bind(raw: *mut sys::OMX_BUFFERHEADERTYPE, header: &HeaderRef) {
    header.set_native(raw.cast());
    // SAFETY: `raw` was just returned by the component.
    if let Some(raw) = unsafe { raw.as_mut() } {
        raw.pAppPrivate = Arc::into_raw(header.clone()) as *mut c_void;
    }
    sync_from_native(header);
}

/// Recovers the host header from a native one without consuming the
/// reference held by `pAppPrivate`.
unsafe fn lookup(raw: *mut sys::OMX_BUFFERHEADERTYPE) -> Option<HeaderRef> {
    let token = raw.as_ref()?.pAppPrivate as *const BufferHeader;
    if token.is_null() {
        return None;
    }
    Arc::increment_strong_count(token);
    Some(Arc::from_raw(token))
}

unsafe fn callbacks<'a>(app_data: sys::OMX_PTR) -> Option<&'a Context> {
    (app_data as *const Context).as_ref()
}

unsafe extern "C" fn event_handler(
    _component: sys::OMX_HANDLETYPE,
    app_data: sys::OMX_PTR,
    event: sys::OMX_EVENTTYPE,
    data1: sys::OMX_U32,
    data2: sys::OMX_U32,
    _event_data: sys::OMX_PTR,
) -> sys::OMX_ERRORTYPE {
    if let Some(context) = callbacks(app_data) {
        context.callbacks.event(Event::from_raw(event, data1, data2));
    }
    sys::OMX_ErrorNone
}

unsafe extern "C" fn empty_buffer_done(
    _component: sys::OMX_HANDLETYPE,
    app_data: sys::OMX_PTR,
    buffer: *mut sys::OMX_BUFFERHEADERTYPE,
) -> sys::OMX_ERRORTYPE {
    if let (Some(context), Some(header)) = (callbacks(app_data), lookup(buffer)) {
        sync_from_native(&header);
        trace!("EmptyBufferDone {:?}", buffer);
        context.callbacks.empty_buffer_done(header);
    }
    sys::OMX_ErrorNone
}

unsafe extern "C" fn fill_buffer_done(
    _component: sys::OMX_HANDLETYPE,
    app_data: sys::OMX_PTR,
    buffer: *mut sys::OMX_BUFFERHEADERTYPE,
) -> sys::OMX_ERRORTYPE {
    if let (Some(context), Some(header)) = (callbacks(app_data), lookup(buffer)) {
        sync_from_native(&header);
        trace!("FillBufferDone {:?}", buffer);
        context.callbacks.fill_buffer_done(header);
    }
    sys::OMX_ErrorNone
}

impl From<&sys::OMX_PARAM_PORTDEFINITIONTYPE> for PortDefinition {
    fn from(raw: &sys::OMX_PARAM_PORTDEFINITIONTYPE) -> Self {
        let domain = match raw.eDomain {
            sys::OMX_PortDomainAudio => Domain::Audio,
            sys::OMX_PortDomainVideo => Domain::Video,
            sys::OMX_PortDomainImage => Domain::Image,
            _ => Domain::Other,
        };
        let video = (domain == Domain::Video).then(|| {
            // SAFETY: the video member is active for video ports.
            let video = unsafe { raw.format.video };
            VideoFormat {
                width: video.nFrameWidth,
                height: video.nFrameHeight,
                stride: video.nStride,
                slice_height: video.nSliceHeight,
                bitrate: video.nBitrate,
                framerate: video.xFramerate,
                compression: video.eCompressionFormat,
                color: video.eColorFormat,
            }
        });
        PortDefinition {
            index: raw.nPortIndex,
            direction: match raw.eDir {
                sys::OMX_DirOutput => Direction::Output,
                _ => Direction::Input,
            },
            buffer_count_actual: raw.nBufferCountActual,
            buffer_count_min: raw.nBufferCountMin,
            buffer_size: raw.nBufferSize,
            enabled: raw.bEnabled != sys::OMX_FALSE,
            populated: raw.bPopulated != sys::OMX_FALSE,
            domain,
            video,
        }
    }
}

impl IlComponent {
    fn raw_definition(&self, port: u32) -> Result<sys::OMX_PARAM_PORTDEFINITIONTYPE> {
        // SAFETY: all-zero is a valid port definition.
        let mut raw: sys::OMX_PARAM_PORTDEFINITIONTYPE = unsafe { zeroed() };
        raw.nSize = sys::struct_size::<sys::OMX_PARAM_PORTDEFINITIONTYPE>();
        raw.nVersion = sys::OMX_VERSIONTYPE::spec();
        raw.nPortIndex = port;
        ErrorCode::check(unsafe {
            sys::OMX_GetParameter(
                self.handle,
                sys::OMX_IndexParamPortDefinition,
                (&mut raw as *mut sys::OMX_PARAM_PORTDEFINITIONTYPE).cast(),
            )
        })?;
        Ok(raw)
    }

    fn submit(
        &self,
        header: &HeaderRef,
        call: unsafe fn(sys::OMX_HANDLETYPE, *mut sys::OMX_BUFFERHEADERTYPE) -> u32,
    ) -> Result<()> {
        let raw = native(header);
        if raw.is_null() {
            return Err(Error::InvalidArgument("header not bound to this component".into()));
        }
        sync_to_native(header);
        ErrorCode::check(unsafe { call(self.handle, raw) })
    }
}

impl Component for IlComponent {
    fn send_command(&self, command: Command) -> Result<()> {
        let (cmd, param) = command.as_raw();
        trace!("{}: {:?}", self.name, command);
        ErrorCode::check(unsafe { sys::OMX_SendCommand(self.handle, cmd, param, null_mut()) })
    }

    fn state(&self) -> Result<State> {
        let mut state = sys::OMX_StateInvalid;
        ErrorCode::check(unsafe { sys::OMX_GetState(self.handle, &mut state) })?;
        State::from_raw(state).ok_or(Error::Component(ErrorCode::INVALID_STATE))
    }

    fn port_definition(&self, port: u32) -> Result<PortDefinition> {
        self.raw_definition(port).map(|raw| PortDefinition::from(&raw))
    }

    fn set_port_definition(&self, definition: &PortDefinition) -> Result<()> {
        let mut raw = self.raw_definition(definition.index)?;
        raw.nBufferCountActual = definition.buffer_count_actual;
        raw.nBufferSize = definition.buffer_size;
        if let Some(video) = &definition.video {
            // SAFETY: the video member is active for video ports.
            let format = unsafe { &mut raw.format.video };
            format.nFrameWidth = video.width;
            format.nFrameHeight = video.height;
            format.nStride = video.stride;
            format.nSliceHeight = video.slice_height;
            format.nBitrate = video.bitrate;
            format.xFramerate = video.framerate;
            format.eCompressionFormat = video.compression;
            format.eColorFormat = video.color;
        }
        ErrorCode::check(unsafe {
            sys::OMX_SetParameter(
                self.handle,
                sys::OMX_IndexParamPortDefinition,
                (&mut raw as *mut sys::OMX_PARAM_PORTDEFINITIONTYPE).cast(),
            )
        })
    }

    fn get_parameter(&self, index: u32, data: &mut [u8]) -> Result<()> {
        ErrorCode::check(unsafe {
            sys::OMX_GetParameter(self.handle, index, data.as_mut_ptr().cast())
        })
    }

    fn set_parameter(&self, index: u32, data: &[u8]) -> Result<()> {
        let mut data = data.to_vec();
        ErrorCode::check(unsafe {
            sys::OMX_SetParameter(self.handle, index, data.as_mut_ptr().cast())
        })
    }

    fn get_config(&self, index: u32, data: &mut [u8]) -> Result<()> {
        ErrorCode::check(unsafe {
            sys::OMX_GetConfig(self.handle, index, data.as_mut_ptr().cast())
        })
    }

    fn set_config(&self, index: u32, data: &[u8]) -> Result<()> {
        let mut data = data.to_vec();
        ErrorCode::check(unsafe {
            sys::OMX_SetConfig(self.handle, index, data.as_mut_ptr().cast())
        })
    }

    fn set_role(&self, role: &str) -> Result<()> {
        // SAFETY: all-zero is a valid role parameter.
        let mut param: sys::OMX_PARAM_COMPONENTROLETYPE = unsafe { zeroed() };
        param.nSize = sys::struct_size::<sys::OMX_PARAM_COMPONENTROLETYPE>();
        param.nVersion = sys::OMX_VERSIONTYPE::spec();
        let len = role.len().min(sys::OMX_MAX_STRINGNAME_SIZE - 1);
        param.cRole[..len].copy_from_slice(&role.as_bytes()[..len]);
        ErrorCode::check(unsafe {
            sys::OMX_SetParameter(
                self.handle,
                sys::OMX_IndexParamStandardComponentRole,
                (&mut param as *mut sys::OMX_PARAM_COMPONENTROLETYPE).cast(),
            )
        })
    }

    fn allocate_buffer(&self, port: u32, size: usize) -> Result<HeaderRef> {
        let mut raw: *mut sys::OMX_BUFFERHEADERTYPE = null_mut();
        ErrorCode::check(unsafe {
            sys::OMX_AllocateBuffer(self.handle, &mut raw, port, null_mut(), size as u32)
        })?;
        // SAFETY: a successful AllocateBuffer returns a valid header.
        let (ptr, len) = match unsafe { raw.as_ref() } {
            Some(native) => (native.pBuffer, native.nAllocLen as usize),
            None => return Err(Error::Component(ErrorCode::INSUFFICIENT_RESOURCES)),
        };
        let header = BufferHeader::new(port, Arc::new(ForeignMemory { ptr, len }));
        bind(raw, &header);
        Ok(header)
    }

    fn use_buffer(&self, port: u32, memory: Arc<dyn Memory>) -> Result<HeaderRef> {
        let mut raw: *mut sys::OMX_BUFFERHEADERTYPE = null_mut();
        ErrorCode::check(unsafe {
            sys::OMX_UseBuffer(
                self.handle,
                &mut raw,
                port,
                null_mut(),
                memory.len() as u32,
                memory.as_ptr(),
            )
        })?;
        if raw.is_null() {
            return Err(Error::Component(ErrorCode::INSUFFICIENT_RESOURCES));
        }
        let header = BufferHeader::new(port, memory);
        bind(raw, &header);
        Ok(header)
    }

    fn free_buffer(&self, header: &HeaderRef) -> Result<()> {
        let raw = native(header);
        // SAFETY: `raw` is bound to this header until now.
        let token = unsafe { raw.as_ref() }
            .map(|native| native.pAppPrivate as *const BufferHeader)
            .unwrap_or(std::ptr::null());
        let result =
            ErrorCode::check(unsafe { sys::OMX_FreeBuffer(self.handle, header.port(), raw) });
        header.set_native(null_mut());
        if !token.is_null() {
            // SAFETY: releases the reference taken in `bind`.
            drop(unsafe { Arc::from_raw(token) });
        }
        result
    }

    fn empty_this_buffer(&self, header: &HeaderRef) -> Result<()> {
        self.submit(header, sys::OMX_EmptyThisBuffer)
    }

    fn fill_this_buffer(&self, header: &HeaderRef) -> Result<()> {
        self.submit(header, sys::OMX_FillThisBuffer)
    }
}

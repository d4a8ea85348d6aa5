// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Raw bindings for the OpenMAX IL 1.1 core and component ABI.
//!
//! The IL core library is loaded at runtime with [`OmxLibrary::new`] so the
//! crate builds on hosts without a vendor OpenMAX stack. Component vtable
//! entries are reached through the `OMX_*` helpers which mirror the macros of
//! `OMX_Core.h`.

#![allow(non_camel_case_types, non_snake_case, non_upper_case_globals)]

use libc::{c_char, c_void};
use std::ffi::OsStr;

pub type OMX_U8 = u8;
pub type OMX_U32 = u32;
pub type OMX_S32 = i32;
pub type OMX_BOOL = u32;
pub type OMX_PTR = *mut c_void;
pub type OMX_STRING = *mut c_char;
pub type OMX_HANDLETYPE = *mut c_void;
pub type OMX_TICKS = i64;
pub type OMX_ERRORTYPE = u32;
pub type OMX_STATETYPE = u32;
pub type OMX_COMMANDTYPE = u32;
pub type OMX_EVENTTYPE = u32;
pub type OMX_DIRTYPE = u32;
pub type OMX_INDEXTYPE = u32;
pub type OMX_PORTDOMAINTYPE = u32;

pub const OMX_FALSE: OMX_BOOL = 0;
pub const OMX_TRUE: OMX_BOOL = 1;

pub const OMX_VERSION_MAJOR: u8 = 1;
pub const OMX_VERSION_MINOR: u8 = 1;
pub const OMX_VERSION_REVISION: u8 = 2;
pub const OMX_VERSION_STEP: u8 = 0;

pub const OMX_MAX_STRINGNAME_SIZE: usize = 128;
pub const OMX_ALL: u32 = 0xFFFF_FFFF;
pub const OMX_TICKS_PER_SECOND: i64 = 1_000_000;

pub const OMX_ErrorNone: OMX_ERRORTYPE = 0;
pub const OMX_ErrorInsufficientResources: OMX_ERRORTYPE = 0x8000_1000;
pub const OMX_ErrorUndefined: OMX_ERRORTYPE = 0x8000_1001;
pub const OMX_ErrorComponentNotFound: OMX_ERRORTYPE = 0x8000_1003;
pub const OMX_ErrorBadParameter: OMX_ERRORTYPE = 0x8000_1005;
pub const OMX_ErrorNotImplemented: OMX_ERRORTYPE = 0x8000_1006;
pub const OMX_ErrorStreamCorrupt: OMX_ERRORTYPE = 0x8000_100B;

pub const OMX_StateInvalid: OMX_STATETYPE = 0;
pub const OMX_StateLoaded: OMX_STATETYPE = 1;
pub const OMX_StateIdle: OMX_STATETYPE = 2;
pub const OMX_StateExecuting: OMX_STATETYPE = 3;
pub const OMX_StatePause: OMX_STATETYPE = 4;
pub const OMX_StateWaitForResources: OMX_STATETYPE = 5;

pub const OMX_CommandStateSet: OMX_COMMANDTYPE = 0;
pub const OMX_CommandFlush: OMX_COMMANDTYPE = 1;
pub const OMX_CommandPortDisable: OMX_COMMANDTYPE = 2;
pub const OMX_CommandPortEnable: OMX_COMMANDTYPE = 3;
pub const OMX_CommandMarkBuffer: OMX_COMMANDTYPE = 4;

pub const OMX_EventCmdComplete: OMX_EVENTTYPE = 0;
pub const OMX_EventError: OMX_EVENTTYPE = 1;
pub const OMX_EventMark: OMX_EVENTTYPE = 2;
pub const OMX_EventPortSettingsChanged: OMX_EVENTTYPE = 3;
pub const OMX_EventBufferFlag: OMX_EVENTTYPE = 4;
/// Vendor extension raised by several SoC stacks when an indexed setting
/// changed on a port.
pub const OMX_EventIndexSettingChanged: OMX_EVENTTYPE = 0x6F00_0000;

pub const OMX_DirInput: OMX_DIRTYPE = 0;
pub const OMX_DirOutput: OMX_DIRTYPE = 1;

pub const OMX_PortDomainAudio: OMX_PORTDOMAINTYPE = 0;
pub const OMX_PortDomainVideo: OMX_PORTDOMAINTYPE = 1;
pub const OMX_PortDomainImage: OMX_PORTDOMAINTYPE = 2;
pub const OMX_PortDomainOther: OMX_PORTDOMAINTYPE = 3;

pub const OMX_IndexParamStandardComponentRole: OMX_INDEXTYPE = 0x0100_0017;
pub const OMX_IndexParamPortDefinition: OMX_INDEXTYPE = 0x0200_0001;

pub const OMX_BUFFERFLAG_EOS: u32 = 0x0000_0001;
pub const OMX_BUFFERFLAG_STARTTIME: u32 = 0x0000_0002;
pub const OMX_BUFFERFLAG_DECODEONLY: u32 = 0x0000_0004;
pub const OMX_BUFFERFLAG_DATACORRUPT: u32 = 0x0000_0008;
pub const OMX_BUFFERFLAG_ENDOFFRAME: u32 = 0x0000_0010;
pub const OMX_BUFFERFLAG_SYNCFRAME: u32 = 0x0000_0020;
pub const OMX_BUFFERFLAG_EXTRADATA: u32 = 0x0000_0040;
pub const OMX_BUFFERFLAG_CODECCONFIG: u32 = 0x0000_0080;

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct OMX_VERSIONTYPE {
    pub nVersionMajor: OMX_U8,
    pub nVersionMinor: OMX_U8,
    pub nRevision: OMX_U8,
    pub nStep: OMX_U8,
}

impl OMX_VERSIONTYPE {
    pub const fn spec() -> Self {
        Self {
            nVersionMajor: OMX_VERSION_MAJOR,
            nVersionMinor: OMX_VERSION_MINOR,
            nRevision: OMX_VERSION_REVISION,
            nStep: OMX_VERSION_STEP,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct OMX_BUFFERHEADERTYPE {
    pub nSize: OMX_U32,
    pub nVersion: OMX_VERSIONTYPE,
    pub pBuffer: *mut OMX_U8,
    pub nAllocLen: OMX_U32,
    pub nFilledLen: OMX_U32,
    pub nOffset: OMX_U32,
    pub pAppPrivate: OMX_PTR,
    pub pPlatformPrivate: OMX_PTR,
    pub pInputPortPrivate: OMX_PTR,
    pub pOutputPortPrivate: OMX_PTR,
    pub hMarkTargetComponent: OMX_HANDLETYPE,
    pub pMarkData: OMX_PTR,
    pub nTickCount: OMX_U32,
    pub nTimeStamp: OMX_TICKS,
    pub nFlags: OMX_U32,
    pub nOutputPortIndex: OMX_U32,
    pub nInputPortIndex: OMX_U32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct OMX_VIDEO_PORTDEFINITIONTYPE {
    pub cMIMEType: OMX_STRING,
    pub pNativeRender: OMX_PTR,
    pub nFrameWidth: OMX_U32,
    pub nFrameHeight: OMX_U32,
    pub nStride: OMX_S32,
    pub nSliceHeight: OMX_U32,
    pub nBitrate: OMX_U32,
    pub xFramerate: OMX_U32,
    pub bFlagErrorConcealment: OMX_BOOL,
    pub eCompressionFormat: OMX_U32,
    pub eColorFormat: OMX_U32,
    pub pNativeWindow: OMX_PTR,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct OMX_AUDIO_PORTDEFINITIONTYPE {
    pub cMIMEType: OMX_STRING,
    pub pNativeRender: OMX_PTR,
    pub bFlagErrorConcealment: OMX_BOOL,
    pub eEncoding: OMX_U32,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union OMX_PORTDEFINITION_FORMAT {
    pub audio: OMX_AUDIO_PORTDEFINITIONTYPE,
    pub video: OMX_VIDEO_PORTDEFINITIONTYPE,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct OMX_PARAM_PORTDEFINITIONTYPE {
    pub nSize: OMX_U32,
    pub nVersion: OMX_VERSIONTYPE,
    pub nPortIndex: OMX_U32,
    pub eDir: OMX_DIRTYPE,
    pub nBufferCountActual: OMX_U32,
    pub nBufferCountMin: OMX_U32,
    pub nBufferSize: OMX_U32,
    pub bEnabled: OMX_BOOL,
    pub bPopulated: OMX_BOOL,
    pub eDomain: OMX_PORTDOMAINTYPE,
    pub format: OMX_PORTDEFINITION_FORMAT,
    pub bBuffersContiguous: OMX_BOOL,
    pub nBufferAlignment: OMX_U32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct OMX_PARAM_COMPONENTROLETYPE {
    pub nSize: OMX_U32,
    pub nVersion: OMX_VERSIONTYPE,
    pub cRole: [OMX_U8; OMX_MAX_STRINGNAME_SIZE],
}

/// Callbacks handed to `OMX_GetHandle`.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct OMX_CALLBACKTYPE {
    pub EventHandler: Option<
        unsafe extern "C" fn(
            hComponent: OMX_HANDLETYPE,
            pAppData: OMX_PTR,
            eEvent: OMX_EVENTTYPE,
            nData1: OMX_U32,
            nData2: OMX_U32,
            pEventData: OMX_PTR,
        ) -> OMX_ERRORTYPE,
    >,
    pub EmptyBufferDone: Option<
        unsafe extern "C" fn(
            hComponent: OMX_HANDLETYPE,
            pAppData: OMX_PTR,
            pBuffer: *mut OMX_BUFFERHEADERTYPE,
        ) -> OMX_ERRORTYPE,
    >,
    pub FillBufferDone: Option<
        unsafe extern "C" fn(
            hComponent: OMX_HANDLETYPE,
            pAppData: OMX_PTR,
            pBuffer: *mut OMX_BUFFERHEADERTYPE,
        ) -> OMX_ERRORTYPE,
    >,
}

type SendCommandFn =
    unsafe extern "C" fn(OMX_HANDLETYPE, OMX_COMMANDTYPE, OMX_U32, OMX_PTR) -> OMX_ERRORTYPE;
type IndexFn = unsafe extern "C" fn(OMX_HANDLETYPE, OMX_INDEXTYPE, OMX_PTR) -> OMX_ERRORTYPE;
type GetStateFn = unsafe extern "C" fn(OMX_HANDLETYPE, *mut OMX_STATETYPE) -> OMX_ERRORTYPE;
type UseBufferFn = unsafe extern "C" fn(
    OMX_HANDLETYPE,
    *mut *mut OMX_BUFFERHEADERTYPE,
    OMX_U32,
    OMX_PTR,
    OMX_U32,
    *mut OMX_U8,
) -> OMX_ERRORTYPE;
type AllocateBufferFn = unsafe extern "C" fn(
    OMX_HANDLETYPE,
    *mut *mut OMX_BUFFERHEADERTYPE,
    OMX_U32,
    OMX_PTR,
    OMX_U32,
) -> OMX_ERRORTYPE;
type FreeBufferFn =
    unsafe extern "C" fn(OMX_HANDLETYPE, OMX_U32, *mut OMX_BUFFERHEADERTYPE) -> OMX_ERRORTYPE;
type BufferFn = unsafe extern "C" fn(OMX_HANDLETYPE, *mut OMX_BUFFERHEADERTYPE) -> OMX_ERRORTYPE;

/// Component vtable as laid out by `OMX_Component.h`.
#[repr(C)]
pub struct OMX_COMPONENTTYPE {
    pub nSize: OMX_U32,
    pub nVersion: OMX_VERSIONTYPE,
    pub pComponentPrivate: OMX_PTR,
    pub pApplicationPrivate: OMX_PTR,
    pub GetComponentVersion: Option<
        unsafe extern "C" fn(
            OMX_HANDLETYPE,
            OMX_STRING,
            *mut OMX_VERSIONTYPE,
            *mut OMX_VERSIONTYPE,
            *mut [OMX_U8; 128],
        ) -> OMX_ERRORTYPE,
    >,
    pub SendCommand: Option<SendCommandFn>,
    pub GetParameter: Option<IndexFn>,
    pub SetParameter: Option<IndexFn>,
    pub GetConfig: Option<IndexFn>,
    pub SetConfig: Option<IndexFn>,
    pub GetExtensionIndex:
        Option<unsafe extern "C" fn(OMX_HANDLETYPE, OMX_STRING, *mut OMX_INDEXTYPE) -> OMX_ERRORTYPE>,
    pub GetState: Option<GetStateFn>,
    pub ComponentTunnelRequest: Option<
        unsafe extern "C" fn(OMX_HANDLETYPE, OMX_U32, OMX_HANDLETYPE, OMX_U32, OMX_PTR) -> OMX_ERRORTYPE,
    >,
    pub UseBuffer: Option<UseBufferFn>,
    pub AllocateBuffer: Option<AllocateBufferFn>,
    pub FreeBuffer: Option<FreeBufferFn>,
    pub EmptyThisBuffer: Option<BufferFn>,
    pub FillThisBuffer: Option<BufferFn>,
    pub SetCallbacks:
        Option<unsafe extern "C" fn(OMX_HANDLETYPE, *mut OMX_CALLBACKTYPE, OMX_PTR) -> OMX_ERRORTYPE>,
    pub ComponentDeInit: Option<unsafe extern "C" fn(OMX_HANDLETYPE) -> OMX_ERRORTYPE>,
    pub UseEGLImage: Option<
        unsafe extern "C" fn(
            OMX_HANDLETYPE,
            *mut *mut OMX_BUFFERHEADERTYPE,
            OMX_U32,
            OMX_PTR,
            *mut c_void,
        ) -> OMX_ERRORTYPE,
    >,
    pub ComponentRoleEnum:
        Option<unsafe extern "C" fn(OMX_HANDLETYPE, *mut OMX_U8, OMX_U32) -> OMX_ERRORTYPE>,
}

/// Resolves a slot of the component vtable behind `handle`.
///
/// # Safety
///
/// `handle` must be a live handle returned by `OMX_GetHandle`.
unsafe fn vtable<'a>(handle: OMX_HANDLETYPE) -> Option<&'a OMX_COMPONENTTYPE> {
    (handle as *const OMX_COMPONENTTYPE).as_ref()
}

macro_rules! dispatch {
    ($handle:expr, $slot:ident, $($arg:expr),*) => {
        match vtable($handle).and_then(|c| c.$slot) {
            Some(f) => f($handle, $($arg),*),
            None => OMX_ErrorNotImplemented,
        }
    };
}

/// # Safety
///
/// `handle` must be a live component handle.
pub unsafe fn OMX_SendCommand(
    handle: OMX_HANDLETYPE,
    cmd: OMX_COMMANDTYPE,
    param: OMX_U32,
    data: OMX_PTR,
) -> OMX_ERRORTYPE {
    dispatch!(handle, SendCommand, cmd, param, data)
}

/// # Safety
///
/// `handle` must be a live component handle and `param` must point to the
/// structure matching `index`, with `nSize` initialized.
pub unsafe fn OMX_GetParameter(
    handle: OMX_HANDLETYPE,
    index: OMX_INDEXTYPE,
    param: OMX_PTR,
) -> OMX_ERRORTYPE {
    dispatch!(handle, GetParameter, index, param)
}

/// # Safety
///
/// See [`OMX_GetParameter`].
pub unsafe fn OMX_SetParameter(
    handle: OMX_HANDLETYPE,
    index: OMX_INDEXTYPE,
    param: OMX_PTR,
) -> OMX_ERRORTYPE {
    dispatch!(handle, SetParameter, index, param)
}

/// # Safety
///
/// See [`OMX_GetParameter`].
pub unsafe fn OMX_GetConfig(
    handle: OMX_HANDLETYPE,
    index: OMX_INDEXTYPE,
    config: OMX_PTR,
) -> OMX_ERRORTYPE {
    dispatch!(handle, GetConfig, index, config)
}

/// # Safety
///
/// See [`OMX_GetParameter`].
pub unsafe fn OMX_SetConfig(
    handle: OMX_HANDLETYPE,
    index: OMX_INDEXTYPE,
    config: OMX_PTR,
) -> OMX_ERRORTYPE {
    dispatch!(handle, SetConfig, index, config)
}

/// # Safety
///
/// `handle` must be a live component handle.
pub unsafe fn OMX_GetState(handle: OMX_HANDLETYPE, state: *mut OMX_STATETYPE) -> OMX_ERRORTYPE {
    dispatch!(handle, GetState, state)
}

/// # Safety
///
/// `handle` must be a live component handle and `buffer` must stay valid
/// until the header is freed.
pub unsafe fn OMX_UseBuffer(
    handle: OMX_HANDLETYPE,
    header: *mut *mut OMX_BUFFERHEADERTYPE,
    port: OMX_U32,
    app_private: OMX_PTR,
    size: OMX_U32,
    buffer: *mut OMX_U8,
) -> OMX_ERRORTYPE {
    dispatch!(handle, UseBuffer, header, port, app_private, size, buffer)
}

/// # Safety
///
/// `handle` must be a live component handle.
pub unsafe fn OMX_AllocateBuffer(
    handle: OMX_HANDLETYPE,
    header: *mut *mut OMX_BUFFERHEADERTYPE,
    port: OMX_U32,
    app_private: OMX_PTR,
    size: OMX_U32,
) -> OMX_ERRORTYPE {
    dispatch!(handle, AllocateBuffer, header, port, app_private, size)
}

/// # Safety
///
/// `header` must have been obtained from the same component and port.
pub unsafe fn OMX_FreeBuffer(
    handle: OMX_HANDLETYPE,
    port: OMX_U32,
    header: *mut OMX_BUFFERHEADERTYPE,
) -> OMX_ERRORTYPE {
    dispatch!(handle, FreeBuffer, port, header)
}

/// # Safety
///
/// `header` must belong to an input port of the component behind `handle`.
pub unsafe fn OMX_EmptyThisBuffer(
    handle: OMX_HANDLETYPE,
    header: *mut OMX_BUFFERHEADERTYPE,
) -> OMX_ERRORTYPE {
    dispatch!(handle, EmptyThisBuffer, header)
}

/// # Safety
///
/// `header` must belong to an output port of the component behind `handle`.
pub unsafe fn OMX_FillThisBuffer(
    handle: OMX_HANDLETYPE,
    header: *mut OMX_BUFFERHEADERTYPE,
) -> OMX_ERRORTYPE {
    dispatch!(handle, FillThisBuffer, header)
}

/// Runtime-loaded IL core entry points.
pub struct OmxLibrary {
    __library: libloading::Library,
    OMX_Init: unsafe extern "C" fn() -> OMX_ERRORTYPE,
    OMX_Deinit: unsafe extern "C" fn() -> OMX_ERRORTYPE,
    OMX_GetHandle: unsafe extern "C" fn(
        *mut OMX_HANDLETYPE,
        OMX_STRING,
        OMX_PTR,
        *mut OMX_CALLBACKTYPE,
    ) -> OMX_ERRORTYPE,
    OMX_FreeHandle: unsafe extern "C" fn(OMX_HANDLETYPE) -> OMX_ERRORTYPE,
}

impl OmxLibrary {
    /// Opens the IL core shared library at `path` and resolves its entry
    /// points.
    ///
    /// # Safety
    ///
    /// Loading a library runs its initializers; the library must be a
    /// conforming OpenMAX IL core.
    pub unsafe fn new<P>(path: P) -> Result<Self, libloading::Error>
    where
        P: AsRef<OsStr>,
    {
        let library = libloading::Library::new(path)?;
        Self::from_library(library)
    }

    /// # Safety
    ///
    /// See [`OmxLibrary::new`].
    pub unsafe fn from_library<L>(library: L) -> Result<Self, libloading::Error>
    where
        L: Into<libloading::Library>,
    {
        let __library = library.into();
        let OMX_Init = *__library.get(b"OMX_Init\0")?;
        let OMX_Deinit = *__library.get(b"OMX_Deinit\0")?;
        let OMX_GetHandle = *__library.get(b"OMX_GetHandle\0")?;
        let OMX_FreeHandle = *__library.get(b"OMX_FreeHandle\0")?;
        Ok(OmxLibrary {
            __library,
            OMX_Init,
            OMX_Deinit,
            OMX_GetHandle,
            OMX_FreeHandle,
        })
    }

    /// # Safety
    ///
    /// Must be paired with [`OmxLibrary::OMX_Deinit`].
    pub unsafe fn OMX_Init(&self) -> OMX_ERRORTYPE {
        (self.OMX_Init)()
    }

    /// # Safety
    ///
    /// No handles obtained from this library may remain alive.
    pub unsafe fn OMX_Deinit(&self) -> OMX_ERRORTYPE {
        (self.OMX_Deinit)()
    }

    /// # Safety
    ///
    /// `name` must be NUL terminated and `callbacks` must outlive the handle.
    pub unsafe fn OMX_GetHandle(
        &self,
        handle: *mut OMX_HANDLETYPE,
        name: OMX_STRING,
        app_data: OMX_PTR,
        callbacks: *mut OMX_CALLBACKTYPE,
    ) -> OMX_ERRORTYPE {
        (self.OMX_GetHandle)(handle, name, app_data, callbacks)
    }

    /// # Safety
    ///
    /// `handle` must come from [`OmxLibrary::OMX_GetHandle`] on this library.
    pub unsafe fn OMX_FreeHandle(&self, handle: OMX_HANDLETYPE) -> OMX_ERRORTYPE {
        (self.OMX_FreeHandle)(handle)
    }
}

/// Size of an OpenMAX structure for its `nSize` field.
pub const fn struct_size<T>() -> OMX_U32 {
    std::mem::size_of::<T>() as OMX_U32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        assert_eq!(std::mem::size_of::<OMX_VERSIONTYPE>(), 4);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(std::mem::size_of::<OMX_BUFFERHEADERTYPE>(), 112);
    }

    #[test]
    fn null_handle_is_not_implemented() {
        let null = std::ptr::null_mut();
        let err = unsafe { OMX_SendCommand(null, OMX_CommandStateSet, 0, null) };
        assert_eq!(err, OMX_ErrorNotImplemented);
    }
}

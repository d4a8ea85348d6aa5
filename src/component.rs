// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The command/callback boundary between the engine and a component.
//!
//! A [`Component`] is driven by synchronous requests which complete
//! asynchronously: the call returns immediately and the effect is reported
//! later through [`Callbacks`] on the component's own thread. Components are
//! obtained from an [`Implementation`], which is loaded once per process by
//! the [`crate::registry`].

use crate::{
    core::Core,
    error::{ErrorCode, Result},
    header::HeaderRef,
    memory::Memory,
};
use omx_sys as sys;
use std::{fmt, sync::Arc};

/// Component state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Invalid,
    Loaded,
    Idle,
    Executing,
    Pause,
    WaitForResources,
}

impl State {
    pub fn from_raw(value: u32) -> Option<State> {
        Some(match value {
            sys::OMX_StateInvalid => State::Invalid,
            sys::OMX_StateLoaded => State::Loaded,
            sys::OMX_StateIdle => State::Idle,
            sys::OMX_StateExecuting => State::Executing,
            sys::OMX_StatePause => State::Pause,
            sys::OMX_StateWaitForResources => State::WaitForResources,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> u32 {
        match self {
            State::Invalid => sys::OMX_StateInvalid,
            State::Loaded => sys::OMX_StateLoaded,
            State::Idle => sys::OMX_StateIdle,
            State::Executing => sys::OMX_StateExecuting,
            State::Pause => sys::OMX_StatePause,
            State::WaitForResources => sys::OMX_StateWaitForResources,
        }
    }
}

/// Port direction, as seen from the component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

/// Commands accepted by [`Component::send_command`].
///
/// Port arguments may be [`omx_sys::OMX_ALL`] to address every port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    StateSet(State),
    Flush(u32),
    PortDisable(u32),
    PortEnable(u32),
    MarkBuffer(u32),
}

impl Command {
    /// Splits the command into the raw command type and its parameter.
    pub fn as_raw(self) -> (u32, u32) {
        match self {
            Command::StateSet(state) => (sys::OMX_CommandStateSet, state.as_raw()),
            Command::Flush(port) => (sys::OMX_CommandFlush, port),
            Command::PortDisable(port) => (sys::OMX_CommandPortDisable, port),
            Command::PortEnable(port) => (sys::OMX_CommandPortEnable, port),
            Command::MarkBuffer(port) => (sys::OMX_CommandMarkBuffer, port),
        }
    }

    pub fn from_raw(command: u32, param: u32) -> Option<Command> {
        Some(match command {
            sys::OMX_CommandStateSet => Command::StateSet(State::from_raw(param)?),
            sys::OMX_CommandFlush => Command::Flush(param),
            sys::OMX_CommandPortDisable => Command::PortDisable(param),
            sys::OMX_CommandPortEnable => Command::PortEnable(param),
            sys::OMX_CommandMarkBuffer => Command::MarkBuffer(param),
            _ => return None,
        })
    }
}

/// Asynchronous notifications delivered through [`Callbacks::event`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    CmdComplete(Command),
    Error(ErrorCode),
    Mark,
    PortSettingsChanged(u32),
    BufferFlag { port: u32, flags: BufferFlags },
    IndexSettingChanged(u32, u32),
    Other { event: u32, data1: u32, data2: u32 },
}

impl Event {
    pub fn from_raw(event: u32, data1: u32, data2: u32) -> Event {
        match event {
            sys::OMX_EventCmdComplete => match Command::from_raw(data1, data2) {
                Some(command) => Event::CmdComplete(command),
                None => Event::Other {
                    event,
                    data1,
                    data2,
                },
            },
            sys::OMX_EventError => Event::Error(ErrorCode(data1)),
            sys::OMX_EventMark => Event::Mark,
            sys::OMX_EventPortSettingsChanged => Event::PortSettingsChanged(data1),
            sys::OMX_EventBufferFlag => Event::BufferFlag {
                port: data1,
                flags: BufferFlags(data2),
            },
            sys::OMX_EventIndexSettingChanged => Event::IndexSettingChanged(data1, data2),
            _ => Event::Other {
                event,
                data1,
                data2,
            },
        }
    }
}

/// Buffer header flags.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(pub u32);

impl BufferFlags {
    pub const EMPTY: BufferFlags = BufferFlags(0);
    pub const EOS: BufferFlags = BufferFlags(sys::OMX_BUFFERFLAG_EOS);
    pub const STARTTIME: BufferFlags = BufferFlags(sys::OMX_BUFFERFLAG_STARTTIME);
    pub const DATACORRUPT: BufferFlags = BufferFlags(sys::OMX_BUFFERFLAG_DATACORRUPT);
    pub const ENDOFFRAME: BufferFlags = BufferFlags(sys::OMX_BUFFERFLAG_ENDOFFRAME);
    pub const SYNCFRAME: BufferFlags = BufferFlags(sys::OMX_BUFFERFLAG_SYNCFRAME);
    pub const CODECCONFIG: BufferFlags = BufferFlags(sys::OMX_BUFFERFLAG_CODECCONFIG);

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BufferFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: BufferFlags) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferFlags({:#x})", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Domain {
    Audio,
    Video,
    Image,
    Other,
}

/// Video geometry of a port, as carried by the port definition.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub stride: i32,
    pub slice_height: u32,
    pub bitrate: u32,
    /// Frame rate in Q16 fixed point.
    pub framerate: u32,
    pub compression: u32,
    pub color: u32,
}

/// Port definition parameter (`OMX_IndexParamPortDefinition`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDefinition {
    pub index: u32,
    pub direction: Direction,
    pub buffer_count_actual: u32,
    pub buffer_count_min: u32,
    pub buffer_size: u32,
    pub enabled: bool,
    pub populated: bool,
    pub domain: Domain,
    pub video: Option<VideoFormat>,
}

/// Requests understood by a component. All completions arrive through the
/// [`Callbacks`] passed to [`Implementation::get_handle`].
pub trait Component: Send + Sync {
    fn send_command(&self, command: Command) -> Result<()>;

    fn state(&self) -> Result<State>;

    fn port_definition(&self, port: u32) -> Result<PortDefinition>;

    fn set_port_definition(&self, definition: &PortDefinition) -> Result<()>;

    /// Reads an indexed parameter into `data`, which holds the complete
    /// parameter structure including its size/version header.
    fn get_parameter(&self, index: u32, data: &mut [u8]) -> Result<()>;

    fn set_parameter(&self, index: u32, data: &[u8]) -> Result<()>;

    fn get_config(&self, index: u32, data: &mut [u8]) -> Result<()>;

    fn set_config(&self, index: u32, data: &[u8]) -> Result<()>;

    /// Selects the standard component role (`OMX_IndexParamStandardComponentRole`).
    fn set_role(&self, role: &str) -> Result<()>;

    /// Asks the component to allocate a buffer of `size` bytes on `port`.
    fn allocate_buffer(&self, port: u32, size: usize) -> Result<HeaderRef>;

    /// Hands host memory to the component for use on `port`.
    fn use_buffer(&self, port: u32, memory: Arc<dyn Memory>) -> Result<HeaderRef>;

    fn free_buffer(&self, header: &HeaderRef) -> Result<()>;

    fn empty_this_buffer(&self, header: &HeaderRef) -> Result<()>;

    fn fill_this_buffer(&self, header: &HeaderRef) -> Result<()>;
}

/// Completion entry points invoked on the component's thread.
pub trait Callbacks: Send + Sync {
    fn event(&self, event: Event);

    fn empty_buffer_done(&self, header: HeaderRef);

    fn fill_buffer_done(&self, header: HeaderRef);
}

/// A loadable component library.
///
/// `init` runs when the first client acquires the implementation and
/// `deinit` when the last one releases it.
pub trait Implementation: Send + Sync {
    fn init(&self) -> Result<()>;

    fn deinit(&self);

    fn get_handle(&self, name: &str, callbacks: Arc<dyn Callbacks>)
        -> Result<Arc<dyn Component>>;
}

/// Per-codec configuration hook run by [`Core::prepare`] before ports are
/// set up.
pub trait PortConfigurator: Send + Sync {
    fn configure(&self, core: &Core) -> Result<()>;
}

impl<F> PortConfigurator for F
where
    F: Fn(&Core) -> Result<()> + Send + Sync,
{
    fn configure(&self, core: &Core) -> Result<()> {
        self(core)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_events() {
        assert_eq!(
            Event::from_raw(sys::OMX_EventCmdComplete, sys::OMX_CommandStateSet, 2),
            Event::CmdComplete(Command::StateSet(State::Idle))
        );
        assert_eq!(
            Event::from_raw(sys::OMX_EventCmdComplete, sys::OMX_CommandFlush, 1),
            Event::CmdComplete(Command::Flush(1))
        );
        assert_eq!(
            Event::from_raw(sys::OMX_EventError, 0x8000_100B, 0),
            Event::Error(ErrorCode::STREAM_CORRUPT)
        );
        assert_eq!(
            Event::from_raw(0x6F00_0000, 1, 7),
            Event::IndexSettingChanged(1, 7)
        );
    }

    #[test]
    fn flags() {
        let mut flags = BufferFlags::EOS | BufferFlags::ENDOFFRAME;
        assert!(flags.contains(BufferFlags::EOS));
        flags.remove(BufferFlags::EOS);
        assert!(!flags.contains(BufferFlags::EOS));
        assert!(flags.contains(BufferFlags::ENDOFFRAME));
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::component::{Command, State};
use std::{fmt, io};

/// Raw OpenMAX IL error code as reported by a component.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const NONE: ErrorCode = ErrorCode(0);
    pub const INSUFFICIENT_RESOURCES: ErrorCode = ErrorCode(0x8000_1000);
    pub const UNDEFINED: ErrorCode = ErrorCode(0x8000_1001);
    pub const INVALID_COMPONENT_NAME: ErrorCode = ErrorCode(0x8000_1002);
    pub const COMPONENT_NOT_FOUND: ErrorCode = ErrorCode(0x8000_1003);
    pub const INVALID_COMPONENT: ErrorCode = ErrorCode(0x8000_1004);
    pub const BAD_PARAMETER: ErrorCode = ErrorCode(0x8000_1005);
    pub const NOT_IMPLEMENTED: ErrorCode = ErrorCode(0x8000_1006);
    pub const UNDERFLOW: ErrorCode = ErrorCode(0x8000_1007);
    pub const OVERFLOW: ErrorCode = ErrorCode(0x8000_1008);
    pub const HARDWARE: ErrorCode = ErrorCode(0x8000_1009);
    pub const INVALID_STATE: ErrorCode = ErrorCode(0x8000_100A);
    pub const STREAM_CORRUPT: ErrorCode = ErrorCode(0x8000_100B);
    pub const PORTS_NOT_COMPATIBLE: ErrorCode = ErrorCode(0x8000_100C);
    pub const RESOURCES_LOST: ErrorCode = ErrorCode(0x8000_100D);
    pub const NO_MORE: ErrorCode = ErrorCode(0x8000_100E);
    pub const VERSION_MISMATCH: ErrorCode = ErrorCode(0x8000_100F);
    pub const NOT_READY: ErrorCode = ErrorCode(0x8000_1010);
    pub const TIMEOUT: ErrorCode = ErrorCode(0x8000_1011);
    pub const SAME_STATE: ErrorCode = ErrorCode(0x8000_1012);
    pub const RESOURCES_PREEMPTED: ErrorCode = ErrorCode(0x8000_1013);
    pub const PORT_UNRESPONSIVE_DURING_ALLOCATION: ErrorCode = ErrorCode(0x8000_1014);
    pub const PORT_UNRESPONSIVE_DURING_DEALLOCATION: ErrorCode = ErrorCode(0x8000_1015);
    pub const PORT_UNRESPONSIVE_DURING_STOP: ErrorCode = ErrorCode(0x8000_1016);
    pub const INCORRECT_STATE_TRANSITION: ErrorCode = ErrorCode(0x8000_1017);
    pub const INCORRECT_STATE_OPERATION: ErrorCode = ErrorCode(0x8000_1018);
    pub const UNSUPPORTED_SETTING: ErrorCode = ErrorCode(0x8000_1019);
    pub const UNSUPPORTED_INDEX: ErrorCode = ErrorCode(0x8000_101A);
    pub const BAD_PORT_INDEX: ErrorCode = ErrorCode(0x8000_101B);
    pub const PORT_UNPOPULATED: ErrorCode = ErrorCode(0x8000_101C);
    pub const COMPONENT_SUSPENDED: ErrorCode = ErrorCode(0x8000_101D);
    pub const DYNAMIC_RESOURCES_UNAVAILABLE: ErrorCode = ErrorCode(0x8000_101E);
    pub const MB_ERRORS_IN_FRAME: ErrorCode = ErrorCode(0x8000_101F);
    pub const FORMAT_NOT_DETECTED: ErrorCode = ErrorCode(0x8000_1020);
    pub const CONTENT_PIPE_OPEN_FAILED: ErrorCode = ErrorCode(0x8000_1021);
    pub const CONTENT_PIPE_CREATION_FAILED: ErrorCode = ErrorCode(0x8000_1022);
    pub const SEPARATE_TABLES_USED: ErrorCode = ErrorCode(0x8000_1023);
    pub const TUNNELING_UNSUPPORTED: ErrorCode = ErrorCode(0x8000_1024);

    pub fn is_ok(self) -> bool {
        self == Self::NONE
    }

    /// Corrupt-stream reports are recoverable and never become sticky.
    pub fn is_stream_corrupt(self) -> bool {
        self == Self::STREAM_CORRUPT
    }

    /// Converts a component return value into a `Result`.
    pub fn check(code: u32) -> Result<()> {
        match ErrorCode(code) {
            Self::NONE => Ok(()),
            code => Err(Error::Component(code)),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::NONE => "None",
            Self::INSUFFICIENT_RESOURCES => {
                "There were insufficient resources to perform the requested operation"
            }
            Self::UNDEFINED => "The cause of the error could not be determined",
            Self::INVALID_COMPONENT_NAME => "The component name string was not valid",
            Self::COMPONENT_NOT_FOUND => "No component with the specified name string was found",
            Self::INVALID_COMPONENT => "The component specified did not have an entry point",
            Self::BAD_PARAMETER => "One or more parameters were not valid",
            Self::NOT_IMPLEMENTED => "The requested function is not implemented",
            Self::UNDERFLOW => "The buffer was emptied before the next buffer was ready",
            Self::OVERFLOW => "The buffer was not available when it was needed",
            Self::HARDWARE => "The hardware failed to respond as expected",
            Self::INVALID_STATE => "The component is in invalid state",
            Self::STREAM_CORRUPT => "Stream is found to be corrupt",
            Self::PORTS_NOT_COMPATIBLE => "Ports being connected are not compatible",
            Self::RESOURCES_LOST => "Resources allocated to an idle component have been lost",
            Self::NO_MORE => "No more indices can be enumerated",
            Self::VERSION_MISMATCH => "The component detected a version mismatch",
            Self::NOT_READY => "The component is not ready to return data at this time",
            Self::TIMEOUT => "There was a timeout that occurred",
            Self::SAME_STATE => {
                "This error occurs when trying to transition into the state you are already in"
            }
            Self::RESOURCES_PREEMPTED => {
                "Resources allocated to an executing or paused component have been preempted"
            }
            Self::PORT_UNRESPONSIVE_DURING_ALLOCATION => {
                "Waited an unusually long time for the supplier to allocate buffers"
            }
            Self::PORT_UNRESPONSIVE_DURING_DEALLOCATION => {
                "Waited an unusually long time for the supplier to de-allocate buffers"
            }
            Self::PORT_UNRESPONSIVE_DURING_STOP => {
                "Waited an unusually long time for the non-supplier to return a buffer during stop"
            }
            Self::INCORRECT_STATE_TRANSITION => "Attempting a state transition that is not allowed",
            Self::INCORRECT_STATE_OPERATION => {
                "Attempting a command that is not allowed during the present state"
            }
            Self::UNSUPPORTED_SETTING => {
                "The values encapsulated in the parameter or config structure are not supported"
            }
            Self::UNSUPPORTED_INDEX => {
                "The parameter or config indicated by the given index is not supported"
            }
            Self::BAD_PORT_INDEX => "The port index supplied is incorrect",
            Self::PORT_UNPOPULATED => {
                "The port has lost one or more of its buffers and it thus unpopulated"
            }
            Self::COMPONENT_SUSPENDED => "Component suspended due to temporary loss of resources",
            Self::DYNAMIC_RESOURCES_UNAVAILABLE => {
                "Component suspended due to an inability to acquire dynamic resources"
            }
            Self::MB_ERRORS_IN_FRAME => "Frame generated macroblock error",
            Self::FORMAT_NOT_DETECTED => "Cannot parse or determine the format of an input stream",
            Self::CONTENT_PIPE_OPEN_FAILED => "The content open operation failed",
            Self::CONTENT_PIPE_CREATION_FAILED => "The content creation operation failed",
            Self::SEPARATE_TABLES_USED => "Separate table information is being used",
            Self::TUNNELING_UNSUPPORTED => "Tunneling is unsupported by the component",
            _ => "Unknown error",
        }
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCode({:#010x})", self.0)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#010x})", self.description(), self.0)
    }
}

impl From<u32> for ErrorCode {
    fn from(value: u32) -> Self {
        ErrorCode(value)
    }
}

/// Errors reported by the component and port engine.
///
/// Setup failures (`LibraryNotFound`, `ComponentNotFound`, `Load`) leave the
/// core without a handle. Protocol failures (`StateTimeout`,
/// `CommandTimeout`) leave the core in its last confirmed state. A
/// `Component` error carrying a sticky code makes every later operation fail
/// until the core is torn down.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no implementation library named '{0}'")]
    LibraryNotFound(String),

    #[error("failed to load implementation library: {0}")]
    Load(#[from] libloading::Error),

    #[error("component '{0}' not found")]
    ComponentNotFound(String),

    #[error("core has no component handle")]
    NoComponent,

    #[error("timed out waiting for {expected:?}, component is in {actual:?}")]
    StateTimeout { expected: State, actual: State },

    #[error("timed out waiting for {0:?} to complete")]
    CommandTimeout(Command),

    #[error("component error: {0}")]
    Component(ErrorCode),

    #[error("port {0} is disabled")]
    PortDisabled(u32),

    #[error("no buffer available on port {0}")]
    NoBuffer(u32),

    #[error("port {0} does not support this direction")]
    WrongDirection(u32),

    #[error("buffer memory is not shared with port {0}")]
    NotShared(u32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_maps_codes() {
        assert!(ErrorCode::check(0).is_ok());
        match ErrorCode::check(0x8000_1009) {
            Err(Error::Component(code)) => assert_eq!(code, ErrorCode::HARDWARE),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn descriptions() {
        assert_eq!(
            ErrorCode::STREAM_CORRUPT.description(),
            "Stream is found to be corrupt"
        );
        assert!(ErrorCode::STREAM_CORRUPT.is_stream_corrupt());
        assert_eq!(ErrorCode(0x1234).description(), "Unknown error");
        assert_eq!(
            format!("{}", ErrorCode::TIMEOUT),
            "There was a timeout that occurred (0x80001011)"
        );
    }
}

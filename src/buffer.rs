// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pipeline side buffers and timestamp conversion.

use crate::{
    error::{Error, Result},
    transport::BufferTransport,
};
use omx_sys::OMX_TICKS_PER_SECOND;
use std::{fmt, sync::Arc, time::Duration};

/// Ticks value marking an unknown timestamp.
pub const TICKS_NONE: i64 = -1;

const NANOS_PER_TICK: u128 = 1_000_000_000 / OMX_TICKS_PER_SECOND as u128;

/// Converts a pipeline timestamp into OpenMAX ticks.
pub fn to_ticks(pts: Option<Duration>) -> i64 {
    match pts {
        Some(pts) => i64::try_from(pts.as_nanos() / NANOS_PER_TICK).unwrap_or(i64::MAX),
        None => TICKS_NONE,
    }
}

/// Converts OpenMAX ticks into a pipeline timestamp.
pub fn from_ticks(ticks: i64) -> Option<Duration> {
    match ticks {
        TICKS_NONE => None,
        ticks if ticks < 0 => None,
        ticks => {
            let nanos = ticks as u128 * NANOS_PER_TICK;
            Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
        }
    }
}

#[derive(Clone)]
enum Payload {
    Heap(Arc<[u8]>),
    Transport(Arc<BufferTransport>),
}

/// An immutable, cheaply cloned pipeline buffer.
///
/// Buffers either own a heap copy of their payload or view the memory of a
/// component buffer through a [`BufferTransport`]; in the latter case the
/// component buffer is returned to its port when the last clone is dropped.
#[derive(Clone)]
pub struct Buffer {
    payload: Payload,
    offset: usize,
    len: usize,
    pts: Option<Duration>,
    codec_config: bool,
}

impl Buffer {
    pub fn from_vec(data: Vec<u8>) -> Buffer {
        let len = data.len();
        Buffer {
            payload: Payload::Heap(data.into()),
            offset: 0,
            len,
            pts: None,
            codec_config: false,
        }
    }

    pub fn from_slice(data: &[u8]) -> Buffer {
        Self::from_vec(data.to_vec())
    }

    /// A codec configuration buffer (stream headers), sent with the
    /// `CODECCONFIG` flag.
    pub fn codec_config(data: &[u8]) -> Buffer {
        Self::from_slice(data).with_codec_config(true)
    }

    pub(crate) fn from_transport(transport: Arc<BufferTransport>) -> Buffer {
        let len = transport.len();
        Buffer {
            payload: Payload::Transport(transport),
            offset: 0,
            len,
            pts: None,
            codec_config: false,
        }
    }

    pub fn with_pts(mut self, pts: Option<Duration>) -> Buffer {
        self.pts = pts;
        self
    }

    pub fn with_codec_config(mut self, codec_config: bool) -> Buffer {
        self.codec_config = codec_config;
        self
    }

    pub fn pts(&self) -> Option<Duration> {
        self.pts
    }

    pub fn is_codec_config(&self) -> bool {
        self.codec_config
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.payload {
            Payload::Heap(data) => &data[self.offset..self.offset + self.len],
            Payload::Transport(transport) => {
                &transport.as_slice()[self.offset..self.offset + self.len]
            }
        }
    }

    /// The component buffer this buffer views, if any.
    pub fn transport(&self) -> Option<&Arc<BufferTransport>> {
        match &self.payload {
            Payload::Transport(transport) => Some(transport),
            Payload::Heap(_) => None,
        }
    }

    /// Holds the component buffer behind `other` until this buffer's
    /// component buffer is returned. Both buffers must be zero-copy views.
    pub fn attach(&self, other: &Buffer) -> Result<()> {
        match (self.transport(), other.transport()) {
            (Some(transport), Some(extra)) => transport.attach(extra.clone()),
            _ => Err(Error::InvalidArgument(
                "only zero-copy buffers can be attached".to_owned(),
            )),
        }
    }

    /// Base address of the underlying memory region, used to match a shared
    /// buffer with the header that owns the same memory.
    pub(crate) fn memory_ptr(&self) -> Option<*mut u8> {
        self.transport().map(|t| t.header().data_ptr())
    }

    /// Start of this view within its payload.
    pub(crate) fn view_offset(&self) -> usize {
        self.offset
    }

    /// Returns the bytes after `consumed`, or `None` if nothing remains.
    ///
    /// Used to resend the part of a buffer that did not fit into one
    /// component buffer.
    pub fn slice_from(&self, consumed: usize) -> Option<Buffer> {
        if consumed >= self.len {
            return None;
        }
        let mut rest = self.clone();
        rest.offset += consumed;
        rest.len -= consumed;
        Some(rest)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("pts", &self.pts)
            .field("codec_config", &self.codec_config)
            .field("zero_copy", &self.transport().is_some())
            .finish()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Buffer::from_vec(data)
    }
}

/// What flows through a port: data or the end-of-stream marker.
#[derive(Clone, Debug)]
pub enum Item {
    Buffer(Buffer),
    Eos,
}

impl Item {
    pub fn is_eos(&self) -> bool {
        matches!(self, Item::Eos)
    }

    pub fn into_buffer(self) -> Option<Buffer> {
        match self {
            Item::Buffer(buffer) => Some(buffer),
            Item::Eos => None,
        }
    }
}

impl From<Buffer> for Item {
    fn from(buffer: Buffer) -> Self {
        Item::Buffer(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks() {
        assert_eq!(to_ticks(None), TICKS_NONE);
        assert_eq!(to_ticks(Some(Duration::from_millis(40))), 40_000);
        assert_eq!(from_ticks(40_000), Some(Duration::from_millis(40)));
        assert_eq!(from_ticks(TICKS_NONE), None);
    }

    #[test]
    fn ticks_share_one_rate() {
        let pts = Duration::from_nanos(NANOS_PER_TICK as u64 * 1_234_567);
        assert_eq!(from_ticks(to_ticks(Some(pts))), Some(pts));
        assert_eq!(from_ticks(OMX_TICKS_PER_SECOND), Some(Duration::from_secs(1)));
        assert_eq!(from_ticks(i64::MAX).map(|d| d > Duration::from_secs(1)), Some(true));
    }

    #[test]
    fn heap_buffers_cannot_attach() {
        let first = Buffer::from_vec(vec![1, 2]);
        let second = Buffer::from_vec(vec![3]);
        assert!(matches!(first.attach(&second), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn remainder() {
        let buf = Buffer::from_vec((0..10).collect()).with_pts(Some(Duration::from_secs(1)));
        let rest = buf.slice_from(6).map(|b| b.as_slice().to_vec());
        assert_eq!(rest, Some(vec![6, 7, 8, 9]));
        assert!(buf.slice_from(10).is_none());
        assert_eq!(buf.slice_from(4).and_then(|b| b.pts()), Some(Duration::from_secs(1)));
    }
}

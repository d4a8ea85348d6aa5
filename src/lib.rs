// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst OpenMAX IL Engine
//!
//! This library drives OpenMAX IL codec components from a streaming
//! pipeline. It owns the component state machine, the port buffer pools and
//! the exchange of buffers between pipeline threads and the component's
//! completion callbacks.
//!
//! ## Features
//!
//! - **State Machine**: [`core::Core`] moves a component through Loaded,
//!   Idle, Executing and Pause with bounded, error-aware waits.
//! - **Buffer Exchange**: [`port::Port`] sends and receives buffers, either
//!   copying payloads or sharing component memory without copies.
//! - **Zero-Copy Chaining**: output buffers are handed downstream as
//!   [`buffer::Buffer`] views and returned to the component when dropped.
//! - **Port Lifecycle**: flush, pause, resume, enable and disable at runtime.
//! - **Implementations**: vendor IL core libraries are loaded at runtime,
//!   in-process components such as [`loopback`] can be registered by name.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_omx::{
//!     buffer::{Buffer, Item},
//!     core::{Core, CoreConfig},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let core = Core::new(CoreConfig::new("libOmxCore.so", "OMX.hantro.H1.video.encoder"));
//! core.init()?;
//! let input = core.get_port("in", 0);
//! let output = core.get_port("out", 1);
//!
//! core.prepare()?;
//! core.start()?;
//!
//! input.send(&Item::Buffer(Buffer::from_vec(vec![0; 1024])))?;
//! input.send(&Item::Eos)?;
//! while let Some(Item::Buffer(buffer)) = output.recv()? {
//!     println!("received {} bytes", buffer.len());
//! }
//!
//! core.stop()?;
//! core.unload()?;
//! core.deinit();
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: an OpenMAX IL 1.1 core library for hardware components, DMA
//!   heap support for [`memory::DmaMemory`]
//! - **Software**: the [`loopback`] component runs anywhere
//!
//! ## Safety
//!
//! This library uses `unsafe` code for the OpenMAX IL ABI and for sharing
//! buffer memory with components. Unsafe operations are isolated to the
//! `ffi`, `header` and `memory` modules and wrapped with safe APIs.

pub mod buffer;
pub mod component;
pub mod core;
pub mod error;
pub mod ffi;
pub mod header;
pub mod loopback;
pub mod memory;
pub mod port;
pub mod queue;
pub mod registry;
pub mod sync;
pub mod transport;

pub use crate::error::{Error, ErrorCode, Result};

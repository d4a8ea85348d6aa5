// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_omx::{
    core::{CoreConfig, WaitPolicy},
    loopback,
};
use std::{path::PathBuf, time::Duration};

/// Host memory used for input buffers when the component does not allocate.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum InputMemory {
    /// The component allocates its own buffers
    Component,
    /// Heap memory supplied by the host
    Heap,
    /// DMA heap (CMA) memory supplied by the host
    Dma,
}

/// Command-line arguments for the EdgeFirst OMX runner.
///
/// Pushes a file, or generated frames, through an OpenMAX IL component and
/// writes the output buffers to a file. Arguments can be specified via
/// command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Loopback component, generated frames
/// edgefirst-omx --frames 100 --output /tmp/out.bin
///
/// # Vendor encoder
/// export OMX_LIBRARY=/usr/lib/libOmxCore.so
/// edgefirst-omx --component OMX.hantro.H1.video.encoder --input frames.yuv
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// OpenMAX IL core library, or "loopback" for the software component
    #[arg(long, env = "OMX_LIBRARY", default_value = "loopback")]
    pub library: String,

    /// Component name
    #[arg(long, env = "OMX_COMPONENT", default_value = loopback::COMPONENT_NAME)]
    pub component: String,

    /// Standard component role (e.g. video_encoder.avc)
    #[arg(long, env = "OMX_ROLE")]
    pub role: Option<String>,

    /// Input port index
    #[arg(long, default_value = "0")]
    pub input_port: u32,

    /// Output port index
    #[arg(long, default_value = "1")]
    pub output_port: u32,

    /// File to send, generated frames are used when absent
    #[arg(short, long, env = "INPUT")]
    pub input: Option<PathBuf>,

    /// File receiving the output buffers
    #[arg(short, long, env = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Number of generated frames when no input file is given
    #[arg(long, default_value = "30")]
    pub frames: u32,

    /// Size of each generated frame or input chunk in bytes
    #[arg(long, default_value = "4096")]
    pub frame_size: usize,

    /// Frame interval for generated timestamps in milliseconds
    #[arg(long, default_value = "33")]
    pub frame_interval: u64,

    /// Input buffer memory
    #[arg(long, env = "INPUT_MEMORY", default_value = "component", value_enum)]
    pub input_memory: InputMemory,

    /// Receive output buffers without copying
    #[arg(long, env = "ZERO_COPY")]
    pub zero_copy: bool,

    /// Join output buffers up to the end-of-frame flag
    #[arg(long, env = "JOIN_FRAMES")]
    pub join_frames: bool,

    /// Do not forward timestamps
    #[arg(long)]
    pub no_timestamps: bool,

    /// State change timeout in milliseconds, 0 waits forever
    #[arg(long, env = "STATE_TIMEOUT", default_value = "100")]
    pub state_timeout: u64,

    /// Flush and port command timeout in milliseconds, 0 waits forever
    #[arg(long, env = "COMMAND_TIMEOUT", default_value = "0")]
    pub command_timeout: u64,

    /// Port profile JSON overriding buffer counts and sizes
    #[arg(long, env = "PORT_PROFILE")]
    pub profile: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tokio async runtime console for debugging
    #[arg(long, env = "TOKIO_CONSOLE")]
    pub tokio_console: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

fn millis(value: u64) -> Option<Duration> {
    match value {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    }
}

impl From<&Args> for CoreConfig {
    fn from(args: &Args) -> Self {
        let mut config = CoreConfig::new(&args.library, &args.component).with_wait(WaitPolicy {
            state_timeout: millis(args.state_timeout),
            command_timeout: millis(args.command_timeout),
        });
        config.role = args.role.clone();
        config.use_timestamps = !args.no_timestamps;
        config
    }
}

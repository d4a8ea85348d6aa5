// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::{Args, InputMemory};
use clap::Parser;
use edgefirst_omx::{
    buffer::{Buffer, Item},
    component::PortConfigurator,
    core::{Core, CoreConfig},
    loopback::{LoopbackConfig, LoopbackImplementation},
    memory::{DmaAllocator, DmaHeap},
    port::{Allocation, CopyMode, Port},
    registry,
};
use std::{
    error::Error,
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match args.verbose {
            true => "info,edgefirst_omx=debug",
            false => "info",
        })
    });

    let console = args.tokio_console.then(console_subscriber::spawn);
    let journald = match tracing_journald::layer() {
        Ok(layer) => Some(layer),
        Err(err) => {
            eprintln!("journald unavailable: {}", err);
            None
        }
    };
    let tracy = args.tracy.then(|| {
        tracy_client::Client::start();
        tracing_tracy::TracyLayer::default()
    });

    let subscriber = tracing_subscriber::registry()
        .with(console)
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

/// Reads a port profile of the form
/// `{"ports": [{"index": 0, "buffers": 4, "size": 4096}]}`.
fn load_profile(path: &Path) -> Result<Vec<(u32, Option<u32>, Option<u32>)>, Box<dyn Error>> {
    let file = File::open(path)?;
    let json: serde_json::Value = serde_json::from_reader(file)?;
    let ports = json["ports"]
        .as_array()
        .ok_or("Did not find ports as an array")?;
    let mut profile = Vec::with_capacity(ports.len());
    for port in ports {
        let index = port["index"].as_u64().ok_or("port entry without index")?;
        let buffers = port["buffers"].as_u64().map(|v| v as u32);
        let size = port["size"].as_u64().map(|v| v as u32);
        profile.push((index as u32, buffers, size));
    }
    Ok(profile)
}

fn produce(port: Arc<Port>, args: Args) -> Result<usize, Box<dyn Error>> {
    let mut input = match &args.input {
        Some(path) => Some(File::open(path)?),
        None => None,
    };
    let interval = Duration::from_millis(args.frame_interval);
    let mut sent = 0;
    let mut frame = 0u32;
    loop {
        let data = match input.as_mut() {
            Some(file) => {
                let mut chunk = vec![0; args.frame_size];
                let len = file.read(&mut chunk)?;
                if len == 0 {
                    break;
                }
                chunk.truncate(len);
                chunk
            }
            None if frame < args.frames => (0..args.frame_size)
                .map(|i| (i as u32 + frame) as u8)
                .collect(),
            None => break,
        };
        let mut buffer = Some(Buffer::from_vec(data).with_pts(Some(interval * frame)));
        while let Some(pending) = buffer.take() {
            let len = port.send(&Item::Buffer(pending.clone()))?;
            sent += len;
            buffer = pending.slice_from(len);
        }
        frame += 1;
    }
    port.send(&Item::Eos)?;
    info!("sent {} frames, {} bytes", frame, sent);
    Ok(sent)
}

fn consume(port: Arc<Port>, output: Option<&Path>, join: bool) -> Result<usize, Box<dyn Error>> {
    let mut writer = match output {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };
    let mut received = 0;
    let mut buffers = 0;
    loop {
        let item = match join {
            true => port.recv_frame()?,
            false => port.recv()?,
        };
        match item {
            Some(Item::Buffer(buffer)) => {
                debug!("received {:?}", buffer);
                let extra = buffer.transport().map(|t| t.extra()).unwrap_or_default();
                if let Some(writer) = writer.as_mut() {
                    writer.write_all(buffer.as_slice())?;
                    for part in &extra {
                        writer.write_all(part.as_slice())?;
                    }
                }
                received += buffer.len() + extra.iter().map(|t| t.len()).sum::<usize>();
                buffers += 1;
            }
            Some(Item::Eos) => {
                debug!("end of stream");
                break;
            }
            None => {
                warn!("output port stopped before end of stream");
                break;
            }
        }
    }
    if let Some(mut writer) = writer {
        writer.flush()?;
    }
    info!("received {} buffers, {} bytes", buffers, received);
    Ok(received)
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    if args.library == "loopback" {
        registry::provide(
            "loopback",
            Arc::new(LoopbackImplementation::new(LoopbackConfig {
                input_size: args.frame_size as u32,
                output_size: args.frame_size as u32,
                ..Default::default()
            })),
        );
    }

    let core = Core::new(CoreConfig::from(&args));
    core.init()?;
    let input = core.get_port("in", args.input_port);
    let output = core.get_port("out", args.output_port);

    if let Some(path) = &args.profile {
        let profile = load_profile(path)?;
        let configurator: Arc<dyn PortConfigurator> =
            Arc::new(move |core: &Core| -> edgefirst_omx::Result<()> {
                for (index, buffers, size) in &profile {
                    let mut definition = core.port_definition(*index)?;
                    if let Some(buffers) = buffers {
                        definition.buffer_count_actual = *buffers;
                    }
                    if let Some(size) = size {
                        definition.buffer_size = *size;
                    }
                    core.set_port_definition(&definition)?;
                }
                Ok(())
            });
        core.set_configurator(Some(configurator));
    }

    match args.input_memory {
        InputMemory::Component => {}
        InputMemory::Heap => input.set_allocation(Allocation::Host),
        InputMemory::Dma => {
            input.set_allocation(Allocation::Host);
            input.set_memory_provider(Arc::new(DmaAllocator::new(DmaHeap::Cma)));
        }
    }
    if args.zero_copy {
        output.set_copy_mode(CopyMode::Share);
    }
    core.on_settings_changed(|core, port| {
        match core.port_definition(port) {
            Ok(definition) => info!(
                "port {} settings changed: {} x {} bytes",
                port, definition.buffer_count_actual, definition.buffer_size
            ),
            Err(err) => warn!("port {} settings changed: {}", port, err),
        }
    });

    let now = Instant::now();
    core.prepare()?;
    core.start()?;
    info!("{} executing after {:?}", args.component, now.elapsed());

    let consumer = {
        let output = output.clone();
        let path = args.output.clone();
        let join = args.join_frames;
        tokio::task::spawn_blocking(move || {
            consume(output, path.as_deref(), join).map_err(|err| err.to_string())
        })
    };
    let producer = {
        let input = input.clone();
        let args = args.clone();
        tokio::task::spawn_blocking(move || produce(input, args).map_err(|err| err.to_string()))
    };

    let sent = producer.await?;
    if let Err(err) = &sent {
        error!("producer: {}", err);
        output.pause();
    }
    let received = consumer.await??;
    info!("processed {} bytes in {:?}", received, now.elapsed());

    core.stop()?;
    core.unload()?;
    core.deinit();
    sent?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;
    runtime.block_on(run(args))
}

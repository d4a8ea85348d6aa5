// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod common;

use common::{eventually, frame, Fixture};
use edgefirst_omx::{
    buffer::{Buffer, Item, TICKS_NONE},
    component::{Command, Component},
    error::{Error, ErrorCode},
    loopback::{LoopbackConfig, INPUT_PORT, OUTPUT_PORT},
    port::{Allocation, CopyMode, Port},
    registry,
};
use serial_test::serial;
use std::{
    error::Error as StdError,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

fn recv_buffer(port: &Port) -> Result<Buffer, Box<dyn StdError>> {
    match port.recv()? {
        Some(Item::Buffer(buffer)) => Ok(buffer),
        other => Err(format!("expected a buffer, got {:?}", other.map(|i| i.is_eos())).into()),
    }
}

#[test]
#[serial]
fn test_copy_round_trip() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-copy", LoopbackConfig::default())?;
    fx.run()?;

    let pts = Duration::from_millis(33);
    let sent = fx
        .input
        .send(&Item::Buffer(Buffer::from_vec(frame(1000, 7)).with_pts(Some(pts))))?;
    assert_eq!(sent, 1000);

    let buffer = recv_buffer(&fx.output)?;
    assert_eq!(buffer.as_slice(), frame(1000, 7).as_slice());
    assert_eq!(buffer.pts(), Some(pts));
    assert!(buffer.transport().is_none());
    assert!(eventually(|| fx.output.outstanding() == 4));

    fx.input.send(&Item::Eos)?;
    assert!(matches!(fx.output.recv()?, Some(Item::Eos)));
    assert!(fx.output.recv()?.is_none());

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_oversized_buffer_is_split() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-split", LoopbackConfig::default())?;
    fx.run()?;

    let data = frame(6000, 0);
    let buffer = Buffer::from_vec(data.clone());
    assert_eq!(fx.input.send(&Item::Buffer(buffer.clone()))?, 4096);
    let rest = buffer.slice_from(4096).ok_or("nothing left")?;
    assert_eq!(rest.len(), 1904);
    assert_eq!(fx.input.send(&Item::Buffer(rest))?, 1904);

    let first = recv_buffer(&fx.output)?;
    let second = recv_buffer(&fx.output)?;
    assert_eq!(first.as_slice(), &data[..4096]);
    assert_eq!(second.as_slice(), &data[4096..]);

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_component_splits_into_small_outputs() -> Result<(), Box<dyn StdError>> {
    let config = LoopbackConfig {
        output_size: 1024,
        ..Default::default()
    };
    let fx = Fixture::new("port-small", config)?;
    fx.run()?;

    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(3000, 9))))?;
    fx.input.send(&Item::Eos)?;

    let mut received = Vec::new();
    while let Some(item) = fx.output.recv()? {
        match item {
            Item::Buffer(buffer) => received.push(buffer.as_slice().to_vec()),
            Item::Eos => break,
        }
    }
    assert_eq!(
        received.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![1024, 1024, 952]
    );
    assert_eq!(received.concat(), frame(3000, 9));

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_codec_config_passthrough() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-codec", LoopbackConfig::default())?;
    fx.output.set_copy_mode(CopyMode::Share);
    fx.run()?;

    let header = [0u8, 0, 0, 1, 0x67, 0x42];
    fx.input.send(&Item::Buffer(Buffer::codec_config(&header)))?;
    let buffer = recv_buffer(&fx.output)?;
    assert!(buffer.is_codec_config());
    assert_eq!(buffer.as_slice(), &header);
    // Codec data is always copied out, even in share mode.
    assert!(buffer.transport().is_none());

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_wrong_direction() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-direction", LoopbackConfig::default())?;
    fx.run()?;

    assert!(matches!(
        fx.output.send(&Item::Eos),
        Err(Error::WrongDirection(1))
    ));
    assert!(matches!(fx.input.recv(), Err(Error::WrongDirection(0))));

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_flush_discards_stale_buffers() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-flush", LoopbackConfig::default())?;
    fx.run()?;
    let loopback = fx.loopback();

    loopback.set_hold(true)?;
    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(100, 1))))?;
    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(100, 2))))?;
    assert!(eventually(|| loopback.held() == (2, 4)));

    fx.core.flush_start();
    fx.core.flush_stop()?;
    assert_eq!(loopback.held(), (0, 0));
    assert_eq!(fx.input.queued(), 4);
    assert_eq!(fx.output.queued(), 4);
    assert_eq!(fx.output.ignore_count(), 4);
    assert_eq!(fx.input.ignore_count(), 0);

    loopback.set_hold(false)?;
    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(100, 3))))?;
    let buffer = recv_buffer(&fx.output)?;
    assert_eq!(buffer.as_slice(), frame(100, 3).as_slice());
    assert_eq!(fx.output.ignore_count(), 0);

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_flush_resets_eos() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-flush-eos", LoopbackConfig::default())?;
    fx.run()?;

    fx.input.send(&Item::Eos)?;
    assert!(matches!(fx.output.recv()?, Some(Item::Eos)));
    assert!(fx.output.recv()?.is_none());

    fx.core.flush_start();
    fx.core.flush_stop()?;

    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(16, 4))))?;
    let buffer = recv_buffer(&fx.output)?;
    assert_eq!(buffer.as_slice(), frame(16, 4).as_slice());

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_disable_enable_output() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-enable", LoopbackConfig::default())?;
    fx.run()?;

    fx.output.disable()?;
    assert!(!fx.output.is_enabled());
    assert!(!fx.output.is_allocated());
    assert_eq!(fx.output.outstanding(), 0);
    assert!(fx.output.recv()?.is_none());

    fx.output.enable()?;
    assert!(fx.output.is_enabled());
    assert!(fx.output.is_allocated());
    assert_eq!(fx.output.outstanding(), 4);

    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(256, 5))))?;
    let buffer = recv_buffer(&fx.output)?;
    assert_eq!(buffer.as_slice(), frame(256, 5).as_slice());

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_disable_enable_twice() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-enable-twice", LoopbackConfig::default())?;
    fx.run()?;

    fx.output.enable()?;
    assert_eq!(fx.output.outstanding(), 4);
    assert_eq!(fx.output.headers().len(), 4);

    fx.output.disable()?;
    fx.output.disable()?;
    assert!(!fx.output.is_enabled());
    assert!(!fx.output.is_allocated());
    assert_eq!(fx.loopback().held(), (0, 0));

    fx.output.enable()?;
    fx.output.enable()?;
    assert!(fx.output.is_enabled());
    assert_eq!(fx.output.headers().len(), 4);
    assert_eq!(fx.output.outstanding(), 4);

    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(48, 6))))?;
    assert_eq!(recv_buffer(&fx.output)?.as_slice(), frame(48, 6).as_slice());

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_rejected_submit_keeps_header() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-rejected", LoopbackConfig::default())?;
    fx.run()?;
    let loopback = fx.loopback();

    // Disabled behind the port's back, the component refuses every buffer.
    loopback.send_command(Command::PortDisable(INPUT_PORT))?;
    assert!(eventually(|| fx
        .core
        .port_definition(INPUT_PORT)
        .map(|d| !d.enabled)
        .unwrap_or(false)));
    assert!(matches!(
        fx.input.send(&Item::Buffer(Buffer::from_vec(frame(8, 0)))),
        Err(Error::Component(ErrorCode::INCORRECT_STATE_OPERATION))
    ));
    assert_eq!(fx.input.queued(), 4);
    assert_eq!(fx.input.outstanding(), 0);

    loopback.send_command(Command::PortDisable(OUTPUT_PORT))?;
    assert!(eventually(|| fx.output.queued() == 4));
    assert!(matches!(
        fx.output.recv(),
        Err(Error::Component(ErrorCode::INCORRECT_STATE_OPERATION))
    ));
    assert_eq!(fx.output.queued(), 4);
    assert_eq!(fx.output.outstanding(), 0);
    assert_eq!(fx.output.headers().len(), 4);

    fx.core.deinit();
    registry::withdraw(&fx.library);
    Ok(())
}

#[test]
#[serial]
fn test_eos_with_data() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-eos-data", LoopbackConfig::default())?;
    fx.run()?;

    fx.loopback().end_stream_on_next()?;
    fx.input
        .send(&Item::Buffer(Buffer::from_vec(frame(200, 3))))?;
    fx.core.wait_for_done()?;

    let buffer = recv_buffer(&fx.output)?;
    assert_eq!(buffer.as_slice(), frame(200, 3).as_slice());
    assert!(matches!(fx.output.recv()?, Some(Item::Eos)));
    assert!(fx.output.recv()?.is_none());

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_recv_frame_copies_parts() -> Result<(), Box<dyn StdError>> {
    let config = LoopbackConfig {
        output_size: 1024,
        ..Default::default()
    };
    let fx = Fixture::new("port-frame-copy", config)?;
    fx.run()?;

    let pts = Duration::from_millis(66);
    fx.input
        .send(&Item::Buffer(Buffer::from_vec(frame(3000, 4)).with_pts(Some(pts))))?;
    fx.input.send(&Item::Eos)?;

    let buffer = match fx.output.recv_frame()? {
        Some(Item::Buffer(buffer)) => buffer,
        other => return Err(format!("expected a frame, got {:?}", other).into()),
    };
    assert_eq!(buffer.as_slice(), frame(3000, 4).as_slice());
    assert_eq!(buffer.pts(), Some(pts));
    assert!(buffer.transport().is_none());
    assert!(matches!(fx.output.recv_frame()?, Some(Item::Eos)));
    assert!(fx.output.recv_frame()?.is_none());

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_recv_frame_attaches_parts() -> Result<(), Box<dyn StdError>> {
    let config = LoopbackConfig {
        output_size: 1024,
        ..Default::default()
    };
    let fx = Fixture::new("port-frame-share", config)?;
    fx.output.set_copy_mode(CopyMode::Share);
    fx.run()?;

    fx.input
        .send(&Item::Buffer(Buffer::from_vec(frame(3000, 5))))?;
    let buffer = match fx.output.recv_frame()? {
        Some(Item::Buffer(buffer)) => buffer,
        other => return Err(format!("expected a frame, got {:?}", other).into()),
    };
    let transport = buffer.transport().ok_or("not zero-copy")?.clone();
    let extra = transport.extra();
    assert_eq!(buffer.len(), 1024);
    assert_eq!(extra.iter().map(|t| t.len()).collect::<Vec<_>>(), vec![1024, 952]);
    assert_eq!(transport.total_len(), 3000);

    let mut joined = buffer.as_slice().to_vec();
    for part in &extra {
        joined.extend_from_slice(part.as_slice());
    }
    assert_eq!(joined, frame(3000, 5));
    assert_eq!(fx.output.outstanding(), 1);

    assert!(matches!(
        transport.attach(transport.clone()),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        extra[0].attach(transport.clone()),
        Err(Error::InvalidArgument(_))
    ));

    // Every part goes back once the composite is dropped.
    drop(extra);
    drop(transport);
    assert_eq!(fx.output.outstanding(), 1);
    drop(buffer);
    assert_eq!(fx.output.outstanding(), 4);

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_timestamps_disabled() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::with_core("port-no-pts", LoopbackConfig::default(), |mut core| {
        core.use_timestamps = false;
        core
    })?;
    fx.run()?;
    for header in fx.input.headers() {
        header.lock().timestamp = 1234;
    }

    for seed in 0..4u8 {
        let buffer = Buffer::from_vec(frame(32, seed)).with_pts(Some(Duration::from_secs(1)));
        fx.input.send(&Item::Buffer(buffer))?;
        assert_eq!(recv_buffer(&fx.output)?.pts(), None);
    }
    assert!(eventually(|| fx.input.queued() == 4));
    assert!(fx
        .input
        .headers()
        .iter()
        .all(|h| h.timestamp() == TICKS_NONE));

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_send_on_disabled_port() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-disabled", LoopbackConfig::default())?;
    fx.run()?;

    fx.input.disable()?;
    assert!(matches!(
        fx.input.send(&Item::Buffer(Buffer::from_vec(frame(8, 0)))),
        Err(Error::PortDisabled(0))
    ));

    fx.input.enable()?;
    assert_eq!(fx.input.queued(), 4);
    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(8, 0))))?;
    assert_eq!(recv_buffer(&fx.output)?.len(), 8);

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_zero_copy_output() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-share", LoopbackConfig::default())?;
    fx.output.set_copy_mode(CopyMode::Share);
    fx.run()?;

    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(512, 6))))?;
    let buffer = recv_buffer(&fx.output)?;
    assert_eq!(buffer.as_slice(), frame(512, 6).as_slice());
    let transport = buffer.transport().ok_or("not zero-copy")?.clone();
    assert!(transport.is_live());
    assert_eq!(fx.output.outstanding(), 3);

    // The header returns to the component with the last reference.
    let view = buffer.slice_from(100).ok_or("empty view")?;
    drop(buffer);
    drop(transport);
    assert_eq!(fx.output.outstanding(), 3);
    assert_eq!(view.as_slice(), &frame(512, 6)[100..]);
    drop(view);
    assert_eq!(fx.output.outstanding(), 4);

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_transport_outlives_pool() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-outlive", LoopbackConfig::default())?;
    fx.output.set_copy_mode(CopyMode::Share);
    fx.run()?;

    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(64, 8))))?;
    let buffer = recv_buffer(&fx.output)?;

    fx.core.stop()?;
    fx.core.unload()?;
    assert!(!fx.output.is_allocated());
    let transport = buffer.transport().ok_or("not zero-copy")?;
    assert!(!transport.is_live());
    drop(buffer);

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_zero_copy_chain() -> Result<(), Box<dyn StdError>> {
    let upstream = Fixture::new("port-chain-up", LoopbackConfig::default())?;
    let downstream = Fixture::new("port-chain-down", LoopbackConfig::default())?;

    upstream.output.set_copy_mode(CopyMode::Share);
    upstream.core.prepare()?;
    downstream
        .input
        .use_shared_memory(upstream.output.shared_memory());
    downstream.core.prepare()?;
    assert_eq!(downstream.input.allocation(), Allocation::Host);
    assert_eq!(downstream.input.copy_mode(), CopyMode::Share);
    upstream.core.start()?;
    downstream.core.start()?;
    assert_eq!(downstream.input.queued(), 0);

    for seed in 0..8u8 {
        upstream
            .input
            .send(&Item::Buffer(Buffer::from_vec(frame(300, seed))))?;
        let shared = recv_buffer(&upstream.output)?;
        assert!(shared.transport().is_some());
        assert_eq!(downstream.input.send(&Item::Buffer(shared))?, 300);

        let copied = recv_buffer(&downstream.output)?;
        assert_eq!(copied.as_slice(), frame(300, seed).as_slice());
    }
    assert!(eventually(|| upstream.output.outstanding() == 4));

    downstream.input.send(&Item::Eos)?;
    assert!(matches!(downstream.output.recv()?, Some(Item::Eos)));

    downstream.teardown()?;
    upstream.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_host_memory() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-host", LoopbackConfig::default())?;
    fx.input.set_allocation(Allocation::Host);
    fx.run()?;
    assert_eq!(fx.input.headers().len(), 4);

    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(128, 2))))?;
    assert_eq!(recv_buffer(&fx.output)?.as_slice(), frame(128, 2).as_slice());

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_pipeline_allocator() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("port-allocator", LoopbackConfig::default())?;
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        fx.output.set_allocator(Some(Arc::new(
            move |_: &Port, size: usize| -> edgefirst_omx::Result<Vec<u8>> {
                calls.fetch_add(1, Ordering::AcqRel);
                Ok(vec![0; size])
            },
        )));
    }
    fx.run()?;
    assert_eq!(calls.load(Ordering::Acquire), 1);

    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(40, 1))))?;
    assert_eq!(recv_buffer(&fx.output)?.len(), 40);
    assert_eq!(calls.load(Ordering::Acquire), 2);

    fx.teardown()?;
    Ok(())
}

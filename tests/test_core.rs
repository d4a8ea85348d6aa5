// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod common;

use common::{eventually, frame, Fixture, WAIT};
use edgefirst_omx::{
    buffer::{Buffer, Item},
    component::{Event, State},
    core::{Core, CoreConfig, WaitPolicy},
    error::{Error, ErrorCode},
    loopback::{LoopbackConfig, LoopbackImplementation, COMPONENT_NAME, OUTPUT_PORT},
    registry,
};
use omx_sys as sys;
use serial_test::serial;
use std::{
    error::Error as StdError,
    mem::zeroed,
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

#[test]
#[serial]
fn test_lifecycle() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("core-lifecycle", LoopbackConfig::default())?;
    assert_eq!(fx.core.state(), State::Loaded);
    assert_eq!(registry::client_count("core-lifecycle"), 1);

    fx.core.prepare()?;
    assert_eq!(fx.core.state(), State::Idle);
    assert_eq!(fx.input.num_buffers(), 4);
    assert!(fx.output.is_allocated());

    fx.core.start()?;
    assert_eq!(fx.core.state(), State::Executing);
    fx.core.pause()?;
    assert_eq!(fx.core.state(), State::Pause);
    fx.core.start()?;
    assert_eq!(fx.core.state(), State::Executing);
    assert_eq!(fx.output.outstanding(), 4);

    fx.core.stop()?;
    assert_eq!(fx.core.state(), State::Idle);
    fx.core.unload()?;
    assert_eq!(fx.core.state(), State::Loaded);
    assert!(!fx.output.is_allocated());

    fx.core.deinit();
    assert_eq!(fx.core.state(), State::Invalid);
    assert_eq!(registry::client_count("core-lifecycle"), 0);
    fx.core.deinit();
    assert_eq!(fx.imp.deinit_count(), 1);
    registry::withdraw("core-lifecycle");
    Ok(())
}

#[test]
#[serial]
fn test_restart_after_stop() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("core-restart", LoopbackConfig::default())?;
    fx.run()?;
    fx.core.stop()?;
    assert_eq!(fx.input.queued(), 4);
    assert_eq!(fx.output.queued(), 4);

    fx.core.start()?;
    assert_eq!(fx.input.queued(), 4);
    assert_eq!(fx.output.queued(), 0);
    assert_eq!(fx.output.outstanding(), 4);

    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(64, 3))))?;
    let item = fx.output.recv()?.and_then(Item::into_buffer);
    assert_eq!(item.map(|b| b.as_slice().to_vec()), Some(frame(64, 3)));
    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_prepare_start_primes_ports() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("core-prime", LoopbackConfig::default())?;
    fx.run()?;

    assert_eq!(fx.output.outstanding(), 4);
    assert_eq!(fx.output.queued(), 0);
    assert_eq!(fx.input.queued(), 4);
    assert_eq!(fx.input.outstanding(), 0);
    assert!(eventually(|| fx.loopback().held() == (0, 4)));

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_state_timeout() -> Result<(), Box<dyn StdError>> {
    let imp = Arc::new(LoopbackImplementation::default());
    registry::provide("core-timeout", imp.clone());
    let core = Core::new(
        CoreConfig::new("core-timeout", COMPONENT_NAME).with_wait(WaitPolicy {
            state_timeout: Some(Duration::from_millis(50)),
            command_timeout: Some(Duration::from_millis(50)),
        }),
    );
    core.init()?;
    core.get_port("in", 0);
    core.get_port("out", 1);
    imp.component().ok_or("no component")?.set_unresponsive(true);

    match core.prepare() {
        Err(Error::StateTimeout { expected, actual }) => {
            assert_eq!(expected, State::Idle);
            assert_eq!(actual, State::Loaded);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(core.state(), State::Loaded);

    core.deinit();
    registry::withdraw("core-timeout");
    Ok(())
}

#[test]
#[serial]
fn test_fatal_error_unblocks_recv() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("core-fatal", LoopbackConfig::default())?;
    fx.run()?;

    let waiter = {
        let output = fx.output.clone();
        thread::spawn(move || output.recv())
    };
    thread::sleep(Duration::from_millis(100));
    fx.loopback().raise(Event::Error(ErrorCode::HARDWARE))?;

    match waiter.join() {
        Ok(Ok(None)) => {}
        other => panic!("blocked recv returned {:?}", other.map(|r| r.is_ok())),
    }
    assert_eq!(fx.core.error(), Some(ErrorCode::HARDWARE));
    assert!(matches!(
        fx.output.recv(),
        Err(Error::Component(ErrorCode::HARDWARE))
    ));
    assert!(matches!(
        fx.input.send(&Item::Eos),
        Err(Error::Component(ErrorCode::HARDWARE))
    ));
    assert!(matches!(
        fx.core.change_state(State::Idle),
        Err(Error::Component(ErrorCode::HARDWARE))
    ));

    fx.core.deinit();
    registry::withdraw("core-fatal");
    Ok(())
}

#[test]
#[serial]
fn test_fatal_error_unblocks_send() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("core-fatal-send", LoopbackConfig::default())?;
    fx.run()?;
    let loopback = fx.loopback();

    loopback.set_hold(true)?;
    for seed in 0..4u8 {
        fx.input
            .send(&Item::Buffer(Buffer::from_vec(frame(16, seed))))?;
    }
    assert!(eventually(|| loopback.held() == (4, 4)));
    assert_eq!(fx.input.queued(), 0);

    let waiter = {
        let input = fx.input.clone();
        thread::spawn(move || input.send(&Item::Buffer(Buffer::from_vec(frame(16, 9)))))
    };
    thread::sleep(Duration::from_millis(100));
    loopback.raise(Event::Error(ErrorCode::HARDWARE))?;

    match waiter.join() {
        Ok(Err(Error::Component(ErrorCode::HARDWARE))) => {}
        other => panic!("blocked send returned {:?}", other.map(|r| r.is_ok())),
    }

    fx.core.deinit();
    registry::withdraw(&fx.library);
    Ok(())
}

#[test]
#[serial]
fn test_fatal_error_unblocks_flush() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("core-fatal-flush", LoopbackConfig::default())?;
    fx.run()?;
    let loopback = fx.loopback();
    loopback.set_unresponsive(true);

    fx.core.flush_start();
    let waiter = {
        let core = fx.core.clone();
        thread::spawn(move || core.flush_stop())
    };
    thread::sleep(Duration::from_millis(100));
    loopback.raise(Event::Error(ErrorCode::HARDWARE))?;

    match waiter.join() {
        Ok(Err(Error::Component(ErrorCode::HARDWARE))) => {}
        other => panic!("blocked flush returned {:?}", other.map(|r| r.is_ok())),
    }

    fx.core.deinit();
    registry::withdraw(&fx.library);
    Ok(())
}

#[test]
#[serial]
fn test_fatal_error_unblocks_disable() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("core-fatal-disable", LoopbackConfig::default())?;
    fx.run()?;
    let loopback = fx.loopback();
    loopback.set_unresponsive(true);

    let waiter = {
        let output = fx.output.clone();
        thread::spawn(move || output.disable())
    };
    thread::sleep(Duration::from_millis(100));
    loopback.raise(Event::Error(ErrorCode::HARDWARE))?;

    match waiter.join() {
        Ok(Err(Error::Component(ErrorCode::HARDWARE))) => {}
        other => panic!("blocked disable returned {:?}", other.map(|r| r.is_ok())),
    }
    assert!(!fx.output.is_enabled());

    fx.core.deinit();
    registry::withdraw(&fx.library);
    Ok(())
}

#[test]
#[serial]
fn test_fatal_error_unblocks_enable() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("core-fatal-enable", LoopbackConfig::default())?;
    fx.run()?;
    let loopback = fx.loopback();
    fx.output.disable()?;
    loopback.set_unresponsive(true);

    let waiter = {
        let output = fx.output.clone();
        thread::spawn(move || output.enable())
    };
    thread::sleep(Duration::from_millis(100));
    loopback.raise(Event::Error(ErrorCode::HARDWARE))?;

    match waiter.join() {
        Ok(Err(Error::Component(ErrorCode::HARDWARE))) => {}
        other => panic!("blocked enable returned {:?}", other.map(|r| r.is_ok())),
    }
    assert!(!fx.output.is_enabled());

    fx.core.deinit();
    registry::withdraw(&fx.library);
    Ok(())
}

#[test]
#[serial]
fn test_stream_corrupt_is_ignored() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("core-corrupt", LoopbackConfig::default())?;
    fx.run()?;
    fx.loopback().raise(Event::Error(ErrorCode::STREAM_CORRUPT))?;

    fx.input.send(&Item::Buffer(Buffer::from_vec(frame(32, 1))))?;
    assert!(fx.output.recv()?.is_some());
    assert_eq!(fx.core.error(), None);

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_settings_changed_callback() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("core-settings", LoopbackConfig::default())?;
    let (tx, rx) = mpsc::channel();
    {
        let tx = tx.clone();
        fx.core.on_settings_changed(move |core, port| {
            let size = core.port_definition(port).map(|d| d.buffer_size).ok();
            let _ = tx.send((port, size));
        });
    }
    fx.core
        .on_index_settings_changed(move |_, data1, data2| {
            let _ = tx.send((data1, Some(data2)));
        });
    fx.run()?;

    fx.loopback().change_output(4, 8192)?;
    assert_eq!(rx.recv_timeout(WAIT)?, (OUTPUT_PORT, Some(8192)));

    fx.loopback().raise(Event::IndexSettingChanged(1, 7))?;
    assert_eq!(rx.recv_timeout(WAIT)?, (1, Some(7)));

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_wait_for_done() -> Result<(), Box<dyn StdError>> {
    let fx = Fixture::new("core-done", LoopbackConfig::default())?;
    fx.run()?;

    fx.input.send(&Item::Eos)?;
    fx.core.wait_for_done()?;
    assert!(matches!(fx.output.recv()?, Some(Item::Eos)));

    fx.teardown()?;
    Ok(())
}

#[test]
#[serial]
fn test_registry_refcount() -> Result<(), Box<dyn StdError>> {
    let imp = Arc::new(LoopbackImplementation::default());
    registry::provide("core-shared", imp.clone());
    let first = Core::new(CoreConfig::new("core-shared", COMPONENT_NAME));
    let second = Core::new(CoreConfig::new("core-shared", COMPONENT_NAME));

    first.init()?;
    second.init()?;
    assert_eq!(imp.init_count(), 1);
    assert_eq!(registry::client_count("core-shared"), 2);

    first.deinit();
    assert_eq!(registry::client_count("core-shared"), 1);
    assert_eq!(imp.deinit_count(), 0);

    second.deinit();
    assert_eq!(registry::client_count("core-shared"), 0);
    assert_eq!(imp.deinit_count(), 1);

    first.init()?;
    assert_eq!(imp.init_count(), 2);
    first.deinit();
    assert_eq!(imp.deinit_count(), 2);

    registry::withdraw("core-shared");
    Ok(())
}

#[test]
#[serial]
fn test_missing_library_and_component() -> Result<(), Box<dyn StdError>> {
    let core = Core::new(CoreConfig::new("/nonexistent/libOmxCore.so", COMPONENT_NAME));
    assert!(matches!(core.init(), Err(Error::LibraryNotFound(_))));
    assert_eq!(core.state(), State::Invalid);
    assert!(core.component().is_err());

    let imp = Arc::new(LoopbackImplementation::default());
    registry::provide("core-missing", imp.clone());
    let core = Core::new(CoreConfig::new("core-missing", "OMX.nobody.decoder"));
    assert!(matches!(core.init(), Err(Error::ComponentNotFound(_))));
    assert_eq!(core.state(), State::Invalid);
    assert_eq!(registry::client_count("core-missing"), 0);
    assert_eq!(imp.init_count(), imp.deinit_count());

    registry::withdraw("core-missing");
    Ok(())
}

#[test]
#[serial]
fn test_role_and_parameters() -> Result<(), Box<dyn StdError>> {
    let imp = Arc::new(LoopbackImplementation::default());
    registry::provide("core-params", imp.clone());
    let core =
        Core::new(CoreConfig::new("core-params", COMPONENT_NAME).with_role("video_decoder.avc"));
    core.init()?;
    let loopback = imp.component().ok_or("no component")?;
    assert_eq!(loopback.role().as_deref(), Some("video_decoder.avc"));

    let mut role: sys::OMX_PARAM_COMPONENTROLETYPE = unsafe { zeroed() };
    role.cRole[..4].copy_from_slice(b"test");
    core.set_parameter(sys::OMX_IndexParamStandardComponentRole, &role)?;
    let read: sys::OMX_PARAM_COMPONENTROLETYPE =
        core.get_parameter(sys::OMX_IndexParamStandardComponentRole)?;
    assert_eq!(
        read.nSize,
        sys::struct_size::<sys::OMX_PARAM_COMPONENTROLETYPE>()
    );
    assert_eq!(read.nVersion, sys::OMX_VERSIONTYPE::spec());
    assert_eq!(&read.cRole[..5], b"test\0");

    assert!(matches!(
        core.get_config::<sys::OMX_PARAM_COMPONENTROLETYPE>(0x0700_0001),
        Err(Error::Component(ErrorCode::UNSUPPORTED_INDEX))
    ));

    core.deinit();
    registry::withdraw("core-params");
    Ok(())
}

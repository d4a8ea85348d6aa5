// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

#![allow(dead_code)]

use edgefirst_omx::{
    core::{Core, CoreConfig, WaitPolicy},
    loopback::{
        Loopback, LoopbackConfig, LoopbackImplementation, COMPONENT_NAME, INPUT_PORT, OUTPUT_PORT,
    },
    port::Port,
    registry, Result,
};
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Fixture {
    pub library: String,
    pub imp: Arc<LoopbackImplementation>,
    pub core: Core,
    pub input: Arc<Port>,
    pub output: Arc<Port>,
}

impl Fixture {
    /// Registers a loopback implementation as `library` and loads a core.
    pub fn new(library: &str, config: LoopbackConfig) -> Result<Fixture> {
        Fixture::with_core(library, config, |core| core)
    }

    /// Like [`Fixture::new`] with `configure` applied to the core settings.
    pub fn with_core(
        library: &str,
        config: LoopbackConfig,
        configure: impl FnOnce(CoreConfig) -> CoreConfig,
    ) -> Result<Fixture> {
        let imp = Arc::new(LoopbackImplementation::new(config));
        registry::provide(library, imp.clone());
        let core = Core::new(configure(
            CoreConfig::new(library, COMPONENT_NAME).with_wait(WaitPolicy {
                state_timeout: Some(WAIT),
                command_timeout: Some(WAIT),
            }),
        ));
        core.init()?;
        let input = core.get_port("in", INPUT_PORT);
        let output = core.get_port("out", OUTPUT_PORT);
        Ok(Fixture {
            library: library.to_owned(),
            imp,
            core,
            input,
            output,
        })
    }

    pub fn loopback(&self) -> Arc<Loopback> {
        self.imp.component().expect("loopback component alive")
    }

    pub fn run(&self) -> Result<()> {
        self.core.prepare()?;
        self.core.start()
    }

    pub fn teardown(self) -> Result<()> {
        self.core.stop()?;
        self.core.unload()?;
        self.core.deinit();
        registry::withdraw(&self.library);
        Ok(())
    }
}

/// Polls `check` until it holds or [`WAIT`] elapses.
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    check()
}

pub fn frame(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_add(seed)).collect()
}

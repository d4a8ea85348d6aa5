// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Process-wide implementation registry.
//!
//! Implementations are looked up by library name. In-process implementations
//! registered with [`provide`] take precedence; any other name is opened as
//! an OpenMAX IL core shared library. An implementation is initialized when
//! its first client acquires it and deinitialized when the last
//! [`ImpHandle`] is dropped.

use crate::{component::Implementation, error::Result, ffi::OmxImplementation};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, OnceLock},
};
use tracing::{debug, warn};

struct Entry {
    imp: Arc<dyn Implementation>,
    clients: usize,
}

#[derive(Default)]
struct Registry {
    providers: HashMap<String, Arc<dyn Implementation>>,
    loaded: HashMap<String, Entry>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

/// Registers an in-process implementation under `name`.
pub fn provide(name: &str, imp: Arc<dyn Implementation>) {
    let mut registry = registry().lock();
    if registry.loaded.contains_key(name) {
        warn!("{} is in use, new provider applies after release", name);
    }
    registry.providers.insert(name.to_owned(), imp);
}

/// Removes a provider registered with [`provide`].
pub fn withdraw(name: &str) -> bool {
    registry().lock().providers.remove(name).is_some()
}

/// Number of clients currently holding the implementation `name`.
pub fn client_count(name: &str) -> usize {
    registry()
        .lock()
        .loaded
        .get(name)
        .map(|entry| entry.clients)
        .unwrap_or(0)
}

/// Acquires the implementation `name`, loading and initializing it on the
/// first acquisition.
pub fn acquire(name: &str) -> Result<ImpHandle> {
    let mut registry = registry().lock();
    if let Some(entry) = registry.loaded.get_mut(name) {
        entry.clients += 1;
        return Ok(ImpHandle {
            name: name.to_owned(),
            imp: entry.imp.clone(),
        });
    }

    let imp = match registry.providers.get(name) {
        Some(imp) => imp.clone(),
        None => {
            debug!("opening {}", name);
            Arc::new(OmxImplementation::open(name)?) as Arc<dyn Implementation>
        }
    };
    imp.init()?;
    debug!("{}: initialized", name);
    registry.loaded.insert(
        name.to_owned(),
        Entry {
            imp: imp.clone(),
            clients: 1,
        },
    );
    Ok(ImpHandle {
        name: name.to_owned(),
        imp,
    })
}

fn release(name: &str) {
    let mut registry = registry().lock();
    let Some(entry) = registry.loaded.get_mut(name) else {
        warn!("{}: released more often than acquired", name);
        return;
    };
    entry.clients -= 1;
    if entry.clients == 0 {
        if let Some(entry) = registry.loaded.remove(name) {
            entry.imp.deinit();
            debug!("{}: deinitialized", name);
        }
    }
}

/// A counted client reference to a loaded implementation.
pub struct ImpHandle {
    name: String,
    imp: Arc<dyn Implementation>,
}

impl ImpHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn implementation(&self) -> &Arc<dyn Implementation> {
        &self.imp
    }
}

impl Drop for ImpHandle {
    fn drop(&mut self) {
        release(&self.name);
    }
}

impl fmt::Debug for ImpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImpHandle").field("name", &self.name).finish()
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use edgefirst_omx::{
    buffer::{Buffer, Item},
    core::{Core, CoreConfig},
    loopback::{LoopbackConfig, LoopbackImplementation, COMPONENT_NAME},
    port::CopyMode,
    registry,
};
use std::sync::Arc;

fn loopback_core(library: &str, size: u32, copy_mode: CopyMode) -> Core {
    registry::provide(
        library,
        Arc::new(LoopbackImplementation::new(LoopbackConfig {
            input_size: size,
            output_size: size,
            ..Default::default()
        })),
    );
    let core = Core::new(CoreConfig::new(library, COMPONENT_NAME));
    core.init().unwrap();
    core.get_port("in", 0);
    core.get_port("out", 1).set_copy_mode(copy_mode);
    core.prepare().unwrap();
    core.start().unwrap();
    core
}

pub fn benchmark_round_trip(c: &mut Criterion) {
    let sizes = [4096u32, 65536, 1 << 20];
    let modes = [("copy", CopyMode::AlwaysCopy), ("share", CopyMode::Share)];

    for (name, mode) in modes.iter() {
        let mut group = c.benchmark_group(format!("round_trip/{}", name));
        for size in sizes.iter() {
            let library = format!("bench-{}-{}", name, size);
            let core = loopback_core(&library, *size, *mode);
            let input = core.port(0).unwrap();
            let output = core.port(1).unwrap();
            let item = Item::Buffer(Buffer::from_vec(vec![0x5a; *size as usize]));

            group.throughput(Throughput::Bytes(*size as u64));
            group.bench_function(format!("{}", size), |b| {
                b.iter(|| {
                    input.send(&item).unwrap();
                    output.recv().unwrap().unwrap()
                })
            });

            core.stop().unwrap();
            core.unload().unwrap();
            core.deinit();
            registry::withdraw(&library);
        }
        group.finish();
    }
}

criterion_group!(benches, benchmark_round_trip);
criterion_main!(benches);

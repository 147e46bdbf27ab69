// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use datadog_fastdelta::{DeltaComputer, ValueType};
use datadog_pproflite::prost_impls::{
    Function, Label, Line, Location, Mapping, Profile, Sample, ValueType as ProstValueType,
};
use prost::Message;
use std::io;

const STACKS: u64 = 1000;
const DEPTH: u64 = 16;
const FUNCTIONS: u64 = 200;

/// A heap-profile-shaped input: many samples over a shared pool of
/// locations and functions, every value offset by `shift` so successive
/// snapshots differ at every tracked position.
fn profile(shift: i64) -> Profile {
    let mut strings: Vec<String> = vec![
        "".into(),
        "alloc_objects".into(),
        "count".into(),
        "alloc_space".into(),
        "bytes".into(),
        "/usr/local/bin/service".into(),
        "region".into(),
        "us-east-1".into(),
        "main.go".into(),
    ];
    let functions = (1..=FUNCTIONS)
        .map(|id| {
            strings.push(format!("github.com/acme/svc.func{id}"));
            Function {
                id,
                name: strings.len() as i64 - 1,
                system_name: strings.len() as i64 - 1,
                filename: 8,
                start_line: 0,
            }
        })
        .collect();
    let locations = (1..=STACKS * DEPTH)
        .map(|id| Location {
            id,
            mapping_id: 1,
            address: 0x40_0000 + id * 0x10,
            lines: vec![Line {
                function_id: id % FUNCTIONS + 1,
                line: (id % 500) as i64,
            }],
            is_folded: false,
        })
        .collect();
    let samples = (0..STACKS)
        .map(|stack| Sample {
            location_ids: (0..DEPTH).map(|depth| stack * DEPTH + depth + 1).collect(),
            values: vec![stack as i64 + shift, (stack as i64 + shift) * 512],
            labels: vec![Label {
                key: 6,
                str: 7,
                num: 0,
                num_unit: 0,
            }],
        })
        .collect();
    Profile {
        sample_types: vec![
            ProstValueType { r#type: 1, unit: 2 },
            ProstValueType { r#type: 3, unit: 4 },
        ],
        samples,
        mappings: vec![Mapping {
            id: 1,
            memory_start: 0x40_0000,
            memory_limit: 0x4000_0000,
            filename: 5,
            has_functions: true,
            ..Default::default()
        }],
        locations,
        functions,
        string_table: strings,
        time_nanos: 1_700_000_000_000_000_000,
        duration_nanos: 10_000_000_000,
        period_type: Some(ProstValueType { r#type: 3, unit: 4 }),
        period: 512 * 1024,
        ..Default::default()
    }
}

fn fields() -> Vec<ValueType> {
    vec![
        ValueType::new("alloc_objects", "count"),
        ValueType::new("alloc_space", "bytes"),
    ]
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let before = profile(1).encode_to_vec();
    let after = profile(100).encode_to_vec();

    let mut group = c.benchmark_group("delta");
    group.throughput(Throughput::Bytes(after.len() as u64));

    group.bench_function("first_call", |b| {
        b.iter_batched_ref(
            || DeltaComputer::new(&fields()),
            |computer| computer.delta(&before, &mut io::sink()).unwrap(),
            criterion::BatchSize::LargeInput,
        );
    });

    group.bench_function("steady_state", |b| {
        let mut computer = DeltaComputer::new(&fields());
        computer.delta(&before, &mut io::sink()).unwrap();
        computer.delta(&after, &mut io::sink()).unwrap();
        // every later call diffs `after` against itself; the table is
        // fully populated and no allocation should occur
        b.iter(|| computer.delta(&after, &mut io::sink()).unwrap());
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use dotrt::prelude::*;
use dotrt::typesystem::{FieldLayout, SizeAndAlignment};

fn mixed_fields(count: usize) -> Vec<SizeAndAlignment> {
    [(1, 1), (8, 8), (4, 4), (2, 2), (16, 8)]
        .iter()
        .cycle()
        .take(count)
        .map(|&(size, alignment)| SizeAndAlignment::new(size, alignment))
        .collect()
}

/// The pure layout pass over a wide field list.
fn bench_layout_fields(c: &mut Criterion) {
    let fields = mixed_fields(256);
    c.bench_function("layout_fields_256", |b| {
        b.iter(|| FieldLayout::layout_fields(black_box(16), 16, 8, 0, black_box(&fields)));
    });
    c.bench_function("layout_fields_256_packed", |b| {
        b.iter(|| FieldLayout::layout_fields(black_box(16), 16, 8, 1, black_box(&fields)));
    });
}

fn cell_runtime() -> Runtime {
    let mut builder = AotMetadataBuilder::new();
    let corlib = builder.with_corlib().unwrap();
    let game = builder.add_assembly("Game", [1, 0, 0, 0]).unwrap();
    let cell = builder
        .declare_type(game, "Game", "Cell`1", TypeAttributes::PUBLIC)
        .unwrap();
    builder
        .define_type(
            cell,
            TypeBody::class(&corlib)
                .generic(&["T"])
                .field(NewField::instance("value", RuntimeType::Var(0)))
                .field(NewField::instance("version", RuntimeType::I4)),
        )
        .unwrap();
    Runtime::new(Arc::new(builder.build().unwrap()), RuntimeConfig::default()).unwrap()
}

/// Instantiating and initializing a generic class, cold and interned.
fn bench_generic_class(c: &mut Criterion) {
    c.bench_function("generic_class_cold", |b| {
        b.iter_batched(
            cell_runtime,
            |runtime| {
                let def = runtime.metadata().find_type_by_name("Game", "Cell`1").unwrap();
                let id = runtime.generic_class(def, &[RuntimeType::I8]).unwrap();
                black_box(runtime.init_class(id).unwrap().instance_size())
            },
            BatchSize::SmallInput,
        );
    });

    let runtime = cell_runtime();
    let def = runtime.metadata().find_type_by_name("Game", "Cell`1").unwrap();
    runtime
        .init_class(runtime.generic_class(def, &[RuntimeType::I8]).unwrap())
        .unwrap();
    c.bench_function("generic_class_interned", |b| {
        b.iter(|| {
            let id = runtime.generic_class(def, black_box(&[RuntimeType::I8])).unwrap();
            black_box(runtime.init_class(id).unwrap().instance_size())
        });
    });
}

criterion_group!(benches, bench_layout_fields, bench_generic_class);
criterion_main!(benches);

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use dotrt::homologous::HomologousImage;
use dotrt::metadata::{
    raw::MetadataWriter,
    signatures::{SignatureEncoder, SignatureField, SignatureMethod, SignatureParameter, TypeSignature},
};
use dotrt::prelude::*;

const TYPES: u32 = 64;

/// `Bench.dll`: `TYPES` classes with two fields and one method each, plus a member reference to
/// every method.
fn bench_image() -> Vec<u8> {
    let field = SignatureEncoder::field(&SignatureField {
        modifiers: Vec::new(),
        base: TypeSignature::I4,
    })
    .unwrap();
    let add = SignatureEncoder::method(&SignatureMethod {
        has_this: true,
        explicit_this: false,
        calling_convention: 0,
        generic_param_count: 0,
        return_type: SignatureParameter::new(TypeSignature::I4),
        params: vec![SignatureParameter::new(TypeSignature::I4)],
        varargs: Vec::new(),
    })
    .unwrap();

    let mut w = MetadataWriter::new();
    w.add_module("Bench.dll").unwrap();
    w.add_assembly("Bench", [1, 0, 0, 0]).unwrap();
    let corlib = w.add_assembly_ref("System.Runtime", [8, 0, 0, 0]).unwrap();
    let object = w.add_type_ref(corlib, "System", "Object").unwrap();
    w.add_type_def(0, "", "<Module>", None).unwrap();

    let mut types = Vec::new();
    for i in 0..TYPES {
        let t = w
            .add_type_def(0x0010_0001, "Bench", &format!("Counter{i}"), Some(object))
            .unwrap();
        w.add_field(0x0006, "count", &field).unwrap();
        w.add_field(0x0006, "step", &field).unwrap();
        w.add_method(0x0086, 0, "Add", &add).unwrap();
        types.push(t);
    }
    for t in types {
        w.add_member_ref(t, "Add", &add).unwrap();
    }
    w.finish().unwrap()
}

fn bound(bytes: &[u8], config: RuntimeConfig) -> (Runtime, Arc<HomologousImage>) {
    let mut builder = AotMetadataBuilder::new();
    builder.with_corlib().unwrap();
    builder.import_image(&RawImage::parse(bytes.to_vec()).unwrap()).unwrap();
    let runtime = Runtime::new(Arc::new(builder.build().unwrap()), config).unwrap();
    let image = runtime.load_homologous_image(bytes.to_vec()).unwrap();
    (runtime, image)
}

/// Validating and binding an image, sequential and parallel.
fn bench_bind(c: &mut Criterion) {
    let bytes = bench_image();
    for (name, parallel) in [("bind_sequential", false), ("bind_parallel", true)] {
        let config = RuntimeConfig {
            parallel_validation: parallel,
            ..RuntimeConfig::default()
        };
        c.bench_function(name, |b| {
            b.iter_batched(
                || {
                    let mut builder = AotMetadataBuilder::new();
                    builder.with_corlib().unwrap();
                    builder
                        .import_image(&RawImage::parse(bytes.clone()).unwrap())
                        .unwrap();
                    Runtime::new(Arc::new(builder.build().unwrap()), config).unwrap()
                },
                |runtime| black_box(runtime.load_metadata_for_aot_assembly(bytes.clone())),
                BatchSize::SmallInput,
            );
        });
    }
}

/// Resolving every member reference, first through signature matching and then from the memo.
fn bench_member_refs(c: &mut Criterion) {
    let bytes = bench_image();
    let context = GenericContext::empty();

    c.bench_function("member_refs_cold", |b| {
        b.iter_batched(
            || bound(&bytes, RuntimeConfig::strict()),
            |(runtime, image)| {
                for row in 1..=TYPES {
                    let token = TableId::MemberRef.token(row);
                    black_box(runtime.get_method_info_from_token(&image, token, &context).unwrap());
                }
            },
            BatchSize::SmallInput,
        );
    });

    let (runtime, image) = bound(&bytes, RuntimeConfig::strict());
    c.bench_function("member_refs_memoized", |b| {
        b.iter(|| {
            for row in 1..=TYPES {
                let token = TableId::MemberRef.token(row);
                black_box(runtime.get_method_info_from_token(&image, token, &context).unwrap());
            }
        });
    });
}

criterion_group!(benches, bench_bind, bench_member_refs);
criterion_main!(benches);

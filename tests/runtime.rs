//! Class initialization, generic instantiation and objects over the imported `Game.dll`.

mod common;

use std::sync::Arc;

use common::*;
use dotrt::{
    metadata::aot::{AotMetadataBuilder, NewField, TypeBody},
    runtime::{ClassState, ClassStatus, FieldOffset, Runtime, RuntimeConfig},
    typesystem::{RuntimeType, TypeAttributes},
    Error, InitializationErrorKind,
};

fn offsets_from_origin(runtime: &Runtime, class: &dotrt::runtime::Class) -> Vec<u32> {
    let header = runtime.config().object_header_size();
    class
        .fields()
        .iter()
        .filter_map(|f| match f.offset {
            FieldOffset::Instance(offset) => Some(offset - header),
            _ => None,
        })
        .collect()
}

#[test]
fn byte_then_long_aligns_to_eight() {
    let mut builder = AotMetadataBuilder::new();
    let corlib = builder.with_corlib().unwrap();
    let game = builder.add_assembly("Game", [1, 0, 0, 0]).unwrap();
    let t = builder
        .declare_type(game, "Game", "Tagged", TypeAttributes::PUBLIC)
        .unwrap();
    builder
        .define_type(
            t,
            TypeBody::value_type(&corlib)
                .field(NewField::instance("tag", RuntimeType::U1))
                .field(NewField::instance("payload", RuntimeType::I8)),
        )
        .unwrap();
    let runtime = Runtime::new(Arc::new(builder.build().unwrap()), RuntimeConfig::default()).unwrap();

    let id = runtime.class_from_name("Game", "Tagged").unwrap();
    let class = runtime.init_class(id).unwrap();
    assert_eq!(offsets_from_origin(&runtime, class), vec![0, 8]);
    assert_eq!(runtime.get_value_size(id).unwrap(), (16, 8));
}

#[test]
fn imported_value_type_lays_out() {
    let runtime = game_runtime(RuntimeConfig::default());
    let vec2 = runtime.class_from_name("Game", "Vec2").unwrap();
    let class = runtime.init_class(vec2).unwrap();
    assert!(class.is_value_type());
    assert_eq!(offsets_from_origin(&runtime, class), vec![0, 4]);
    assert_eq!(runtime.get_value_size(vec2).unwrap(), (8, 4));

    let player = runtime.class_from_name("Game", "Player").unwrap();
    let player = runtime.init_class(player).unwrap();
    assert_eq!(player.state(), ClassState::Initialized);
    // the embedded Vec2 comes first, the string needs pointer alignment
    assert_eq!(offsets_from_origin(&runtime, player), vec![0, 8, 16]);
}

#[test]
fn concurrent_instantiation_shares_one_descriptor() {
    let runtime = game_runtime(RuntimeConfig::default());
    let box_def = runtime.metadata().find_type_by_name("Game", "Box`1").unwrap();

    // warm everything Box<int> depends on so only its own layout is counted
    runtime.init_class(runtime.class_from_typedef(box_def).unwrap()).unwrap();
    runtime.init_class(runtime.class_from_type(&RuntimeType::I4).unwrap()).unwrap();
    let before = runtime.stats();

    let ids: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    let id = runtime.generic_class(box_def, &[RuntimeType::I4]).unwrap();
                    runtime.init_class(id).unwrap();
                    id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    let after = runtime.stats();
    assert_eq!(after.generic_classes, before.generic_classes + 1);
    assert_eq!(after.layouts, before.layouts + 1);

    let class = runtime.class(ids[0]).unwrap();
    assert_eq!(class.fields()[0].ty, RuntimeType::I4);
    assert_eq!(class.instance_size(), Some(24));
}

#[test]
fn nested_generics_stop_at_the_depth_cap() {
    let config = RuntimeConfig {
        max_generic_depth: 4,
        ..RuntimeConfig::default()
    };
    let runtime = game_runtime(config);
    let box_def = runtime.metadata().find_type_by_name("Game", "Box`1").unwrap();

    let mut ty = RuntimeType::I4;
    let mut last = Ok(());
    for _ in 0..8 {
        ty = RuntimeType::GenericInst {
            definition: box_def,
            args: dotrt::typesystem::GenericInst::new(vec![ty]),
        };
        match runtime.class_from_type(&ty) {
            Ok(_) => {}
            Err(error) => {
                last = Err(error);
                break;
            }
        }
    }
    assert!(matches!(last, Err(Error::MaximumNestedGenerics { .. })));
}

#[test]
fn self_embedding_terminates_with_sticky_error() {
    let mut builder = AotMetadataBuilder::new();
    let corlib = builder.with_corlib().unwrap();
    let game = builder.add_assembly("Game", [1, 0, 0, 0]).unwrap();
    let t = builder.declare_type(game, "Game", "Node", TypeAttributes::PUBLIC).unwrap();
    builder
        .define_type(
            t,
            TypeBody::value_type(&corlib).field(NewField::instance("next", RuntimeType::ValueType(t))),
        )
        .unwrap();
    let runtime = Runtime::new(Arc::new(builder.build().unwrap()), RuntimeConfig::default()).unwrap();

    let id = runtime.class_from_name("Game", "Node").unwrap();
    assert!(matches!(runtime.init_class(id), Err(Error::ExecutionEngine(_))));
    let class = runtime.class(id).unwrap();
    assert_eq!(class.state(), ClassState::InitializedWithError);
    assert_eq!(
        class.initialization_error().unwrap().kind,
        InitializationErrorKind::ExecutionEngine
    );

    // the failure is replayed, not recomputed
    assert!(matches!(runtime.try_class(id).unwrap(), ClassStatus::Failed(_)));
    assert!(matches!(runtime.allocate(id), Err(Error::ExecutionEngine(_))));
    assert_eq!(runtime.stats().failed_classes, 1);
}

#[test]
fn objects_store_field_values() {
    let runtime = game_runtime(RuntimeConfig::default());
    let player = runtime.class_from_name("Game", "Player").unwrap();
    let object = runtime.allocate(player).unwrap();

    let score = runtime.get_field_from_name(player, "val").unwrap().unwrap();
    assert_eq!(runtime.get_field_value(object, score).unwrap(), vec![0; 4]);
    runtime.set_field_value(object, score, &42i32.to_le_bytes()).unwrap();
    assert_eq!(runtime.get_field_value(object, score).unwrap(), 42i32.to_le_bytes());

    let name = runtime.allocate_string("hero").unwrap();
    assert_eq!(runtime.read_string(name).unwrap(), "hero");
}

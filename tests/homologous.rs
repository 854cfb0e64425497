//! Binding homologous images and resolving their tokens.

mod common;

use std::sync::Arc;

use common::*;
use dotrt::{
    metadata::{
        aot::AotMetadataBuilder,
        raw::MetadataWriter,
        token::{TableId, Token},
    },
    runtime::{FieldRef, MethodCode, Runtime, RuntimeConfig},
    typesystem::{GenericContext, GenericInst, RuntimeType},
    homologous::MismatchKind,
    Error, LoadImageErrorCode,
};

fn bound_runtime() -> (Runtime, Arc<dotrt::homologous::HomologousImage>) {
    let runtime = game_runtime(RuntimeConfig::default());
    let image = runtime.load_homologous_image(GameImage::default().write()).unwrap();
    (runtime, image)
}

#[test]
fn matching_image_binds_once() {
    let runtime = game_runtime(RuntimeConfig::default());
    let bytes = GameImage::default().write();
    assert_eq!(runtime.load_metadata_for_aot_assembly(bytes.clone()), LoadImageErrorCode::Ok);
    assert_eq!(runtime.homologous_image_count(), 1);

    assert_eq!(
        runtime.load_metadata_for_aot_assembly(bytes),
        LoadImageErrorCode::HomologousAssemblyHasLoaded
    );
    assert_eq!(runtime.homologous_image_count(), 1);
}

#[test]
fn field_name_mismatch_registers_nothing() {
    for config in [RuntimeConfig::default(), RuntimeConfig::strict()] {
        let runtime = game_runtime(config);
        let stale = GameImage {
            score_field: "value",
            ..GameImage::default()
        };
        assert_eq!(
            runtime.load_metadata_for_aot_assembly(stale.write()),
            LoadImageErrorCode::MetadataFieldNotMatch
        );
        assert_eq!(runtime.homologous_image_count(), 0);
        let game = runtime.metadata().find_assembly("Game").unwrap();
        assert!(runtime.homologous_image(game).is_none());

        // nothing was registered, so corrected bytes bind
        assert_eq!(
            runtime.load_metadata_for_aot_assembly(GameImage::default().write()),
            LoadImageErrorCode::Ok
        );
    }
}

#[test]
fn mismatch_report_names_the_row() {
    let runtime = game_runtime(RuntimeConfig::strict());
    let stale = dotrt::metadata::raw::RawImage::parse(
        GameImage {
            score_field: "value",
            ..GameImage::default()
        }
        .write(),
    )
    .unwrap();
    let game = runtime.metadata().find_assembly("Game").unwrap();
    let image = runtime.metadata().assembly(game).unwrap().image;
    let types = runtime.metadata().image_types(image);

    let mismatches =
        dotrt::homologous::compare(runtime.metadata(), &stale, &types, runtime.config()).unwrap();
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].row, SCORE_FIELD_ROW);
    assert_eq!(mismatches[0].expected, "val");
    assert_eq!(mismatches[0].found, "value");
}

#[test]
fn type_name_mismatch_registers_nothing() {
    let runtime = game_runtime(RuntimeConfig::default());
    let stale = GameImage {
        player_type: "Hero",
        ..GameImage::default()
    };
    assert_eq!(
        runtime.load_metadata_for_aot_assembly(stale.write()),
        LoadImageErrorCode::MetadataTypeNotMatch
    );
    assert_eq!(runtime.homologous_image_count(), 0);
    assert_eq!(
        runtime.load_metadata_for_aot_assembly(GameImage::default().write()),
        LoadImageErrorCode::Ok
    );
}

#[test]
fn method_name_mismatch_registers_nothing() {
    let runtime = game_runtime(RuntimeConfig::strict());
    let stale = GameImage {
        score_method: "GetPoints",
        ..GameImage::default()
    };
    assert_eq!(
        runtime.load_metadata_for_aot_assembly(stale.write()),
        LoadImageErrorCode::MetadataMethodNotMatch
    );
    assert_eq!(runtime.homologous_image_count(), 0);
    assert_eq!(
        runtime.load_metadata_for_aot_assembly(GameImage::default().write()),
        LoadImageErrorCode::Ok
    );
}

#[test]
fn type_mismatch_is_reported_before_members() {
    let stale = GameImage {
        player_type: "Hero",
        score_method: "GetPoints",
        score_field: "value",
        ..GameImage::default()
    };
    for config in [RuntimeConfig::default(), RuntimeConfig::strict()] {
        let runtime = game_runtime(config);
        assert_eq!(
            runtime.load_metadata_for_aot_assembly(stale.write()),
            LoadImageErrorCode::MetadataTypeNotMatch
        );

        let game = runtime.metadata().find_assembly("Game").unwrap();
        let image = runtime.metadata().assembly(game).unwrap().image;
        let types = runtime.metadata().image_types(image);
        let raw = dotrt::metadata::raw::RawImage::parse(stale.write()).unwrap();
        let mismatches =
            dotrt::homologous::compare(runtime.metadata(), &raw, &types, runtime.config()).unwrap();
        let rows: Vec<_> = mismatches.iter().map(|m| (m.kind, m.row)).collect();
        assert_eq!(
            rows,
            [
                (MismatchKind::Type, PLAYER_TYPE_ROW),
                (MismatchKind::Method, SCORE_METHOD_ROW),
                (MismatchKind::Field, SCORE_FIELD_ROW),
            ]
        );
        assert_eq!(mismatches[0].expected, "Game.Player");
        assert_eq!(mismatches[0].found, "Game.Hero");
    }
}

#[test]
fn extra_type_rows_are_skipped() {
    let runtime = game_runtime(RuntimeConfig::default());
    let image = runtime
        .load_homologous_image(
            GameImage {
                extra_type: true,
                ..GameImage::default()
            }
            .write(),
        )
        .unwrap();
    assert!(image.rows().type_def(4).is_some());
    assert!(image.rows().type_def(5).is_none());
    assert!(image.rows().field(7).is_none());
    assert!(matches!(
        runtime.get_class_from_token(&image, type_def(5), &GenericContext::empty()),
        Err(Error::TypeNotFound(_))
    ));
}

#[test]
fn load_failures_have_distinct_codes() {
    let runtime = game_runtime(RuntimeConfig::default());
    assert_eq!(
        runtime.load_metadata_for_aot_assembly(vec![0u8; 64]),
        LoadImageErrorCode::BadImage
    );

    let mut w = MetadataWriter::new();
    w.add_module("Mods.dll").unwrap();
    w.add_assembly("Mods", [1, 0, 0, 0]).unwrap();
    w.add_type_def(0, "", "<Module>", None).unwrap();
    assert_eq!(
        runtime.load_metadata_for_aot_assembly(w.finish().unwrap()),
        LoadImageErrorCode::AotAssemblyNotFound
    );

    let mut builder = AotMetadataBuilder::new();
    builder.with_corlib().unwrap();
    builder.add_interpreter_assembly("Game", [1, 0, 0, 0]).unwrap();
    let interpreted = Runtime::new(Arc::new(builder.build().unwrap()), RuntimeConfig::default()).unwrap();
    assert_eq!(
        interpreted.load_metadata_for_aot_assembly(GameImage::default().write()),
        LoadImageErrorCode::HomologousOnlySupportAotAssembly
    );
}

#[test]
fn every_definition_token_resolves() {
    let (runtime, image) = bound_runtime();
    let ctx = GenericContext::empty();

    for row in 1..=4 {
        let token = TableId::MethodDef.token(row);
        runtime.get_method_info_from_token(&image, token, &ctx).unwrap();
    }
    for row in 1..=6 {
        let token = TableId::Field.token(row);
        runtime.get_field_info_from_token(&image, token, &ctx).unwrap();
    }

    let player = runtime.get_class_from_token(&image, type_def(3), &ctx).unwrap();
    assert_eq!(runtime.class(player).unwrap().full_name(), "Game.Player");

    let score = runtime
        .get_method_info_from_token(&image, TableId::MethodDef.token(2), &ctx)
        .unwrap();
    assert_eq!(runtime.method(score).unwrap().name, "GetScore");
    assert_eq!(runtime.method(score).unwrap().declaring, player);

    let field = runtime
        .get_field_info_from_token(&image, TableId::Field.token(SCORE_FIELD_ROW), &ctx)
        .unwrap();
    assert_eq!(field, FieldRef { class: player, index: 2 });
    assert_eq!(runtime.field(field).unwrap().name, "val");
}

#[test]
fn member_references_match_by_signature() {
    let (runtime, image) = bound_runtime();
    let ctx = GenericContext::empty();
    let player = runtime.class_from_name("Game", "Player").unwrap();

    let moved = runtime.get_method_info_from_token(&image, MOVE_REF, &ctx).unwrap();
    let moved = runtime.method(moved).unwrap();
    assert_eq!(moved.name, "Move");
    assert_eq!(moved.declaring, player);

    let box_def = runtime.metadata().find_type_by_name("Game", "Box`1").unwrap();
    let box_int = runtime.generic_class(box_def, &[RuntimeType::I4]).unwrap();
    assert_eq!(
        runtime.get_class_from_token(&image, BOX_INT_SPEC, &ctx).unwrap(),
        box_int
    );
    let get = runtime.get_method_info_from_token(&image, BOX_INT_GET_REF, &ctx).unwrap();
    let get = runtime.method(get).unwrap();
    assert_eq!(get.declaring, box_int);
    assert_eq!(get.return_type, RuntimeType::I4);

    let value = runtime.get_field_info_from_token(&image, BOX_INT_VALUE_REF, &ctx).unwrap();
    assert_eq!(value.class, box_int);
    assert_eq!(runtime.field(value).unwrap().ty, RuntimeType::I4);

    let to_string = runtime
        .get_method_info_from_token(&image, OBJECT_TO_STRING_REF, &ctx)
        .unwrap();
    let object = runtime.class_from_type(&RuntimeType::Object).unwrap();
    assert_eq!(runtime.method(to_string).unwrap().declaring, object);
}

#[test]
fn array_references_use_runtime_methods() {
    let (runtime, image) = bound_runtime();
    let get = runtime
        .get_method_info_from_token(&image, STRING_ARRAY_GET_REF, &GenericContext::empty())
        .unwrap();
    let get = runtime.method(get).unwrap();
    assert_eq!(get.code, MethodCode::Runtime);
    assert_eq!(get.return_type, RuntimeType::String);

    let string = runtime.class_from_type(&RuntimeType::String).unwrap();
    assert_eq!(get.declaring, runtime.array_class(string, 1, true).unwrap());
}

#[test]
fn method_specs_instantiate_generic_methods() {
    let (runtime, image) = bound_runtime();
    let echo = runtime
        .get_method_info_from_token(&image, ECHO_INT_SPEC, &GenericContext::empty())
        .unwrap();
    let echo = runtime.method(echo).unwrap();
    assert_eq!(echo.name, "Echo");
    assert_eq!(echo.return_type, RuntimeType::I4);
    assert_eq!(echo.parameters[0].ty, RuntimeType::I4);
    assert_eq!(
        echo.generic_method.as_ref().unwrap().args.args(),
        &[RuntimeType::I4]
    );
}

#[test]
fn missing_method_names_type_and_member() {
    let (runtime, image) = bound_runtime();
    match runtime.get_method_info_from_token(&image, JUMP_REF, &GenericContext::empty()) {
        Err(Error::MethodNotFound { type_name, method }) => {
            assert_eq!(type_name, "Game.Player");
            assert_eq!(method, "Jump");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn wrong_table_kinds_are_rejected() {
    let (runtime, image) = bound_runtime();
    let ctx = GenericContext::empty();
    assert!(matches!(
        runtime.get_method_info_from_token(&image, BOX_INT_VALUE_REF, &ctx),
        Err(Error::InvalidToken(_))
    ));
    assert!(matches!(
        runtime.get_field_info_from_token(&image, MOVE_REF, &ctx),
        Err(Error::InvalidToken(_))
    ));
    assert!(matches!(
        runtime.get_class_from_token(&image, Token(0x0600_0001), &ctx),
        Err(Error::InvalidToken(_))
    ));
}

#[test]
fn resolutions_are_memoized_per_context() {
    let (runtime, image) = bound_runtime();
    let strings = GenericContext::for_class(GenericInst::new(vec![RuntimeType::String]));
    let ints = GenericContext::for_class(GenericInst::new(vec![RuntimeType::I4]));

    let as_string = runtime.get_method_info_from_token(&image, BOX_OPEN_GET_REF, &strings).unwrap();
    assert_eq!(runtime.method(as_string).unwrap().return_type, RuntimeType::String);

    let as_int = runtime.get_method_info_from_token(&image, BOX_OPEN_GET_REF, &ints).unwrap();
    let direct = runtime
        .get_method_info_from_token(&image, BOX_INT_GET_REF, &GenericContext::empty())
        .unwrap();
    assert_eq!(as_int, direct);
    assert_ne!(as_int, as_string);

    let before = runtime.stats();
    let cached = image.cached_tokens();
    let again = runtime.get_method_info_from_token(&image, BOX_OPEN_GET_REF, &strings).unwrap();
    let after = runtime.stats();
    assert_eq!(again, as_string);
    assert_eq!(after.resolver_hits, before.resolver_hits + 1);
    assert_eq!(after.resolver_misses, before.resolver_misses);
    assert_eq!(image.cached_tokens(), cached);
}

//! Shared fixtures for the integration tests.
//!
//! `Game.dll` is written with [`MetadataWriter`] and imported into a fresh AOT store, so the same
//! bytes (or a deliberately diverging copy) can then be bound as a homologous image.

#![allow(dead_code)]

use std::sync::Arc;

use dotrt::metadata::{
    aot::AotMetadataBuilder,
    raw::{MetadataWriter, RawImage},
    signatures::{
        SignatureEncoder, SignatureField, SignatureMethod, SignatureMethodSpec, SignatureParameter,
        TypeSignature,
    },
    token::{TableId, Token},
};
use dotrt::runtime::{Runtime, RuntimeConfig};

/// `TypeDef` row 3 of `Game.dll`, `Game.Player`.
pub const PLAYER_TYPE_ROW: u32 = 3;
/// Method row 2 of `Game.dll`, `Game.Player::GetScore`.
pub const SCORE_METHOD_ROW: u32 = 2;
/// Field row 5 of `Game.dll`, the last field of `Game.Player`.
pub const SCORE_FIELD_ROW: u32 = 5;

/// `Player::Move(float32, float32)`.
pub const MOVE_REF: Token = Token(0x0A00_0001);
/// `Player::Jump()`, which no type defines.
pub const JUMP_REF: Token = Token(0x0A00_0002);
/// `Box<int32>::Get()`.
pub const BOX_INT_GET_REF: Token = Token(0x0A00_0003);
/// `Box<int32>::value`.
pub const BOX_INT_VALUE_REF: Token = Token(0x0A00_0004);
/// `string[]::Get(int32)`.
pub const STRING_ARRAY_GET_REF: Token = Token(0x0A00_0005);
/// `Box<!0>::Get()`, open over the caller's first class argument.
pub const BOX_OPEN_GET_REF: Token = Token(0x0A00_0006);
/// `object::ToString()`.
pub const OBJECT_TO_STRING_REF: Token = Token(0x0A00_0007);
/// `Player::Echo<int32>`.
pub const ECHO_INT_SPEC: Token = Token(0x2B00_0001);
/// `Box<int32>`.
pub const BOX_INT_SPEC: Token = Token(0x1B00_0001);

/// Options for writing `Game.dll`.
#[derive(Debug, Clone, Copy)]
pub struct GameImage<'a> {
    /// Name of `TypeDef` row 3.
    pub player_type: &'a str,
    /// Name of method row 2.
    pub score_method: &'a str,
    /// Name of field row 5.
    pub score_field: &'a str,
    /// Appends a `Game.Extra` type the AOT build does not know.
    pub extra_type: bool,
}

impl Default for GameImage<'_> {
    fn default() -> Self {
        GameImage {
            player_type: "Player",
            score_method: "GetScore",
            score_field: "val",
            extra_type: false,
        }
    }
}

fn field_sig(ty: TypeSignature) -> Vec<u8> {
    SignatureEncoder::field(&SignatureField {
        modifiers: Vec::new(),
        base: ty,
    })
    .unwrap()
}

fn method_sig(generic: u32, ret: TypeSignature, params: Vec<TypeSignature>) -> Vec<u8> {
    SignatureEncoder::method(&SignatureMethod {
        has_this: true,
        explicit_this: false,
        calling_convention: 0,
        generic_param_count: generic,
        return_type: SignatureParameter::new(ret),
        params: params.into_iter().map(SignatureParameter::new).collect(),
        varargs: Vec::new(),
    })
    .unwrap()
}

impl GameImage<'_> {
    /// Writes the metadata root.
    pub fn write(self) -> Vec<u8> {
        let mut w = MetadataWriter::new();
        w.add_module("Game.dll").unwrap();
        w.add_assembly("Game", [1, 0, 0, 0]).unwrap();
        let corlib = w.add_assembly_ref("System.Runtime", [8, 0, 0, 0]).unwrap();
        let object = w.add_type_ref(corlib, "System", "Object").unwrap();
        let value_type = w.add_type_ref(corlib, "System", "ValueType").unwrap();

        w.add_type_def(0, "", "<Module>", None).unwrap();

        let vec2 = w.add_type_def(0x0010_0109, "Game", "Vec2", Some(value_type)).unwrap();
        w.add_field(0x0006, "x", &field_sig(TypeSignature::R4)).unwrap();
        w.add_field(0x0006, "y", &field_sig(TypeSignature::R4)).unwrap();

        let player = w.add_type_def(0x0010_0001, "Game", self.player_type, Some(object)).unwrap();
        w.add_field(0x0006, "position", &field_sig(TypeSignature::ValueType(vec2))).unwrap();
        w.add_field(0x0006, "name", &field_sig(TypeSignature::String)).unwrap();
        w.add_field(0x0006, self.score_field, &field_sig(TypeSignature::I4)).unwrap();
        w.add_method(
            0x0086,
            0,
            "Move",
            &method_sig(0, TypeSignature::Void, vec![TypeSignature::R4, TypeSignature::R4]),
        )
        .unwrap();
        w.add_param(1, "dx").unwrap();
        w.add_param(2, "dy").unwrap();
        w.add_method(0x0086, 0, self.score_method, &method_sig(0, TypeSignature::I4, vec![]))
            .unwrap();
        let echo = w
            .add_method(
                0x0086,
                0,
                "Echo",
                &method_sig(
                    1,
                    TypeSignature::GenericParamMethod(0),
                    vec![TypeSignature::GenericParamMethod(0)],
                ),
            )
            .unwrap();
        w.add_param(1, "value").unwrap();

        let cell = w.add_type_def(0x0010_0001, "Game", "Box`1", Some(object)).unwrap();
        w.add_field(0x0006, "value", &field_sig(TypeSignature::GenericParamType(0)))
            .unwrap();
        w.add_method(0x0086, 0, "Get", &method_sig(0, TypeSignature::GenericParamType(0), vec![]))
            .unwrap();

        if self.extra_type {
            w.add_type_def(0x0010_0001, "Game", "Extra", Some(object)).unwrap();
            w.add_field(0x0006, "unused", &field_sig(TypeSignature::I8)).unwrap();
        }

        w.add_generic_param(echo, 0, "U").unwrap();
        w.add_generic_param(cell, 0, "T").unwrap();

        let box_of = |arg: TypeSignature| {
            SignatureEncoder::type_spec(&TypeSignature::GenericInst(
                Box::new(TypeSignature::Class(cell)),
                vec![arg],
            ))
            .unwrap()
        };
        let box_int = w.add_type_spec(&box_of(TypeSignature::I4)).unwrap();
        let strings = w
            .add_type_spec(
                &SignatureEncoder::type_spec(&TypeSignature::SzArray(Box::new(TypeSignature::String)))
                    .unwrap(),
            )
            .unwrap();
        let box_open = w.add_type_spec(&box_of(TypeSignature::GenericParamType(0))).unwrap();

        w.add_member_ref(
            player,
            "Move",
            &method_sig(0, TypeSignature::Void, vec![TypeSignature::R4, TypeSignature::R4]),
        )
        .unwrap();
        w.add_member_ref(player, "Jump", &method_sig(0, TypeSignature::Void, vec![]))
            .unwrap();
        w.add_member_ref(box_int, "Get", &method_sig(0, TypeSignature::GenericParamType(0), vec![]))
            .unwrap();
        w.add_member_ref(box_int, "value", &field_sig(TypeSignature::GenericParamType(0)))
            .unwrap();
        w.add_member_ref(
            strings,
            "Get",
            &method_sig(0, TypeSignature::String, vec![TypeSignature::I4]),
        )
        .unwrap();
        w.add_member_ref(box_open, "Get", &method_sig(0, TypeSignature::GenericParamType(0), vec![]))
            .unwrap();
        w.add_member_ref(object, "ToString", &method_sig(0, TypeSignature::String, vec![]))
            .unwrap();

        w.add_method_spec(
            echo,
            &SignatureEncoder::method_spec(&SignatureMethodSpec {
                generic_args: vec![TypeSignature::I4],
            })
            .unwrap(),
        )
        .unwrap();

        w.finish().unwrap()
    }
}

/// A runtime whose AOT store holds the core library and the default `Game.dll`.
pub fn game_runtime(config: RuntimeConfig) -> Runtime {
    let mut builder = AotMetadataBuilder::new();
    builder.with_corlib().unwrap();
    let image = RawImage::parse(GameImage::default().write()).unwrap();
    builder.import_image(&image).unwrap();
    Runtime::new(Arc::new(builder.build().unwrap()), config).unwrap()
}

/// `TypeDef` token of `Game.dll` row `row`.
pub fn type_def(row: u32) -> Token {
    TableId::TypeDef.token(row)
}

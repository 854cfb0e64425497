//! Conversion of parsed signature blobs into [`RuntimeType`]s.
//!
//! Blobs name types through `TypeDefOrRef` tokens that only mean something inside the image the
//! blob came from, so the conversion is parameterized over a [`TypeTokenResolver`] for that image.

use crate::{
    metadata::{
        aot::{CorlibTypes, TypeDefIndex},
        signatures::{SignatureMethod, TypeSignature},
        token::{TableId, Token},
    },
    typesystem::{GenericInst, RuntimeType},
    Result,
};

/// Maps the type tokens of one image onto AOT definitions.
pub trait TypeTokenResolver {
    /// The core library definitions.
    fn corlib(&self) -> &CorlibTypes;

    /// Resolves a `TypeDef` or `TypeRef` token to its definition.
    fn resolve_type_def_or_ref(&self, token: Token) -> Result<TypeDefIndex>;

    /// Resolves a `TypeSpec` token to the type its blob describes.
    fn resolve_type_spec(&self, token: Token) -> Result<RuntimeType>;

    /// Resolves any `TypeDefOrRef` token. Corlib primitives collapse onto their built-in handles.
    fn resolve_type_token(&self, token: Token, value_type: bool) -> Result<RuntimeType> {
        if token.table_id() == Some(TableId::TypeSpec) {
            return self.resolve_type_spec(token);
        }
        let def = self.resolve_type_def_or_ref(token)?;
        if let Some(primitive) = self.corlib().primitive_of(def) {
            return Ok(primitive);
        }
        Ok(if value_type {
            RuntimeType::ValueType(def)
        } else {
            RuntimeType::Class(def)
        })
    }
}

impl RuntimeType {
    /// Converts a parsed type signature. Custom modifiers and `pinned` are dropped.
    pub fn from_signature(signature: &TypeSignature, resolver: &dyn TypeTokenResolver) -> Result<RuntimeType> {
        Ok(match signature {
            TypeSignature::Void => RuntimeType::Void,
            TypeSignature::Boolean => RuntimeType::Boolean,
            TypeSignature::Char => RuntimeType::Char,
            TypeSignature::I1 => RuntimeType::I1,
            TypeSignature::U1 => RuntimeType::U1,
            TypeSignature::I2 => RuntimeType::I2,
            TypeSignature::U2 => RuntimeType::U2,
            TypeSignature::I4 => RuntimeType::I4,
            TypeSignature::U4 => RuntimeType::U4,
            TypeSignature::I8 => RuntimeType::I8,
            TypeSignature::U8 => RuntimeType::U8,
            TypeSignature::R4 => RuntimeType::R4,
            TypeSignature::R8 => RuntimeType::R8,
            TypeSignature::I => RuntimeType::I,
            TypeSignature::U => RuntimeType::U,
            TypeSignature::String => RuntimeType::String,
            TypeSignature::Object => RuntimeType::Object,
            TypeSignature::TypedByRef => RuntimeType::TypedByRef,
            TypeSignature::Ptr(inner) => RuntimeType::Ptr(Box::new(Self::from_signature(inner, resolver)?)),
            TypeSignature::ByRef(inner) => {
                RuntimeType::ByRef(Box::new(Self::from_signature(inner, resolver)?))
            }
            TypeSignature::SzArray(inner) => {
                RuntimeType::SzArray(Box::new(Self::from_signature(inner, resolver)?))
            }
            TypeSignature::Array(array) => RuntimeType::Array {
                element: Box::new(Self::from_signature(&array.base, resolver)?),
                rank: u8::try_from(array.rank)
                    .map_err(|_| malformed_error!("Array rank {} is too large", array.rank))?,
            },
            TypeSignature::ValueType(token) => resolver.resolve_type_token(*token, true)?,
            TypeSignature::Class(token) => resolver.resolve_type_token(*token, false)?,
            TypeSignature::GenericParamType(number) => RuntimeType::Var(
                u16::try_from(*number).map_err(|_| malformed_error!("VAR {} is too large", number))?,
            ),
            TypeSignature::GenericParamMethod(number) => RuntimeType::MVar(
                u16::try_from(*number).map_err(|_| malformed_error!("MVAR {} is too large", number))?,
            ),
            TypeSignature::GenericInst(base, args) => {
                let definition = match base.unmodified() {
                    TypeSignature::Class(token) | TypeSignature::ValueType(token) => {
                        resolver.resolve_type_def_or_ref(*token)?
                    }
                    other => {
                        return Err(malformed_error!("GENERICINST over {:?}", other));
                    }
                };
                let args = args
                    .iter()
                    .map(|arg| Self::from_signature(arg, resolver))
                    .collect::<Result<Vec<_>>>()?;
                RuntimeType::GenericInst {
                    definition,
                    args: GenericInst::new(args),
                }
            }
            TypeSignature::FnPtr(_) => RuntimeType::FnPtr,
            TypeSignature::Modified(_, inner) | TypeSignature::Pinned(inner) => {
                Self::from_signature(inner, resolver)?
            }
        })
    }
}

/// A method signature expressed in runtime types, used to match references against definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodShape {
    /// Whether the method takes `this`.
    pub has_this: bool,
    /// Number of generic parameters.
    pub generic_arity: u32,
    /// Return type.
    pub return_type: RuntimeType,
    /// Parameter types.
    pub params: Vec<RuntimeType>,
}

impl MethodShape {
    /// Converts a parsed method signature.
    pub fn from_signature(signature: &SignatureMethod, resolver: &dyn TypeTokenResolver) -> Result<MethodShape> {
        let convert = |param: &crate::metadata::signatures::SignatureParameter| -> Result<RuntimeType> {
            let base = RuntimeType::from_signature(&param.base, resolver)?;
            Ok(if param.by_ref {
                RuntimeType::ByRef(Box::new(base))
            } else {
                base
            })
        };
        Ok(MethodShape {
            has_this: signature.has_this,
            generic_arity: signature.generic_param_count,
            return_type: convert(&signature.return_type)?,
            params: signature
                .params
                .iter()
                .map(convert)
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

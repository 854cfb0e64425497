//! Type-token resolution for a raw image against the AOT type definitions.
//!
//! An [`ImageScope`] answers "which AOT definition does this `TypeDef`, `TypeRef` or `TypeSpec`
//! token of this image mean?". `TypeDef` row `n` is the `n`th type of the AOT image the raw image
//! is paired with; `TypeRef`s are followed through their resolution scope (an assembly reference,
//! the module itself, or an enclosing type reference for nested types).

use crate::{
    metadata::{
        aot::{AssemblyIndex, CorlibTypes, TypeDefIndex},
        raw::RawImage,
        signatures::parse_type_spec_signature,
        token::{TableId, Token},
    },
    typesystem::{RuntimeType, TypeTokenResolver},
    Error, Result,
};

/// Names under which the core library is referenced.
const CORLIB_NAMES: [&str; 4] = ["mscorlib", "System.Runtime", "netstandard", "System.Private.CoreLib"];

/// Name-based lookups over a set of type definitions.
pub trait TypeLookup {
    /// The core library definitions, once known.
    fn corlib_types(&self) -> Option<CorlibTypes>;

    /// Finds an assembly by simple name.
    fn lookup_assembly(&self, name: &str) -> Option<AssemblyIndex>;

    /// Finds a top-level type of an assembly.
    fn lookup_type(&self, assembly: AssemblyIndex, namespace: &str, name: &str) -> Option<TypeDefIndex>;

    /// Finds a type nested directly in `declaring`.
    fn lookup_nested_type(&self, declaring: TypeDefIndex, name: &str) -> Option<TypeDefIndex>;
}

/// Resolves the type tokens of one raw image.
pub struct ImageScope<'a, L: TypeLookup + ?Sized> {
    lookup: &'a L,
    image: &'a RawImage,
    assembly: AssemblyIndex,
    first_type: TypeDefIndex,
    corlib: CorlibTypes,
}

impl<'a, L: TypeLookup + ?Sized> ImageScope<'a, L> {
    /// Pairs `image` with the AOT assembly whose first type (`<Module>`) is `first_type`.
    pub fn new(
        lookup: &'a L,
        image: &'a RawImage,
        assembly: AssemblyIndex,
        first_type: TypeDefIndex,
    ) -> Result<Self> {
        let corlib = lookup
            .corlib_types()
            .ok_or_else(|| Error::Configuration("the core library has not been registered".to_string()))?;
        Ok(ImageScope {
            lookup,
            image,
            assembly,
            first_type,
            corlib,
        })
    }

    /// The raw image.
    #[must_use]
    pub fn image(&self) -> &'a RawImage {
        self.image
    }

    /// The AOT definition at `TypeDef` row `row` of the image.
    pub fn type_def_at(&self, row: u32) -> Result<TypeDefIndex> {
        if row == 0 || row > self.image.row_count(TableId::TypeDef) {
            return Err(Error::InvalidToken(TableId::TypeDef.token(row)));
        }
        Ok(TypeDefIndex(self.first_type.0 + row - 1))
    }

    /// Resolves a token used as a base type or interface: definitions stay class handles even for
    /// corlib primitives.
    pub fn resolve_class_token(&self, token: Token) -> Result<RuntimeType> {
        if token.table_id() == Some(TableId::TypeSpec) {
            return self.resolve_type_spec(token);
        }
        Ok(RuntimeType::Class(self.resolve_type_def_or_ref(token)?))
    }

    fn find_assembly(&self, name: &str) -> Option<AssemblyIndex> {
        self.lookup.lookup_assembly(name).or_else(|| {
            if CORLIB_NAMES.contains(&name) {
                CORLIB_NAMES
                    .iter()
                    .find_map(|alias| self.lookup.lookup_assembly(alias))
            } else {
                None
            }
        })
    }

    fn resolve_type_ref(&self, row: u32, depth: u32) -> Result<TypeDefIndex> {
        if depth > 64 {
            return Err(malformed_error!("TypeRef {} nests too deeply", row));
        }
        let type_ref = self.image.type_ref(row)?;
        let not_found = || {
            if type_ref.namespace.is_empty() {
                Error::TypeNotFound(type_ref.name.to_string())
            } else {
                Error::TypeNotFound(format!("{}.{}", type_ref.namespace, type_ref.name))
            }
        };

        let Some(scope) = type_ref.resolution_scope else {
            return Err(not_found());
        };
        match scope.table_id() {
            Some(TableId::AssemblyRef) => {
                let assembly_ref = self.image.assembly_ref(scope.row())?;
                let assembly = self
                    .find_assembly(assembly_ref.name)
                    .ok_or_else(|| Error::TypeNotFound(format!("[{}]", assembly_ref.name)))?;
                self.lookup
                    .lookup_type(assembly, type_ref.namespace, type_ref.name)
                    .ok_or_else(not_found)
            }
            Some(TableId::Module) => self
                .lookup
                .lookup_type(self.assembly, type_ref.namespace, type_ref.name)
                .ok_or_else(not_found),
            Some(TableId::TypeRef) => {
                let outer = self.resolve_type_ref(scope.row(), depth + 1)?;
                self.lookup
                    .lookup_nested_type(outer, type_ref.name)
                    .ok_or_else(not_found)
            }
            _ => Err(Error::NotSupported(format!(
                "TypeRef {row} is scoped to {scope}"
            ))),
        }
    }
}

impl<L: TypeLookup + ?Sized> TypeTokenResolver for ImageScope<'_, L> {
    fn corlib(&self) -> &CorlibTypes {
        &self.corlib
    }

    fn resolve_type_def_or_ref(&self, token: Token) -> Result<TypeDefIndex> {
        match token.table_id() {
            Some(TableId::TypeDef) => self.type_def_at(token.row()),
            Some(TableId::TypeRef) => self.resolve_type_ref(token.row(), 0),
            _ => Err(Error::InvalidToken(token)),
        }
    }

    fn resolve_type_spec(&self, token: Token) -> Result<RuntimeType> {
        if token.table_id() != Some(TableId::TypeSpec) {
            return Err(Error::InvalidToken(token));
        }
        let signature = parse_type_spec_signature(self.image.type_spec(token.row())?)?;
        RuntimeType::from_signature(&signature, self)
    }
}

//! The metadata of assemblies compiled ahead of time.
//!
//! [`AotMetadata`] is the read-only backing store the runtime pulls descriptors from: flat,
//! index-addressed tables of assemblies, images, type definitions and their members, plus a table
//! of type handles ([`RuntimeType`]) that every signature position refers to. It is assembled once
//! with an [`AotMetadataBuilder`] (by hand, or by importing raw images) and never mutated afterwards.
//!
//! # Examples
//!
//! ```rust
//! use dotrt::metadata::aot::{AotMetadataBuilder, NewField, TypeBody};
//! use dotrt::typesystem::{RuntimeType, TypeAttributes};
//!
//! let mut builder = AotMetadataBuilder::new();
//! let corlib = builder.with_corlib()?;
//! let game = builder.add_assembly("Game", [1, 0, 0, 0])?;
//! let point = builder.declare_type(game, "Game", "Point", TypeAttributes::PUBLIC)?;
//! builder.define_type(
//!     point,
//!     TypeBody::value_type(&corlib)
//!         .field(NewField::instance("x", RuntimeType::I4))
//!         .field(NewField::instance("y", RuntimeType::I4)),
//! )?;
//! let metadata = builder.build()?;
//! assert_eq!(metadata.find_type_by_name("Game", "Point"), Some(point));
//! # Ok::<(), dotrt::Error>(())
//! ```

mod builder;
mod definitions;
mod handles;
mod import;

use std::collections::HashMap;

pub use builder::{
    AotMetadataBuilder, CorlibTypes, NewEvent, NewField, NewMethod, NewOverride, NewProperty,
    TypeBody,
};
pub use definitions::{
    AssemblyDefinition, EventDefinition, FieldDefinition, GenericContainer, GenericOwner,
    GenericParameter, ImageDefinition, MethodDefinition, MethodOverride, ParameterDefinition,
    PropertyDefinition, TypeDefinition,
};
pub(crate) use definitions::range_indices;
pub use handles::{
    AssemblyIndex, EventIndex, FieldIndex, GenericContainerIndex, GenericParameterIndex,
    ImageIndex, MethodIndex, ParameterIndex, PropertyIndex, TypeDefIndex, TypeIndex,
};

use crate::{typesystem::RuntimeType, Error, Result};

fn slice<'a, T>(table: &'a [T], range: &std::ops::Range<u32>) -> &'a [T] {
    table
        .get(range.start as usize..range.end as usize)
        .unwrap_or(&[])
}

/// The AOT metadata store.
#[derive(Debug)]
pub struct AotMetadata {
    pub(crate) assemblies: Vec<AssemblyDefinition>,
    pub(crate) images: Vec<ImageDefinition>,
    pub(crate) type_defs: Vec<TypeDefinition>,
    pub(crate) fields: Vec<FieldDefinition>,
    pub(crate) methods: Vec<MethodDefinition>,
    pub(crate) parameters: Vec<ParameterDefinition>,
    pub(crate) properties: Vec<PropertyDefinition>,
    pub(crate) events: Vec<EventDefinition>,
    pub(crate) generic_containers: Vec<GenericContainer>,
    pub(crate) generic_parameters: Vec<GenericParameter>,
    pub(crate) types: Vec<RuntimeType>,
    pub(crate) nested_types: Vec<TypeDefIndex>,
    pub(crate) interfaces: Vec<TypeIndex>,
    pub(crate) corlib: CorlibTypes,
    pub(crate) type_names: HashMap<(ImageIndex, String, String), TypeDefIndex>,
    pub(crate) assembly_names: HashMap<String, AssemblyIndex>,
}

impl AotMetadata {
    /// Starts a new store.
    #[must_use]
    pub fn builder() -> AotMetadataBuilder {
        AotMetadataBuilder::new()
    }

    /// The well-known corlib definitions.
    #[must_use]
    pub fn corlib(&self) -> &CorlibTypes {
        &self.corlib
    }

    /// All assemblies.
    #[must_use]
    pub fn assemblies(&self) -> &[AssemblyDefinition] {
        &self.assemblies
    }

    /// All type definitions of all images.
    #[must_use]
    pub fn type_defs(&self) -> &[TypeDefinition] {
        &self.type_defs
    }

    /// Looks up an assembly.
    pub fn assembly(&self, index: AssemblyIndex) -> Result<&AssemblyDefinition> {
        self.assemblies
            .get(index.index())
            .ok_or_else(|| Error::TypeNotFound(format!("{index}")))
    }

    /// Looks up an image.
    pub fn image(&self, index: ImageIndex) -> Result<&ImageDefinition> {
        self.images
            .get(index.index())
            .ok_or_else(|| Error::TypeNotFound(format!("{index}")))
    }

    /// Looks up a type definition.
    pub fn type_def(&self, index: TypeDefIndex) -> Result<&TypeDefinition> {
        self.type_defs
            .get(index.index())
            .ok_or_else(|| Error::TypeNotFound(format!("{index}")))
    }

    /// Looks up a field definition.
    pub fn field(&self, index: FieldIndex) -> Result<&FieldDefinition> {
        self.fields.get(index.index()).ok_or_else(|| out_of_bounds_error!())
    }

    /// Looks up a method definition.
    pub fn method(&self, index: MethodIndex) -> Result<&MethodDefinition> {
        self.methods.get(index.index()).ok_or_else(|| out_of_bounds_error!())
    }

    /// Looks up a property definition.
    pub fn property(&self, index: PropertyIndex) -> Result<&PropertyDefinition> {
        self.properties
            .get(index.index())
            .ok_or_else(|| out_of_bounds_error!())
    }

    /// Looks up an event definition.
    pub fn event(&self, index: EventIndex) -> Result<&EventDefinition> {
        self.events.get(index.index()).ok_or_else(|| out_of_bounds_error!())
    }

    /// Looks up a generic container.
    pub fn generic_container(&self, index: GenericContainerIndex) -> Result<&GenericContainer> {
        self.generic_containers
            .get(index.index())
            .ok_or_else(|| out_of_bounds_error!())
    }

    /// Looks up a generic parameter.
    pub fn generic_parameter(&self, index: GenericParameterIndex) -> Result<&GenericParameter> {
        self.generic_parameters
            .get(index.index())
            .ok_or_else(|| out_of_bounds_error!())
    }

    /// Resolves a type handle.
    pub fn resolve_type_handle(&self, index: TypeIndex) -> Result<&RuntimeType> {
        self.types.get(index.index()).ok_or_else(|| out_of_bounds_error!())
    }

    /// Number of entries in the type-handle table.
    #[must_use]
    pub fn type_handle_count(&self) -> usize {
        self.types.len()
    }

    /// The fields owned by a type, in declaration order.
    #[must_use]
    pub fn fields_of(&self, def: &TypeDefinition) -> &[FieldDefinition] {
        slice(&self.fields, &def.fields)
    }

    /// The methods owned by a type, in declaration order.
    #[must_use]
    pub fn methods_of(&self, def: &TypeDefinition) -> &[MethodDefinition] {
        slice(&self.methods, &def.methods)
    }

    /// The properties owned by a type.
    #[must_use]
    pub fn properties_of(&self, def: &TypeDefinition) -> &[PropertyDefinition] {
        slice(&self.properties, &def.properties)
    }

    /// The events owned by a type.
    #[must_use]
    pub fn events_of(&self, def: &TypeDefinition) -> &[EventDefinition] {
        slice(&self.events, &def.events)
    }

    /// The types directly nested in a type.
    #[must_use]
    pub fn nested_types_of(&self, def: &TypeDefinition) -> &[TypeDefIndex] {
        slice(&self.nested_types, &def.nested_types)
    }

    /// The interfaces a type directly declares.
    #[must_use]
    pub fn interfaces_of(&self, def: &TypeDefinition) -> &[TypeIndex] {
        slice(&self.interfaces, &def.interfaces)
    }

    /// The parameters of a method.
    #[must_use]
    pub fn parameters_of(&self, method: &MethodDefinition) -> &[ParameterDefinition] {
        slice(&self.parameters, &method.parameters)
    }

    /// The parameters of a generic container.
    #[must_use]
    pub fn generic_parameters_of(&self, container: &GenericContainer) -> &[GenericParameter] {
        slice(&self.generic_parameters, &container.parameters)
    }

    /// Number of generic parameters of a type definition, zero for non-generic types.
    #[must_use]
    pub fn type_arity(&self, def: &TypeDefinition) -> usize {
        def.generic_container
            .and_then(|c| self.generic_containers.get(c.index()))
            .map_or(0, GenericContainer::arity)
    }

    /// Number of generic parameters of a method definition, zero for non-generic methods.
    #[must_use]
    pub fn method_arity(&self, method: &MethodDefinition) -> usize {
        method
            .generic_container
            .and_then(|c| self.generic_containers.get(c.index()))
            .map_or(0, GenericContainer::arity)
    }

    /// Finds an assembly by simple name.
    #[must_use]
    pub fn find_assembly(&self, name: &str) -> Option<AssemblyIndex> {
        self.assembly_names.get(name).copied()
    }

    /// Finds a top-level type of an image.
    #[must_use]
    pub fn find_type(&self, image: ImageIndex, namespace: &str, name: &str) -> Option<TypeDefIndex> {
        self.type_names
            .get(&(image, namespace.to_string(), name.to_string()))
            .copied()
    }

    /// Finds a top-level type in any image, searching images in load order.
    #[must_use]
    pub fn find_type_by_name(&self, namespace: &str, name: &str) -> Option<TypeDefIndex> {
        (0..self.images.len()).find_map(|image| self.find_type(ImageIndex::from(image), namespace, name))
    }

    /// Finds a type nested directly in `declaring`.
    #[must_use]
    pub fn find_nested_type(&self, declaring: TypeDefIndex, name: &str) -> Option<TypeDefIndex> {
        let def = self.type_defs.get(declaring.index())?;
        self.nested_types_of(def)
            .iter()
            .copied()
            .find(|nested| self.type_defs.get(nested.index()).is_some_and(|n| n.name == name))
    }

    /// The type definitions of an image, in row order.
    #[must_use]
    pub fn image_types(&self, image: ImageIndex) -> std::ops::Range<u32> {
        self.images
            .get(image.index())
            .map_or(0..0, |image| image.types.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typesystem::TypeAttributes;

    #[test]
    fn corlib_is_registered() {
        let mut builder = AotMetadataBuilder::new();
        let corlib = builder.with_corlib().unwrap();
        let metadata = builder.build().unwrap();

        let mscorlib = metadata.find_assembly("mscorlib").unwrap();
        let image = metadata.assembly(mscorlib).unwrap().image;
        assert_eq!(metadata.find_type(image, "System", "Object"), Some(corlib.object));
        assert_eq!(metadata.find_type(image, "System", "Int32"), Some(corlib.int32));
        assert_eq!(
            metadata.find_type_by_name("System", "TypedReference"),
            Some(corlib.typed_reference)
        );

        let object = metadata.type_def(corlib.object).unwrap();
        assert!(object.parent.is_none());
        let int32 = metadata.type_def(corlib.int32).unwrap();
        assert_eq!(metadata.fields_of(int32).len(), 1);
        assert_eq!(
            metadata.resolve_type_handle(int32.parent.unwrap()).unwrap(),
            &RuntimeType::Class(corlib.value_type)
        );
    }

    #[test]
    fn nested_lookup() {
        let mut builder = AotMetadataBuilder::new();
        let corlib = builder.with_corlib().unwrap();
        let game = builder.add_assembly("Game", [1, 0, 0, 0]).unwrap();
        let outer = builder
            .declare_type(game, "Game", "Outer", TypeAttributes::PUBLIC)
            .unwrap();
        let inner = builder
            .declare_nested_type(outer, "Inner", TypeAttributes::NESTED_PUBLIC)
            .unwrap();
        builder.define_type(outer, TypeBody::class(&corlib)).unwrap();
        builder.define_type(inner, TypeBody::class(&corlib)).unwrap();
        let metadata = builder.build().unwrap();

        assert_eq!(metadata.find_nested_type(outer, "Inner"), Some(inner));
        assert_eq!(metadata.find_nested_type(outer, "Other"), None);
        assert_eq!(metadata.find_type_by_name("", "Inner"), None);
        assert_eq!(
            metadata.type_def(inner).unwrap().declaring_type,
            Some(outer)
        );
    }

    #[test]
    fn image_rows_start_with_module() {
        let mut builder = AotMetadataBuilder::new();
        builder.with_corlib().unwrap();
        let game = builder.add_assembly("Game", [1, 0, 0, 0]).unwrap();
        let metadata = builder.build().unwrap();

        let image = metadata.assembly(game).unwrap().image;
        let rows = metadata.image_types(image);
        assert_eq!(rows.len(), 1);
        let module = metadata.type_def(TypeDefIndex(rows.start)).unwrap();
        assert_eq!(module.name, "<Module>");
        assert_eq!(module.token.row(), 1);
    }
}

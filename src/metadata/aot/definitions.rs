//! Row types of the AOT metadata store.

use std::ops::Range;

use crate::{
    metadata::{
        aot::{
            AssemblyIndex, GenericContainerIndex, ImageIndex, MethodIndex, TypeDefIndex, TypeIndex,
        },
        token::Token,
    },
    typesystem::{FieldAttributes, MethodAttributes, TypeAttributes},
};

/// An assembly compiled ahead of time.
#[derive(Debug, Clone)]
pub struct AssemblyDefinition {
    /// Simple name, the identity homologous images are matched on.
    pub name: String,
    /// Major, minor, build, revision.
    pub version: [u16; 4],
    /// The single image of the assembly.
    pub image: ImageIndex,
}

/// The image (module) of an assembly.
#[derive(Debug, Clone)]
pub struct ImageDefinition {
    /// Module name, `Game.dll`.
    pub name: String,
    /// Owning assembly.
    pub assembly: AssemblyIndex,
    /// The type definitions of this image, in `TypeDef` row order.
    pub types: Range<u32>,
    /// False for assemblies that only exist as interpreter stubs; homologous images can not bind to
    /// them.
    pub aot_compiled: bool,
}

/// A type definition.
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    /// Simple name.
    pub name: String,
    /// Namespace, empty for nested types.
    pub namespace: String,
    /// The `TypeDef` token in the declaring image.
    pub token: Token,
    /// The declaring image.
    pub image: ImageIndex,
    /// Attribute bits.
    pub flags: TypeAttributes,
    /// Base type, if any.
    pub parent: Option<TypeIndex>,
    /// The enclosing type of a nested type.
    pub declaring_type: Option<TypeDefIndex>,
    /// The handle of this type used by value.
    pub byval_type: TypeIndex,
    /// Owned fields.
    pub fields: Range<u32>,
    /// Owned methods.
    pub methods: Range<u32>,
    /// Owned properties.
    pub properties: Range<u32>,
    /// Owned events.
    pub events: Range<u32>,
    /// Directly nested types, as a range into the nested-type list.
    pub nested_types: Range<u32>,
    /// Directly implemented interfaces, as a range into the interface list.
    pub interfaces: Range<u32>,
    /// Explicit overrides (`MethodImpl`).
    pub overrides: Vec<MethodOverride>,
    /// Generic parameters of a generic definition.
    pub generic_container: Option<GenericContainerIndex>,
    /// `ClassLayout.PackingSize`, zero when absent.
    pub packing_size: u8,
    /// `ClassLayout.ClassSize`, zero when absent.
    pub class_size: u32,
}

impl TypeDefinition {
    /// `namespace.name`, or just `name` for an empty namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// True for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeAttributes::INTERFACE)
    }

    /// True for generic definitions.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.generic_container.is_some()
    }
}

/// `body` implements `declaration`, a method of `interface` (or a base class).
#[derive(Debug, Clone)]
pub struct MethodOverride {
    /// The type declaring the overridden method, possibly a generic instance.
    pub declaring_type: TypeIndex,
    /// The overridden method, a definition of that type's generic definition.
    pub declaration: MethodIndex,
    /// The implementing method of the overriding type.
    pub body: MethodIndex,
}

/// A field definition.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    /// Field name.
    pub name: String,
    /// Declared type.
    pub ty: TypeIndex,
    /// The `Field` token in the declaring image.
    pub token: Token,
    /// Attribute bits.
    pub flags: FieldAttributes,
    /// Marked `[ThreadStatic]`.
    pub thread_static: bool,
    /// `FieldLayout.Offset` for explicit layout, relative to the start of the instance data.
    pub offset: Option<u32>,
}

/// A method definition.
#[derive(Debug, Clone)]
pub struct MethodDefinition {
    /// Method name.
    pub name: String,
    /// The declaring type.
    pub declaring_type: TypeDefIndex,
    /// The `MethodDef` token in the declaring image.
    pub token: Token,
    /// Attribute bits.
    pub flags: MethodAttributes,
    /// `MethodImplAttributes` bits.
    pub impl_flags: u16,
    /// Return type.
    pub return_type: TypeIndex,
    /// Parameters, without `this`.
    pub parameters: Range<u32>,
    /// Generic parameters of a generic method.
    pub generic_container: Option<GenericContainerIndex>,
    /// Index into the AOT code table; `None` for abstract methods and for methods only available
    /// to the interpreter.
    pub code: Option<u32>,
}

/// A method parameter.
#[derive(Debug, Clone)]
pub struct ParameterDefinition {
    /// Parameter name.
    pub name: String,
    /// Declared type.
    pub ty: TypeIndex,
}

/// A property definition.
#[derive(Debug, Clone)]
pub struct PropertyDefinition {
    /// Property name.
    pub name: String,
    /// Attribute bits.
    pub flags: u16,
    /// The getter.
    pub get: Option<MethodIndex>,
    /// The setter.
    pub set: Option<MethodIndex>,
}

/// An event definition.
#[derive(Debug, Clone)]
pub struct EventDefinition {
    /// Event name.
    pub name: String,
    /// The delegate type.
    pub ty: TypeIndex,
    /// The add accessor.
    pub add: Option<MethodIndex>,
    /// The remove accessor.
    pub remove: Option<MethodIndex>,
    /// The raise accessor.
    pub raise: Option<MethodIndex>,
}

/// The owner of a generic container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericOwner {
    /// A generic type definition.
    Type(TypeDefIndex),
    /// A generic method definition.
    Method(MethodIndex),
}

/// The generic parameters of a type or method definition.
#[derive(Debug, Clone)]
pub struct GenericContainer {
    /// The owning definition.
    pub owner: GenericOwner,
    /// The parameters, in number order.
    pub parameters: Range<u32>,
}

impl GenericContainer {
    /// Number of parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// True for method containers.
    #[must_use]
    pub fn is_method(&self) -> bool {
        matches!(self.owner, GenericOwner::Method(_))
    }
}

/// A generic parameter.
#[derive(Debug, Clone)]
pub struct GenericParameter {
    /// Parameter name, `T`.
    pub name: String,
    /// Zero-based position in the owner's parameter list.
    pub number: u16,
    /// `GenericParamAttributes` bits.
    pub flags: u16,
    /// The container.
    pub owner: GenericContainerIndex,
    /// Constraint types.
    pub constraints: Vec<TypeIndex>,
}

pub(crate) fn range_indices<I: From<usize>>(range: &Range<u32>) -> impl Iterator<Item = I> {
    (range.start as usize..range.end as usize).map(I::from)
}


//! Stable indices into the AOT metadata tables.
//!
//! All indices are 0-based positions in the flat tables of [`crate::metadata::aot::AotMetadata`],
//! shared across every image the store holds.

define_index!(
    /// An assembly of the AOT store.
    AssemblyIndex
);
define_index!(
    /// An image (module) of the AOT store.
    ImageIndex
);
define_index!(
    /// A type definition.
    TypeDefIndex
);
define_index!(
    /// An entry of the type-handle table.
    TypeIndex
);
define_index!(
    /// A field definition.
    FieldIndex
);
define_index!(
    /// A method definition.
    MethodIndex
);
define_index!(
    /// A parameter definition.
    ParameterIndex
);
define_index!(
    /// A property definition.
    PropertyIndex
);
define_index!(
    /// An event definition.
    EventIndex
);
define_index!(
    /// A generic parameter container of a type or method.
    GenericContainerIndex
);
define_index!(
    /// A generic parameter.
    GenericParameterIndex
);

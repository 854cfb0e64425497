//! Runtime type handles.
//!
//! A [`RuntimeType`] is the structural description of a type as it appears in a signature: a
//! primitive, a reference to a definition, a constructed type or an open generic parameter. Class
//! descriptors are keyed by these handles, so equality and hashing are structural.

use std::{
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
    sync::Arc,
};

use crate::metadata::aot::TypeDefIndex;

/// An interned, immutable list of generic arguments.
///
/// Structurally equal argument lists are deduplicated by the runtime so they share one allocation;
/// equality checks the pointer first and falls back to comparing the arguments.
#[derive(Clone)]
pub struct GenericInst(Arc<[RuntimeType]>);

impl GenericInst {
    /// Wraps an argument list. Use [`crate::typesystem::GenericInstTable::intern`] to obtain the
    /// canonical instance.
    #[must_use]
    pub fn new(args: Vec<RuntimeType>) -> Self {
        GenericInst(Arc::from(args))
    }

    /// The arguments.
    #[must_use]
    pub fn args(&self) -> &[RuntimeType] {
        &self.0
    }

    /// True if both lists are the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &GenericInst) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// True if any argument mentions a generic parameter.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.0.iter().any(RuntimeType::contains_generic_parameters)
    }
}

impl Deref for GenericInst {
    type Target = [RuntimeType];

    fn deref(&self) -> &[RuntimeType] {
        &self.0
    }
}

impl PartialEq for GenericInst {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0[..] == other.0[..]
    }
}

impl Eq for GenericInst {}

impl Hash for GenericInst {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0[..].hash(state);
    }
}

impl fmt::Debug for GenericInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// The structural description of a type.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[allow(missing_docs)]
pub enum RuntimeType {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    I,
    U,
    String,
    Object,
    TypedByRef,
    /// A reference type definition.
    Class(TypeDefIndex),
    /// A value type definition.
    ValueType(TypeDefIndex),
    /// A generic definition closed (or partially closed) over `args`.
    GenericInst {
        definition: TypeDefIndex,
        args: GenericInst,
    },
    Ptr(Box<RuntimeType>),
    ByRef(Box<RuntimeType>),
    /// A single-dimensional, zero-based array.
    SzArray(Box<RuntimeType>),
    /// A multi-dimensional array.
    Array {
        element: Box<RuntimeType>,
        rank: u8,
    },
    /// The nth generic parameter of the enclosing type.
    Var(u16),
    /// The nth generic parameter of the enclosing method.
    MVar(u16),
    FnPtr,
}

impl RuntimeType {
    /// True for the built-in primitive value types (including native integers).
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            RuntimeType::Boolean
                | RuntimeType::Char
                | RuntimeType::I1
                | RuntimeType::U1
                | RuntimeType::I2
                | RuntimeType::U2
                | RuntimeType::I4
                | RuntimeType::U4
                | RuntimeType::I8
                | RuntimeType::U8
                | RuntimeType::R4
                | RuntimeType::R8
                | RuntimeType::I
                | RuntimeType::U
        )
    }

    /// Size and alignment of a primitive, pointer-like or reference type, independent of any
    /// definition. Returns `None` for value type definitions, generic instances and open parameters.
    #[must_use]
    pub fn intrinsic_size(&self, pointer_size: u32) -> Option<(u32, u32)> {
        match self {
            RuntimeType::Boolean | RuntimeType::I1 | RuntimeType::U1 => Some((1, 1)),
            RuntimeType::Char | RuntimeType::I2 | RuntimeType::U2 => Some((2, 2)),
            RuntimeType::I4 | RuntimeType::U4 | RuntimeType::R4 => Some((4, 4)),
            RuntimeType::I8 | RuntimeType::U8 | RuntimeType::R8 => Some((8, 8)),
            RuntimeType::I
            | RuntimeType::U
            | RuntimeType::Ptr(_)
            | RuntimeType::ByRef(_)
            | RuntimeType::FnPtr
            | RuntimeType::String
            | RuntimeType::Object
            | RuntimeType::Class(_)
            | RuntimeType::SzArray(_)
            | RuntimeType::Array { .. } => Some((pointer_size, pointer_size)),
            RuntimeType::TypedByRef => Some((pointer_size * 3, pointer_size)),
            RuntimeType::Void => Some((0, 1)),
            RuntimeType::ValueType(_)
            | RuntimeType::GenericInst { .. }
            | RuntimeType::Var(_)
            | RuntimeType::MVar(_) => None,
        }
    }

    /// True for kinds that are always stored as a managed reference.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            RuntimeType::String
                | RuntimeType::Object
                | RuntimeType::Class(_)
                | RuntimeType::SzArray(_)
                | RuntimeType::Array { .. }
        )
    }

    /// True if a generic parameter appears anywhere in this type.
    #[must_use]
    pub fn contains_generic_parameters(&self) -> bool {
        match self {
            RuntimeType::Var(_) | RuntimeType::MVar(_) => true,
            RuntimeType::GenericInst { args, .. } => args.is_open(),
            RuntimeType::Ptr(inner)
            | RuntimeType::ByRef(inner)
            | RuntimeType::SzArray(inner)
            | RuntimeType::Array { element: inner, .. } => inner.contains_generic_parameters(),
            _ => false,
        }
    }

    /// Nesting depth of generic instantiations: `int` is 0, `List<int>` is 1, `List<List<int>>` is 2.
    /// Arrays and pointers are transparent.
    #[must_use]
    pub fn generic_depth(&self) -> u32 {
        match self {
            RuntimeType::GenericInst { args, .. } => {
                1 + args.iter().map(RuntimeType::generic_depth).max().unwrap_or(0)
            }
            RuntimeType::Ptr(inner)
            | RuntimeType::ByRef(inner)
            | RuntimeType::SzArray(inner)
            | RuntimeType::Array { element: inner, .. } => inner.generic_depth(),
            _ => 0,
        }
    }

    /// The definition this type is built on, for definitions and generic instances.
    #[must_use]
    pub fn definition(&self) -> Option<TypeDefIndex> {
        match self {
            RuntimeType::Class(def)
            | RuntimeType::ValueType(def)
            | RuntimeType::GenericInst {
                definition: def, ..
            } => Some(*def),
            _ => None,
        }
    }

    /// The element of a pointer, by-ref or array type.
    #[must_use]
    pub fn element(&self) -> Option<&RuntimeType> {
        match self {
            RuntimeType::Ptr(inner)
            | RuntimeType::ByRef(inner)
            | RuntimeType::SzArray(inner)
            | RuntimeType::Array { element: inner, .. } => Some(inner),
            _ => None,
        }
    }
}

/// The generic arguments in scope while resolving a signature.
#[derive(Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct GenericContext {
    /// Arguments of the enclosing generic type instance.
    pub class_inst: Option<GenericInst>,
    /// Arguments of the enclosing generic method instance.
    pub method_inst: Option<GenericInst>,
}

impl GenericContext {
    /// A context with no arguments.
    #[must_use]
    pub fn empty() -> Self {
        GenericContext::default()
    }

    /// A context carrying type arguments only.
    #[must_use]
    pub fn for_class(inst: GenericInst) -> Self {
        GenericContext {
            class_inst: Some(inst),
            method_inst: None,
        }
    }

    /// True if neither list is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.class_inst.is_none() && self.method_inst.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(def: u32, arg: RuntimeType) -> RuntimeType {
        RuntimeType::GenericInst {
            definition: TypeDefIndex(def),
            args: GenericInst::new(vec![arg]),
        }
    }

    #[test]
    fn generic_inst_equality_is_structural() {
        let a = GenericInst::new(vec![RuntimeType::I4, RuntimeType::String]);
        let b = GenericInst::new(vec![RuntimeType::I4, RuntimeType::String]);
        let c = GenericInst::new(vec![RuntimeType::I4]);
        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ptr_eq(&a.clone()));
    }

    #[test]
    fn open_types() {
        assert!(RuntimeType::Var(0).contains_generic_parameters());
        assert!(list_of(3, RuntimeType::MVar(1)).contains_generic_parameters());
        assert!(RuntimeType::SzArray(Box::new(RuntimeType::Var(0))).contains_generic_parameters());
        assert!(!list_of(3, RuntimeType::I4).contains_generic_parameters());
    }

    #[test]
    fn depth_counts_nested_instances() {
        assert_eq!(RuntimeType::I4.generic_depth(), 0);
        let one = list_of(3, RuntimeType::I4);
        assert_eq!(one.generic_depth(), 1);
        let two = list_of(3, one.clone());
        assert_eq!(two.generic_depth(), 2);
        assert_eq!(RuntimeType::SzArray(Box::new(two)).generic_depth(), 2);
    }

    #[test]
    fn intrinsic_sizes() {
        assert_eq!(RuntimeType::U1.intrinsic_size(8), Some((1, 1)));
        assert_eq!(RuntimeType::R8.intrinsic_size(4), Some((8, 8)));
        assert_eq!(RuntimeType::Object.intrinsic_size(4), Some((4, 4)));
        assert_eq!(RuntimeType::TypedByRef.intrinsic_size(8), Some((24, 8)));
        assert_eq!(RuntimeType::ValueType(TypeDefIndex(0)).intrinsic_size(8), None);
    }
}

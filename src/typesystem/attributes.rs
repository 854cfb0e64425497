//! ECMA-335 attribute bit sets for types, fields and methods.

use bitflags::bitflags;

bitflags! {
    /// `TypeAttributes` (II.23.1.15).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeAttributes: u32 {
        /// Visible outside the assembly.
        const PUBLIC = 0x0000_0001;
        /// Nested and public.
        const NESTED_PUBLIC = 0x0000_0002;
        /// Mask of the visibility bits.
        const VISIBILITY_MASK = 0x0000_0007;
        /// Fields are laid out in declaration order.
        const SEQUENTIAL_LAYOUT = 0x0000_0008;
        /// Fields carry explicit offsets.
        const EXPLICIT_LAYOUT = 0x0000_0010;
        /// Mask of the layout bits.
        const LAYOUT_MASK = 0x0000_0018;
        /// The type is an interface.
        const INTERFACE = 0x0000_0020;
        /// The type can not be instantiated.
        const ABSTRACT = 0x0000_0080;
        /// The type can not be derived from.
        const SEALED = 0x0000_0100;
        /// The name is special.
        const SPECIAL_NAME = 0x0000_0400;
        /// The runtime checks the name.
        const RT_SPECIAL_NAME = 0x0000_0800;
        /// The type is imported.
        const IMPORT = 0x0000_1000;
        /// The type is serializable.
        const SERIALIZABLE = 0x0000_2000;
        /// Static initialization may run any time before the first static field access.
        const BEFORE_FIELD_INIT = 0x0010_0000;

        const _ = !0;
    }
}

bitflags! {
    /// `FieldAttributes` (II.23.1.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldAttributes: u16 {
        /// Accessible only from the declaring type.
        const PRIVATE = 0x0001;
        /// Accessible everywhere.
        const PUBLIC = 0x0006;
        /// Mask of the access bits.
        const ACCESS_MASK = 0x0007;
        /// Belongs to the type rather than instances.
        const STATIC = 0x0010;
        /// Assignable only during initialization.
        const INIT_ONLY = 0x0020;
        /// A compile-time constant with no storage.
        const LITERAL = 0x0040;
        /// Not serialized.
        const NOT_SERIALIZED = 0x0080;
        /// Has an RVA.
        const HAS_FIELD_RVA = 0x0100;
        /// The name is special.
        const SPECIAL_NAME = 0x0200;
        /// The runtime checks the name.
        const RT_SPECIAL_NAME = 0x0400;
        /// Has a default value.
        const HAS_DEFAULT = 0x8000;

        const _ = !0;
    }
}

bitflags! {
    /// `MethodAttributes` (II.23.1.10).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodAttributes: u16 {
        /// Accessible only from the declaring type.
        const PRIVATE = 0x0001;
        /// Accessible everywhere.
        const PUBLIC = 0x0006;
        /// Mask of the access bits.
        const MEMBER_ACCESS_MASK = 0x0007;
        /// Does not take `this`.
        const STATIC = 0x0010;
        /// Can not be overridden.
        const FINAL = 0x0020;
        /// Dispatched through the vtable.
        const VIRTUAL = 0x0040;
        /// Hidden by name and signature.
        const HIDE_BY_SIG = 0x0080;
        /// Always gets a new vtable slot.
        const NEW_SLOT = 0x0100;
        /// Overridable only where accessible.
        const STRICT = 0x0200;
        /// Has no implementation.
        const ABSTRACT = 0x0400;
        /// The name is special.
        const SPECIAL_NAME = 0x0800;
        /// The runtime checks the name.
        const RT_SPECIAL_NAME = 0x1000;
        /// Implemented through platform invoke.
        const PINVOKE_IMPL = 0x2000;

        const _ = !0;
    }
}

impl TypeAttributes {
    /// True for explicit layout.
    #[must_use]
    pub fn is_explicit_layout(self) -> bool {
        self & TypeAttributes::LAYOUT_MASK == TypeAttributes::EXPLICIT_LAYOUT
    }
}

impl FieldAttributes {
    /// True for fields with storage in instances.
    #[must_use]
    pub fn is_instance(self) -> bool {
        !self.contains(FieldAttributes::STATIC)
    }
}

impl MethodAttributes {
    /// True for methods that always take a fresh vtable slot.
    #[must_use]
    pub fn is_new_slot(self) -> bool {
        self.contains(MethodAttributes::NEW_SLOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_bits() {
        assert!(TypeAttributes::from_bits_retain(0x0010_0011).is_explicit_layout());
        assert!(!TypeAttributes::from_bits_retain(0x0000_0009).is_explicit_layout());
    }

    #[test]
    fn unknown_bits_are_kept() {
        let flags = MethodAttributes::from_bits_retain(0x8000 | 0x0040);
        assert!(flags.contains(MethodAttributes::VIRTUAL));
        assert_eq!(flags.bits(), 0x8040);
    }

    #[test]
    fn static_fields() {
        assert!(FieldAttributes::PUBLIC.is_instance());
        assert!(!(FieldAttributes::PUBLIC | FieldAttributes::STATIC).is_instance());
    }
}

//! Class descriptors and their members.
//!
//! A [`Class`] is created as an identity-only shell and filled in stage by stage. Every stage
//! result lives in a write-once cell, written by the thread holding the metadata lock and read
//! without locking afterwards. Consumers go through [`crate::runtime::Runtime::init_class`] (or
//! [`crate::runtime::Runtime::try_class`]) before touching staged data.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    OnceLock, RwLock,
};

use bitflags::bitflags;

use crate::{
    error::InitializationError,
    metadata::{
        aot::{FieldIndex, GenericParameterIndex, ImageIndex, MethodIndex, TypeDefIndex},
        token::Token,
    },
    runtime::gc::GcDescriptor,
    typesystem::{FieldAttributes, GenericInst, MethodAttributes, RuntimeType, TypeAttributes},
};

define_index!(
    /// Identity of a class descriptor in the runtime arena.
    ClassId
);
define_index!(
    /// Identity of a method descriptor in the runtime arena.
    MethodId
);

bitflags! {
    /// Derived properties of a class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassFlags: u32 {
        /// Instances are stored inline.
        const VALUE_TYPE = 0x0001;
        /// Derives from `System.Enum`.
        const ENUM = 0x0002;
        /// An interface.
        const INTERFACE = 0x0004;
        /// Can not be instantiated.
        const ABSTRACT = 0x0008;
        /// Can not be derived from.
        const SEALED = 0x0010;
        /// A generic definition or an instance with open arguments.
        const OPEN_GENERIC = 0x0020;
        /// Field offsets come from metadata.
        const EXPLICIT_LAYOUT = 0x0040;
        /// Declares a static constructor.
        const HAS_STATIC_CONSTRUCTOR = 0x0080;
        /// Overrides `Object.Finalize`. Set by vtable setup.
        const HAS_FINALIZER = 0x0100;
        /// Instances contain managed references. Set by layout.
        const HAS_REFERENCES = 0x0200;
        /// Instances can be copied to native memory bit for bit. Set by layout.
        const BLITTABLE = 0x0400;
    }
}

/// What a class describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassKind {
    /// A type definition of the AOT store, including generic definitions.
    Definition(TypeDefIndex),
    /// A generic definition closed over arguments.
    GenericInstance {
        /// The class of the generic definition.
        definition: ClassId,
        /// The canonical argument list.
        args: GenericInst,
    },
    /// An array.
    Array {
        /// The element class.
        element: ClassId,
        /// Number of dimensions.
        rank: u8,
        /// Single-dimensional and zero-based.
        szarray: bool,
    },
    /// An unmanaged pointer.
    Pointer {
        /// The pointee class.
        element: ClassId,
    },
    /// A generic parameter, standing for its constraint set.
    GenericParameter(GenericParameterIndex),
}

/// Observable initialization state of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ClassState {
    /// Identity only.
    Shell,
    /// Field layout is in progress on the current call stack.
    LayoutPending,
    /// Size and field offsets are known.
    LayoutDone,
    /// Method descriptors exist.
    MethodsDone,
    /// The vtable is populated.
    VTableDone,
    /// Every stage succeeded.
    Initialized,
    /// A stage failed; the failure is re-raised on every access.
    InitializedWithError,
}

/// Result of probing a class without initializing it.
#[derive(Debug)]
pub enum ClassStatus<'a> {
    /// Initialized and usable.
    Ready(&'a Class),
    /// Not (yet) initialized.
    Pending,
    /// Initialization failed.
    Failed(InitializationError),
}

/// Where the value of a field lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOffset {
    /// Offset from the start of the object, header included.
    Instance(u32),
    /// Offset into the class's static storage.
    Static(u32),
    /// Offset into the calling thread's thread-static block.
    ThreadStatic(u32),
    /// A compile-time constant with no storage.
    Literal,
    /// Open generic classes are never laid out.
    Unassigned,
}

/// A field descriptor.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
    /// Declared type, inflated for generic instances.
    pub ty: RuntimeType,
    /// Attribute bits.
    pub flags: FieldAttributes,
    /// The `Field` token in the declaring image.
    pub token: Token,
    /// The declaring class.
    pub parent: ClassId,
    /// The AOT definition.
    pub definition: FieldIndex,
    /// Assigned by layout.
    pub offset: FieldOffset,
}

impl FieldInfo {
    /// True for fields stored in each instance.
    #[must_use]
    pub fn is_instance(&self) -> bool {
        self.flags.is_instance()
    }

    /// True for static and thread-static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldAttributes::STATIC)
    }
}

/// Identifies a field by its class and position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// The declaring class.
    pub class: ClassId,
    /// Position in the class's field list.
    pub index: u32,
}

/// Where the code of a method comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodCode {
    /// An entry of the AOT code table.
    Aot(u32),
    /// Only available to the interpreter.
    Interpreter,
    /// Abstract; dispatch goes through the vtable.
    Abstract,
    /// Provided by the runtime (array accessors).
    Runtime,
}

/// A method parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    /// Parameter name.
    pub name: String,
    /// Parameter type, inflated.
    pub ty: RuntimeType,
}

/// An instantiated generic method.
#[derive(Debug, Clone)]
pub struct GenericMethodInfo {
    /// The generic method definition this was instantiated from.
    pub definition: MethodId,
    /// The canonical method arguments.
    pub args: GenericInst,
}

/// A method descriptor.
#[derive(Debug)]
pub struct MethodInfo {
    /// Method name.
    pub name: String,
    /// The declaring class.
    pub declaring: ClassId,
    /// Attribute bits.
    pub flags: MethodAttributes,
    /// `MethodImplAttributes` bits.
    pub impl_flags: u16,
    /// The `MethodDef` token, null for synthesized methods.
    pub token: Token,
    /// Return type, inflated.
    pub return_type: RuntimeType,
    /// Parameters without `this`.
    pub parameters: Vec<ParameterInfo>,
    /// The AOT definition, `None` for synthesized methods.
    pub definition: Option<MethodIndex>,
    /// Number of method generic parameters.
    pub generic_arity: u16,
    /// Set for instantiated generic methods.
    pub generic_method: Option<GenericMethodInfo>,
    /// Code location.
    pub code: MethodCode,
    pub(crate) slot: OnceLock<u16>,
}

impl MethodInfo {
    /// The vtable slot, once the declaring class's vtable is set up. Non-virtual methods have none.
    #[must_use]
    pub fn slot(&self) -> Option<u16> {
        self.slot.get().copied()
    }

    /// True for open generic method definitions.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.generic_arity > 0 && self.generic_method.is_none()
    }

    /// True for virtual methods.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodAttributes::VIRTUAL)
    }

    /// True for abstract methods.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodAttributes::ABSTRACT)
    }

    /// True for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodAttributes::STATIC)
    }

    /// Parameter types only.
    pub fn parameter_types(&self) -> impl Iterator<Item = &RuntimeType> {
        self.parameters.iter().map(|p| &p.ty)
    }

    pub(crate) fn same_signature(&self, other: &MethodInfo) -> bool {
        self.name == other.name
            && self.generic_arity == other.generic_arity
            && self.return_type == other.return_type
            && self.parameters.len() == other.parameters.len()
            && self
                .parameters
                .iter()
                .zip(&other.parameters)
                .all(|(a, b)| a.ty == b.ty)
    }
}

/// A property descriptor.
#[derive(Debug, Clone)]
pub struct PropertyInfo {
    /// Property name.
    pub name: String,
    /// Attribute bits.
    pub flags: u16,
    /// The getter.
    pub get: Option<MethodId>,
    /// The setter.
    pub set: Option<MethodId>,
    /// The declaring class.
    pub parent: ClassId,
}

/// An event descriptor.
#[derive(Debug, Clone)]
pub struct EventInfo {
    /// Event name.
    pub name: String,
    /// The delegate type, inflated.
    pub ty: RuntimeType,
    /// The add accessor.
    pub add: Option<MethodId>,
    /// The remove accessor.
    pub remove: Option<MethodId>,
    /// The raise accessor.
    pub raise: Option<MethodId>,
    /// The declaring class.
    pub parent: ClassId,
}

/// One vtable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VTableSlot {
    /// The most derived implementation.
    Method(MethodId),
    /// Two equally specific default interface implementations exist.
    Ambiguous,
    /// No implementation, as in abstract classes.
    Unresolved,
}

impl VTableSlot {
    /// The method in the slot, if resolved.
    #[must_use]
    pub fn method(self) -> Option<MethodId> {
        match self {
            VTableSlot::Method(method) => Some(method),
            _ => None,
        }
    }
}

/// Where an interface's methods start in the vtable of an implementing class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceOffset {
    /// The interface.
    pub interface: ClassId,
    /// Slot of the interface's first method.
    pub offset: u16,
}

/// Instance layout of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLayout {
    /// Size of an instance including the object header.
    pub instance_size: u32,
    /// Bytes occupied by fields and the header, before rounding to the alignment.
    pub actual_size: u32,
    /// Alignment of the instance data.
    pub minimum_alignment: u8,
    /// Alignment of the instance data ignoring packing.
    pub natural_alignment: u8,
    /// Instances contain managed references.
    pub has_references: bool,
    /// Instances can be copied bit for bit.
    pub blittable: bool,
}

/// Static storage of a class.
#[derive(Debug)]
pub struct StaticLayout {
    /// Bytes of static storage.
    pub static_size: u32,
    /// Bytes of thread-static storage.
    pub thread_static_size: u32,
    /// Offset of this class's block in every thread-static area.
    pub thread_static_offset: Option<u32>,
    pub(crate) storage: RwLock<Box<[u8]>>,
}

/// A class descriptor.
#[derive(Debug)]
pub struct Class {
    /// Simple name, `List`1` or `Int32[]`.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// What the class describes.
    pub kind: ClassKind,
    /// The type of a value of this class.
    pub byval_type: RuntimeType,
    /// Metadata attribute bits.
    pub type_flags: TypeAttributes,
    /// The declaring image, if any.
    pub image: Option<ImageIndex>,
    /// The `TypeDef` token of the definition, null for constructed classes.
    pub token: Token,
    /// Base class.
    pub parent: Option<ClassId>,
    /// Element class of arrays and pointers.
    pub element: Option<ClassId>,
    /// Nesting depth of the generic arguments.
    pub generic_depth: u32,
    /// `ClassLayout.PackingSize`.
    pub packing_size: u8,
    /// `ClassLayout.ClassSize`.
    pub class_size: u32,

    pub(crate) flags: AtomicU32,
    pub(crate) interfaces: OnceLock<Box<[ClassId]>>,
    pub(crate) methods: OnceLock<Box<[MethodId]>>,
    pub(crate) hierarchy: OnceLock<Box<[ClassId]>>,
    pub(crate) overrides: OnceLock<Box<[(MethodId, MethodId)]>>,
    pub(crate) interface_offsets: OnceLock<Box<[InterfaceOffset]>>,
    pub(crate) vtable: OnceLock<Box<[VTableSlot]>>,
    pub(crate) layout: OnceLock<ClassLayout>,
    pub(crate) fields: OnceLock<Box<[FieldInfo]>>,
    pub(crate) statics: OnceLock<StaticLayout>,
    pub(crate) properties: OnceLock<Box<[PropertyInfo]>>,
    pub(crate) events: OnceLock<Box<[EventInfo]>>,
    pub(crate) nested_types: OnceLock<Box<[ClassId]>>,
    pub(crate) gc_descriptor: OnceLock<GcDescriptor>,
    pub(crate) size_init_pending: AtomicBool,
    pub(crate) init_pending: AtomicBool,
    pub(crate) initialized: AtomicBool,
    pub(crate) error: OnceLock<InitializationError>,
}

/// The identity part of a new class.
pub(crate) struct ClassShell {
    pub name: String,
    pub namespace: String,
    pub kind: ClassKind,
    pub byval_type: RuntimeType,
    pub type_flags: TypeAttributes,
    pub flags: ClassFlags,
    pub image: Option<ImageIndex>,
    pub token: Token,
    pub parent: Option<ClassId>,
    pub element: Option<ClassId>,
    pub generic_depth: u32,
    pub packing_size: u8,
    pub class_size: u32,
}

impl Class {
    pub(crate) fn new(shell: ClassShell) -> Self {
        Class {
            name: shell.name,
            namespace: shell.namespace,
            kind: shell.kind,
            byval_type: shell.byval_type,
            type_flags: shell.type_flags,
            image: shell.image,
            token: shell.token,
            parent: shell.parent,
            element: shell.element,
            generic_depth: shell.generic_depth,
            packing_size: shell.packing_size,
            class_size: shell.class_size,
            flags: AtomicU32::new(shell.flags.bits()),
            interfaces: OnceLock::new(),
            methods: OnceLock::new(),
            hierarchy: OnceLock::new(),
            overrides: OnceLock::new(),
            interface_offsets: OnceLock::new(),
            vtable: OnceLock::new(),
            layout: OnceLock::new(),
            fields: OnceLock::new(),
            statics: OnceLock::new(),
            properties: OnceLock::new(),
            events: OnceLock::new(),
            nested_types: OnceLock::new(),
            gc_descriptor: OnceLock::new(),
            size_init_pending: AtomicBool::new(false),
            init_pending: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            error: OnceLock::new(),
        }
    }

    /// `namespace.name`, or `name` for an empty namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// `ns:name` as used in type-load messages; the namespace part is omitted when empty.
    pub(crate) fn load_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.namespace, self.name)
        }
    }

    /// The current flags.
    #[must_use]
    pub fn flags(&self) -> ClassFlags {
        ClassFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn add_flags(&self, flags: ClassFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// True for value types, enums included.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flags().contains(ClassFlags::VALUE_TYPE)
    }

    /// True for enums.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.flags().contains(ClassFlags::ENUM)
    }

    /// True for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags().contains(ClassFlags::INTERFACE)
    }

    /// True for generic definitions and instances with open arguments.
    #[must_use]
    pub fn is_open_generic(&self) -> bool {
        self.flags().contains(ClassFlags::OPEN_GENERIC)
    }

    /// True for arrays.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.kind, ClassKind::Array { .. })
    }

    /// Array rank, zero for non-arrays.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self.kind {
            ClassKind::Array { rank, .. } => rank,
            _ => 0,
        }
    }

    /// The generic arguments of a generic instance.
    #[must_use]
    pub fn generic_args(&self) -> Option<&GenericInst> {
        match &self.kind {
            ClassKind::GenericInstance { args, .. } => Some(args),
            _ => None,
        }
    }

    /// The class of the generic definition of a generic instance.
    #[must_use]
    pub fn generic_definition(&self) -> Option<ClassId> {
        match self.kind {
            ClassKind::GenericInstance { definition, .. } => Some(definition),
            _ => None,
        }
    }

    /// The initialization state.
    #[must_use]
    pub fn state(&self) -> ClassState {
        if self.error.get().is_some() {
            ClassState::InitializedWithError
        } else if self.initialized.load(Ordering::Acquire) {
            ClassState::Initialized
        } else if self.vtable.get().is_some() && self.fields.get().is_some() {
            ClassState::VTableDone
        } else if self.methods.get().is_some() && self.fields.get().is_some() {
            ClassState::MethodsDone
        } else if self.fields.get().is_some() {
            ClassState::LayoutDone
        } else if self.size_init_pending.load(Ordering::Acquire) {
            ClassState::LayoutPending
        } else {
            ClassState::Shell
        }
    }

    /// True once every stage succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// The sticky initialization failure, if any.
    #[must_use]
    pub fn initialization_error(&self) -> Option<&InitializationError> {
        self.error.get()
    }

    /// Instance layout, once computed.
    #[must_use]
    pub fn layout(&self) -> Option<&ClassLayout> {
        self.layout.get()
    }

    /// Size of an instance including the header, once laid out.
    #[must_use]
    pub fn instance_size(&self) -> Option<u32> {
        self.layout.get().map(|l| l.instance_size)
    }

    /// Static storage sizes, once laid out.
    #[must_use]
    pub fn static_layout(&self) -> Option<&StaticLayout> {
        self.statics.get()
    }

    /// Fields, once set up.
    #[must_use]
    pub fn fields(&self) -> &[FieldInfo] {
        self.fields.get().map_or(&[], |f| f)
    }

    /// Methods, once set up.
    #[must_use]
    pub fn methods(&self) -> &[MethodId] {
        self.methods.get().map_or(&[], |m| m)
    }

    /// Directly implemented interfaces, once set up.
    #[must_use]
    pub fn interfaces(&self) -> &[ClassId] {
        self.interfaces.get().map_or(&[], |i| i)
    }

    /// Interface offsets, once the vtable is set up.
    #[must_use]
    pub fn interface_offsets(&self) -> &[InterfaceOffset] {
        self.interface_offsets.get().map_or(&[], |i| i)
    }

    /// The vtable, once set up.
    #[must_use]
    pub fn vtable(&self) -> &[VTableSlot] {
        self.vtable.get().map_or(&[], |v| v)
    }

    /// Ancestors from the root down to this class.
    #[must_use]
    pub fn hierarchy(&self) -> &[ClassId] {
        self.hierarchy.get().map_or(&[], |h| h)
    }

    /// Properties, once set up.
    #[must_use]
    pub fn properties(&self) -> &[PropertyInfo] {
        self.properties.get().map_or(&[], |p| p)
    }

    /// Events, once set up.
    #[must_use]
    pub fn events(&self) -> &[EventInfo] {
        self.events.get().map_or(&[], |e| e)
    }

    /// Nested types, once set up.
    #[must_use]
    pub fn nested_types(&self) -> &[ClassId] {
        self.nested_types.get().map_or(&[], |n| n)
    }

    /// The GC descriptor, once computed.
    #[must_use]
    pub fn gc_descriptor(&self) -> Option<&GcDescriptor> {
        self.gc_descriptor.get()
    }

    /// The vtable slot an interface starts at.
    #[must_use]
    pub fn interface_offset(&self, interface: ClassId) -> Option<u16> {
        self.interface_offsets()
            .iter()
            .find(|o| o.interface == interface)
            .map(|o| o.offset)
    }

    /// Records a failure. The first failure wins.
    pub(crate) fn record_error(&self, error: InitializationError) {
        let _ = self.error.set(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> ClassShell {
        ClassShell {
            name: "Point".to_string(),
            namespace: "Game".to_string(),
            kind: ClassKind::Definition(TypeDefIndex(3)),
            byval_type: RuntimeType::ValueType(TypeDefIndex(3)),
            type_flags: TypeAttributes::PUBLIC,
            flags: ClassFlags::VALUE_TYPE,
            image: None,
            token: Token(0x0200_0002),
            parent: None,
            element: None,
            generic_depth: 0,
            packing_size: 0,
            class_size: 0,
        }
    }

    #[test]
    fn names() {
        let class = Class::new(shell());
        assert_eq!(class.full_name(), "Game.Point");
        assert_eq!(class.load_name(), "Game:Point");
        let global = Class::new(ClassShell {
            namespace: String::new(),
            ..shell()
        });
        assert_eq!(global.load_name(), "Point");
    }

    #[test]
    fn state_follows_stages() {
        let class = Class::new(shell());
        assert_eq!(class.state(), ClassState::Shell);
        class.size_init_pending.store(true, Ordering::Release);
        assert_eq!(class.state(), ClassState::LayoutPending);
        class.fields.set(Box::new([])).unwrap();
        assert_eq!(class.state(), ClassState::LayoutDone);
        class.methods.set(Box::new([])).unwrap();
        assert_eq!(class.state(), ClassState::MethodsDone);
        class.vtable.set(Box::new([])).unwrap();
        assert_eq!(class.state(), ClassState::VTableDone);
        class.initialized.store(true, Ordering::Release);
        assert_eq!(class.state(), ClassState::Initialized);
    }

    #[test]
    fn first_error_sticks() {
        let class = Class::new(shell());
        class.record_error(InitializationError::type_load("first"));
        class.record_error(InitializationError::execution_engine("second"));
        assert_eq!(class.initialization_error().unwrap().message, "first");
        assert_eq!(class.state(), ClassState::InitializedWithError);
    }

    #[test]
    fn flags_accumulate() {
        let class = Class::new(shell());
        class.add_flags(ClassFlags::HAS_REFERENCES);
        assert!(class.is_value_type());
        assert!(class.flags().contains(ClassFlags::HAS_REFERENCES));
        assert!(!class.is_interface());
    }
}

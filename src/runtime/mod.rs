//! The runtime type system.
//!
//! [`Runtime`] owns every class and method descriptor materialized from an [`AotMetadata`] store,
//! the caches that make constructed types unique, and the single metadata lock that serializes
//! descriptor mutation. Nothing here is global: tests build a fresh runtime per case.
//!
//! # Architecture
//!
//! - **Arenas**: classes and methods live in append-only [`boxcar::Vec`]s and are addressed by
//!   [`ClassId`] / [`MethodId`]. Descriptors are never freed, so ids stay valid for the lifetime of
//!   the runtime and cross references (parent, element, interfaces) are plain ids.
//! - **Interning**: generic instances, arrays, pointers and generic parameters are created at
//!   most once per key through [`dashmap::DashMap`] entries. Creation only builds a shell;
//!   initialization is a separate step.
//! - **Staged initialization**: [`Runtime::init_class`] drives a class through interfaces,
//!   methods, hierarchy, vtable, fields/layout, properties, events, nested types and the GC
//!   descriptor. The fast path is a single atomic load; the slow path takes the metadata lock for
//!   the whole cascade. Failures are recorded on the class and re-raised forever after.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use dotrt::metadata::aot::{AotMetadataBuilder, NewField, TypeBody};
//! use dotrt::runtime::{Runtime, RuntimeConfig};
//! use dotrt::typesystem::{RuntimeType, TypeAttributes};
//!
//! let mut builder = AotMetadataBuilder::new();
//! let corlib = builder.with_corlib()?;
//! let game = builder.add_assembly("Game", [1, 0, 0, 0])?;
//! let pair = builder.declare_type(game, "Game", "Pair", TypeAttributes::PUBLIC)?;
//! builder.define_type(
//!     pair,
//!     TypeBody::value_type(&corlib)
//!         .field(NewField::instance("tag", RuntimeType::U1))
//!         .field(NewField::instance("value", RuntimeType::I8)),
//! )?;
//!
//! let runtime = Runtime::new(Arc::new(builder.build()?), RuntimeConfig::default())?;
//! let class = runtime.class_from_name("Game", "Pair")?;
//! assert_eq!(runtime.get_value_size(class)?, (16, 8));
//! # Ok::<(), dotrt::Error>(())
//! ```

mod array;
mod class;
mod config;
mod gc;
mod init;
mod object;
mod reflection;
mod statics;
mod stats;
mod vtable;

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use dashmap::DashMap;
use tracing::trace;

pub use class::{
    Class, ClassFlags, ClassId, ClassKind, ClassLayout, ClassState, ClassStatus, EventInfo,
    FieldInfo, FieldOffset, FieldRef, GenericMethodInfo, InterfaceOffset, MethodCode, MethodId,
    MethodInfo, ParameterInfo, PropertyInfo, StaticLayout, VTableSlot,
};
pub use config::RuntimeConfig;
pub use gc::{GcBitmap, GcDescriptor};
pub use object::{Allocator, Heap, ObjectRef};
pub use reflection::MemberCursor;
pub use stats::{RuntimeStats, StatsSnapshot};

use crate::{
    homologous::HomologousRegistry,
    metadata::aot::{AotMetadata, GenericParameterIndex, TypeDefIndex, TypeIndex},
    runtime::{
        class::ClassShell,
        statics::ThreadStaticArea,
    },
    typesystem::{GenericContext, GenericInst, GenericInstTable, RuntimeType, TypeAttributes},
    Error, Result,
};

/// Proof that the calling thread holds the metadata lock.
///
/// Setup stages take a guard reference so they can only run inside a locked region; nested
/// stages pass the same guard down instead of re-locking.
pub struct MetadataGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Longest parent chain accepted before a class is considered to inherit from itself.
const MAX_INHERITANCE_DEPTH: usize = 256;

/// The runtime context.
pub struct Runtime {
    pub(crate) metadata: Arc<AotMetadata>,
    pub(crate) config: RuntimeConfig,
    pub(crate) classes: boxcar::Vec<Class>,
    pub(crate) methods: boxcar::Vec<MethodInfo>,
    typedef_classes: Box<[OnceLock<ClassId>]>,
    pub(crate) generic_insts: GenericInstTable,
    generic_classes: DashMap<(TypeDefIndex, GenericInst), ClassId>,
    pub(crate) generic_methods: DashMap<(MethodId, GenericInst), MethodId>,
    array_classes: DashMap<(ClassId, u8, bool), ClassId>,
    pointer_classes: DashMap<ClassId, ClassId>,
    generic_param_classes: DashMap<GenericParameterIndex, ClassId>,
    metadata_lock: Mutex<()>,
    pub(crate) thread_statics: ThreadStaticArea,
    pub(crate) allocator: Box<dyn Allocator>,
    pub(crate) homologous: HomologousRegistry,
    pub(crate) stats: RuntimeStats,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("classes", &self.classes.count())
            .field("methods", &self.methods.count())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Creates a runtime over `metadata` with the default [`Heap`] allocator.
    pub fn new(metadata: Arc<AotMetadata>, config: RuntimeConfig) -> Result<Self> {
        Self::with_allocator(metadata, config, Box::new(Heap::default()))
    }

    /// Creates a runtime with a custom allocator.
    pub fn with_allocator(
        metadata: Arc<AotMetadata>,
        config: RuntimeConfig,
        allocator: Box<dyn Allocator>,
    ) -> Result<Self> {
        config.validate()?;
        let typedef_classes = (0..metadata.type_defs().len())
            .map(|_| OnceLock::new())
            .collect();
        Ok(Runtime {
            metadata,
            config,
            classes: boxcar::Vec::new(),
            methods: boxcar::Vec::new(),
            typedef_classes,
            generic_insts: GenericInstTable::new(),
            generic_classes: DashMap::new(),
            generic_methods: DashMap::new(),
            array_classes: DashMap::new(),
            pointer_classes: DashMap::new(),
            generic_param_classes: DashMap::new(),
            metadata_lock: Mutex::new(()),
            thread_statics: ThreadStaticArea::default(),
            allocator,
            homologous: HomologousRegistry::default(),
            stats: RuntimeStats::default(),
        })
    }

    /// The backing metadata.
    #[must_use]
    pub fn metadata(&self) -> &AotMetadata {
        &self.metadata
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of class descriptors created so far.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.count()
    }

    /// Takes the metadata lock.
    pub(crate) fn lock_metadata(&self) -> MetadataGuard<'_> {
        MetadataGuard {
            _guard: lock!(self.metadata_lock),
        }
    }

    /// Looks up a class descriptor. Does not initialize it.
    pub fn class(&self, id: ClassId) -> Result<&Class> {
        self.classes.get(id.index()).ok_or_else(|| out_of_bounds_error!())
    }

    /// Looks up a method descriptor.
    pub fn method(&self, id: MethodId) -> Result<&MethodInfo> {
        self.methods.get(id.index()).ok_or_else(|| out_of_bounds_error!())
    }

    /// Looks up a field descriptor. The declaring class must have its fields set up.
    pub fn field(&self, field: FieldRef) -> Result<&FieldInfo> {
        self.class(field.class)?
            .fields()
            .get(field.index as usize)
            .ok_or_else(|| out_of_bounds_error!())
    }

    pub(crate) fn push_method(&self, method: MethodInfo) -> MethodId {
        MethodId::from(self.methods.push(method))
    }

    fn push_class(&self, shell: ClassShell) -> ClassId {
        trace!(name = %shell.name, namespace = %shell.namespace, "created class shell");
        ClassId::from(self.classes.push(Class::new(shell)))
    }

    /// The class of a type definition, created as a shell on first use.
    pub fn class_from_typedef(&self, def: TypeDefIndex) -> Result<ClassId> {
        let slot = self
            .typedef_classes
            .get(def.index())
            .ok_or_else(|| Error::TypeNotFound(format!("{def}")))?;
        if let Some(id) = slot.get() {
            return Ok(*id);
        }

        self.check_inheritance(def)?;
        let metadata = &self.metadata;
        let type_def = metadata.type_def(def)?;
        let parent = type_def
            .parent
            .map(|handle| self.class_from_type_handle(handle))
            .transpose()?;

        let corlib = metadata.corlib();
        let declared = metadata.resolve_type_handle(type_def.byval_type)?;
        let byval_type = corlib.primitive_of(def).unwrap_or_else(|| declared.clone());

        let mut flags = ClassFlags::empty();
        if matches!(declared, RuntimeType::ValueType(_)) {
            flags |= ClassFlags::VALUE_TYPE;
        }
        if let Some(parent) = type_def.parent {
            if metadata.resolve_type_handle(parent)? == &RuntimeType::Class(corlib.enum_type) {
                flags |= ClassFlags::ENUM;
            }
        }
        if type_def.flags.contains(TypeAttributes::INTERFACE) {
            flags |= ClassFlags::INTERFACE;
        }
        if type_def.flags.contains(TypeAttributes::ABSTRACT) {
            flags |= ClassFlags::ABSTRACT;
        }
        if type_def.flags.contains(TypeAttributes::SEALED) {
            flags |= ClassFlags::SEALED;
        }
        if type_def.is_generic() {
            flags |= ClassFlags::OPEN_GENERIC;
        }
        if type_def.flags.is_explicit_layout() {
            flags |= ClassFlags::EXPLICIT_LAYOUT;
        }
        if metadata.methods_of(type_def).iter().any(|m| m.name == ".cctor") {
            flags |= ClassFlags::HAS_STATIC_CONSTRUCTOR;
        }

        let shell = ClassShell {
            name: type_def.name.clone(),
            namespace: type_def.namespace.clone(),
            kind: ClassKind::Definition(def),
            byval_type,
            type_flags: type_def.flags,
            flags,
            image: Some(type_def.image),
            token: type_def.token,
            parent,
            element: None,
            generic_depth: 0,
            packing_size: type_def.packing_size,
            class_size: type_def.class_size,
        };
        Ok(*slot.get_or_init(|| self.push_class(shell)))
    }

    /// Fails for parent chains that loop back onto themselves.
    fn check_inheritance(&self, def: TypeDefIndex) -> Result<()> {
        let mut current = def;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            let type_def = self.metadata.type_def(current)?;
            let Some(parent) = type_def.parent else {
                return Ok(());
            };
            match self.metadata.resolve_type_handle(parent)?.definition() {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
        Err(Error::TypeLoad(format!(
            "Could not load type '{}' because its inheritance chain is circular",
            self.metadata.type_def(def)?.full_name()
        )))
    }

    /// The class of an entry of the type-handle table.
    pub fn class_from_type_handle(&self, handle: TypeIndex) -> Result<ClassId> {
        let ty = self.metadata.resolve_type_handle(handle)?.clone();
        self.class_from_type(&ty)
    }

    /// The class of a closed type. Open generic parameters have no class outside a generic
    /// context; use [`Runtime::generic_param_class`] for them.
    pub fn class_from_type(&self, ty: &RuntimeType) -> Result<ClassId> {
        let corlib = *self.metadata.corlib();
        match ty {
            RuntimeType::Class(def) | RuntimeType::ValueType(def) => self.class_from_typedef(*def),
            RuntimeType::GenericInst { definition, args } => self.generic_class(*definition, args),
            RuntimeType::SzArray(element) => {
                let element = self.class_from_type(element)?;
                self.array_class(element, 1, true)
            }
            RuntimeType::Array { element, rank } => {
                let element = self.class_from_type(element)?;
                self.array_class(element, *rank, false)
            }
            RuntimeType::Ptr(element) => {
                let element = self.class_from_type(element)?;
                self.pointer_class(element)
            }
            RuntimeType::ByRef(element) => self.class_from_type(element),
            RuntimeType::FnPtr => self.class_from_typedef(corlib.intptr),
            RuntimeType::Var(number) | RuntimeType::MVar(number) => Err(Error::NotSupported(
                format!("generic parameter {number} has no class outside its generic context"),
            )),
            builtin => {
                let def = corlib
                    .definition_of(builtin)
                    .ok_or_else(|| Error::TypeNotFound(format!("{builtin:?}")))?;
                self.class_from_typedef(def)
            }
        }
    }

    /// The class of a top-level type found by namespace and name.
    pub fn class_from_name(&self, namespace: &str, name: &str) -> Result<ClassId> {
        let def = self
            .metadata
            .find_type_by_name(namespace, name)
            .ok_or_else(|| {
                Error::TypeNotFound(if namespace.is_empty() {
                    name.to_string()
                } else {
                    format!("{namespace}.{name}")
                })
            })?;
        self.class_from_typedef(def)
    }

    /// The enclosing class of a nested class.
    pub fn declaring_class(&self, id: ClassId) -> Result<Option<ClassId>> {
        let class = self.class(id)?;
        let def = match class.kind {
            ClassKind::Definition(def) => def,
            ClassKind::GenericInstance { definition, .. } => {
                return self.declaring_class(definition);
            }
            _ => return Ok(None),
        };
        self.metadata
            .type_def(def)?
            .declaring_type
            .map(|declaring| self.class_from_typedef(declaring))
            .transpose()
    }

    /// The unique instance of generic definition `definition` over `args`.
    ///
    /// Argument lists are interned first, so structurally equal lists from any thread map to the
    /// same class. Instantiations nested deeper than [`RuntimeConfig::max_generic_depth`] fail with
    /// [`Error::MaximumNestedGenerics`].
    pub fn generic_class(&self, definition: TypeDefIndex, args: &[RuntimeType]) -> Result<ClassId> {
        let args = self.generic_insts.intern(args.to_vec());
        let key = (definition, args.clone());
        if let Some(id) = self.generic_classes.get(&key) {
            return Ok(*id);
        }

        let type_def = self.metadata.type_def(definition)?;
        let arity = self.metadata.type_arity(type_def);
        if arity == 0 || arity != args.len() {
            return Err(Error::TypeLoad(format!(
                "Could not load type '{}' with {} generic arguments (expected {})",
                type_def.full_name(),
                args.len(),
                arity
            )));
        }

        let ty = RuntimeType::GenericInst {
            definition,
            args: args.clone(),
        };
        let depth = ty.generic_depth();
        if depth > self.config.max_generic_depth {
            return Err(Error::MaximumNestedGenerics {
                type_name: type_def.full_name(),
                depth,
            });
        }

        let definition_class = self.class_from_typedef(definition)?;
        let context = GenericContext::for_class(args.clone());
        let parent = match type_def.parent {
            Some(handle) => {
                let parent = self.metadata.resolve_type_handle(handle)?;
                let parent = self.generic_insts.inflate(parent, &context)?;
                Some(self.class_from_type(&parent)?)
            }
            None => None,
        };

        let template = self.class(definition_class)?;
        let mut flags = template.flags();
        flags.remove(ClassFlags::OPEN_GENERIC);
        if args.is_open() {
            flags |= ClassFlags::OPEN_GENERIC;
        }
        let byval_type = ty.clone();
        let shell = ClassShell {
            name: template.name.clone(),
            namespace: template.namespace.clone(),
            kind: ClassKind::GenericInstance {
                definition: definition_class,
                args,
            },
            byval_type,
            type_flags: template.type_flags,
            flags,
            image: template.image,
            token: template.token,
            parent,
            element: None,
            generic_depth: depth,
            packing_size: template.packing_size,
            class_size: template.class_size,
        };

        let id = *self.generic_classes.entry(key).or_insert_with(|| {
            RuntimeStats::bump(&self.stats.generic_classes);
            trace!(?ty, depth, "instantiated generic class");
            self.push_class(shell)
        });
        Ok(id)
    }

    /// The array class of `element` with `rank` dimensions.
    pub fn array_class(&self, element: ClassId, rank: u8, szarray: bool) -> Result<ClassId> {
        if rank == 0 || (szarray && rank != 1) {
            return Err(Error::NotSupported(format!("array of rank {rank}")));
        }
        let key = (element, rank, szarray);
        if let Some(id) = self.array_classes.get(&key) {
            return Ok(*id);
        }

        let parent = self.class_from_typedef(self.metadata.corlib().array)?;
        let element_class = self.class(element)?;
        let suffix = if szarray {
            "[]".to_string()
        } else if rank == 1 {
            "[*]".to_string()
        } else {
            format!("[{}]", ",".repeat(usize::from(rank) - 1))
        };
        let byval_type = if szarray {
            RuntimeType::SzArray(Box::new(element_class.byval_type.clone()))
        } else {
            RuntimeType::Array {
                element: Box::new(element_class.byval_type.clone()),
                rank,
            }
        };
        let mut flags = ClassFlags::SEALED;
        if element_class.is_open_generic() {
            flags |= ClassFlags::OPEN_GENERIC;
        }
        let shell = ClassShell {
            name: format!("{}{suffix}", element_class.name),
            namespace: element_class.namespace.clone(),
            kind: ClassKind::Array {
                element,
                rank,
                szarray,
            },
            byval_type,
            type_flags: TypeAttributes::PUBLIC | TypeAttributes::SEALED | TypeAttributes::SERIALIZABLE,
            flags,
            image: element_class.image,
            token: crate::metadata::token::Token::default(),
            parent: Some(parent),
            element: Some(element),
            generic_depth: element_class.generic_depth,
            packing_size: 0,
            class_size: 0,
        };
        Ok(*self
            .array_classes
            .entry(key)
            .or_insert_with(|| self.push_class(shell)))
    }

    /// The unmanaged pointer class of `element`.
    pub fn pointer_class(&self, element: ClassId) -> Result<ClassId> {
        if let Some(id) = self.pointer_classes.get(&element) {
            return Ok(*id);
        }
        let element_class = self.class(element)?;
        let shell = ClassShell {
            name: format!("{}*", element_class.name),
            namespace: element_class.namespace.clone(),
            kind: ClassKind::Pointer { element },
            byval_type: RuntimeType::Ptr(Box::new(element_class.byval_type.clone())),
            type_flags: TypeAttributes::PUBLIC | TypeAttributes::SEALED,
            flags: ClassFlags::SEALED,
            image: element_class.image,
            token: crate::metadata::token::Token::default(),
            parent: None,
            element: Some(element),
            generic_depth: element_class.generic_depth,
            packing_size: 0,
            class_size: 0,
        };
        Ok(*self
            .pointer_classes
            .entry(element)
            .or_insert_with(|| self.push_class(shell)))
    }

    /// The class standing for a generic parameter.
    pub fn generic_param_class(&self, param: GenericParameterIndex) -> Result<ClassId> {
        if let Some(id) = self.generic_param_classes.get(&param) {
            return Ok(*id);
        }
        let parameter = self.metadata.generic_parameter(param)?;
        let container = self.metadata.generic_container(parameter.owner)?;
        let byval_type = if container.is_method() {
            RuntimeType::MVar(parameter.number)
        } else {
            RuntimeType::Var(parameter.number)
        };
        let parent = self.class_from_typedef(self.metadata.corlib().object)?;
        let shell = ClassShell {
            name: parameter.name.clone(),
            namespace: String::new(),
            kind: ClassKind::GenericParameter(param),
            byval_type,
            type_flags: TypeAttributes::PUBLIC,
            flags: ClassFlags::OPEN_GENERIC,
            image: None,
            token: crate::metadata::token::TableId::GenericParam.token(param.0 + 1),
            parent: Some(parent),
            element: None,
            generic_depth: 0,
            packing_size: 0,
            class_size: 0,
        };
        Ok(*self
            .generic_param_classes
            .entry(param)
            .or_insert_with(|| self.push_class(shell)))
    }
}

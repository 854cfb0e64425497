//! Staged class initialization.
//!
//! [`Runtime::init_class`] is the only entry point consumers need. It checks the `initialized`
//! flag without locking and otherwise takes the metadata lock for the whole cascade, so a class is
//! either fully set up or permanently failed before any other thread can observe it.
//!
//! Each stage is idempotent and guarded by its write-once cell. Stages call each other through
//! the `*_locked` / `setup_*` functions, passing the [`MetadataGuard`] along; they never take the
//! lock themselves.

use std::sync::{atomic::Ordering, OnceLock, RwLock};

use tracing::{debug, trace, warn};

use crate::{
    error::InitializationError,
    metadata::aot::{range_indices, FieldIndex, MethodIndex, TypeDefIndex},
    runtime::{
        class::{
            Class, ClassFlags, ClassId, ClassKind, ClassLayout, ClassStatus, EventInfo, FieldInfo,
            FieldOffset, GenericMethodInfo, MethodCode, MethodId, MethodInfo, ParameterInfo,
            PropertyInfo, StaticLayout,
        },
        gc::FieldStorage,
        MetadataGuard, Runtime, RuntimeStats,
    },
    typesystem::{
        align_to, FieldAttributes, FieldLayout, GenericContext, MethodAttributes, RuntimeType,
        SizeAndAlignment,
    },
    Error, Result,
};

impl Runtime {
    /// Initializes a class and returns it.
    ///
    /// Runs every setup stage at most once. A class whose initialization failed keeps failing with
    /// the same error; nothing is retried.
    ///
    /// # Errors
    ///
    /// [`Error::TypeLoad`], [`Error::ExecutionEngine`] or [`Error::MaximumNestedGenerics`] when a
    /// stage fails, now or in an earlier call.
    pub fn init_class(&self, id: ClassId) -> Result<&Class> {
        let class = self.class(id)?;
        if class.is_initialized() {
            return Ok(class);
        }
        if let Some(error) = class.initialization_error() {
            return Err(error.into());
        }

        let guard = self.lock_metadata();
        self.init_locked(&guard, id)?;
        Ok(class)
    }

    /// Reports the state of a class without initializing it.
    pub fn try_class(&self, id: ClassId) -> Result<ClassStatus<'_>> {
        let class = self.class(id)?;
        Ok(if let Some(error) = class.initialization_error() {
            ClassStatus::Failed(error.clone())
        } else if class.is_initialized() {
            ClassStatus::Ready(class)
        } else {
            ClassStatus::Pending
        })
    }

    /// Initializes `id` under the metadata lock. A class already being initialized further up the
    /// call stack is left alone, which breaks cycles through interfaces and generic arguments.
    pub(crate) fn init_locked(&self, guard: &MetadataGuard<'_>, id: ClassId) -> Result<()> {
        let class = self.class(id)?;
        if class.is_initialized() {
            return Ok(());
        }
        if let Some(error) = class.initialization_error() {
            return Err(error.into());
        }
        if class.init_pending.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!(class = %class.full_name(), "initializing class");
        let result = self.run_stages(guard, id, class);
        class.init_pending.store(false, Ordering::Release);

        match result {
            Ok(()) => {
                class.initialized.store(true, Ordering::Release);
                RuntimeStats::bump(&self.stats.initialized_classes);
                debug!(class = %class.full_name(), state = %class.state(), "initialized class");
                Ok(())
            }
            Err(error) => Err(self.fail_class(class, &error)),
        }
    }

    fn run_stages(&self, guard: &MetadataGuard<'_>, id: ClassId, class: &Class) -> Result<()> {
        if let Some(definition) = class.generic_definition() {
            if class.flags().contains(ClassFlags::EXPLICIT_LAYOUT) {
                return Err(Error::TypeLoad(format!(
                    "Could not load type '{}' because generic types cannot have explicit layout.",
                    class.load_name()
                )));
            }
            self.init_locked(guard, definition)?;
        }

        if let Some(parent) = class.parent {
            self.init_locked(guard, parent)?;
        }
        self.setup_interfaces(guard, id)?;
        if let Some(element) = class.element {
            self.init_locked(guard, element)?;
        }
        self.setup_methods(guard, id)?;
        self.setup_type_hierarchy(guard, id)?;
        self.setup_vtable(guard, id)?;
        self.setup_fields(guard, id)?;

        self.setup_events(guard, id)?;
        self.setup_properties(guard, id)?;
        self.setup_nested_types(guard, id)?;
        if !class.is_open_generic() {
            let descriptor = self.build_gc_descriptor(guard, id)?;
            let _ = class.gc_descriptor.set(descriptor);
        }
        Ok(())
    }

    /// Makes `error` the sticky failure of `class` (unless one is already recorded) and returns
    /// the recorded failure.
    pub(crate) fn fail_class(&self, class: &Class, error: &Error) -> Error {
        if class.initialization_error().is_none() {
            class.record_error(InitializationError::from_error(error));
            RuntimeStats::bump(&self.stats.failed_classes);
            warn!(class = %class.full_name(), %error, "class initialization failed");
        }
        class
            .initialization_error()
            .map_or_else(|| Error::TypeLoad(class.load_name()), Error::from)
    }

    /// The definition a class reads its members from, and the arguments to inflate them with.
    pub(crate) fn definition_context(
        &self,
        class: &Class,
    ) -> Result<Option<(TypeDefIndex, GenericContext)>> {
        Ok(match &class.kind {
            ClassKind::Definition(def) => Some((*def, GenericContext::empty())),
            ClassKind::GenericInstance { definition, args } => match self.class(*definition)?.kind {
                ClassKind::Definition(def) => Some((def, GenericContext::for_class(args.clone()))),
                _ => None,
            },
            _ => None,
        })
    }

    /// Size and alignment of a value of type `ty` stored inline.
    ///
    /// Value types are laid out on demand. Asking for a value type whose layout is in progress on
    /// the current call stack means it contains itself; that type is failed.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn value_size(
        &self,
        guard: &MetadataGuard<'_>,
        ty: &RuntimeType,
    ) -> Result<SizeAndAlignment> {
        let pointer_size = self.config.pointer_size;
        if let Some((size, alignment)) = ty.intrinsic_size(pointer_size) {
            return Ok(SizeAndAlignment::new(size, alignment as u8));
        }
        if matches!(ty, RuntimeType::Var(_) | RuntimeType::MVar(_)) {
            return Err(Error::NotSupported(format!("size of open generic parameter {ty:?}")));
        }

        let id = self.class_from_type(ty)?;
        let class = self.class(id)?;
        if !class.is_value_type() {
            return Ok(SizeAndAlignment::new(pointer_size, pointer_size as u8));
        }

        if class.layout().is_none() {
            if class.size_init_pending.load(Ordering::Acquire) {
                let error = Error::ExecutionEngine(format!("Could not load type '{}'", class.load_name()));
                return Err(self.fail_class(class, &error));
            }
            self.setup_fields(guard, id)?;
        }
        let layout = class.layout().copied().ok_or_else(|| {
            Error::ExecutionEngine(format!("Could not load type '{}'", class.load_name()))
        })?;
        Ok(SizeAndAlignment::with_natural(
            layout.instance_size - self.config.object_header_size(),
            layout.minimum_alignment,
            layout.natural_alignment,
        ))
    }

    /// Creates the field descriptors of a class and lays it out.
    pub(crate) fn setup_fields(&self, guard: &MetadataGuard<'_>, id: ClassId) -> Result<()> {
        let class = self.class(id)?;
        if class.fields.get().is_some() || class.size_init_pending.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(error) = class.initialization_error() {
            return Err(error.into());
        }

        class.size_init_pending.store(true, Ordering::Release);
        let result = self.layout_class(guard, id, class);
        class.size_init_pending.store(false, Ordering::Release);
        result.map_err(|error| self.fail_class(class, &error))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn layout_class(&self, guard: &MetadataGuard<'_>, id: ClassId, class: &Class) -> Result<()> {
        let header = self.config.object_header_size();
        let pointer_size = self.config.pointer_size;

        match class.kind {
            ClassKind::Array { element, .. } => {
                let has_references = self.element_has_references(guard, element)?;
                let size = self.config.array_header_size();
                let _ = class.layout.set(ClassLayout {
                    instance_size: size,
                    actual_size: size,
                    minimum_alignment: pointer_size as u8,
                    natural_alignment: pointer_size as u8,
                    has_references,
                    blittable: false,
                });
                if has_references {
                    class.add_flags(ClassFlags::HAS_REFERENCES);
                }
                let _ = class.fields.set(Box::new([]));
                return Ok(());
            }
            ClassKind::Pointer { .. } => {
                let size = header + pointer_size;
                let _ = class.layout.set(ClassLayout {
                    instance_size: size,
                    actual_size: size,
                    minimum_alignment: pointer_size as u8,
                    natural_alignment: pointer_size as u8,
                    has_references: false,
                    blittable: true,
                });
                class.add_flags(ClassFlags::BLITTABLE);
                let _ = class.fields.set(Box::new([]));
                return Ok(());
            }
            _ => {}
        }

        let Some((def, context)) = self.definition_context(class)? else {
            let _ = class.fields.set(Box::new([]));
            return Ok(());
        };
        let type_def = self.metadata.type_def(def)?;
        let mut fields = range_indices::<FieldIndex>(&type_def.fields)
            .zip(self.metadata.fields_of(type_def))
            .map(|(definition, field)| {
                let declared = self.metadata.resolve_type_handle(field.ty)?;
                Ok(FieldInfo {
                    name: field.name.clone(),
                    ty: self.generic_insts.inflate(declared, &context)?,
                    flags: field.flags,
                    token: field.token,
                    parent: id,
                    definition,
                    offset: if field.flags.contains(FieldAttributes::LITERAL) {
                        FieldOffset::Literal
                    } else {
                        FieldOffset::Unassigned
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // Open generics have no size.
        if class.is_open_generic() {
            let _ = class.fields.set(fields.into_boxed_slice());
            return Ok(());
        }

        let is_value_type = class.is_value_type();
        let (parent_size, parent_actual, parent_alignment, mut has_references, mut blittable) =
            match class.parent {
                Some(parent) => {
                    self.setup_fields(guard, parent)?;
                    let layout = self.class(parent)?.layout().copied().ok_or_else(|| {
                        Error::ExecutionEngine(format!("Could not load type '{}'", class.load_name()))
                    })?;
                    (
                        layout.instance_size,
                        layout.actual_size,
                        if is_value_type { 1 } else { layout.minimum_alignment },
                        layout.has_references,
                        layout.blittable,
                    )
                }
                None => (header, header, pointer_size as u8, false, true),
            };

        let mut instance_fields = Vec::new();
        let mut sizes = Vec::new();
        for (index, field) in fields.iter().enumerate().filter(|(_, f)| f.is_instance()) {
            sizes.push(self.value_size(guard, &field.ty)?);
            instance_fields.push(index);
            match self.field_storage(&field.ty)? {
                FieldStorage::Reference => {
                    has_references = true;
                    blittable = false;
                }
                FieldStorage::Inline(value_class) => {
                    let layout = self.class(value_class)?.layout().copied();
                    has_references |= layout.is_some_and(|l| l.has_references);
                    blittable &= layout.is_some_and(|l| l.blittable);
                }
                FieldStorage::Scalar => blittable &= is_blittable_scalar(&field.ty),
            }
        }

        let packing = class.packing_size;
        let (offsets, mut instance_size, mut actual_size, mut minimum_alignment, natural_alignment) =
            if class.flags().contains(ClassFlags::EXPLICIT_LAYOUT) {
                let mut end = parent_size;
                let mut minimum_alignment = parent_alignment.max(1);
                let mut natural_alignment = 0;
                let mut offsets = Vec::with_capacity(sizes.len());
                for (size, index) in sizes.iter().zip(&instance_fields) {
                    let explicit = self
                        .metadata
                        .field(fields[*index].definition)?
                        .offset
                        .unwrap_or(0);
                    let offset = parent_size + explicit;
                    offsets.push(offset);
                    end = end.max(offset + size.size.max(1));
                    minimum_alignment =
                        minimum_alignment.max(FieldLayout::effective_alignment(size, packing));
                    natural_alignment = natural_alignment
                        .max(size.alignment)
                        .max(size.natural_alignment);
                }
                let size = align_to(end, u32::from(minimum_alignment));
                (offsets, size, size, minimum_alignment, natural_alignment)
            } else {
                let data =
                    FieldLayout::layout_fields(parent_size, parent_actual, parent_alignment, packing, &sizes);
                (
                    data.field_offsets,
                    data.class_size,
                    data.actual_class_size,
                    data.minimum_alignment,
                    data.natural_alignment,
                )
            };

        if is_value_type && instance_fields.is_empty() {
            instance_size = header + 1;
            actual_size = instance_size;
            minimum_alignment = 1;
        }
        if class.class_size != 0 {
            instance_size = instance_size.max(header + class.class_size);
            actual_size = actual_size.max(instance_size);
        }

        for (offset, index) in offsets.into_iter().zip(&instance_fields) {
            fields[*index].offset = FieldOffset::Instance(offset);
        }

        let layout = ClassLayout {
            instance_size,
            actual_size,
            minimum_alignment,
            natural_alignment: if natural_alignment == 0 {
                minimum_alignment
            } else {
                natural_alignment
            },
            has_references,
            blittable: blittable && !has_references,
        };
        // Published before the static buckets so statics of the class's own type can be sized.
        let _ = class.layout.set(layout);
        if layout.has_references {
            class.add_flags(ClassFlags::HAS_REFERENCES);
        }
        if layout.blittable {
            class.add_flags(ClassFlags::BLITTABLE);
        }
        RuntimeStats::bump(&self.stats.layouts);
        trace!(
            class = %class.full_name(),
            instance_size,
            alignment = minimum_alignment,
            has_references,
            "laid out instance fields"
        );

        let statics = self.layout_statics(guard, &mut fields)?;
        let _ = class.statics.set(statics);
        let _ = class.fields.set(fields.into_boxed_slice());
        Ok(())
    }

    /// Lays out the static and thread-static buckets and assigns their offsets.
    fn layout_statics(&self, guard: &MetadataGuard<'_>, fields: &mut [FieldInfo]) -> Result<StaticLayout> {
        let mut statics = Vec::new();
        let mut thread_statics = Vec::new();
        for (index, field) in fields.iter().enumerate() {
            if !field.is_static() || field.offset == FieldOffset::Literal {
                continue;
            }
            let size = self.value_size(guard, &field.ty)?;
            if self.metadata.field(field.definition)?.thread_static {
                thread_statics.push((index, size));
            } else {
                statics.push((index, size));
            }
        }

        let static_data =
            FieldLayout::layout_statics(&statics.iter().map(|(_, s)| *s).collect::<Vec<_>>());
        for ((index, _), offset) in statics.iter().zip(&static_data.field_offsets) {
            fields[*index].offset = FieldOffset::Static(*offset);
        }
        let static_size = if statics.is_empty() { 0 } else { static_data.class_size };

        let mut thread_static_size = 0;
        let mut thread_static_offset = None;
        if !thread_statics.is_empty() {
            let data =
                FieldLayout::layout_statics(&thread_statics.iter().map(|(_, s)| *s).collect::<Vec<_>>());
            let base = self
                .thread_statics
                .reserve(data.class_size, u32::from(data.minimum_alignment));
            for ((index, _), offset) in thread_statics.iter().zip(&data.field_offsets) {
                fields[*index].offset = FieldOffset::ThreadStatic(base + offset);
            }
            thread_static_size = data.class_size;
            thread_static_offset = Some(base);
        }

        Ok(StaticLayout {
            static_size,
            thread_static_size,
            thread_static_offset,
            storage: RwLock::new(vec![0; static_size as usize].into_boxed_slice()),
        })
    }

    fn element_has_references(&self, guard: &MetadataGuard<'_>, element: ClassId) -> Result<bool> {
        let class = self.class(element)?;
        if class.is_open_generic() {
            return Ok(false);
        }
        if !class.is_value_type() {
            return Ok(!matches!(class.kind, ClassKind::Pointer { .. }));
        }
        self.setup_fields(guard, element)?;
        Ok(class.layout().is_some_and(|l| l.has_references))
    }

    /// Creates the method descriptors of a class.
    pub(crate) fn setup_methods(&self, _guard: &MetadataGuard<'_>, id: ClassId) -> Result<()> {
        let class = self.class(id)?;
        if class.methods.get().is_some() {
            return Ok(());
        }

        let methods = match class.kind {
            ClassKind::Array {
                element,
                rank,
                szarray,
            } => self.array_methods(id, element, rank, szarray)?,
            _ => match self.definition_context(class)? {
                Some((def, context)) => self.definition_methods(id, def, &context)?,
                None => Vec::new(),
            },
        };
        let _ = class.methods.set(methods.into_boxed_slice());
        Ok(())
    }

    fn definition_methods(
        &self,
        id: ClassId,
        def: TypeDefIndex,
        context: &GenericContext,
    ) -> Result<Vec<MethodId>> {
        let type_def = self.metadata.type_def(def)?;
        range_indices::<MethodIndex>(&type_def.methods)
            .zip(self.metadata.methods_of(type_def))
            .map(|(definition, method)| {
                let return_type = self
                    .generic_insts
                    .inflate(self.metadata.resolve_type_handle(method.return_type)?, context)?;
                let parameters = self
                    .metadata
                    .parameters_of(method)
                    .iter()
                    .map(|param| {
                        Ok(ParameterInfo {
                            name: param.name.clone(),
                            ty: self
                                .generic_insts
                                .inflate(self.metadata.resolve_type_handle(param.ty)?, context)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let code = match method.code {
                    Some(index) => MethodCode::Aot(index),
                    None if method.flags.contains(MethodAttributes::ABSTRACT) => MethodCode::Abstract,
                    None => MethodCode::Interpreter,
                };
                Ok(self.push_method(MethodInfo {
                    name: method.name.clone(),
                    declaring: id,
                    flags: method.flags,
                    impl_flags: method.impl_flags,
                    token: method.token,
                    return_type,
                    parameters,
                    definition: Some(definition),
                    generic_arity: u16::try_from(self.metadata.method_arity(method))
                        .map_err(|_| out_of_bounds_error!())?,
                    generic_method: None,
                    code,
                    slot: OnceLock::new(),
                }))
            })
            .collect()
    }

    /// The method of `class` created from definition `index`.
    pub(crate) fn method_of_definition(
        &self,
        class: &Class,
        index: MethodIndex,
    ) -> Result<MethodId> {
        class
            .methods()
            .iter()
            .copied()
            .find(|m| self.method(*m).is_ok_and(|m| m.definition == Some(index)))
            .ok_or_else(|| Error::MethodNotFound {
                type_name: class.full_name(),
                method: self
                    .metadata
                    .method(index)
                    .map(|m| m.name.clone())
                    .unwrap_or_default(),
            })
    }

    fn setup_properties(&self, _guard: &MetadataGuard<'_>, id: ClassId) -> Result<()> {
        let class = self.class(id)?;
        if class.properties.get().is_some() {
            return Ok(());
        }
        let mut properties = Vec::new();
        if let Some((def, _)) = self.definition_context(class)? {
            let type_def = self.metadata.type_def(def)?;
            for property in self.metadata.properties_of(type_def) {
                properties.push(PropertyInfo {
                    name: property.name.clone(),
                    flags: property.flags,
                    get: property
                        .get
                        .map(|m| self.method_of_definition(class, m))
                        .transpose()?,
                    set: property
                        .set
                        .map(|m| self.method_of_definition(class, m))
                        .transpose()?,
                    parent: id,
                });
            }
        }
        let _ = class.properties.set(properties.into_boxed_slice());
        Ok(())
    }

    fn setup_events(&self, _guard: &MetadataGuard<'_>, id: ClassId) -> Result<()> {
        let class = self.class(id)?;
        if class.events.get().is_some() {
            return Ok(());
        }
        let mut events = Vec::new();
        if let Some((def, context)) = self.definition_context(class)? {
            let type_def = self.metadata.type_def(def)?;
            for event in self.metadata.events_of(type_def) {
                let accessor = |m: Option<MethodIndex>| {
                    m.map(|m| self.method_of_definition(class, m)).transpose()
                };
                events.push(EventInfo {
                    name: event.name.clone(),
                    ty: self
                        .generic_insts
                        .inflate(self.metadata.resolve_type_handle(event.ty)?, &context)?,
                    add: accessor(event.add)?,
                    remove: accessor(event.remove)?,
                    raise: accessor(event.raise)?,
                    parent: id,
                });
            }
        }
        let _ = class.events.set(events.into_boxed_slice());
        Ok(())
    }

    fn setup_nested_types(&self, _guard: &MetadataGuard<'_>, id: ClassId) -> Result<()> {
        let class = self.class(id)?;
        if class.nested_types.get().is_some() {
            return Ok(());
        }
        let nested = match self.definition_context(class)? {
            Some((def, _)) => {
                let type_def = self.metadata.type_def(def)?;
                self.metadata
                    .nested_types_of(type_def)
                    .iter()
                    .map(|nested| self.class_from_typedef(*nested))
                    .collect::<Result<Vec<_>>>()?
            }
            None => Vec::new(),
        };
        let _ = class.nested_types.set(nested.into_boxed_slice());
        Ok(())
    }

    /// The unique instance of generic method `method` over `args`.
    ///
    /// `method` may be the generic definition or any instance of it. Argument lists are interned
    /// the same way as for generic classes.
    pub fn get_generic_method(&self, method: MethodId, args: &[RuntimeType]) -> Result<MethodId> {
        let info = self.method(method)?;
        let definition = info.generic_method.as_ref().map_or(method, |g| g.definition);
        let template = self.method(definition)?;
        let declaring = self.class(template.declaring)?;
        if template.generic_arity == 0 || usize::from(template.generic_arity) != args.len() {
            return Err(Error::MethodNotFound {
                type_name: declaring.full_name(),
                method: format!("{}`{}", template.name, args.len()),
            });
        }

        let args = self.generic_insts.intern(args.to_vec());
        let key = (definition, args.clone());
        if let Some(id) = self.generic_methods.get(&key) {
            return Ok(*id);
        }

        let depth = args.iter().map(RuntimeType::generic_depth).max().unwrap_or(0) + 1;
        if depth > self.config.max_generic_depth {
            return Err(Error::MaximumNestedGenerics {
                type_name: format!("{}::{}", declaring.full_name(), template.name),
                depth,
            });
        }

        let context = GenericContext {
            class_inst: None,
            method_inst: Some(args.clone()),
        };
        let return_type = self.generic_insts.inflate(&template.return_type, &context)?;
        let parameters = template
            .parameters
            .iter()
            .map(|p| {
                Ok(ParameterInfo {
                    name: p.name.clone(),
                    ty: self.generic_insts.inflate(&p.ty, &context)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let instance = MethodInfo {
            name: template.name.clone(),
            declaring: template.declaring,
            flags: template.flags,
            impl_flags: template.impl_flags,
            token: template.token,
            return_type,
            parameters,
            definition: template.definition,
            generic_arity: template.generic_arity,
            generic_method: Some(GenericMethodInfo {
                definition,
                args: args.clone(),
            }),
            code: template.code,
            slot: OnceLock::new(),
        };

        let id = *self.generic_methods.entry(key).or_insert_with(|| {
            RuntimeStats::bump(&self.stats.generic_methods);
            trace!(method = %instance.name, ?args, "instantiated generic method");
            self.push_method(instance)
        });
        Ok(id)
    }
}

/// Plain data that can be copied to native memory unchanged.
fn is_blittable_scalar(ty: &RuntimeType) -> bool {
    matches!(
        ty,
        RuntimeType::I1
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
            | RuntimeType::Ptr(_)
            | RuntimeType::FnPtr
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        error::InitializationErrorKind,
        metadata::aot::{AotMetadataBuilder, NewField, NewMethod, NewProperty, TypeBody},
        runtime::{ClassState, RuntimeConfig},
        typesystem::TypeAttributes,
    };

    fn runtime(build: impl FnOnce(&mut AotMetadataBuilder)) -> Runtime {
        let mut builder = AotMetadataBuilder::new();
        builder.with_corlib().unwrap();
        build(&mut builder);
        Runtime::new(Arc::new(builder.build().unwrap()), RuntimeConfig::default()).unwrap()
    }

    fn instance_offsets(class: &Class) -> Vec<u32> {
        class
            .fields()
            .iter()
            .filter_map(|f| match f.offset {
                FieldOffset::Instance(offset) => Some(offset),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn value_type_layout() {
        let rt = runtime(|b| {
            let corlib = b.corlib().unwrap();
            let game = b.add_assembly("Game", [1, 0, 0, 0]).unwrap();
            let t = b.declare_type(game, "Game", "Pair", TypeAttributes::PUBLIC).unwrap();
            b.define_type(
                t,
                TypeBody::value_type(&corlib)
                    .field(NewField::instance("tag", RuntimeType::U1))
                    .field(NewField::instance("value", RuntimeType::I8)),
            )
            .unwrap();
        });
        let id = rt.class_from_name("Game", "Pair").unwrap();
        let class = rt.init_class(id).unwrap();
        assert_eq!(class.state(), ClassState::Initialized);
        assert_eq!(instance_offsets(class), vec![16, 24]);
        assert_eq!(class.instance_size(), Some(32));
        assert!(class.flags().contains(ClassFlags::BLITTABLE));
        assert_eq!(class.gc_descriptor(), Some(&crate::runtime::GcDescriptor::NoReferences));
    }

    #[test]
    fn reference_type_inherits_parent_layout() {
        let rt = runtime(|b| {
            let corlib = b.corlib().unwrap();
            let game = b.add_assembly("Game", [1, 0, 0, 0]).unwrap();
            let base = b.declare_type(game, "Game", "Base", TypeAttributes::PUBLIC).unwrap();
            let derived = b.declare_type(game, "Game", "Derived", TypeAttributes::PUBLIC).unwrap();
            b.define_type(base, TypeBody::class(&corlib).field(NewField::instance("a", RuntimeType::I4)))
                .unwrap();
            b.define_type(
                derived,
                TypeBody::class(&corlib)
                    .extends(RuntimeType::Class(base))
                    .field(NewField::instance("name", RuntimeType::String))
                    .field(NewField::instance("b", RuntimeType::I4)),
            )
            .unwrap();
        });
        let id = rt.class_from_name("Game", "Derived").unwrap();
        let class = rt.init_class(id).unwrap();
        // Base ends at 20 and is rounded to 24; the string needs 8-byte alignment.
        assert_eq!(instance_offsets(class), vec![24, 32]);
        assert_eq!(class.instance_size(), Some(40));
        assert!(class.flags().contains(ClassFlags::HAS_REFERENCES));
        let descriptor = class.gc_descriptor().unwrap();
        assert_eq!(descriptor.reference_offsets(8), vec![24]);
    }

    #[test]
    fn empty_value_type_has_one_byte() {
        let rt = runtime(|b| {
            let corlib = b.corlib().unwrap();
            let game = b.add_assembly("Game", [1, 0, 0, 0]).unwrap();
            let t = b.declare_type(game, "Game", "Empty", TypeAttributes::PUBLIC).unwrap();
            b.define_type(t, TypeBody::value_type(&corlib)).unwrap();
        });
        let id = rt.class_from_name("Game", "Empty").unwrap();
        assert_eq!(rt.init_class(id).unwrap().instance_size(), Some(17));
    }

    #[test]
    fn explicit_layout_uses_metadata_offsets() {
        let rt = runtime(|b| {
            let corlib = b.corlib().unwrap();
            let game = b.add_assembly("Game", [1, 0, 0, 0]).unwrap();
            let t = b
                .declare_type(
                    game,
                    "Game",
                    "Union",
                    TypeAttributes::PUBLIC | TypeAttributes::EXPLICIT_LAYOUT,
                )
                .unwrap();
            b.define_type(
                t,
                TypeBody::value_type(&corlib)
                    .field(NewField::instance("wide", RuntimeType::I8).at(0))
                    .field(NewField::instance("narrow", RuntimeType::U1).at(0))
                    .field(NewField::instance("tail", RuntimeType::U1).at(8)),
            )
            .unwrap();
        });
        let id = rt.class_from_name("Game", "Union").unwrap();
        let class = rt.init_class(id).unwrap();
        assert_eq!(instance_offsets(class), vec![16, 16, 24]);
        assert_eq!(class.instance_size(), Some(32));
    }

    #[test]
    fn statics_are_laid_out_separately() {
        let rt = runtime(|b| {
            let corlib = b.corlib().unwrap();
            let game = b.add_assembly("Game", [1, 0, 0, 0]).unwrap();
            let t = b.declare_type(game, "Game", "Config", TypeAttributes::PUBLIC).unwrap();
            b.define_type(
                t,
                TypeBody::class(&corlib)
                    .field(NewField::statik("flag", RuntimeType::Boolean))
                    .field(NewField::statik("count", RuntimeType::I8))
                    .field(NewField::literal("Max", RuntimeType::I4))
                    .field(NewField::thread_static("local", RuntimeType::I4))
                    .field(NewField::instance("x", RuntimeType::I4)),
            )
            .unwrap();
        });
        let id = rt.class_from_name("Game", "Config").unwrap();
        let class = rt.init_class(id).unwrap();
        let offsets: Vec<_> = class.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets[0], FieldOffset::Static(0));
        assert_eq!(offsets[1], FieldOffset::Static(8));
        assert_eq!(offsets[2], FieldOffset::Literal);
        assert!(matches!(offsets[3], FieldOffset::ThreadStatic(_)));
        assert_eq!(offsets[4], FieldOffset::Instance(16));
        let statics = class.static_layout().unwrap();
        assert_eq!(statics.static_size, 16);
        assert_eq!(statics.thread_static_size, 4);
        assert!(statics.thread_static_offset.is_some());
    }

    #[test]
    fn self_embedding_value_type_fails_sticky() {
        let rt = runtime(|b| {
            let corlib = b.corlib().unwrap();
            let game = b.add_assembly("Game", [1, 0, 0, 0]).unwrap();
            let t = b.declare_type(game, "Game", "Loop", TypeAttributes::PUBLIC).unwrap();
            b.define_type(
                t,
                TypeBody::value_type(&corlib).field(NewField::instance("inner", RuntimeType::ValueType(t))),
            )
            .unwrap();
        });
        let id = rt.class_from_name("Game", "Loop").unwrap();
        let err = rt.init_class(id).unwrap_err();
        assert!(matches!(err, Error::ExecutionEngine(ref m) if m == "Could not load type 'Game:Loop'"));

        let class = rt.class(id).unwrap();
        assert_eq!(class.state(), ClassState::InitializedWithError);
        assert_eq!(
            class.initialization_error().unwrap().kind,
            InitializationErrorKind::ExecutionEngine
        );
        let layouts = rt.stats().layouts;
        assert!(rt.init_class(id).is_err());
        assert_eq!(rt.stats().layouts, layouts);
        assert_eq!(rt.stats().failed_classes, 1);
        assert!(matches!(rt.try_class(id).unwrap(), ClassStatus::Failed(_)));
    }

    #[test]
    fn static_field_of_own_type_is_allowed() {
        let rt = runtime(|b| {
            let corlib = b.corlib().unwrap();
            let game = b.add_assembly("Game", [1, 0, 0, 0]).unwrap();
            let t = b.declare_type(game, "Game", "Color", TypeAttributes::PUBLIC).unwrap();
            b.define_type(
                t,
                TypeBody::value_type(&corlib)
                    .field(NewField::instance("rgba", RuntimeType::U4))
                    .field(NewField::statik("Black", RuntimeType::ValueType(t))),
            )
            .unwrap();
        });
        let id = rt.class_from_name("Game", "Color").unwrap();
        let class = rt.init_class(id).unwrap();
        assert_eq!(class.static_layout().unwrap().static_size, 4);
    }

    #[test]
    fn explicit_layout_generic_instance_is_rejected() {
        let rt = runtime(|b| {
            let corlib = b.corlib().unwrap();
            let game = b.add_assembly("Game", [1, 0, 0, 0]).unwrap();
            let t = b
                .declare_type(
                    game,
                    "Game",
                    "Overlay`1",
                    TypeAttributes::PUBLIC | TypeAttributes::EXPLICIT_LAYOUT,
                )
                .unwrap();
            b.define_type(
                t,
                TypeBody::value_type(&corlib)
                    .generic(&["T"])
                    .field(NewField::instance("value", RuntimeType::Var(0)).at(0)),
            )
            .unwrap();
        });
        let def = rt.metadata().find_type_by_name("Game", "Overlay`1").unwrap();
        let id = rt.generic_class(def, &[RuntimeType::I4]).unwrap();
        match rt.init_class(id) {
            Err(Error::TypeLoad(message)) => assert_eq!(
                message,
                "Could not load type 'Game:Overlay`1' because generic types cannot have explicit layout."
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn generic_instance_fields_are_inflated() {
        let rt = runtime(|b| {
            let corlib = b.corlib().unwrap();
            let game = b.add_assembly("Game", [1, 0, 0, 0]).unwrap();
            let t = b.declare_type(game, "Game", "Box`1", TypeAttributes::PUBLIC).unwrap();
            b.define_type(
                t,
                TypeBody::class(&corlib)
                    .generic(&["T"])
                    .field(NewField::instance("value", RuntimeType::Var(0)))
                    .method(NewMethod::instance("Get").returns(RuntimeType::Var(0))),
            )
            .unwrap();
        });
        let def = rt.metadata().find_type_by_name("Game", "Box`1").unwrap();
        let open = rt.class_from_typedef(def).unwrap();
        let open = rt.init_class(open).unwrap();
        assert_eq!(open.fields()[0].offset, FieldOffset::Unassigned);
        assert!(open.layout().is_none());

        let closed = rt.generic_class(def, &[RuntimeType::U1]).unwrap();
        let class = rt.init_class(closed).unwrap();
        assert_eq!(class.fields()[0].ty, RuntimeType::U1);
        assert_eq!(class.fields()[0].offset, FieldOffset::Instance(16));
        assert_eq!(class.instance_size(), Some(24));
        let get = rt.method(class.methods()[0]).unwrap();
        assert_eq!(get.return_type, RuntimeType::U1);
    }

    #[test]
    fn properties_point_at_methods() {
        let rt = runtime(|b| {
            let corlib = b.corlib().unwrap();
            let game = b.add_assembly("Game", [1, 0, 0, 0]).unwrap();
            let t = b.declare_type(game, "Game", "Counter", TypeAttributes::PUBLIC).unwrap();
            b.define_type(
                t,
                TypeBody::class(&corlib)
                    .method(NewMethod::instance("get_Value").returns(RuntimeType::I4))
                    .property(NewProperty::new("Value", Some("get_Value"), None)),
            )
            .unwrap();
        });
        let id = rt.class_from_name("Game", "Counter").unwrap();
        let class = rt.init_class(id).unwrap();
        let property = &class.properties()[0];
        assert_eq!(property.name, "Value");
        assert_eq!(property.get, Some(class.methods()[0]));
        assert_eq!(property.set, None);
    }

    #[test]
    fn generic_methods_are_interned() {
        let rt = runtime(|b| {
            let corlib = b.corlib().unwrap();
            let game = b.add_assembly("Game", [1, 0, 0, 0]).unwrap();
            let t = b.declare_type(game, "Game", "Util", TypeAttributes::PUBLIC).unwrap();
            b.define_type(
                t,
                TypeBody::class(&corlib).method(
                    NewMethod::statik("Identity")
                        .generic(&["T"])
                        .param("value", RuntimeType::MVar(0))
                        .returns(RuntimeType::MVar(0)),
                ),
            )
            .unwrap();
        });
        let id = rt.class_from_name("Game", "Util").unwrap();
        let class = rt.init_class(id).unwrap();
        let generic = class.methods()[0];
        assert!(rt.method(generic).unwrap().is_generic());

        let a = rt.get_generic_method(generic, &[RuntimeType::I4]).unwrap();
        let b = rt.get_generic_method(generic, &[RuntimeType::I4]).unwrap();
        let c = rt.get_generic_method(a, &[RuntimeType::String]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        let instance = rt.method(a).unwrap();
        assert_eq!(instance.return_type, RuntimeType::I4);
        assert_eq!(instance.parameters[0].ty, RuntimeType::I4);
        assert!(!instance.is_generic());
        assert_eq!(rt.stats().generic_methods, 2);
        assert!(rt.get_generic_method(generic, &[]).is_err());
    }
}

//! Type relations and member enumeration.
//!
//! Everything here initializes the classes it looks at first, so a class that failed
//! initialization surfaces its sticky error instead of partial data.

use crate::{
    runtime::{
        class::{Class, ClassId, ClassKind, EventInfo, FieldInfo, FieldRef, MethodId, PropertyInfo},
        Runtime,
    },
    typesystem::RuntimeType,
    Error, Result,
};

/// Position of an in-progress member enumeration. Start with [`MemberCursor::default`] and pass
/// the same cursor to repeated `get_*` calls until they return `None`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemberCursor(usize);

impl MemberCursor {
    /// A cursor at the first member.
    #[must_use]
    pub fn new() -> Self {
        MemberCursor(0)
    }

    /// Rewinds to the first member.
    pub fn reset(&mut self) {
        self.0 = 0;
    }

    fn advance<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        let item = items.get(self.0)?;
        self.0 += 1;
        Some(item)
    }
}

impl Runtime {
    /// True if `klass` derives from `klass_c` (a class is a subclass of itself). With
    /// `check_interfaces`, implementing interface `klass_c` also counts. Everything is a subclass of
    /// `System.Object`.
    pub fn is_subclass_of(&self, klass: ClassId, klass_c: ClassId, check_interfaces: bool) -> Result<bool> {
        let class = self.init_class(klass)?;
        let target = self.init_class(klass_c)?;

        if check_interfaces && target.is_interface() {
            if klass == klass_c || self.implements_interface(klass, klass_c)? {
                return Ok(true);
            }
        } else if !class.is_interface() && !target.is_interface() {
            let depth = target.hierarchy().len();
            if depth > 0 && class.hierarchy().get(depth - 1) == Some(&klass_c) {
                return Ok(true);
            }
        }
        Ok(klass_c == self.class_from_typedef(self.metadata.corlib().object)?)
    }

    /// True if a value of class `source` can be stored in a location of class `target`.
    ///
    /// Arrays are covariant over reference elements. Value-type elements must match exactly after
    /// enums are reduced to their underlying type and signed and unsigned integers of the same width
    /// are identified.
    pub fn is_assignable_from(&self, target: ClassId, source: ClassId) -> Result<bool> {
        if target == source {
            return Ok(true);
        }
        let target_class = self.init_class(target)?;
        let source_class = self.init_class(source)?;

        if target_class.is_interface() {
            return self.implements_interface(source, target);
        }

        if target_class.is_array() {
            if array_shape(source_class) != array_shape(target_class) {
                return Ok(false);
            }
            let (Some(element), Some(source_element)) = (target_class.element, source_class.element)
            else {
                return Ok(false);
            };
            let element = self.cast_class(element)?;
            let source_element = self.cast_class(source_element)?;
            if self.init_class(source_element)?.is_value_type() {
                return Ok(element == source_element);
            }
            return self.is_assignable_from(element, source_element);
        }

        if target == self.class_from_typedef(self.metadata.corlib().object)? {
            return Ok(true);
        }
        self.is_subclass_of(source, target, false)
    }

    fn implements_interface(&self, klass: ClassId, interface: ClassId) -> Result<bool> {
        let class = self.init_class(klass)?;
        if class.is_interface() {
            return Ok(self.interface_closure(klass)?.contains(&interface));
        }
        Ok(class.interface_offset(interface).is_some())
    }

    /// The class array elements are compared as: enums become their underlying type and unsigned
    /// integers their signed counterpart.
    fn cast_class(&self, element: ClassId) -> Result<ClassId> {
        let class = self.init_class(element)?;
        let reduced = if class.is_enum() {
            match class.fields().iter().find(|f| f.is_instance()) {
                Some(value) => value.ty.clone(),
                None => class.byval_type.clone(),
            }
        } else {
            class.byval_type.clone()
        };
        let signed = match reduced {
            RuntimeType::I1 | RuntimeType::U1 => RuntimeType::I1,
            RuntimeType::I2 | RuntimeType::U2 => RuntimeType::I2,
            RuntimeType::I4 | RuntimeType::U4 => RuntimeType::I4,
            RuntimeType::I8 | RuntimeType::U8 => RuntimeType::I8,
            RuntimeType::I | RuntimeType::U => RuntimeType::I,
            _ if class.is_enum() => reduced,
            _ => return Ok(element),
        };
        self.class_from_type(&signed)
    }

    /// Size and alignment of a value of the class stored inline: the unboxed size for value
    /// types, the pointer size for everything else.
    ///
    /// # Errors
    ///
    /// The class's sticky initialization error, or [`Error::NotSupported`] for open generics.
    pub fn get_value_size(&self, id: ClassId) -> Result<(u32, u32)> {
        let class = self.init_class(id)?;
        if class.is_open_generic() {
            return Err(Error::NotSupported(format!(
                "{} is an open generic type and has no size",
                class.full_name()
            )));
        }
        if !class.is_value_type() {
            let pointer_size = self.config.pointer_size;
            return Ok((pointer_size, pointer_size));
        }
        let layout = class
            .layout()
            .ok_or_else(|| Error::TypeLoad(class.load_name()))?;
        Ok((
            layout.instance_size - self.config.object_header_size(),
            u32::from(layout.minimum_alignment),
        ))
    }

    /// Size of a boxed or heap instance, header included.
    pub fn instance_size(&self, id: ClassId) -> Result<u32> {
        let class = self.init_class(id)?;
        class.instance_size().ok_or_else(|| {
            Error::NotSupported(format!("{} has no instance layout", class.full_name()))
        })
    }

    /// Next field of the class.
    pub fn get_fields(&self, id: ClassId, cursor: &mut MemberCursor) -> Result<Option<&FieldInfo>> {
        Ok(cursor.advance(self.init_class(id)?.fields()))
    }

    /// Next method of the class.
    pub fn get_methods(&self, id: ClassId, cursor: &mut MemberCursor) -> Result<Option<MethodId>> {
        Ok(cursor.advance(self.init_class(id)?.methods()).copied())
    }

    /// Next property of the class.
    pub fn get_properties(
        &self,
        id: ClassId,
        cursor: &mut MemberCursor,
    ) -> Result<Option<&PropertyInfo>> {
        Ok(cursor.advance(self.init_class(id)?.properties()))
    }

    /// Next event of the class.
    pub fn get_events(&self, id: ClassId, cursor: &mut MemberCursor) -> Result<Option<&EventInfo>> {
        Ok(cursor.advance(self.init_class(id)?.events()))
    }

    /// Next directly declared interface of the class.
    pub fn get_interfaces(&self, id: ClassId, cursor: &mut MemberCursor) -> Result<Option<ClassId>> {
        Ok(cursor.advance(self.init_class(id)?.interfaces()).copied())
    }

    /// Next nested type of the class.
    pub fn get_nested_types(&self, id: ClassId, cursor: &mut MemberCursor) -> Result<Option<ClassId>> {
        Ok(cursor.advance(self.init_class(id)?.nested_types()).copied())
    }

    /// Finds a method by name on the class or its ancestors, most derived first. `param_count`
    /// of `None` matches any arity.
    pub fn get_method_from_name(
        &self,
        id: ClassId,
        name: &str,
        param_count: Option<usize>,
    ) -> Result<Option<MethodId>> {
        let mut current = Some(id);
        while let Some(class_id) = current {
            let class = self.init_class(class_id)?;
            for method in class.methods() {
                let info = self.method(*method)?;
                if info.name == name && param_count.is_none_or(|count| info.parameters.len() == count) {
                    return Ok(Some(*method));
                }
            }
            current = class.parent;
        }
        Ok(None)
    }

    /// Finds a field by name on the class or its ancestors, most derived first.
    pub fn get_field_from_name(&self, id: ClassId, name: &str) -> Result<Option<FieldRef>> {
        let mut current = Some(id);
        while let Some(class_id) = current {
            let class = self.init_class(class_id)?;
            if let Some(index) = class.fields().iter().position(|f| f.name == name) {
                return Ok(Some(FieldRef {
                    class: class_id,
                    index: u32::try_from(index).map_err(|_| out_of_bounds_error!())?,
                }));
            }
            current = class.parent;
        }
        Ok(None)
    }
}

fn array_shape(class: &Class) -> Option<(u8, bool)> {
    match class.kind {
        ClassKind::Array { rank, szarray, .. } => Some((rank, szarray)),
        _ => None,
    }
}

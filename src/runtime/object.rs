//! The object layer.
//!
//! The runtime never owns managed memory itself. It computes sizes, picks the scanned or
//! pointer-free path from the class's GC descriptor, and hands both to an [`Allocator`]. Bulk
//! copies into reference-holding memory (boxing, field stores of structs with references) are
//! reported through [`Allocator::write_barrier`].
//!
//! [`Heap`] is the default allocator: a map of byte buffers keyed by handle, enough for tests and
//! for hosts that only need descriptors to be exercised.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use tracing::trace;

use crate::{
    runtime::{
        class::{Class, ClassFlags, ClassId, FieldOffset, FieldRef},
        gc::GcDescriptor,
        Runtime,
    },
    typesystem::RuntimeType,
    Error, Result,
};

/// Handle of a managed object. Handles are never zero; zero encodes `null` in object memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(u64);

impl ObjectRef {
    /// The raw handle value.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }

    fn from_id(id: u64) -> Option<ObjectRef> {
        (id != 0).then_some(ObjectRef(id))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Memory services the runtime needs from a garbage collector.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Allocates `size` zeroed bytes for an instance of `class`. `scanned` is false when the
    /// instance can never hold a managed reference.
    fn allocate(&self, class: ClassId, size: u32, scanned: bool) -> Result<ObjectRef>;

    /// The class an object was allocated for.
    fn class_of(&self, object: ObjectRef) -> Result<ClassId>;

    /// Copies `len` bytes starting at `offset` out of an object.
    fn read(&self, object: ObjectRef, offset: u32, len: u32) -> Result<Vec<u8>>;

    /// Copies `bytes` into an object at `offset`.
    fn write(&self, object: ObjectRef, offset: u32, bytes: &[u8]) -> Result<()>;

    /// Records that references may have been stored in `len` bytes at `offset`.
    fn write_barrier(&self, object: ObjectRef, offset: u32, len: u32);
}

impl<A: Allocator + ?Sized> Allocator for Arc<A> {
    fn allocate(&self, class: ClassId, size: u32, scanned: bool) -> Result<ObjectRef> {
        (**self).allocate(class, size, scanned)
    }

    fn class_of(&self, object: ObjectRef) -> Result<ClassId> {
        (**self).class_of(object)
    }

    fn read(&self, object: ObjectRef, offset: u32, len: u32) -> Result<Vec<u8>> {
        (**self).read(object, offset, len)
    }

    fn write(&self, object: ObjectRef, offset: u32, bytes: &[u8]) -> Result<()> {
        (**self).write(object, offset, bytes)
    }

    fn write_barrier(&self, object: ObjectRef, offset: u32, len: u32) {
        (**self).write_barrier(object, offset, len);
    }
}

#[derive(Debug)]
struct HeapObject {
    class: ClassId,
    scanned: bool,
    data: Vec<u8>,
}

/// An in-process allocator that never collects.
#[derive(Debug, Default)]
pub struct Heap {
    objects: DashMap<ObjectRef, HeapObject>,
    next: AtomicU64,
    barriers: AtomicU64,
}

impl Heap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Heap::default()
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if nothing was allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Size in bytes of an object.
    #[must_use]
    pub fn size_of(&self, object: ObjectRef) -> Option<usize> {
        self.objects.get(&object).map(|o| o.data.len())
    }

    /// Whether an object was allocated on the scanned path.
    #[must_use]
    pub fn is_scanned(&self, object: ObjectRef) -> Option<bool> {
        self.objects.get(&object).map(|o| o.scanned)
    }

    /// Write barriers recorded so far.
    #[must_use]
    pub fn barrier_count(&self) -> u64 {
        self.barriers.load(Ordering::Relaxed)
    }

    fn range(object: &HeapObject, offset: u32, len: usize) -> Result<std::ops::Range<usize>> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or_else(|| out_of_bounds_error!())?;
        if end > object.data.len() {
            return Err(out_of_bounds_error!());
        }
        Ok(start..end)
    }
}

impl Allocator for Heap {
    fn allocate(&self, class: ClassId, size: u32, scanned: bool) -> Result<ObjectRef> {
        let object = ObjectRef(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.objects.insert(
            object,
            HeapObject {
                class,
                scanned,
                data: vec![0; size as usize],
            },
        );
        Ok(object)
    }

    fn class_of(&self, object: ObjectRef) -> Result<ClassId> {
        self.objects
            .get(&object)
            .map(|o| o.class)
            .ok_or_else(|| Error::NotSupported(format!("{object} is not a live object")))
    }

    fn read(&self, object: ObjectRef, offset: u32, len: u32) -> Result<Vec<u8>> {
        let entry = self
            .objects
            .get(&object)
            .ok_or_else(|| Error::NotSupported(format!("{object} is not a live object")))?;
        let range = Self::range(&entry, offset, len as usize)?;
        Ok(entry.data[range].to_vec())
    }

    fn write(&self, object: ObjectRef, offset: u32, bytes: &[u8]) -> Result<()> {
        let mut entry = self
            .objects
            .get_mut(&object)
            .ok_or_else(|| Error::NotSupported(format!("{object} is not a live object")))?;
        let range = Self::range(&entry, offset, bytes.len())?;
        entry.data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn write_barrier(&self, object: ObjectRef, offset: u32, len: u32) {
        trace!(%object, offset, len, "write barrier");
        self.barriers.fetch_add(1, Ordering::Relaxed);
    }
}

impl Runtime {
    /// The allocator objects are created with.
    #[must_use]
    pub fn allocator(&self) -> &dyn Allocator {
        self.allocator.as_ref()
    }

    /// Allocates a zeroed instance of a class.
    ///
    /// # Errors
    ///
    /// The class's sticky initialization error, or [`Error::NotSupported`] for abstract classes,
    /// interfaces, open generics, strings and arrays (see [`Runtime::allocate_string`] and
    /// [`Runtime::allocate_array`]).
    pub fn allocate(&self, id: ClassId) -> Result<ObjectRef> {
        let class = self.init_class(id)?;
        if class.is_array() || class.byval_type == RuntimeType::String {
            return Err(Error::NotSupported(format!(
                "{} has a variable size",
                class.full_name()
            )));
        }
        if class.is_interface() || class.flags().contains(ClassFlags::ABSTRACT) {
            return Err(Error::NotSupported(format!(
                "Cannot create an instance of abstract class {}",
                class.full_name()
            )));
        }
        if class.is_open_generic() {
            return Err(Error::NotSupported(format!(
                "Cannot create an instance of open generic {}",
                class.full_name()
            )));
        }

        let size = class
            .instance_size()
            .ok_or_else(|| Error::TypeLoad(class.load_name()))?;
        let scanned = class.gc_descriptor().is_some_and(GcDescriptor::has_references);
        self.allocator.allocate(id, size, scanned)
    }

    /// Allocates a zero-based, single-dimensional array of `length` elements.
    ///
    /// The length is stored in the array header after the bounds pointer.
    pub fn allocate_array(&self, array: ClassId, length: u32) -> Result<ObjectRef> {
        let class = self.init_class(array)?;
        let Some(element) = class.element.filter(|_| class.is_array()) else {
            return Err(Error::NotSupported(format!("{} is not an array", class.full_name())));
        };
        let element_size = self.stored_size(&self.class(element)?.byval_type)?;
        let header = self.config.array_header_size();
        let size = element_size
            .checked_mul(length)
            .and_then(|data| data.checked_add(header))
            .ok_or_else(|| out_of_bounds_error!())?;

        let scanned = class.layout().is_some_and(|l| l.has_references);
        let object = self.allocator.allocate(array, size, scanned)?;
        let length_offset = self.config.object_header_size() + self.config.pointer_size;
        self.allocator
            .write(object, length_offset, &self.encode_word(u64::from(length)))?;
        Ok(object)
    }

    /// Number of elements of an array.
    pub fn array_length(&self, array: ObjectRef) -> Result<u32> {
        let class = self.class(self.allocator.class_of(array)?)?;
        if !class.is_array() {
            return Err(Error::NotSupported(format!("{} is not an array", class.full_name())));
        }
        let length_offset = self.config.object_header_size() + self.config.pointer_size;
        let word = self.decode_word(&self.allocator.read(array, length_offset, self.config.pointer_size)?);
        u32::try_from(word).map_err(|_| out_of_bounds_error!())
    }

    /// Allocates a `System.String` holding `value` as UTF-16 with a terminating NUL.
    pub fn allocate_string(&self, value: &str) -> Result<ObjectRef> {
        let id = self.class_from_type(&RuntimeType::String)?;
        let class = self.init_class(id)?;
        let (length_offset, chars_offset) = string_offsets(class)?;

        let units: Vec<u16> = value.encode_utf16().collect();
        let length = u32::try_from(units.len()).map_err(|_| out_of_bounds_error!())?;
        let size = chars_offset + 2 * (length + 1);
        let object = self.allocator.allocate(id, size, false)?;
        self.allocator.write(object, length_offset, &length.to_le_bytes())?;
        let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
        self.allocator.write(object, chars_offset, &bytes)?;
        Ok(object)
    }

    /// Reads back a string allocated with [`Runtime::allocate_string`].
    pub fn read_string(&self, object: ObjectRef) -> Result<String> {
        let id = self.allocator.class_of(object)?;
        let class = self.init_class(id)?;
        if class.byval_type != RuntimeType::String {
            return Err(Error::InvalidCast {
                from: class.full_name(),
                to: "System.String".to_string(),
            });
        }
        let (length_offset, chars_offset) = string_offsets(class)?;
        let length = u32::from_le_bytes(
            self.allocator
                .read(object, length_offset, 4)?
                .try_into()
                .map_err(|_| out_of_bounds_error!())?,
        );
        let bytes = self.allocator.read(object, chars_offset, 2 * length)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| malformed_error!("Invalid UTF-16 in string object"))
    }

    /// Boxes the raw bytes of a value type.
    ///
    /// # Errors
    ///
    /// The class's sticky initialization error, [`Error::NotSupported`] for reference types, or
    /// [`Error::OutOfBounds`] when `value` is not exactly the unboxed size.
    pub fn box_value(&self, id: ClassId, value: &[u8]) -> Result<ObjectRef> {
        let class = self.init_class(id)?;
        if !class.is_value_type() {
            return Err(Error::NotSupported(format!(
                "{} is a reference type and is not boxed",
                class.full_name()
            )));
        }
        let (size, _) = self.get_value_size(id)?;
        if value.len() != size as usize {
            return Err(out_of_bounds_error!());
        }

        let object = self.allocate(id)?;
        let header = self.config.object_header_size();
        self.allocator.write(object, header, value)?;
        if class.layout().is_some_and(|l| l.has_references) {
            self.allocator.write_barrier(object, header, size);
        }
        Ok(object)
    }

    /// Copies the value out of a boxed instance of `id`. Enums unbox to and from their underlying
    /// type.
    pub fn unbox(&self, object: ObjectRef, id: ClassId) -> Result<Vec<u8>> {
        let target = self.init_class(id)?;
        let actual_id = self.allocator.class_of(object)?;
        if actual_id != id && self.unbox_reduced(actual_id)? != self.unbox_reduced(id)? {
            return Err(Error::InvalidCast {
                from: self.class(actual_id)?.full_name(),
                to: target.full_name(),
            });
        }
        if !target.is_value_type() {
            return Err(Error::NotSupported(format!(
                "{} is a reference type and is not boxed",
                target.full_name()
            )));
        }
        let (size, _) = self.get_value_size(id)?;
        self.allocator
            .read(object, self.config.object_header_size(), size)
    }

    /// Stores `value` into instance field `field` of `object`, issuing a write barrier when the
    /// field can hold references.
    pub fn set_field_value(&self, object: ObjectRef, field: FieldRef, value: &[u8]) -> Result<()> {
        let (offset, size) = self.instance_field_slot(object, field)?;
        if value.len() != size as usize {
            return Err(out_of_bounds_error!());
        }
        self.allocator.write(object, offset, value)?;
        if self.type_has_references(&self.field(field)?.ty)? {
            self.allocator.write_barrier(object, offset, size);
        }
        Ok(())
    }

    /// Reads the bytes of instance field `field` of `object`.
    pub fn get_field_value(&self, object: ObjectRef, field: FieldRef) -> Result<Vec<u8>> {
        let (offset, size) = self.instance_field_slot(object, field)?;
        self.allocator.read(object, offset, size)
    }

    /// Stores a reference (or `null`) at `offset` of `object` and records the barrier.
    pub fn write_barrier(&self, object: ObjectRef, offset: u32, value: Option<ObjectRef>) -> Result<()> {
        if offset % self.config.pointer_size != 0 {
            return Err(out_of_bounds_error!());
        }
        let word = self.encode_word(value.map_or(0, ObjectRef::id));
        self.allocator.write(object, offset, &word)?;
        self.allocator.write_barrier(object, offset, self.config.pointer_size);
        Ok(())
    }

    /// Loads the reference stored at `offset` of `object`.
    pub fn read_reference(&self, object: ObjectRef, offset: u32) -> Result<Option<ObjectRef>> {
        let bytes = self.allocator.read(object, offset, self.config.pointer_size)?;
        Ok(ObjectRef::from_id(self.decode_word(&bytes)))
    }

    fn instance_field_slot(&self, object: ObjectRef, field: FieldRef) -> Result<(u32, u32)> {
        let actual = self.allocator.class_of(object)?;
        self.init_class(actual)?;
        if !self.is_subclass_of(actual, field.class, false)? {
            return Err(Error::InvalidCast {
                from: self.class(actual)?.full_name(),
                to: self.class(field.class)?.full_name(),
            });
        }
        let info = self.field(field)?;
        let FieldOffset::Instance(offset) = info.offset else {
            return Err(Error::NotSupported(format!("{} is not an instance field", info.name)));
        };
        Ok((offset, self.stored_size(&info.ty)?))
    }

    fn stored_size(&self, ty: &RuntimeType) -> Result<u32> {
        let guard = self.lock_metadata();
        Ok(self.value_size(&guard, ty)?.size)
    }

    fn type_has_references(&self, ty: &RuntimeType) -> Result<bool> {
        if ty.is_reference() {
            return Ok(true);
        }
        if ty.intrinsic_size(self.config.pointer_size).is_some() {
            return Ok(false);
        }
        let class = self.init_class(self.class_from_type(ty)?)?;
        Ok(!class.is_value_type() || class.layout().is_some_and(|l| l.has_references))
    }

    /// Enums reduce to the class of their underlying type.
    fn unbox_reduced(&self, id: ClassId) -> Result<ClassId> {
        let class = self.init_class(id)?;
        if !class.is_enum() {
            return Ok(id);
        }
        match class.fields().iter().find(|f| f.is_instance()) {
            Some(value) => self.class_from_type(&value.ty),
            None => Ok(id),
        }
    }

    fn encode_word(&self, value: u64) -> Vec<u8> {
        let bytes = value.to_le_bytes();
        bytes[..self.config.pointer_size as usize].to_vec()
    }

    fn decode_word(&self, bytes: &[u8]) -> u64 {
        let mut word = [0u8; 8];
        let len = bytes.len().min(8);
        word[..len].copy_from_slice(&bytes[..len]);
        u64::from_le_bytes(word)
    }
}

fn string_offsets(class: &Class) -> Result<(u32, u32)> {
    let offset_of = |name: &str| {
        class
            .fields()
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| match f.offset {
                FieldOffset::Instance(offset) => Some(offset),
                _ => None,
            })
            .ok_or_else(|| Error::FieldNotFound {
                type_name: class.full_name(),
                field: name.to_string(),
            })
    };
    Ok((offset_of("_stringLength")?, offset_of("_firstChar")?))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        metadata::aot::{AotMetadataBuilder, NewField, TypeBody},
        runtime::RuntimeConfig,
        typesystem::TypeAttributes,
    };

    fn runtime() -> (Runtime, Arc<Heap>) {
        let mut builder = AotMetadataBuilder::new();
        let corlib = builder.with_corlib().unwrap();
        let game = builder.add_assembly("Game", [1, 0, 0, 0]).unwrap();
        let point = builder.declare_type(game, "Game", "Point", TypeAttributes::PUBLIC).unwrap();
        let named = builder.declare_type(game, "Game", "Named", TypeAttributes::PUBLIC).unwrap();
        let node = builder.declare_type(game, "Game", "Node", TypeAttributes::PUBLIC).unwrap();
        let color = builder.declare_type(game, "Game", "Color", TypeAttributes::PUBLIC).unwrap();
        let shape = builder
            .declare_type(game, "Game", "Shape", TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT)
            .unwrap();
        builder
            .define_type(
                point,
                TypeBody::value_type(&corlib)
                    .field(NewField::instance("x", RuntimeType::I4))
                    .field(NewField::instance("y", RuntimeType::I4)),
            )
            .unwrap();
        builder
            .define_type(
                named,
                TypeBody::value_type(&corlib)
                    .field(NewField::instance("name", RuntimeType::String))
                    .field(NewField::instance("id", RuntimeType::I4)),
            )
            .unwrap();
        builder
            .define_type(
                node,
                TypeBody::class(&corlib)
                    .field(NewField::instance("next", RuntimeType::Class(node)))
                    .field(NewField::instance("value", RuntimeType::I4)),
            )
            .unwrap();
        builder
            .define_type(color, TypeBody::enumeration(&corlib, RuntimeType::I4))
            .unwrap();
        builder.define_type(shape, TypeBody::class(&corlib)).unwrap();

        let heap = Arc::new(Heap::new());
        let runtime = Runtime::with_allocator(
            Arc::new(builder.build().unwrap()),
            RuntimeConfig::default(),
            Box::new(Arc::clone(&heap)),
        )
        .unwrap();
        (runtime, heap)
    }

    #[test]
    fn allocation_path_follows_gc_descriptor() {
        let (rt, heap) = runtime();
        let node = rt.class_from_name("Game", "Node").unwrap();
        let point = rt.class_from_name("Game", "Point").unwrap();

        let linked = rt.allocate(node).unwrap();
        assert_eq!(heap.size_of(linked), Some(32));
        assert_eq!(heap.is_scanned(linked), Some(true));

        let boxed = rt.box_value(point, &[1, 0, 0, 0, 2, 0, 0, 0]).unwrap();
        assert_eq!(heap.is_scanned(boxed), Some(false));
        assert_eq!(heap.barrier_count(), 0);
        assert_eq!(rt.unbox(boxed, point).unwrap(), vec![1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn boxing_references_issues_a_barrier() {
        let (rt, heap) = runtime();
        let named = rt.class_from_name("Game", "Named").unwrap();
        let boxed = rt.box_value(named, &[0; 16]).unwrap();
        assert_eq!(heap.is_scanned(boxed), Some(true));
        assert_eq!(heap.barrier_count(), 1);
    }

    #[test]
    fn unbox_checks_the_class() {
        let (rt, _) = runtime();
        let point = rt.class_from_name("Game", "Point").unwrap();
        let color = rt.class_from_name("Game", "Color").unwrap();
        let int32 = rt.class_from_type(&RuntimeType::I4).unwrap();

        let boxed = rt.box_value(color, &3i32.to_le_bytes()).unwrap();
        assert_eq!(rt.unbox(boxed, int32).unwrap(), 3i32.to_le_bytes());
        assert!(matches!(rt.unbox(boxed, point), Err(Error::InvalidCast { .. })));
    }

    #[test]
    fn references_round_trip_through_fields() {
        let (rt, heap) = runtime();
        let node = rt.class_from_name("Game", "Node").unwrap();
        let first = rt.allocate(node).unwrap();
        let second = rt.allocate(node).unwrap();

        rt.write_barrier(first, 16, Some(second)).unwrap();
        assert_eq!(rt.read_reference(first, 16).unwrap(), Some(second));
        assert_eq!(rt.read_reference(second, 16).unwrap(), None);
        assert_eq!(heap.barrier_count(), 1);
        assert!(rt.write_barrier(first, 17, None).is_err());

        let value = FieldRef { class: node, index: 1 };
        rt.set_field_value(first, value, &9i32.to_le_bytes()).unwrap();
        assert_eq!(rt.get_field_value(first, value).unwrap(), 9i32.to_le_bytes());
        assert_eq!(heap.barrier_count(), 1);
    }

    #[test]
    fn arrays_and_strings() {
        let (rt, heap) = runtime();
        let int32 = rt.class_from_type(&RuntimeType::I4).unwrap();
        let ints = rt.array_class(int32, 1, true).unwrap();
        let array = rt.allocate_array(ints, 10).unwrap();
        assert_eq!(heap.size_of(array), Some(32 + 40));
        assert_eq!(heap.is_scanned(array), Some(false));
        assert_eq!(rt.array_length(array).unwrap(), 10);

        let text = rt.allocate_string("héllo").unwrap();
        assert_eq!(rt.read_string(text).unwrap(), "héllo");
        assert!(rt.array_length(text).is_err());
    }

    #[test]
    fn abstract_and_reference_types_are_rejected() {
        let (rt, _) = runtime();
        let shape = rt.class_from_name("Game", "Shape").unwrap();
        let node = rt.class_from_name("Game", "Node").unwrap();
        assert!(matches!(rt.allocate(shape), Err(Error::NotSupported(_))));
        assert!(matches!(rt.box_value(node, &[]), Err(Error::NotSupported(_))));
    }
}

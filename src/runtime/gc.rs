//! GC descriptors.
//!
//! A descriptor tells the collector which pointer-sized words of an instance hold managed
//! references. Ordinary classes get a bitmap over the instance (header included, so word 0 is the
//! class pointer and never set); strings and arrays have descriptors of their own because their
//! size is not fixed by the class.

use bitvec::prelude::*;
use tracing::warn;

use crate::{
    runtime::{
        class::{ClassId, FieldOffset},
        MetadataGuard, Runtime,
    },
    typesystem::RuntimeType,
    Result,
};

/// Reference bitmap over the words of an instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcBitmap {
    bits: BitVec<usize, Lsb0>,
}

impl GcBitmap {
    /// Marks word `word_index` as holding a reference.
    pub fn set(&mut self, word_index: usize) {
        if word_index >= self.bits.len() {
            self.bits.resize(word_index + 1, false);
        }
        self.bits.set(word_index, true);
    }

    /// True if the word holds a reference.
    #[must_use]
    pub fn is_set(&self, word_index: usize) -> bool {
        self.bits.get(word_index).is_some_and(|bit| *bit)
    }

    /// The highest marked word.
    #[must_use]
    pub fn max_set_bit(&self) -> Option<usize> {
        self.bits.last_one()
    }

    /// Indices of marked words, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    /// True if nothing is marked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }
}

/// What the collector needs to scan an instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GcDescriptor {
    /// Instances hold no references; allocate them in pointer-free memory.
    NoReferences,
    /// Words marked in the bitmap hold references.
    Bitmap(GcBitmap),
    /// `System.String`: character data only.
    String,
    /// Arrays: scanned according to the element class.
    Array,
}

impl GcDescriptor {
    /// Builds the descriptor of an ordinary class from its bitmap, keeping `word_count` words.
    #[must_use]
    pub fn for_object(mut bitmap: GcBitmap, word_count: usize) -> Self {
        bitmap.bits.truncate(word_count);
        if bitmap.is_empty() {
            GcDescriptor::NoReferences
        } else {
            GcDescriptor::Bitmap(bitmap)
        }
    }

    /// True if the allocator must use a scanned allocation path.
    #[must_use]
    pub fn has_references(&self) -> bool {
        !matches!(self, GcDescriptor::NoReferences | GcDescriptor::String)
    }

    /// Byte offsets of the reference words of an ordinary class.
    #[must_use]
    pub fn reference_offsets(&self, pointer_size: u32) -> Vec<u32> {
        match self {
            GcDescriptor::Bitmap(bitmap) => bitmap
                .iter_ones()
                .filter_map(|word| u32::try_from(word).ok())
                .map(|word| word * pointer_size)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// How a field's value is stored inside an instance.
pub(crate) enum FieldStorage {
    /// A managed reference.
    Reference,
    /// A value type stored inline.
    Inline(ClassId),
    /// Plain data.
    Scalar,
}

impl Runtime {
    /// Classifies the storage of a field type.
    pub(crate) fn field_storage(&self, ty: &RuntimeType) -> Result<FieldStorage> {
        Ok(match ty {
            RuntimeType::String
            | RuntimeType::Object
            | RuntimeType::Class(_)
            | RuntimeType::SzArray(_)
            | RuntimeType::Array { .. }
            | RuntimeType::Var(_)
            | RuntimeType::MVar(_) => FieldStorage::Reference,
            RuntimeType::ValueType(_) => FieldStorage::Inline(self.class_from_type(ty)?),
            RuntimeType::GenericInst { .. } => {
                let class = self.class_from_type(ty)?;
                if self.class(class)?.is_value_type() {
                    FieldStorage::Inline(class)
                } else {
                    FieldStorage::Reference
                }
            }
            _ => FieldStorage::Scalar,
        })
    }

    /// Computes the GC descriptor of a laid-out class.
    pub(crate) fn build_gc_descriptor(&self, guard: &MetadataGuard<'_>, id: ClassId) -> Result<GcDescriptor> {
        let class = self.class(id)?;
        if id == self.class_from_type(&RuntimeType::String)? {
            return Ok(GcDescriptor::String);
        }
        if class.is_array() {
            return Ok(GcDescriptor::Array);
        }

        let mut bitmap = GcBitmap::default();
        self.collect_references(guard, id, 0, &mut bitmap)?;
        let words = class
            .instance_size()
            .map_or(0, |size| (size / self.config.pointer_size) as usize + 1);
        Ok(GcDescriptor::for_object(bitmap, words))
    }

    /// Marks the reference words of `id` and its ancestors, shifted by `base`.
    fn collect_references(
        &self,
        guard: &MetadataGuard<'_>,
        id: ClassId,
        base: u32,
        bitmap: &mut GcBitmap,
    ) -> Result<()> {
        let pointer_size = self.config.pointer_size;
        let header = self.config.object_header_size();
        let mut current = Some(id);
        while let Some(class_id) = current {
            self.setup_fields(guard, class_id)?;
            let class = self.class(class_id)?;
            for field in class.fields() {
                let FieldOffset::Instance(offset) = field.offset else {
                    continue;
                };
                let offset = base + offset;
                match self.field_storage(&field.ty)? {
                    // A packed reference that straddles two words has no bit to live in.
                    FieldStorage::Reference if offset % pointer_size != 0 => {
                        warn!(
                            class = %class.full_name(),
                            field = %field.name,
                            offset,
                            "unaligned reference field left out of the GC bitmap"
                        );
                    }
                    FieldStorage::Reference => bitmap.set((offset / pointer_size) as usize),
                    FieldStorage::Inline(value_class) => {
                        self.setup_fields(guard, value_class)?;
                        let has_references = self
                            .class(value_class)?
                            .layout()
                            .is_some_and(|layout| layout.has_references);
                        if has_references {
                            // Inline value types carry no header of their own.
                            self.collect_references(guard, value_class, offset - header, bitmap)?;
                        }
                    }
                    FieldStorage::Scalar => {}
                }
            }
            current = class.parent;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_grows_on_demand() {
        let mut bitmap = GcBitmap::default();
        assert!(bitmap.is_empty());
        bitmap.set(2);
        bitmap.set(5);
        assert!(bitmap.is_set(2));
        assert!(!bitmap.is_set(3));
        assert!(!bitmap.is_set(64));
        assert_eq!(bitmap.max_set_bit(), Some(5));
        assert_eq!(bitmap.iter_ones().collect::<Vec<_>>(), vec![2, 5]);
    }

    #[test]
    fn empty_bitmap_means_no_references() {
        let descriptor = GcDescriptor::for_object(GcBitmap::default(), 4);
        assert_eq!(descriptor, GcDescriptor::NoReferences);
        assert!(!descriptor.has_references());
        assert!(GcDescriptor::Array.has_references());
        assert!(!GcDescriptor::String.has_references());
    }

    #[test]
    fn packed_references_mark_only_aligned_words() {
        use std::sync::Arc;

        use crate::{
            metadata::aot::{AotMetadataBuilder, NewField, TypeBody},
            runtime::RuntimeConfig,
            typesystem::TypeAttributes,
        };

        let mut builder = AotMetadataBuilder::new();
        let corlib = builder.with_corlib().unwrap();
        let game = builder.add_assembly("Game", [1, 0, 0, 0]).unwrap();
        let t = builder.declare_type(game, "Game", "Packed", TypeAttributes::PUBLIC).unwrap();
        builder
            .define_type(
                t,
                TypeBody::class(&corlib)
                    .packing(1)
                    .field(NewField::instance("head", RuntimeType::Object))
                    .field(NewField::instance("tag", RuntimeType::U1))
                    .field(NewField::instance("tail", RuntimeType::Object)),
            )
            .unwrap();
        let rt = Runtime::new(Arc::new(builder.build().unwrap()), RuntimeConfig::default()).unwrap();

        let id = rt.class_from_name("Game", "Packed").unwrap();
        let class = rt.init_class(id).unwrap();
        let offsets: Vec<_> = class
            .fields()
            .iter()
            .filter_map(|f| match f.offset {
                FieldOffset::Instance(offset) => Some(offset),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![16, 24, 25]);
        // tail at 25 would otherwise mark word 3, which also holds tag
        assert_eq!(class.gc_descriptor().unwrap().reference_offsets(8), vec![16]);
    }

    #[test]
    fn reference_offsets_scale_by_pointer_size() {
        let mut bitmap = GcBitmap::default();
        bitmap.set(2);
        bitmap.set(4);
        let descriptor = GcDescriptor::for_object(bitmap, 8);
        assert_eq!(descriptor.reference_offsets(8), vec![16, 32]);
        assert_eq!(descriptor.reference_offsets(4), vec![8, 16]);
    }
}

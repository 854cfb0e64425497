//! Row-to-definition index of a bound homologous image.

use std::ops::Range;

use crate::{
    metadata::{
        aot::{AotMetadata, TypeDefIndex},
        raw::RawImage,
        token::TableId,
    },
    Result,
};

/// A member of an AOT type: the declaring definition and the member's position in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberSlot {
    /// The declaring type.
    pub declaring: TypeDefIndex,
    /// Index into the declaring type's fields or methods.
    pub position: u32,
}

/// Parallel arrays from the image's own `TypeDef`, `MethodDef` and `Field` rows to AOT
/// definitions. Entry `row - 1` belongs to row `row`; rows without a counterpart are `None`.
#[derive(Debug, Default)]
pub struct RowIndex {
    types: Box<[Option<TypeDefIndex>]>,
    methods: Box<[Option<MemberSlot>]>,
    fields: Box<[Option<MemberSlot>]>,
}

impl RowIndex {
    /// Builds the index for `image` paired with the AOT types `types`.
    pub fn build(metadata: &AotMetadata, image: &RawImage, types: &Range<u32>) -> Result<RowIndex> {
        let type_rows = image.row_count(TableId::TypeDef);
        let mut index = RowIndex {
            types: vec![None; type_rows as usize].into_boxed_slice(),
            methods: vec![None; image.row_count(TableId::MethodDef) as usize].into_boxed_slice(),
            fields: vec![None; image.row_count(TableId::Field) as usize].into_boxed_slice(),
        };

        for row in 1..=type_rows.min(types.end - types.start) {
            let declaring = TypeDefIndex(types.start + row - 1);
            index.types[row as usize - 1] = Some(declaring);

            let type_def = metadata.type_def(declaring)?;
            let method_count = metadata.methods_of(type_def).len();
            for (position, method_row) in image.type_method_range(row)?.enumerate() {
                if position < method_count {
                    index.methods[method_row as usize - 1] = Some(slot(declaring, position));
                }
            }
            let field_count = metadata.fields_of(type_def).len();
            for (position, field_row) in image.type_field_range(row)?.enumerate() {
                if position < field_count {
                    index.fields[field_row as usize - 1] = Some(slot(declaring, position));
                }
            }
        }
        Ok(index)
    }

    /// The AOT type of `TypeDef` row `row`.
    #[must_use]
    pub fn type_def(&self, row: u32) -> Option<TypeDefIndex> {
        lookup(&self.types, row)
    }

    /// The AOT method of `MethodDef` row `row`.
    #[must_use]
    pub fn method(&self, row: u32) -> Option<MemberSlot> {
        lookup(&self.methods, row)
    }

    /// The AOT field of `Field` row `row`.
    #[must_use]
    pub fn field(&self, row: u32) -> Option<MemberSlot> {
        lookup(&self.fields, row)
    }

    /// Number of `TypeDef` rows that have an AOT counterpart.
    #[must_use]
    pub fn bound_types(&self) -> usize {
        self.types.iter().filter(|t| t.is_some()).count()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn slot(declaring: TypeDefIndex, position: usize) -> MemberSlot {
    MemberSlot {
        declaring,
        position: position as u32,
    }
}

fn lookup<T: Copy>(table: &[Option<T>], row: u32) -> Option<T> {
    let position = (row as usize).checked_sub(1)?;
    table.get(position).copied().flatten()
}

//! Name comparison between a homologous image and its AOT counterpart.
//!
//! The comparator only reads both sides and returns every disagreement it finds, so it can run
//! on any thread and in any order. The loader reports the lowest mismatch and registers nothing.

use std::ops::Range;

use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::{
    metadata::{
        aot::{AotMetadata, TypeDefIndex},
        raw::RawImage,
        token::TableId,
    },
    runtime::RuntimeConfig,
    LoadImageErrorCode, Result,
};

/// Which table a mismatch was found in. Ordered by reporting priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum MismatchKind {
    /// A `TypeDef` row.
    Type,
    /// A `MethodDef` row.
    Method,
    /// A `Field` row.
    Field,
}

/// One row whose name differs from the AOT definition in the same slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// The table of the row.
    pub kind: MismatchKind,
    /// The 1-based row in the homologous image.
    pub row: u32,
    /// The AOT name, empty when the AOT side has no member in this slot.
    pub expected: String,
    /// The homologous name, empty when the homologous side has no member in this slot.
    pub found: String,
}

impl Mismatch {
    /// The load error this mismatch is reported as.
    #[must_use]
    pub fn code(&self) -> LoadImageErrorCode {
        match self.kind {
            MismatchKind::Type => LoadImageErrorCode::MetadataTypeNotMatch,
            MismatchKind::Method => LoadImageErrorCode::MetadataMethodNotMatch,
            MismatchKind::Field => LoadImageErrorCode::MetadataFieldNotMatch,
        }
    }
}

/// Compares every `TypeDef` row of `image` with the AOT type in the same slot of `types`.
///
/// Rows past the end of the AOT image are skipped. The result is sorted by kind, then row.
///
/// # Errors
///
/// Returns an error if `image` has unreadable rows.
pub fn compare(
    metadata: &AotMetadata,
    image: &RawImage,
    types: &Range<u32>,
    config: &RuntimeConfig,
) -> Result<Vec<Mismatch>> {
    let rows = image.row_count(TableId::TypeDef).min(types.end - types.start);
    let check = |row: u32| compare_type(metadata, image, TypeDefIndex(types.start + row - 1), row);
    let per_type = if config.parallel_validation {
        (1..=rows).into_par_iter().map(check).collect::<Result<Vec<_>>>()?
    } else {
        (1..=rows).map(check).collect::<Result<Vec<_>>>()?
    };

    let mut mismatches: Vec<Mismatch> = per_type.into_iter().flatten().collect();
    mismatches.sort_by_key(|m| (m.kind, m.row));
    Ok(mismatches)
}

fn compare_type(
    metadata: &AotMetadata,
    image: &RawImage,
    def: TypeDefIndex,
    row: u32,
) -> Result<Vec<Mismatch>> {
    let aot = metadata.type_def(def)?;
    let raw = image.type_def(row)?;
    let mut mismatches = Vec::new();

    if aot.name != raw.name || aot.namespace != raw.namespace {
        mismatches.push(Mismatch {
            kind: MismatchKind::Type,
            row,
            expected: aot.full_name(),
            found: if raw.namespace.is_empty() {
                raw.name.to_string()
            } else {
                format!("{}.{}", raw.namespace, raw.name)
            },
        });
    }

    let names = metadata.methods_of(aot).iter().map(|m| m.name.as_str());
    let rows = image.type_method_range(row)?;
    let found = rows
        .clone()
        .map(|r| image.method_def(r).map(|m| m.name))
        .collect::<Result<Vec<_>>>()?;
    compare_names(MismatchKind::Method, &rows, names, &found, &mut mismatches);

    let names = metadata.fields_of(aot).iter().map(|f| f.name.as_str());
    let rows = image.type_field_range(row)?;
    let found = rows
        .clone()
        .map(|r| image.field(r).map(|f| f.name))
        .collect::<Result<Vec<_>>>()?;
    compare_names(MismatchKind::Field, &rows, names, &found, &mut mismatches);

    Ok(mismatches)
}

/// Pairs members by position. A slot that exists on one side only is a mismatch too; it is
/// reported at the row it would occupy.
fn compare_names<'a>(
    kind: MismatchKind,
    rows: &Range<u32>,
    mut expected: impl Iterator<Item = &'a str>,
    found: &[&str],
    out: &mut Vec<Mismatch>,
) {
    let mut position = 0usize;
    loop {
        let aot = expected.next();
        let raw = found.get(position).copied();
        if aot.is_none() && raw.is_none() {
            break;
        }
        if aot != raw {
            out.push(Mismatch {
                kind,
                row: rows.start + u32::try_from(position).unwrap_or(u32::MAX - rows.start),
                expected: aot.unwrap_or_default().to_string(),
                found: raw.unwrap_or_default().to_string(),
            });
        }
        position += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_pair_by_position() {
        let mut out = Vec::new();
        compare_names(
            MismatchKind::Field,
            &(4..7),
            ["a", "val", "c"].into_iter(),
            &["a", "value", "c"],
            &mut out,
        );
        assert_eq!(
            out,
            vec![Mismatch {
                kind: MismatchKind::Field,
                row: 5,
                expected: "val".to_string(),
                found: "value".to_string(),
            }]
        );
    }

    #[test]
    fn missing_members_are_mismatches() {
        let mut out = Vec::new();
        compare_names(MismatchKind::Method, &(1..2), ["Run", "Stop"].into_iter(), &["Run"], &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].row, 2);
        assert_eq!(out[0].expected, "Stop");
        assert!(out[0].found.is_empty());
        assert_eq!(out[0].code(), LoadImageErrorCode::MetadataMethodNotMatch);
    }

    #[test]
    fn kinds_sort_types_first() {
        let mut kinds = vec![MismatchKind::Field, MismatchKind::Type, MismatchKind::Method];
        kinds.sort();
        assert_eq!(kinds, [MismatchKind::Type, MismatchKind::Method, MismatchKind::Field]);
    }
}

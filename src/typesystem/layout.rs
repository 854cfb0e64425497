//! The field layout engine.
//!
//! [`FieldLayout::layout_fields`] packs an ordered list of members behind a parent: each member is
//! placed at the running offset rounded up to its effective alignment and reserves at least one
//! byte, and the class size is the final offset rounded up to the largest alignment seen. The
//! function is pure, so the runtime calls it once per bucket (instance, static, thread-static).

/// Size and alignment of a member type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeAndAlignment {
    /// Size in bytes. May be zero.
    pub size: u32,
    /// Alignment the type reports, which may already reflect its own packing.
    pub alignment: u8,
    /// Alignment of the type ignoring packing, zero when unknown.
    pub natural_alignment: u8,
}

impl SizeAndAlignment {
    /// A type whose alignment equals its natural alignment.
    #[must_use]
    pub fn new(size: u32, alignment: u8) -> Self {
        SizeAndAlignment {
            size,
            alignment,
            natural_alignment: alignment,
        }
    }

    /// A type with a distinct natural alignment.
    #[must_use]
    pub fn with_natural(size: u32, alignment: u8, natural_alignment: u8) -> Self {
        SizeAndAlignment {
            size,
            alignment,
            natural_alignment,
        }
    }
}

/// The result of laying out one bucket of members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldLayoutData {
    /// Offset of each member, in input order.
    pub field_offsets: Vec<u32>,
    /// Size of the class, rounded up to `minimum_alignment`.
    pub class_size: u32,
    /// Size including trailing padding; equal to `class_size`.
    pub actual_class_size: u32,
    /// The largest effective alignment of any member or of the parent.
    pub minimum_alignment: u8,
    /// The largest unpacked alignment of any member.
    pub natural_alignment: u8,
}

/// Rounds `value` up to a multiple of `alignment`. An alignment of zero is treated as one.
#[must_use]
pub fn align_to(value: u32, alignment: u32) -> u32 {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}

/// Member alignments below this fall back to the member's natural alignment.
const ALIGNMENT_FLOOR: u8 = 4;

/// The layout algorithm.
pub struct FieldLayout;

impl FieldLayout {
    /// Lays out `fields` behind a parent of `parent_size` bytes (of which `actual_parent_size` are
    /// occupied), starting from `parent_alignment`. A non-zero `packing` caps member alignment.
    #[must_use]
    pub fn layout_fields(
        parent_size: u32,
        actual_parent_size: u32,
        parent_alignment: u8,
        packing: u8,
        fields: &[SizeAndAlignment],
    ) -> FieldLayoutData {
        let mut data = FieldLayoutData {
            field_offsets: Vec::with_capacity(fields.len()),
            class_size: parent_size,
            actual_class_size: actual_parent_size,
            minimum_alignment: parent_alignment.max(1),
            natural_alignment: 0,
        };

        for field in fields {
            let reported = field.alignment.max(1);
            let mut alignment = reported;
            if alignment < ALIGNMENT_FLOOR && field.natural_alignment != 0 {
                alignment = field.natural_alignment;
            }
            if packing != 0 {
                alignment = reported.min(packing);
            }

            let offset = align_to(data.actual_class_size, u32::from(alignment));
            data.field_offsets.push(offset);
            data.actual_class_size = offset + field.size.max(1);
            data.minimum_alignment = data.minimum_alignment.max(alignment);
            data.natural_alignment = data
                .natural_alignment
                .max(reported)
                .max(field.natural_alignment);
        }

        data.class_size = align_to(data.actual_class_size, u32::from(data.minimum_alignment));
        data.actual_class_size = data.class_size;
        data
    }

    /// Lays out a static or thread-static bucket: no parent, offset zero, alignment one.
    #[must_use]
    pub fn layout_statics(fields: &[SizeAndAlignment]) -> FieldLayoutData {
        Self::layout_fields(0, 0, 1, 0, fields)
    }

    /// The effective alignment [`FieldLayout::layout_fields`] used for a member.
    #[must_use]
    pub fn effective_alignment(field: &SizeAndAlignment, packing: u8) -> u8 {
        let reported = field.alignment.max(1);
        if packing != 0 {
            reported.min(packing)
        } else if reported < ALIGNMENT_FLOOR && field.natural_alignment != 0 {
            field.natural_alignment
        } else {
            reported
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: u32 = 16;

    #[test]
    fn byte_then_long_value_type() {
        // A value type starts behind the object header with alignment one.
        let data = FieldLayout::layout_fields(
            HEADER,
            HEADER,
            1,
            0,
            &[SizeAndAlignment::new(1, 1), SizeAndAlignment::new(8, 8)],
        );
        let relative: Vec<u32> = data.field_offsets.iter().map(|o| o - HEADER).collect();
        assert_eq!(relative, vec![0, 8]);
        assert_eq!(data.class_size - HEADER, 16);
        assert_eq!(data.minimum_alignment, 8);
        assert_eq!(data.natural_alignment, 8);
    }

    #[test]
    fn packing_caps_alignment() {
        let data = FieldLayout::layout_fields(
            0,
            0,
            1,
            1,
            &[SizeAndAlignment::new(1, 1), SizeAndAlignment::new(8, 8)],
        );
        assert_eq!(data.field_offsets, vec![0, 1]);
        assert_eq!(data.class_size, 9);
        assert_eq!(data.minimum_alignment, 1);
        assert_eq!(data.natural_alignment, 8);
    }

    #[test]
    fn low_alignment_uses_natural() {
        // A struct packed to 1 but naturally 8-aligned is placed on its natural boundary.
        let packed = SizeAndAlignment::with_natural(9, 1, 8);
        let data =
            FieldLayout::layout_fields(0, 0, 1, 0, &[SizeAndAlignment::new(1, 1), packed]);
        assert_eq!(data.field_offsets, vec![0, 8]);
        assert_eq!(data.class_size, 24);
    }

    #[test]
    fn zero_sized_members_reserve_a_byte() {
        let empty = SizeAndAlignment::new(0, 1);
        let data = FieldLayout::layout_fields(0, 0, 1, 0, &[empty, empty, empty]);
        assert_eq!(data.field_offsets, vec![0, 1, 2]);
        assert_eq!(data.class_size, 3);
    }

    #[test]
    fn statics_start_at_zero() {
        let data = FieldLayout::layout_statics(&[SizeAndAlignment::new(4, 4), SizeAndAlignment::new(8, 8)]);
        assert_eq!(data.field_offsets, vec![0, 8]);
        assert_eq!(data.class_size, 16);
    }

    #[test]
    fn parent_padding_is_reused() {
        // The parent occupies 17 bytes of a 24 byte object; new fields continue at 17.
        let data = FieldLayout::layout_fields(24, 17, 8, 0, &[SizeAndAlignment::new(1, 1)]);
        assert_eq!(data.field_offsets, vec![17]);
        assert_eq!(data.class_size, 24);
        assert_eq!(data.minimum_alignment, 8);
    }

    #[test]
    fn no_overlap_and_aligned() {
        let shapes = [
            SizeAndAlignment::new(1, 1),
            SizeAndAlignment::new(2, 2),
            SizeAndAlignment::new(4, 4),
            SizeAndAlignment::new(8, 8),
            SizeAndAlignment::new(0, 1),
            SizeAndAlignment::new(12, 4),
            SizeAndAlignment::with_natural(3, 1, 2),
            SizeAndAlignment::new(24, 8),
        ];
        for packing in [0u8, 1, 2, 4, 8] {
            for seed in 0..64usize {
                let fields: Vec<SizeAndAlignment> = (0..7)
                    .map(|i| shapes[(seed * 7 + i * (seed % 5 + 1)) % shapes.len()])
                    .collect();
                let data = FieldLayout::layout_fields(HEADER, HEADER, 1, packing, &fields);
                assert_eq!(data, FieldLayout::layout_fields(HEADER, HEADER, 1, packing, &fields));

                for (i, field) in fields.iter().enumerate() {
                    let offset = data.field_offsets[i];
                    let alignment = u32::from(FieldLayout::effective_alignment(field, packing));
                    assert_eq!(offset % alignment, 0);
                    assert!(offset >= HEADER);
                    let end = offset + field.size.max(1);
                    assert!(end <= data.class_size);
                    for (j, other) in fields.iter().enumerate().skip(i + 1) {
                        let other_offset = data.field_offsets[j];
                        let other_end = other_offset + other.size.max(1);
                        assert!(end <= other_offset || other_end <= offset);
                    }
                }
                assert_eq!(data.class_size % u32::from(data.minimum_alignment), 0);
            }
        }
    }
}

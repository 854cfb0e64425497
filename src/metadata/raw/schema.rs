//! Column layouts of the ECMA-335 tables and the size computations that depend on row counts.
//!
//! Row sizes are not fixed: string, GUID and blob indices widen to four bytes when the heap flags say
//! so, simple table indices widen when the target table has more than 65535 rows, and coded indices
//! widen when any of their target tables no longer fits in the bits left over after the tag.

use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::{metadata::token::TableId, Result};

/// The coded index kinds of ECMA-335 II.24.2.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
#[allow(missing_docs)]
pub enum CodedIndex {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndex {
    /// The target tables in tag order. `None` marks a tag value that is reserved.
    #[must_use]
    pub fn tables(self) -> &'static [Option<TableId>] {
        use TableId::*;
        match self {
            CodedIndex::TypeDefOrRef => &[Some(TypeDef), Some(TypeRef), Some(TypeSpec)],
            CodedIndex::HasConstant => &[Some(Field), Some(Param), Some(Property)],
            CodedIndex::HasCustomAttribute => &[
                Some(MethodDef),
                Some(Field),
                Some(TypeRef),
                Some(TypeDef),
                Some(Param),
                Some(InterfaceImpl),
                Some(MemberRef),
                Some(Module),
                Some(DeclSecurity),
                Some(Property),
                Some(Event),
                Some(StandAloneSig),
                Some(ModuleRef),
                Some(TypeSpec),
                Some(Assembly),
                Some(AssemblyRef),
                Some(File),
                Some(ExportedType),
                Some(ManifestResource),
                Some(GenericParam),
                Some(GenericParamConstraint),
                Some(MethodSpec),
            ],
            CodedIndex::HasFieldMarshal => &[Some(Field), Some(Param)],
            CodedIndex::HasDeclSecurity => &[Some(TypeDef), Some(MethodDef), Some(Assembly)],
            CodedIndex::MemberRefParent => &[
                Some(TypeDef),
                Some(TypeRef),
                Some(ModuleRef),
                Some(MethodDef),
                Some(TypeSpec),
            ],
            CodedIndex::HasSemantics => &[Some(Event), Some(Property)],
            CodedIndex::MethodDefOrRef => &[Some(MethodDef), Some(MemberRef)],
            CodedIndex::MemberForwarded => &[Some(Field), Some(MethodDef)],
            CodedIndex::Implementation => &[Some(File), Some(AssemblyRef), Some(ExportedType)],
            CodedIndex::CustomAttributeType => {
                &[None, None, Some(MethodDef), Some(MemberRef), None]
            }
            CodedIndex::ResolutionScope => {
                &[Some(Module), Some(ModuleRef), Some(AssemblyRef), Some(TypeRef)]
            }
            CodedIndex::TypeOrMethodDef => &[Some(TypeDef), Some(MethodDef)],
        }
    }

    /// Number of low bits holding the tag.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn tag_bits(self) -> u32 {
        let count = self.tables().len() as u32;
        u32::BITS - (count - 1).leading_zeros()
    }

    /// Splits an encoded value into its target table and row.
    pub fn decode(self, value: u32) -> Result<(TableId, u32)> {
        let tag_bits = self.tag_bits();
        let tag = (value & ((1 << tag_bits) - 1)) as usize;
        match self.tables().get(tag) {
            Some(Some(table)) => Ok((*table, value >> tag_bits)),
            _ => Err(malformed_error!(
                "Invalid tag {} for coded index {:?}",
                tag,
                self
            )),
        }
    }

    /// Encodes a target table and row.
    pub fn encode(self, table: TableId, row: u32) -> Result<u32> {
        let Some(tag) = self.tables().iter().position(|t| *t == Some(table)) else {
            return Err(malformed_error!(
                "Table {:?} is not a target of {:?}",
                table,
                self
            ));
        };

        #[allow(clippy::cast_possible_truncation)]
        Ok((row << self.tag_bits()) | tag as u32)
    }
}

/// The kind of a single table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// A fixed two-byte value.
    U16,
    /// A fixed four-byte value.
    U32,
    /// An index into `#Strings`.
    String,
    /// An index into `#GUID`.
    Guid,
    /// An index into `#Blob`.
    Blob,
    /// A 1-based row index into another table.
    Table(TableId),
    /// A coded index.
    Coded(CodedIndex),
}

/// The column layout of each table, in declaration order.
#[must_use]
pub fn table_columns(table: TableId) -> &'static [Column] {
    use Column::*;
    match table {
        TableId::Module => &[U16, String, Guid, Guid, Guid],
        TableId::TypeRef => &[Coded(CodedIndex::ResolutionScope), String, String],
        TableId::TypeDef => &[
            U32,
            String,
            String,
            Coded(CodedIndex::TypeDefOrRef),
            Table(TableId::Field),
            Table(TableId::MethodDef),
        ],
        TableId::FieldPtr => &[Table(TableId::Field)],
        TableId::Field => &[U16, String, Blob],
        TableId::MethodPtr => &[Table(TableId::MethodDef)],
        TableId::MethodDef => &[U32, U16, U16, String, Blob, Table(TableId::Param)],
        TableId::ParamPtr => &[Table(TableId::Param)],
        TableId::Param => &[U16, U16, String],
        TableId::InterfaceImpl => &[Table(TableId::TypeDef), Coded(CodedIndex::TypeDefOrRef)],
        TableId::MemberRef => &[Coded(CodedIndex::MemberRefParent), String, Blob],
        TableId::Constant => &[U16, Coded(CodedIndex::HasConstant), Blob],
        TableId::CustomAttribute => &[
            Coded(CodedIndex::HasCustomAttribute),
            Coded(CodedIndex::CustomAttributeType),
            Blob,
        ],
        TableId::FieldMarshal => &[Coded(CodedIndex::HasFieldMarshal), Blob],
        TableId::DeclSecurity => &[U16, Coded(CodedIndex::HasDeclSecurity), Blob],
        TableId::ClassLayout => &[U16, U32, Table(TableId::TypeDef)],
        TableId::FieldLayout => &[U32, Table(TableId::Field)],
        TableId::StandAloneSig => &[Blob],
        TableId::EventMap => &[Table(TableId::TypeDef), Table(TableId::Event)],
        TableId::EventPtr => &[Table(TableId::Event)],
        TableId::Event => &[U16, String, Coded(CodedIndex::TypeDefOrRef)],
        TableId::PropertyMap => &[Table(TableId::TypeDef), Table(TableId::Property)],
        TableId::PropertyPtr => &[Table(TableId::Property)],
        TableId::Property => &[U16, String, Blob],
        TableId::MethodSemantics => &[
            U16,
            Table(TableId::MethodDef),
            Coded(CodedIndex::HasSemantics),
        ],
        TableId::MethodImpl => &[
            Table(TableId::TypeDef),
            Coded(CodedIndex::MethodDefOrRef),
            Coded(CodedIndex::MethodDefOrRef),
        ],
        TableId::ModuleRef => &[String],
        TableId::TypeSpec => &[Blob],
        TableId::ImplMap => &[
            U16,
            Coded(CodedIndex::MemberForwarded),
            String,
            Table(TableId::ModuleRef),
        ],
        TableId::FieldRVA => &[U32, Table(TableId::Field)],
        TableId::EncLog => &[U32, U32],
        TableId::EncMap => &[U32],
        TableId::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, String, String],
        TableId::AssemblyProcessor => &[U32],
        TableId::AssemblyOS => &[U32, U32, U32],
        TableId::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, String, String, Blob],
        TableId::AssemblyRefProcessor => &[U32, Table(TableId::AssemblyRef)],
        TableId::AssemblyRefOS => &[U32, U32, U32, Table(TableId::AssemblyRef)],
        TableId::File => &[U32, String, Blob],
        TableId::ExportedType => &[U32, U32, String, String, Coded(CodedIndex::Implementation)],
        TableId::ManifestResource => &[U32, U32, String, Coded(CodedIndex::Implementation)],
        TableId::NestedClass => &[Table(TableId::TypeDef), Table(TableId::TypeDef)],
        TableId::GenericParam => &[U16, U16, Coded(CodedIndex::TypeOrMethodDef), String],
        TableId::MethodSpec => &[Coded(CodedIndex::MethodDefOrRef), Blob],
        TableId::GenericParamConstraint => {
            &[Table(TableId::GenericParam), Coded(CodedIndex::TypeDefOrRef)]
        }
    }
}

/// Row counts and heap widths of one image, from which every column width follows.
#[derive(Debug, Clone)]
pub struct TableInfo {
    rows: [u32; TableId::COUNT],
    large_strings: bool,
    large_guids: bool,
    large_blobs: bool,
}

/// Heap-size flag bits of the `#~` header.
pub const HEAP_LARGE_STRINGS: u8 = 0x01;
/// Heap-size flag bit for four-byte GUID indices.
pub const HEAP_LARGE_GUIDS: u8 = 0x02;
/// Heap-size flag bit for four-byte blob indices.
pub const HEAP_LARGE_BLOBS: u8 = 0x04;

impl Default for TableInfo {
    fn default() -> Self {
        TableInfo::new([0; TableId::COUNT], 0)
    }
}

impl TableInfo {
    /// Creates the size information from per-table row counts and the heap flag byte.
    #[must_use]
    pub fn new(rows: [u32; TableId::COUNT], heap_sizes: u8) -> Self {
        TableInfo {
            rows,
            large_strings: heap_sizes & HEAP_LARGE_STRINGS != 0,
            large_guids: heap_sizes & HEAP_LARGE_GUIDS != 0,
            large_blobs: heap_sizes & HEAP_LARGE_BLOBS != 0,
        }
    }

    /// The heap flag byte that reproduces these widths.
    #[must_use]
    pub fn heap_sizes(&self) -> u8 {
        let mut flags = 0;
        if self.large_strings {
            flags |= HEAP_LARGE_STRINGS;
        }
        if self.large_guids {
            flags |= HEAP_LARGE_GUIDS;
        }
        if self.large_blobs {
            flags |= HEAP_LARGE_BLOBS;
        }
        flags
    }

    /// Row count of a table.
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[table as usize]
    }

    /// True if a plain index into `table` needs four bytes.
    #[must_use]
    pub fn is_large_table(&self, table: TableId) -> bool {
        self.rows(table) > u32::from(u16::MAX)
    }

    /// True if a coded index of this kind needs four bytes.
    #[must_use]
    pub fn is_large_coded(&self, coded: CodedIndex) -> bool {
        let limit = 1u32 << (16 - coded.tag_bits());
        coded
            .tables()
            .iter()
            .flatten()
            .any(|table| self.rows(*table) >= limit)
    }

    /// Width in bytes of a column.
    #[must_use]
    pub fn column_size(&self, column: Column) -> usize {
        let large = match column {
            Column::U16 => false,
            Column::U32 => true,
            Column::String => self.large_strings,
            Column::Guid => self.large_guids,
            Column::Blob => self.large_blobs,
            Column::Table(table) => self.is_large_table(table),
            Column::Coded(coded) => self.is_large_coded(coded),
        };
        if large {
            4
        } else {
            2
        }
    }

    /// Width in bytes of one row of `table`.
    #[must_use]
    pub fn row_size(&self, table: TableId) -> usize {
        table_columns(table)
            .iter()
            .map(|column| self.column_size(*column))
            .sum()
    }

    /// Tables with at least one row, in physical order.
    pub fn present(&self) -> impl Iterator<Item = TableId> + '_ {
        TableId::iter().filter(|table| self.rows(*table) > 0)
    }

    /// The `valid` bit vector of the `#~` header.
    #[must_use]
    pub fn valid_mask(&self) -> u64 {
        self.present()
            .fold(0u64, |mask, table| mask | (1u64 << table as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_bits() {
        assert_eq!(CodedIndex::TypeDefOrRef.tag_bits(), 2);
        assert_eq!(CodedIndex::HasCustomAttribute.tag_bits(), 5);
        assert_eq!(CodedIndex::MethodDefOrRef.tag_bits(), 1);
        assert_eq!(CodedIndex::MemberRefParent.tag_bits(), 3);
        assert_eq!(CodedIndex::CustomAttributeType.tag_bits(), 3);
    }

    #[test]
    fn coded_roundtrip() {
        let value = CodedIndex::MemberRefParent
            .encode(TableId::TypeSpec, 7)
            .unwrap();
        assert_eq!(value, (7 << 3) | 4);
        assert_eq!(
            CodedIndex::MemberRefParent.decode(value).unwrap(),
            (TableId::TypeSpec, 7)
        );
        assert!(CodedIndex::MethodDefOrRef.encode(TableId::Field, 1).is_err());
        assert!(CodedIndex::CustomAttributeType.decode(0).is_err());
    }

    #[test]
    fn small_row_sizes() {
        let mut rows = [0u32; TableId::COUNT];
        rows[TableId::TypeDef as usize] = 10;
        let info = TableInfo::new(rows, 0);
        assert_eq!(info.row_size(TableId::TypeDef), 4 + 2 + 2 + 2 + 2 + 2);
        assert_eq!(info.row_size(TableId::MethodDef), 4 + 2 + 2 + 2 + 2 + 2);
        assert_eq!(info.row_size(TableId::Assembly), 4 + 2 * 4 + 4 + 2 + 2 + 2);
        assert_eq!(info.valid_mask(), 1 << 2);
    }

    #[test]
    fn default_has_no_tables() {
        let info = TableInfo::default();
        assert_eq!(info.valid_mask(), 0);
        assert_eq!(info.heap_sizes(), 0);
        assert_eq!(info.rows(TableId::GenericParamConstraint), 0);
        assert_eq!(info.column_size(Column::String), 2);
    }

    #[test]
    fn wide_indices() {
        let mut rows = [0u32; TableId::COUNT];
        rows[TableId::TypeRef as usize] = 0x4000;
        rows[TableId::Field as usize] = 0x1_0000;
        let info = TableInfo::new(rows, HEAP_LARGE_STRINGS | HEAP_LARGE_BLOBS);

        assert!(info.is_large_coded(CodedIndex::TypeDefOrRef));
        assert!(!info.is_large_coded(CodedIndex::MethodDefOrRef));
        assert!(info.is_large_table(TableId::Field));
        // flags, name, namespace, extends, field list, method list
        assert_eq!(info.row_size(TableId::TypeDef), 4 + 4 + 4 + 4 + 4 + 2);
        assert_eq!(info.heap_sizes(), 0x05);
    }
}

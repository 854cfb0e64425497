//! Emission of bare metadata roots.
//!
//! [`MetadataWriter`] collects heap entries and table rows and lays them out as a `BSJB` metadata
//! root that [`crate::metadata::raw::RawImage::parse`] accepts. The typed helpers append rows in the
//! order the tables require: a type's fields and methods are the ones added after it.

use std::collections::HashMap;

use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::io::{write_le_dyn, LeIO},
    file::parser::write_compressed_uint,
    metadata::{
        raw::{
            image::METADATA_SIGNATURE,
            schema::{table_columns, CodedIndex, TableInfo, HEAP_LARGE_BLOBS, HEAP_LARGE_STRINGS},
        },
        token::{TableId, Token},
    },
    Result,
};

/// Builds a metadata root table by table.
pub struct MetadataWriter {
    strings: Vec<u8>,
    string_index: HashMap<String, u32>,
    blobs: Vec<u8>,
    blob_index: HashMap<Vec<u8>, u32>,
    rows: Vec<Vec<Vec<u32>>>,
    version: String,
}

impl Default for MetadataWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_possible_truncation)]
impl MetadataWriter {
    /// Creates a writer with empty heaps.
    #[must_use]
    pub fn new() -> Self {
        MetadataWriter {
            strings: vec![0],
            string_index: HashMap::new(),
            blobs: vec![0],
            blob_index: HashMap::new(),
            rows: vec![Vec::new(); TableId::COUNT],
            version: "v4.0.30319".to_string(),
        }
    }

    /// Interns a string and returns its heap index.
    pub fn string(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(index) = self.string_index.get(value) {
            return *index;
        }

        let index = self.strings.len() as u32;
        self.strings.extend_from_slice(value.as_bytes());
        self.strings.push(0);
        self.string_index.insert(value.to_string(), index);
        index
    }

    /// Interns a blob and returns its heap index.
    pub fn blob(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(index) = self.blob_index.get(value) {
            return Ok(*index);
        }

        let index = self.blobs.len() as u32;
        write_compressed_uint(&mut self.blobs, value.len() as u32)?;
        self.blobs.extend_from_slice(value);
        self.blob_index.insert(value.to_vec(), index);
        Ok(index)
    }

    /// Number of rows currently in `table`.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.rows[table as usize].len() as u32
    }

    /// Appends a raw row and returns its token.
    pub fn push_row(&mut self, table: TableId, columns: &[u32]) -> Result<Token> {
        if columns.len() != table_columns(table).len() {
            return Err(malformed_error!(
                "{:?} expects {} columns, got {}",
                table,
                table_columns(table).len(),
                columns.len()
            ));
        }

        self.rows[table as usize].push(columns.to_vec());
        Ok(table.token(self.row_count(table)))
    }

    fn coded(coded: CodedIndex, token: Option<Token>) -> Result<u32> {
        match token {
            None => Ok(0),
            Some(token) => {
                let table = token
                    .table_id()
                    .ok_or_else(|| malformed_error!("Unknown table in {}", token))?;
                coded.encode(table, token.row())
            }
        }
    }

    /// Adds the `Module` row.
    pub fn add_module(&mut self, name: &str) -> Result<Token> {
        let name = self.string(name);
        self.push_row(TableId::Module, &[0, name, 0, 0, 0])
    }

    /// Adds the `Assembly` row.
    pub fn add_assembly(&mut self, name: &str, version: [u16; 4]) -> Result<Token> {
        let name = self.string(name);
        self.push_row(
            TableId::Assembly,
            &[
                0x8004,
                u32::from(version[0]),
                u32::from(version[1]),
                u32::from(version[2]),
                u32::from(version[3]),
                0,
                0,
                name,
                0,
            ],
        )
    }

    /// Adds an `AssemblyRef` row.
    pub fn add_assembly_ref(&mut self, name: &str, version: [u16; 4]) -> Result<Token> {
        let name = self.string(name);
        self.push_row(
            TableId::AssemblyRef,
            &[
                u32::from(version[0]),
                u32::from(version[1]),
                u32::from(version[2]),
                u32::from(version[3]),
                0,
                0,
                name,
                0,
                0,
            ],
        )
    }

    /// Adds a `TypeRef` row.
    pub fn add_type_ref(&mut self, scope: Token, namespace: &str, name: &str) -> Result<Token> {
        let scope = Self::coded(CodedIndex::ResolutionScope, Some(scope))?;
        let name = self.string(name);
        let namespace = self.string(namespace);
        self.push_row(TableId::TypeRef, &[scope, name, namespace])
    }

    /// Adds a `TypeDef` row; subsequently added fields and methods belong to it.
    pub fn add_type_def(
        &mut self,
        flags: u32,
        namespace: &str,
        name: &str,
        extends: Option<Token>,
    ) -> Result<Token> {
        let extends = Self::coded(CodedIndex::TypeDefOrRef, extends)?;
        let name = self.string(name);
        let namespace = self.string(namespace);
        let field_list = self.row_count(TableId::Field) + 1;
        let method_list = self.row_count(TableId::MethodDef) + 1;
        self.push_row(
            TableId::TypeDef,
            &[flags, name, namespace, extends, field_list, method_list],
        )
    }

    /// Adds a `Field` row.
    pub fn add_field(&mut self, flags: u16, name: &str, signature: &[u8]) -> Result<Token> {
        let name = self.string(name);
        let signature = self.blob(signature)?;
        self.push_row(TableId::Field, &[u32::from(flags), name, signature])
    }

    /// Adds a `MethodDef` row.
    pub fn add_method(
        &mut self,
        flags: u16,
        impl_flags: u16,
        name: &str,
        signature: &[u8],
    ) -> Result<Token> {
        let name = self.string(name);
        let signature = self.blob(signature)?;
        let param_list = self.row_count(TableId::Param) + 1;
        self.push_row(
            TableId::MethodDef,
            &[0, u32::from(impl_flags), u32::from(flags), name, signature, param_list],
        )
    }

    /// Adds a `MemberRef` row.
    pub fn add_member_ref(&mut self, parent: Token, name: &str, signature: &[u8]) -> Result<Token> {
        let parent = Self::coded(CodedIndex::MemberRefParent, Some(parent))?;
        let name = self.string(name);
        let signature = self.blob(signature)?;
        self.push_row(TableId::MemberRef, &[parent, name, signature])
    }

    /// Adds a `TypeSpec` row.
    pub fn add_type_spec(&mut self, signature: &[u8]) -> Result<Token> {
        let signature = self.blob(signature)?;
        self.push_row(TableId::TypeSpec, &[signature])
    }

    /// Adds a `MethodSpec` row.
    pub fn add_method_spec(&mut self, method: Token, instantiation: &[u8]) -> Result<Token> {
        let method = Self::coded(CodedIndex::MethodDefOrRef, Some(method))?;
        let instantiation = self.blob(instantiation)?;
        self.push_row(TableId::MethodSpec, &[method, instantiation])
    }

    /// Adds a `NestedClass` row.
    pub fn add_nested_class(&mut self, nested: Token, enclosing: Token) -> Result<Token> {
        self.push_row(TableId::NestedClass, &[nested.row(), enclosing.row()])
    }

    /// Adds an `InterfaceImpl` row.
    pub fn add_interface_impl(&mut self, class: Token, interface: Token) -> Result<Token> {
        let interface = Self::coded(CodedIndex::TypeDefOrRef, Some(interface))?;
        self.push_row(TableId::InterfaceImpl, &[class.row(), interface])
    }

    /// Adds a `ClassLayout` row.
    pub fn add_class_layout(&mut self, parent: Token, packing_size: u16, class_size: u32) -> Result<Token> {
        self.push_row(
            TableId::ClassLayout,
            &[u32::from(packing_size), class_size, parent.row()],
        )
    }

    /// Adds a `FieldLayout` row.
    pub fn add_field_layout(&mut self, field: Token, offset: u32) -> Result<Token> {
        self.push_row(TableId::FieldLayout, &[offset, field.row()])
    }

    /// Adds a `GenericParam` row.
    pub fn add_generic_param(&mut self, owner: Token, number: u16, name: &str) -> Result<Token> {
        let owner = Self::coded(CodedIndex::TypeOrMethodDef, Some(owner))?;
        let name = self.string(name);
        self.push_row(TableId::GenericParam, &[u32::from(number), 0, owner, name])
    }

    /// Adds a `Param` row for the most recently added method.
    pub fn add_param(&mut self, sequence: u16, name: &str) -> Result<Token> {
        let name = self.string(name);
        self.push_row(TableId::Param, &[0, u32::from(sequence), name])
    }

    /// Lays out the metadata root.
    pub fn finish(&self) -> Result<Vec<u8>> {
        let mut row_counts = [0u32; TableId::COUNT];
        for table in TableId::iter() {
            row_counts[table as usize] = self.row_count(table);
        }

        let mut heap_sizes = 0;
        if self.strings.len() > 0xFFFF {
            heap_sizes |= HEAP_LARGE_STRINGS;
        }
        if self.blobs.len() > 0xFFFF {
            heap_sizes |= HEAP_LARGE_BLOBS;
        }
        let info = TableInfo::new(row_counts, heap_sizes);

        let tables = self.tables_stream(&info);
        let streams: [(&str, Vec<u8>); 5] = [
            ("#~", tables),
            ("#Strings", padded(self.strings.clone())),
            ("#US", padded(vec![0])),
            ("#GUID", Vec::new()),
            ("#Blob", padded(self.blobs.clone())),
        ];

        let mut version = self.version.as_bytes().to_vec();
        version.push(0);
        let version = padded(version);

        let header_size: usize = 16
            + version.len()
            + 4
            + streams
                .iter()
                .map(|(name, _)| 8 + (name.len() / 4 + 1) * 4)
                .sum::<usize>();

        let mut out = Vec::new();
        METADATA_SIGNATURE.write_le(&mut out);
        1u16.write_le(&mut out);
        1u16.write_le(&mut out);
        0u32.write_le(&mut out);
        (version.len() as u32).write_le(&mut out);
        out.extend_from_slice(&version);
        0u16.write_le(&mut out);
        (streams.len() as u16).write_le(&mut out);

        let mut offset = header_size;
        for (name, data) in &streams {
            (offset as u32).write_le(&mut out);
            (data.len() as u32).write_le(&mut out);
            let mut name_bytes = name.as_bytes().to_vec();
            name_bytes.resize((name.len() / 4 + 1) * 4, 0);
            out.extend_from_slice(&name_bytes);
            offset += data.len();
        }

        for (_, data) in &streams {
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    fn tables_stream(&self, info: &TableInfo) -> Vec<u8> {
        let mut out = Vec::new();
        0u32.write_le(&mut out);
        2u8.write_le(&mut out);
        0u8.write_le(&mut out);
        info.heap_sizes().write_le(&mut out);
        1u8.write_le(&mut out);
        info.valid_mask().write_le(&mut out);
        0u64.write_le(&mut out);

        for table in info.present() {
            info.rows(table).write_le(&mut out);
        }

        for table in info.present() {
            let columns = table_columns(table);
            for row in &self.rows[table as usize] {
                for (column, value) in columns.iter().zip(row) {
                    write_le_dyn(&mut out, *value, info.column_size(*column) == 4);
                }
            }
        }

        padded(out)
    }
}

fn padded(mut data: Vec<u8>) -> Vec<u8> {
    while data.len() % 4 != 0 {
        data.push(0);
    }
    data
}

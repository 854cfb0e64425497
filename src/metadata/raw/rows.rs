//! Typed row views over a [`RawImage`].
//!
//! Each accessor reads one row on demand; string and blob columns borrow from the image heaps.

use std::ops::Range;

use crate::{
    metadata::{
        raw::{schema::CodedIndex, RawImage},
        token::{TableId, Token},
    },
    Result,
};

/// A `TypeRef` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRefRow<'a> {
    /// `Module`, `ModuleRef`, `AssemblyRef` or enclosing `TypeRef`; `None` for exported types.
    pub resolution_scope: Option<Token>,
    /// Type name.
    pub name: &'a str,
    /// Namespace, empty for nested types.
    pub namespace: &'a str,
}

/// A `TypeDef` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDefRow<'a> {
    /// `TypeAttributes` bits.
    pub flags: u32,
    /// Type name.
    pub name: &'a str,
    /// Namespace.
    pub namespace: &'a str,
    /// The base type, if any.
    pub extends: Option<Token>,
    /// First owned `Field` row.
    pub field_list: u32,
    /// First owned `MethodDef` row.
    pub method_list: u32,
}

/// A `Field` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRow<'a> {
    /// `FieldAttributes` bits.
    pub flags: u16,
    /// Field name.
    pub name: &'a str,
    /// `FieldSig` blob.
    pub signature: &'a [u8],
}

/// A `MethodDef` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDefRow<'a> {
    /// RVA of the method body, zero for abstract and runtime methods.
    pub rva: u32,
    /// `MethodImplAttributes` bits.
    pub impl_flags: u16,
    /// `MethodAttributes` bits.
    pub flags: u16,
    /// Method name.
    pub name: &'a str,
    /// `MethodDefSig` blob.
    pub signature: &'a [u8],
    /// First owned `Param` row.
    pub param_list: u32,
}

/// A `MemberRef` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRefRow<'a> {
    /// `TypeDef`, `TypeRef`, `ModuleRef`, `MethodDef` or `TypeSpec`.
    pub parent: Token,
    /// Member name.
    pub name: &'a str,
    /// Field or method signature blob.
    pub signature: &'a [u8],
}

/// A `MethodSpec` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpecRow<'a> {
    /// The generic method, a `MethodDef` or `MemberRef`.
    pub method: Token,
    /// The instantiation blob.
    pub instantiation: &'a [u8],
}

/// An `Assembly` or `AssemblyRef` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyRow<'a> {
    /// Simple assembly name.
    pub name: &'a str,
    /// Culture, empty for neutral.
    pub culture: &'a str,
    /// Major, minor, build, revision.
    pub version: [u16; 4],
    /// `AssemblyFlags` bits.
    pub flags: u32,
}

/// A `GenericParam` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericParamRow<'a> {
    /// Position in the owner's parameter list.
    pub number: u16,
    /// `GenericParamAttributes` bits.
    pub flags: u16,
    /// Owning `TypeDef` or `MethodDef`.
    pub owner: Token,
    /// Parameter name.
    pub name: &'a str,
}

fn coded(image: &RawImage, coded: CodedIndex, value: u32) -> Result<Option<Token>> {
    let (table, row) = coded.decode(value)?;
    if row == 0 {
        return Ok(None);
    }
    if row > image.row_count(table) {
        return Err(malformed_error!(
            "{:?} points past table {:?} - row {}",
            coded,
            table,
            row
        ));
    }
    Ok(Some(Token::from_parts(table, row)))
}

#[allow(clippy::cast_possible_truncation)]
impl RawImage {
    fn string_column(&self, table: TableId, row: u32, column: usize) -> Result<&str> {
        self.strings().get(self.column(table, row, column)? as usize)
    }

    fn blob_column(&self, table: TableId, row: u32, column: usize) -> Result<&[u8]> {
        self.blobs().get(self.column(table, row, column)? as usize)
    }

    /// Module name of row 1.
    pub fn module_name(&self) -> Result<&str> {
        self.string_column(TableId::Module, 1, 1)
    }

    /// Reads a `TypeRef` row.
    pub fn type_ref(&self, row: u32) -> Result<TypeRefRow<'_>> {
        Ok(TypeRefRow {
            resolution_scope: coded(
                self,
                CodedIndex::ResolutionScope,
                self.column(TableId::TypeRef, row, 0)?,
            )?,
            name: self.string_column(TableId::TypeRef, row, 1)?,
            namespace: self.string_column(TableId::TypeRef, row, 2)?,
        })
    }

    /// Reads a `TypeDef` row.
    pub fn type_def(&self, row: u32) -> Result<TypeDefRow<'_>> {
        Ok(TypeDefRow {
            flags: self.column(TableId::TypeDef, row, 0)?,
            name: self.string_column(TableId::TypeDef, row, 1)?,
            namespace: self.string_column(TableId::TypeDef, row, 2)?,
            extends: coded(
                self,
                CodedIndex::TypeDefOrRef,
                self.column(TableId::TypeDef, row, 3)?,
            )?,
            field_list: self.column(TableId::TypeDef, row, 4)?,
            method_list: self.column(TableId::TypeDef, row, 5)?,
        })
    }

    /// Reads a `Field` row.
    pub fn field(&self, row: u32) -> Result<FieldRow<'_>> {
        Ok(FieldRow {
            flags: self.column(TableId::Field, row, 0)? as u16,
            name: self.string_column(TableId::Field, row, 1)?,
            signature: self.blob_column(TableId::Field, row, 2)?,
        })
    }

    /// Reads a `MethodDef` row.
    pub fn method_def(&self, row: u32) -> Result<MethodDefRow<'_>> {
        Ok(MethodDefRow {
            rva: self.column(TableId::MethodDef, row, 0)?,
            impl_flags: self.column(TableId::MethodDef, row, 1)? as u16,
            flags: self.column(TableId::MethodDef, row, 2)? as u16,
            name: self.string_column(TableId::MethodDef, row, 3)?,
            signature: self.blob_column(TableId::MethodDef, row, 4)?,
            param_list: self.column(TableId::MethodDef, row, 5)?,
        })
    }

    /// Reads a `MemberRef` row.
    pub fn member_ref(&self, row: u32) -> Result<MemberRefRow<'_>> {
        let parent = coded(
            self,
            CodedIndex::MemberRefParent,
            self.column(TableId::MemberRef, row, 0)?,
        )?
        .ok_or_else(|| malformed_error!("MemberRef {} has no parent", row))?;

        Ok(MemberRefRow {
            parent,
            name: self.string_column(TableId::MemberRef, row, 1)?,
            signature: self.blob_column(TableId::MemberRef, row, 2)?,
        })
    }

    /// Reads the signature blob of a `TypeSpec` row.
    pub fn type_spec(&self, row: u32) -> Result<&[u8]> {
        self.blob_column(TableId::TypeSpec, row, 0)
    }

    /// Reads a `MethodSpec` row.
    pub fn method_spec(&self, row: u32) -> Result<MethodSpecRow<'_>> {
        let method = coded(
            self,
            CodedIndex::MethodDefOrRef,
            self.column(TableId::MethodSpec, row, 0)?,
        )?
        .ok_or_else(|| malformed_error!("MethodSpec {} has no method", row))?;

        Ok(MethodSpecRow {
            method,
            instantiation: self.blob_column(TableId::MethodSpec, row, 1)?,
        })
    }

    /// Reads the `Assembly` row.
    pub fn assembly(&self) -> Result<AssemblyRow<'_>> {
        let table = TableId::Assembly;
        Ok(AssemblyRow {
            version: [
                self.column(table, 1, 1)? as u16,
                self.column(table, 1, 2)? as u16,
                self.column(table, 1, 3)? as u16,
                self.column(table, 1, 4)? as u16,
            ],
            flags: self.column(table, 1, 5)?,
            name: self.string_column(table, 1, 7)?,
            culture: self.string_column(table, 1, 8)?,
        })
    }

    /// Reads an `AssemblyRef` row.
    pub fn assembly_ref(&self, row: u32) -> Result<AssemblyRow<'_>> {
        let table = TableId::AssemblyRef;
        Ok(AssemblyRow {
            version: [
                self.column(table, row, 0)? as u16,
                self.column(table, row, 1)? as u16,
                self.column(table, row, 2)? as u16,
                self.column(table, row, 3)? as u16,
            ],
            flags: self.column(table, row, 4)?,
            name: self.string_column(table, row, 6)?,
            culture: self.string_column(table, row, 7)?,
        })
    }

    /// Reads a `GenericParam` row.
    pub fn generic_param(&self, row: u32) -> Result<GenericParamRow<'_>> {
        let owner = coded(
            self,
            CodedIndex::TypeOrMethodDef,
            self.column(TableId::GenericParam, row, 2)?,
        )?
        .ok_or_else(|| malformed_error!("GenericParam {} has no owner", row))?;

        Ok(GenericParamRow {
            number: self.column(TableId::GenericParam, row, 0)? as u16,
            flags: self.column(TableId::GenericParam, row, 1)? as u16,
            owner,
            name: self.string_column(TableId::GenericParam, row, 3)?,
        })
    }

    /// The `Field` rows owned by `TypeDef` row `row`.
    pub fn type_field_range(&self, row: u32) -> Result<Range<u32>> {
        self.owned_range(row, 4, TableId::Field)
    }

    /// The `MethodDef` rows owned by `TypeDef` row `row`.
    pub fn type_method_range(&self, row: u32) -> Result<Range<u32>> {
        self.owned_range(row, 5, TableId::MethodDef)
    }

    fn owned_range(&self, row: u32, column: usize, target: TableId) -> Result<Range<u32>> {
        let start = self.column(TableId::TypeDef, row, column)?;
        let end = if row < self.row_count(TableId::TypeDef) {
            self.column(TableId::TypeDef, row + 1, column)?
        } else {
            self.row_count(target) + 1
        };

        let limit = self.row_count(target) + 1;
        if start == 0 || start > end || end > limit {
            return Err(malformed_error!(
                "TypeDef {} owns an invalid {:?} range {}..{}",
                row,
                target,
                start,
                end
            ));
        }
        Ok(start..end)
    }

    /// The interfaces `TypeDef` row `row` declares, in table order.
    pub fn interface_impls(&self, row: u32) -> Result<Vec<Token>> {
        let mut interfaces = Vec::new();
        for impl_row in 1..=self.row_count(TableId::InterfaceImpl) {
            if self.column(TableId::InterfaceImpl, impl_row, 0)? != row {
                continue;
            }
            let interface = coded(
                self,
                CodedIndex::TypeDefOrRef,
                self.column(TableId::InterfaceImpl, impl_row, 1)?,
            )?
            .ok_or_else(|| malformed_error!("InterfaceImpl {} has no interface", impl_row))?;
            interfaces.push(interface);
        }
        Ok(interfaces)
    }

    /// `(PackingSize, ClassSize)` of `TypeDef` row `row`, if it has a `ClassLayout` row.
    pub fn class_layout(&self, row: u32) -> Result<Option<(u16, u32)>> {
        for layout_row in 1..=self.row_count(TableId::ClassLayout) {
            if self.column(TableId::ClassLayout, layout_row, 2)? == row {
                return Ok(Some((
                    self.column(TableId::ClassLayout, layout_row, 0)? as u16,
                    self.column(TableId::ClassLayout, layout_row, 1)?,
                )));
            }
        }
        Ok(None)
    }

    /// The explicit offset of `Field` row `row`, if it has a `FieldLayout` row.
    pub fn field_offset(&self, row: u32) -> Result<Option<u32>> {
        for layout_row in 1..=self.row_count(TableId::FieldLayout) {
            if self.column(TableId::FieldLayout, layout_row, 1)? == row {
                return Ok(Some(self.column(TableId::FieldLayout, layout_row, 0)?));
            }
        }
        Ok(None)
    }

    /// The generic parameters owned by a `TypeDef` or `MethodDef`, ordered by number.
    pub fn generic_params_of(&self, owner: Token) -> Result<Vec<GenericParamRow<'_>>> {
        let mut params = Vec::new();
        for row in 1..=self.row_count(TableId::GenericParam) {
            let param = self.generic_param(row)?;
            if param.owner == owner {
                params.push(param);
            }
        }
        params.sort_by_key(|p| p.number);
        Ok(params)
    }

    /// The name of `Param` row `row`.
    pub fn param_name(&self, row: u32) -> Result<&str> {
        self.string_column(TableId::Param, row, 2)
    }

    /// The enclosing `TypeDef` row of a nested type.
    pub fn enclosing_type(&self, row: u32) -> Result<Option<u32>> {
        for nested_row in 1..=self.row_count(TableId::NestedClass) {
            if self.column(TableId::NestedClass, nested_row, 0)? == row {
                return Ok(Some(self.column(TableId::NestedClass, nested_row, 1)?));
            }
        }
        Ok(None)
    }
}

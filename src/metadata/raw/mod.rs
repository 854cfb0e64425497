//! Reader (and writer) for raw ECMA-335 metadata images.
//!
//! This is the collaborator that turns homologous image bytes into rows of tokens, names and
//! signatures. It performs the structural checks of a loader (signature, stream names, table
//! header version, heap flags, table bounds) and nothing else; semantic agreement with the AOT
//! metadata is checked by [`crate::homologous`].

mod heaps;
mod image;
mod rows;
mod schema;
mod writer;

pub use heaps::{Blob, Strings};
pub use image::{RawImage, METADATA_SIGNATURE};
pub use rows::{
    AssemblyRow, FieldRow, GenericParamRow, MemberRefRow, MethodDefRow, MethodSpecRow, TypeDefRow,
    TypeRefRow,
};
pub use schema::{table_columns, CodedIndex, Column, TableInfo};
pub use writer::MetadataWriter;

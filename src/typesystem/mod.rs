//! Runtime type handles, generic inflation and the field layout engine.
//!
//! - [`RuntimeType`] is the structural description of a type: what metadata signatures turn into
//!   and what generic arguments are made of. It is independent of any class descriptor.
//! - [`GenericInst`] / [`GenericContext`] carry the arguments substituted by [`inflate`]; the
//!   [`GenericInstTable`] interns argument lists so equal lists share one allocation.
//! - [`FieldLayout`] places a sequence of members given their sizes and alignments. It is a pure
//!   function of its inputs; the runtime feeds it with the sizes of already laid out types.
//! - The attribute bitflags mirror the ECMA-335 `TypeAttributes`, `FieldAttributes` and
//!   `MethodAttributes` columns.

mod attributes;
mod generics;
mod layout;
mod signature;
mod types;

pub use attributes::{FieldAttributes, MethodAttributes, TypeAttributes};
pub use generics::{inflate, inflate_inst, GenericInstTable};
pub use layout::{align_to, FieldLayout, FieldLayoutData, SizeAndAlignment};
pub use signature::{MethodShape, TypeTokenResolver};
pub use types::{GenericContext, GenericInst, RuntimeType};

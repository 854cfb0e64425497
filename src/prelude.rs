//! # dotrt Prelude
//!
//! Re-exports of the types most programs need: the runtime, its configuration, the AOT metadata
//! builder and the type handles used to describe members.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotrt operations
pub use crate::Error;

/// The result type used throughout dotrt
pub use crate::Result;

/// Outcome codes of image loading
pub use crate::LoadImageErrorCode;

// ================================================================================================
// Runtime
// ================================================================================================

/// The runtime context and its configuration
pub use crate::runtime::{Runtime, RuntimeConfig};

/// Descriptor handles
pub use crate::runtime::{ClassId, FieldRef, MethodId};

/// Descriptor views
pub use crate::runtime::{Class, ClassState, FieldInfo, MethodInfo, VTableSlot};

/// The object layer
pub use crate::runtime::{Allocator, Heap, ObjectRef};

// ================================================================================================
// Metadata
// ================================================================================================

/// Building the AOT metadata store
pub use crate::metadata::aot::{AotMetadata, AotMetadataBuilder, NewField, NewMethod, TypeBody};

/// Reading raw metadata images
pub use crate::metadata::raw::RawImage;

/// Metadata tokens
pub use crate::metadata::token::{TableId, Token};

// ================================================================================================
// Type System
// ================================================================================================

/// Type handles and generic arguments
pub use crate::typesystem::{GenericContext, GenericInst, RuntimeType};

/// Attribute flags
pub use crate::typesystem::{FieldAttributes, MethodAttributes, TypeAttributes};

// ================================================================================================
// Homologous Images
// ================================================================================================

/// A bound homologous image
pub use crate::homologous::HomologousImage;

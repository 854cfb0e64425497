//! Error types for the runtime type system.
//!
//! Every fallible operation in `dotrt` returns [`crate::Result`]. Failures fall into four groups:
//!
//! - **Metadata inconsistency**: malformed images and tables ([`Error::Malformed`], [`Error::OutOfBounds`],
//!   [`Error::LoadImage`]). Unrecoverable for the affected image.
//! - **Resolution failure**: a member reference that cannot be matched ([`Error::MethodNotFound`],
//!   [`Error::FieldNotFound`], [`Error::TypeNotFound`]).
//! - **Layout / initialization failure**: recorded as a sticky [`InitializationError`] on the class
//!   descriptor and re-raised as [`Error::TypeLoad`] or [`Error::ExecutionEngine`] on every later access.
//! - **Generic depth overflow**: [`Error::MaximumNestedGenerics`], distinguishable from not-found errors.

use thiserror::Error;

use crate::metadata::token::Token;

/// Creates a [`crate::Error::Malformed`] carrying the source location of the call site.
macro_rules! malformed_error {
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Creates a [`crate::Error::OutOfBounds`] carrying the source location of the call site.
macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The numeric result of loading a metadata image.
///
/// The values are stable and are what the image-loading entry point hands back to its host.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::FromRepr,
    strum::IntoStaticStr,
)]
#[repr(i32)]
pub enum LoadImageErrorCode {
    /// The image was loaded and registered.
    Ok = 0,
    /// The bytes are not a valid PE image or metadata root.
    BadImage = 1,
    /// No assembly with the image's identity exists in the AOT store.
    AotAssemblyNotFound = 2,
    /// Homologous loading is only supported for assemblies compiled ahead of time.
    HomologousOnlySupportAotAssembly = 3,
    /// The assembly already has a homologous image bound to it.
    HomologousAssemblyHasLoaded = 4,
    /// A type definition row disagrees with the AOT type in the same slot.
    MetadataTypeNotMatch = 6,
    /// A method definition row disagrees with the AOT method in the same slot.
    MetadataMethodNotMatch = 7,
    /// A field definition row disagrees with the AOT field in the same slot.
    MetadataFieldNotMatch = 8,
}

impl LoadImageErrorCode {
    /// Returns the numeric code.
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Returns true for [`LoadImageErrorCode::Ok`].
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == LoadImageErrorCode::Ok
    }
}

/// The category of a sticky class initialization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum InitializationErrorKind {
    /// Surfaces as [`Error::TypeLoad`].
    TypeLoad,
    /// Surfaces as [`Error::ExecutionEngine`].
    ExecutionEngine,
    /// Surfaces as [`Error::MaximumNestedGenerics`].
    MaximumNestedGenerics,
}

/// A failure recorded on a class descriptor. Once set it is never cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializationError {
    /// Which error the failure is re-raised as.
    pub kind: InitializationErrorKind,
    /// The message handed to every later consumer.
    pub message: String,
    /// The generic depth at which the failure happened, for depth overflows.
    pub depth: u32,
}

impl InitializationError {
    /// Creates a type-load failure.
    pub fn type_load(message: impl Into<String>) -> Self {
        InitializationError {
            kind: InitializationErrorKind::TypeLoad,
            message: message.into(),
            depth: 0,
        }
    }

    /// Creates an execution-engine failure.
    pub fn execution_engine(message: impl Into<String>) -> Self {
        InitializationError {
            kind: InitializationErrorKind::ExecutionEngine,
            message: message.into(),
            depth: 0,
        }
    }

    /// Captures an arbitrary error raised by a setup stage.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::ExecutionEngine(message) => InitializationError::execution_engine(message.clone()),
            Error::MaximumNestedGenerics { type_name, depth } => InitializationError {
                kind: InitializationErrorKind::MaximumNestedGenerics,
                message: type_name.clone(),
                depth: *depth,
            },
            Error::TypeLoad(message) => InitializationError::type_load(message.clone()),
            other => InitializationError::type_load(other.to_string()),
        }
    }
}

impl From<&InitializationError> for Error {
    fn from(value: &InitializationError) -> Self {
        match value.kind {
            InitializationErrorKind::TypeLoad => Error::TypeLoad(value.message.clone()),
            InitializationErrorKind::ExecutionEngine => Error::ExecutionEngine(value.message.clone()),
            InitializationErrorKind::MaximumNestedGenerics => Error::MaximumNestedGenerics {
                type_name: value.message.clone(),
                depth: value.depth,
            },
        }
    }
}

/// The generic error type covering all failures of this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The metadata is damaged or violates ECMA-335 structure.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// What was wrong.
        message: String,
        /// Source file that detected the problem.
        file: &'static str,
        /// Source line that detected the problem.
        line: u32,
    },

    /// A read past the end of a buffer, heap or table was attempted.
    #[error("Out of Bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// Source file that detected the problem.
        file: &'static str,
        /// Source line that detected the problem.
        line: u32,
    },

    /// The input or the requested operation is not supported.
    #[error("Not supported - {0}")]
    NotSupported(String),

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// An I/O error while reading an image from disk.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The PE container could not be parsed.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// A type could not be loaded. This is what a failed class initialization surfaces as.
    #[error("TypeLoadException: {0}")]
    TypeLoad(String),

    /// The runtime met a type it cannot materialize.
    #[error("ExecutionEngineException: {0}")]
    ExecutionEngine(String),

    /// An object was used as an instance of a class it is not compatible with.
    #[error("InvalidCastException: {from} to {to}")]
    InvalidCast {
        /// Full name of the object's class.
        from: String,
        /// Full name of the requested class.
        to: String,
    },

    /// A generic instantiation nests deeper than the configured maximum.
    #[error("Maximum nested generics exceeded for '{type_name}' (depth {depth})")]
    MaximumNestedGenerics {
        /// The type whose instantiation overflowed.
        type_name: String,
        /// The depth that was requested.
        depth: u32,
    },

    /// A type could not be found by name or token.
    #[error("Type not found - {0}")]
    TypeNotFound(String),

    /// A method reference did not match any method of its declaring type.
    #[error("MissingMethodException: {type_name}::{method}")]
    MethodNotFound {
        /// The full name of the declaring type.
        type_name: String,
        /// The requested method name.
        method: String,
    },

    /// A field reference did not match any field of its declaring type.
    #[error("MissingFieldException: {type_name}::{field}")]
    FieldNotFound {
        /// The full name of the declaring type.
        type_name: String,
        /// The requested field name.
        field: String,
    },

    /// A generic parameter referenced an argument outside the instantiation.
    #[error("Generic parameter {index} out of bounds for {len} arguments")]
    GenericIndexOutOfBounds {
        /// The parameter number.
        index: u32,
        /// The number of available arguments.
        len: usize,
    },

    /// A token points at a table this operation can not handle, or at a row that does not exist.
    #[error("Invalid token - {0}")]
    InvalidToken(Token),

    /// Loading an image failed with the given code.
    #[error("Loading image failed - {0}")]
    LoadImage(LoadImageErrorCode),

    /// The runtime configuration is inconsistent.
    #[error("Invalid configuration - {0}")]
    Configuration(String),
}

impl Error {
    /// Returns the image error code this error maps to when surfaced by an image-loading entry point.
    #[must_use]
    pub fn load_image_code(&self) -> LoadImageErrorCode {
        match self {
            Error::LoadImage(code) => *code,
            _ => LoadImageErrorCode::BadImage,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn sticky_error_roundtrip() {
        let err = Error::MaximumNestedGenerics {
            type_name: "Node`1".to_string(),
            depth: 8,
        };
        let sticky = InitializationError::from_error(&err);
        assert_eq!(sticky.kind, InitializationErrorKind::MaximumNestedGenerics);

        match Error::from(&sticky) {
            Error::MaximumNestedGenerics { type_name, depth } => {
                assert_eq!(type_name, "Node`1");
                assert_eq!(depth, 8);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_errors_become_type_load() {
        let sticky = InitializationError::from_error(&Error::TypeNotFound("Foo".into()));
        assert_eq!(sticky.kind, InitializationErrorKind::TypeLoad);
        assert!(sticky.message.contains("Foo"));
    }

    #[test]
    fn load_image_codes() {
        assert_eq!(LoadImageErrorCode::Ok.code(), 0);
        assert_eq!(LoadImageErrorCode::MetadataFieldNotMatch.code(), 8);
        assert_eq!(
            LoadImageErrorCode::from_repr(4),
            Some(LoadImageErrorCode::HomologousAssemblyHasLoaded)
        );
        // 5 stays unassigned so the mismatch codes keep their values
        assert_eq!(LoadImageErrorCode::from_repr(5), None);
        assert_eq!(LoadImageErrorCode::from_repr(100), None);
        assert_eq!(
            LoadImageErrorCode::iter().map(LoadImageErrorCode::code).max(),
            Some(8)
        );
        assert_eq!(
            Error::LoadImage(LoadImageErrorCode::AotAssemblyNotFound).load_image_code(),
            LoadImageErrorCode::AotAssemblyNotFound
        );
        assert_eq!(
            malformed_error!("x").load_image_code(),
            LoadImageErrorCode::BadImage
        );
    }
}

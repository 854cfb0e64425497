//! Runtime configuration
//!
//! [`RuntimeConfig`] fixes the target ABI (pointer size, and from it the object and array header
//! sizes), the generic nesting limit, and where the homologous comparator runs. Homologous images
//! are always validated in full; there is no switch to bind an image unchecked.

use crate::{Error, Result};

/// Configuration of a [`crate::runtime::Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Size of a pointer on the target, 4 or 8 bytes.
    pub pointer_size: u32,

    /// Maximum nesting depth of generic instantiations (default: 7).
    /// `List<List<int>>` has depth 2.
    pub max_generic_depth: u32,

    /// Run the homologous comparator on the rayon thread pool.
    pub parallel_validation: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pointer_size: 8,
            max_generic_depth: 7,
            parallel_validation: true,
        }
    }
}

impl RuntimeConfig {
    /// Validation on the calling thread, without touching the rayon pool.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            parallel_validation: false,
            ..Self::default()
        }
    }

    /// A 32-bit target.
    #[must_use]
    pub fn ptr32() -> Self {
        Self {
            pointer_size: 4,
            ..Self::default()
        }
    }

    /// Size of the object header: the class pointer and the monitor.
    #[must_use]
    pub fn object_header_size(&self) -> u32 {
        2 * self.pointer_size
    }

    /// Size of the array header: the object header, the bounds pointer and the length.
    #[must_use]
    pub fn array_header_size(&self) -> u32 {
        self.object_header_size() + 2 * self.pointer_size
    }

    /// Rejects configurations the runtime can not operate with.
    pub fn validate(&self) -> Result<()> {
        if self.pointer_size != 4 && self.pointer_size != 8 {
            return Err(Error::Configuration(format!(
                "pointer size must be 4 or 8, got {}",
                self.pointer_size
            )));
        }
        if self.max_generic_depth == 0 {
            return Err(Error::Configuration(
                "maximum generic depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

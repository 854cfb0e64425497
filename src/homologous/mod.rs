//! Homologous images.
//!
//! A homologous image is a second, independently loaded copy of the metadata of an assembly the
//! AOT store already knows. Binding it lets interpreted code that was compiled against that copy
//! use the AOT descriptors: the image's rows are checked name by name against the AOT rows in the
//! same slots, indexed, and its tokens are then resolved through [`crate::runtime::Runtime`].
//!
//! Loading parses and validates without holding the metadata lock; only the final registration
//! takes it. A failed load registers nothing, so the caller may retry with other bytes.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotrt::metadata::aot::AotMetadataBuilder;
//! use dotrt::runtime::{Runtime, RuntimeConfig};
//!
//! let mut builder = AotMetadataBuilder::new();
//! builder.with_corlib()?;
//! let bytes = std::fs::read("Game.dll")?;
//! builder.import_image(&dotrt::metadata::raw::RawImage::parse(bytes.clone())?)?;
//! let runtime = Runtime::new(Arc::new(builder.build()?), RuntimeConfig::default())?;
//!
//! let code = runtime.load_metadata_for_aot_assembly(bytes);
//! assert!(code.is_ok());
//! # Ok::<(), dotrt::Error>(())
//! ```

mod binding;
mod resolver;
mod validate;

use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use tracing::{info, warn};

pub use binding::{MemberSlot, RowIndex};
pub use resolver::Resolved;
pub use validate::{compare, Mismatch, MismatchKind};

use crate::{
    file::ImageBytes,
    metadata::{
        aot::{AssemblyIndex, ImageIndex, TypeDefIndex},
        raw::RawImage,
        token::{TableId, Token},
    },
    runtime::Runtime,
    typesystem::GenericContext,
    Error, LoadImageErrorCode, Result,
};

/// A raw image bound to an AOT assembly.
#[derive(Debug)]
pub struct HomologousImage {
    assembly: AssemblyIndex,
    image: ImageIndex,
    first_type: TypeDefIndex,
    raw: RawImage,
    rows: RowIndex,
    cache: DashMap<(Token, GenericContext), Resolved>,
}

impl HomologousImage {
    /// The AOT assembly this image is bound to.
    #[must_use]
    pub fn assembly(&self) -> AssemblyIndex {
        self.assembly
    }

    /// The AOT image this image is bound to.
    #[must_use]
    pub fn aot_image(&self) -> ImageIndex {
        self.image
    }

    /// The parsed metadata.
    #[must_use]
    pub fn raw(&self) -> &RawImage {
        &self.raw
    }

    /// The row index.
    #[must_use]
    pub fn rows(&self) -> &RowIndex {
        &self.rows
    }

    /// Number of memoized token resolutions.
    #[must_use]
    pub fn cached_tokens(&self) -> usize {
        self.cache.len()
    }
}

/// Every bound image, keyed by the assembly it is bound to. Entries are never removed.
#[derive(Debug, Default)]
pub struct HomologousRegistry {
    images: SkipMap<AssemblyIndex, Arc<HomologousImage>>,
}

impl HomologousRegistry {
    /// The image bound to `assembly`.
    #[must_use]
    pub fn get(&self, assembly: AssemblyIndex) -> Option<Arc<HomologousImage>> {
        self.images.get(&assembly).map(|entry| Arc::clone(entry.value()))
    }

    /// True if `assembly` has an image bound.
    #[must_use]
    pub fn contains(&self, assembly: AssemblyIndex) -> bool {
        self.images.contains_key(&assembly)
    }

    /// Number of bound images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// True if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    fn register(&self, image: HomologousImage) -> Result<Arc<HomologousImage>> {
        let assembly = image.assembly;
        let image = Arc::new(image);
        let entry = self.images.get_or_insert(assembly, Arc::clone(&image));
        if Arc::ptr_eq(entry.value(), &image) {
            Ok(image)
        } else {
            Err(Error::LoadImage(LoadImageErrorCode::HomologousAssemblyHasLoaded))
        }
    }
}

impl Runtime {
    /// Binds a homologous image and reports the outcome as a load code.
    ///
    /// This is the entry point for hosts; [`Runtime::load_homologous_image`] is the same operation
    /// with a typed result.
    pub fn load_metadata_for_aot_assembly(&self, bytes: impl Into<ImageBytes>) -> LoadImageErrorCode {
        match self.load_homologous_image(bytes) {
            Ok(_) => LoadImageErrorCode::Ok,
            Err(error) => error.load_image_code(),
        }
    }

    /// Binds a homologous image to the AOT assembly of the same name.
    ///
    /// # Errors
    ///
    /// [`Error::LoadImage`] with
    /// - [`LoadImageErrorCode::BadImage`] for bytes that do not parse,
    /// - [`LoadImageErrorCode::AotAssemblyNotFound`] if the AOT store has no such assembly,
    /// - [`LoadImageErrorCode::HomologousOnlySupportAotAssembly`] if the assembly has no AOT code,
    /// - [`LoadImageErrorCode::HomologousAssemblyHasLoaded`] if an image is already bound to it,
    /// - `Metadata*NotMatch` for the lowest row whose name disagrees with the AOT store.
    pub fn load_homologous_image(&self, bytes: impl Into<ImageBytes>) -> Result<Arc<HomologousImage>> {
        let bad_image = |error: Error| {
            warn!(%error, "homologous image is malformed");
            Error::LoadImage(LoadImageErrorCode::BadImage)
        };
        let raw = RawImage::parse(bytes).map_err(bad_image)?;
        let name = raw.assembly().map_err(bad_image)?.name.to_string();

        let assembly = self.metadata.find_assembly(&name).ok_or_else(|| {
            warn!(assembly = %name, "no AOT assembly for homologous image");
            Error::LoadImage(LoadImageErrorCode::AotAssemblyNotFound)
        })?;
        let image = self.metadata.assembly(assembly)?.image;
        if !self.metadata.image(image)?.aot_compiled {
            return Err(Error::LoadImage(
                LoadImageErrorCode::HomologousOnlySupportAotAssembly,
            ));
        }
        if self.homologous.contains(assembly) {
            return Err(Error::LoadImage(LoadImageErrorCode::HomologousAssemblyHasLoaded));
        }

        let types = self.metadata.image_types(image);
        let mismatches = compare(&self.metadata, &raw, &types, &self.config).map_err(bad_image)?;
        if let Some(first) = mismatches.first() {
            warn!(
                assembly = %name,
                kind = %first.kind,
                row = first.row,
                expected = %first.expected,
                found = %first.found,
                mismatches = mismatches.len(),
                "homologous image does not match its AOT assembly"
            );
            return Err(Error::LoadImage(first.code()));
        }

        let rows = RowIndex::build(&self.metadata, &raw, &types).map_err(bad_image)?;
        let skipped = raw.row_count(TableId::TypeDef) as usize - rows.bound_types();
        let bound = HomologousImage {
            assembly,
            image,
            first_type: TypeDefIndex(types.start),
            raw,
            rows,
            cache: DashMap::new(),
        };

        let registered = {
            let _guard = self.lock_metadata();
            self.homologous.register(bound)?
        };
        info!(assembly = %name, skipped_types = skipped, "bound homologous image");
        Ok(registered)
    }

    /// The homologous image bound to `assembly`.
    #[must_use]
    pub fn homologous_image(&self, assembly: AssemblyIndex) -> Option<Arc<HomologousImage>> {
        self.homologous.get(assembly)
    }

    /// Number of bound homologous images.
    #[must_use]
    pub fn homologous_image_count(&self) -> usize {
        self.homologous.len()
    }
}

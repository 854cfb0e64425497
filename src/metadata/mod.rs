//! Metadata: tokens, signature blobs, raw ECMA-335 images and the AOT metadata store.
//!
//! - [`token`] - table identifiers and row references shared by every metadata source
//! - [`signatures`] - parsing and encoding of signature blobs
//! - [`raw`] - the reader (and writer) for raw metadata images, used for homologous images
//! - [`aot`] - the metadata of ahead-of-time compiled assemblies, the runtime's backing store
//! - [`scope`] - resolution of a raw image's type tokens against the AOT store

pub mod aot;
pub mod raw;
pub mod scope;
pub mod signatures;
pub mod token;

// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'file/mod.rs' uses mmap to map an image file into memory

//! # dotrt
//!
//! The runtime type system of an ahead-of-time compiled .NET runtime. Given the metadata of the
//! AOT compiled assemblies, `dotrt` materializes class descriptors on demand, lays out their
//! fields, builds their vtables, interns generic instantiations, and binds independently loaded
//! ("homologous") metadata images to the AOT descriptors so interpreted code can use them.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use dotrt::prelude::*;
//!
//! let mut builder = AotMetadataBuilder::new();
//! let corlib = builder.with_corlib()?;
//! let game = builder.add_assembly("Game", [1, 0, 0, 0])?;
//! let cell = builder.declare_type(game, "Game", "Cell`1", TypeAttributes::PUBLIC)?;
//! builder.define_type(
//!     cell,
//!     TypeBody::class(&corlib)
//!         .generic(&["T"])
//!         .field(NewField::instance("value", RuntimeType::Var(0))),
//! )?;
//!
//! let runtime = Runtime::new(Arc::new(builder.build()?), RuntimeConfig::default())?;
//! let def = runtime.metadata().find_type_by_name("Game", "Cell`1").unwrap();
//! let a = runtime.generic_class(def, &[RuntimeType::I8])?;
//! let b = runtime.generic_class(def, &[RuntimeType::I8])?;
//! assert_eq!(a, b);
//! assert_eq!(runtime.init_class(a)?.instance_size(), Some(24));
//! # Ok::<(), dotrt::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - tokens, signature blobs, the raw image reader and the AOT metadata store
//! - [`typesystem`] - structural type handles, generic inflation and the field layout engine
//! - [`runtime`] - class and method descriptors, staged initialization, vtables, statics, the
//!   object layer and reflection queries
//! - [`homologous`] - binding of homologous images and resolution of their tokens
//! - [`Error`] and [`Result`] - error handling shared by all of the above
//!
//! ### Concurrency
//!
//! A [`runtime::Runtime`] is `Send + Sync`. Reading an initialized class is lock-free; the first
//! initialization of a class and the registration of a homologous image take the runtime's single
//! metadata lock. Descriptors are never freed, so ids handed out stay valid for the lifetime of the
//! runtime.
//!
//! ### Logging
//!
//! `dotrt` emits [`tracing`] events for class initialization, sticky failures, layout results,
//! generic instantiation and homologous image binding. It never installs a subscriber.
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! use dotrt::{Error, LoadImageErrorCode};
//! # let runtime: dotrt::runtime::Runtime = unimplemented!();
//! # let bytes: Vec<u8> = Vec::new();
//!
//! match runtime.load_homologous_image(bytes) {
//!     Ok(image) => println!("bound {:?}", image.assembly()),
//!     Err(Error::LoadImage(LoadImageErrorCode::MetadataFieldNotMatch)) => println!("stale image"),
//!     Err(e) => println!("Error: {}", e),
//! }
//! ```
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

pub mod prelude;

pub mod homologous;
pub mod metadata;
pub mod runtime;
pub mod typesystem;

/// `dotrt` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotrt` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// Load outcome codes and the sticky initialization failure recorded on classes.
pub use error::{InitializationError, InitializationErrorKind, LoadImageErrorCode};

/// Owned or memory-mapped image bytes, accepted by every image-loading entry point.
pub use file::ImageBytes;

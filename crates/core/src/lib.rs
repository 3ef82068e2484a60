//! # ContextLoom Core
//!
//! Domain types, traits, and error definitions for the ContextLoom context
//! assembly pipeline. This crate does **no I/O** and needs no async runtime:
//! it defines the data model and the plugin seams that the engine and the
//! built-in sources implement against.
//!
//! ## Design Philosophy
//!
//! Every pluggable concern is a trait here. Implementations live in their
//! respective crates:
//! - [`ContextSource`] producers live in `contextloom-sources` (or in user code)
//! - [`ExperienceStore`] backends are external collaborators (an in-memory
//!   one ships with `contextloom-sources`)
//! - the assembly pipeline lives in `contextloom-engine`

pub mod error;
pub mod experience;
pub mod fragment;
pub mod package;
pub mod request;
pub mod size;
pub mod source;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ExperienceError, FilterError, FormatError, Result, SourceError};
pub use experience::{ExperienceNote, ExperienceQuery, ExperienceStore};
pub use fragment::{Fragment, FragmentBuilder, FragmentKind};
pub use package::{Metrics, Package, PackageStatus, Section};
pub use request::{Request, RequestBuilder, Scope, TaskType};
pub use source::{ContextSource, SourceKind, SourceMetadata, SourceRegistry};

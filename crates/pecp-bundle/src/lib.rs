//! # pecp-bundle: Bundle Build Pipeline
//!
//! Three layers, leaves first:
//!
//! - [`archive`]: deterministic `.tar.gz` encoder (and the decoder used for
//!   verification and tests).
//! - [`compiler`]: runs an external policy compiler in an isolated build
//!   directory with a timeout and a concurrency cap.
//! - [`builder`]: resolves catalog records into a manifest plus policy set and
//!   produces either a source archive or a compiled artifact.

pub mod archive;
pub mod builder;
pub mod compiler;

pub use archive::{read_archive, read_bundle, write_archive, ArchiveEntry, ArchiveError};
pub use builder::{BindingSelection, BuildKind, BuiltBundle, BundleBuilder, Manifest};
pub use compiler::{
    validate_entrypoint, CommandOutcome, CommandRunner, CommandSpec, CompilerConfig,
    CompilerInvoker, ProcessRunner,
};

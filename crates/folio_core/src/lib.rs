#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Configuration options
pub mod config;

/// Error (common error types)
pub mod error;

/// Block tree document model
pub mod document;

/// Text and document diffing
pub mod diff;

/// Replicated documents and snapshot sync
pub mod crdt;

/// Named branches of a document
pub mod branch;

/// Diff decorations for the editing surface
pub mod presentation;

pub use error::{FolioError, Result};

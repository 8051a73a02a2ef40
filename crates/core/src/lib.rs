//! `certdrop-core`: domain building blocks for certificate batches.
//!
//! This crate contains **pure domain** logic (no IO, no async runtime).

pub mod error;
pub mod record;

pub use error::{RecordError, RecordResult};
pub use record::{RawFields, Record, artifact_file_name, normalize};

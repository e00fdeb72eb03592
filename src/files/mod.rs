// src/files/mod.rs

//! File tracking value types.
//!
//! - [`file_info`] describes one file plus the files it requires.
//! - [`files`] is the ordered collection with lookup helpers.
//! - [`track`] records input snapshots for out-of-date checks.

pub mod file_info;
pub mod files;
pub mod track;

pub use file_info::FileInfo;
pub use files::Files;
pub use track::{compute_file_hash, FileTrack};

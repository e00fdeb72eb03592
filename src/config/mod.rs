// src/config/mod.rs

//! Configuration loading, validation and tree construction for runmanager.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate tree shape and references (`validate.rs`).
//! - Expand file patterns and build the live job tree (`files.rs`, `build.rs`).

pub mod build;
pub mod files;
pub mod loader;
pub mod model;
pub mod validate;

pub use build::{JobTree, build_tree, job_uuid, process_options};
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, ConfigSection, FileSpec, JobConfig, RawConfigFile, ToolConfig};
pub use validate::validate_config;

//! # BinSight Common Library
//!
//! Shared code for the BinSight services including:
//! - Classification record and alert models
//! - Ingestion payload schema
//! - Hub event and command types
//! - Error taxonomy
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod payload;

pub use error::{Error, Result};

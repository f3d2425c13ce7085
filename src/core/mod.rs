//! Core engine types and utilities

pub mod error;
pub mod logging;
pub mod config;

pub use error::{LodError, Result};
pub use config::{Compression, LodConfig};

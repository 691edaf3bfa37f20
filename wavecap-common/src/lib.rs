//! wavecap-common - Shared library for WaveCap modules
//!
//! Provides the common error type, the ingest event bus, and
//! configuration/root-folder resolution used by the capture-ingest service.

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};

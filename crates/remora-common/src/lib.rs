//! Common utilities for remora
//!
//! This crate provides the shared error type used across all remora modules.

pub mod error;

pub use error::{RemoraError, Result};

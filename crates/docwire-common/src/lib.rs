//! Common utilities for docwire
//!
//! This crate provides the error taxonomy shared by every docwire module.

pub mod error;

pub use error::{DocWireError, OperationKind, Result};

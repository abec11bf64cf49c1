#![forbid(unsafe_code)]

//! Shared definitions for the Solna streaming WS-Security engine.

pub mod algorithm;
pub mod error;
pub mod ns;

pub use error::{Error, ErrorKind, Result};

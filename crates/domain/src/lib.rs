//! Shared configuration and error types for the nodebridge gateway.

pub mod config;
pub mod error;

pub use error::{Error, Result};

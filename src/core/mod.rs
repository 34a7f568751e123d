//! Core types shared across the crate: the error enum and user-facing
//! error reporting.

pub mod error;

pub use error::{user_friendly_error, ErrorContext, VbumpError};

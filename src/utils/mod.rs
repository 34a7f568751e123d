//! Cross-cutting helpers.

pub mod fs;

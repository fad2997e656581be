//! Target backends.

pub mod arm64;

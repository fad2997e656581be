//! # Kestrel Core
//!
//! Shared types for the Kestrel optimizing compilation pipeline.
//!
//! This crate provides the pieces every other Kestrel component agrees on:
//!
//! - **Error Handling**: `KestrelError` and the `KestrelResult` alias
//! - **Configuration**: immutable dispatcher and code generation settings,
//!   deserializable from JSON

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;

pub use config::{CodegenConfig, CompilerConfig, DispatcherConfig, SwitchCostModel};
pub use error::{KestrelError, KestrelResult};

/// Kestrel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Error types and result definitions for Kestrel.
//!
//! Errors here are always recoverable: a job that hits one is disposed and
//! the function keeps running its current tier. Missing lowerings and IR
//! consistency violations are not errors, they abort.

use std::fmt;
use thiserror::Error;

/// The unified result type used throughout Kestrel.
pub type KestrelResult<T> = Result<T, KestrelError>;

/// Error type covering every recoverable failure in the pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KestrelError {
    /// Code generation could not complete for a node.
    #[error("CompileError: {message}")]
    CompileError {
        /// Error description.
        message: String,
        /// Index of the offending IR node, if known.
        node: Option<u32>,
    },

    /// A compilation job phase was invoked out of order.
    #[error("InvalidJobState: expected {expected}, found {actual}")]
    InvalidJobState {
        /// State the phase requires.
        expected: &'static str,
        /// State the job was actually in.
        actual: &'static str,
    },

    /// The job gave up for a known reason.
    #[error("Bailout: {reason}")]
    Bailout {
        /// Why the job bailed out.
        reason: BailoutReason,
    },

    /// The register allocator could not satisfy the constraints.
    #[error("RegisterAllocation: {message}")]
    RegisterAllocation {
        /// Error description.
        message: String,
    },

    /// A branch refers to a label that was never bound.
    #[error("UnboundLabel: label {label} was never bound")]
    UnboundLabel {
        /// Label id.
        label: u32,
    },

    /// Invalid configuration value.
    #[error("ConfigError: {message}")]
    Config {
        /// Error description.
        message: String,
    },
}

impl KestrelError {
    /// Create a compile error.
    #[must_use]
    pub fn compile(message: impl Into<String>, node: Option<u32>) -> Self {
        Self::CompileError {
            message: message.into(),
            node,
        }
    }

    /// Create a job-state error.
    #[must_use]
    pub fn invalid_state(expected: &'static str, actual: &'static str) -> Self {
        Self::InvalidJobState { expected, actual }
    }

    /// Create a bailout error.
    #[must_use]
    pub fn bailout(reason: BailoutReason) -> Self {
        Self::Bailout { reason }
    }

    /// Create a register allocation error.
    #[must_use]
    pub fn regalloc(message: impl Into<String>) -> Self {
        Self::RegisterAllocation {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error means another compile was preferred over this one.
    ///
    /// Race losses are expected and are not reported as failures in statistics.
    #[must_use]
    pub fn is_race_loss(&self) -> bool {
        matches!(
            self,
            Self::Bailout {
                reason: BailoutReason::AlreadyOptimized | BailoutReason::FunctionCodeChanged
            }
        )
    }
}

/// Known reasons for abandoning a compilation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BailoutReason {
    /// The graph failed verification during Prepare.
    GraphVerificationFailed,
    /// The function already has code of the target tier installed.
    AlreadyOptimized,
    /// The function's code changed while the job was running.
    FunctionCodeChanged,
    /// The frame needs more stack slots than the target supports.
    TooManySpillSlots,
    /// The job was cancelled by a flush.
    Cancelled,
}

impl BailoutReason {
    /// Human-readable description.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GraphVerificationFailed => "graph verification failed",
            Self::AlreadyOptimized => "function is already optimized",
            Self::FunctionCodeChanged => "function code changed during compilation",
            Self::TooManySpillSlots => "too many spill slots",
            Self::Cancelled => "compilation cancelled",
        }
    }
}

impl fmt::Display for BailoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

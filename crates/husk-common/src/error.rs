//! Unified error types for the husk workspace.
//!
//! The variants follow the failure taxonomy of the runtime: configuration
//! errors are raised before any kernel side effect, kernel failures name the
//! step that failed, fan-out failures aggregate per-subsystem outcomes, and
//! cleanup failures are kept apart from the error that triggered them.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HuskError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A resource with the same identity is already registered.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Type of the conflicting resource.
        kind: &'static str,
        /// Identifier of the conflicting resource.
        id: String,
    },

    /// A kernel operation (syscall) failed.
    #[error("{step} failed: {source}")]
    Kernel {
        /// The operation that failed, e.g. `pivot_root`.
        step: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// An external helper program exited unsuccessfully.
    #[error("`{program} {args}` failed: {stderr}")]
    Command {
        /// Program name, e.g. `ip` or `iptables`.
        program: &'static str,
        /// Space-joined arguments.
        args: String,
        /// Captured standard error, or the spawn error.
        stderr: String,
    },

    /// One or more cgroup subsystems failed during a fan-out operation.
    #[error("cgroup {operation} failed for {}", DisplayFailures(.failures))]
    FanOut {
        /// Operation that was fanned out (`apply`, `set`, `destroy`).
        operation: &'static str,
        /// Per-subsystem failures, in subsystem order.
        failures: Vec<SubsystemFailure>,
    },

    /// A step of a multi-step operation failed.
    #[error("{step}: {source}")]
    Step {
        /// Human-readable name of the failed step.
        step: String,
        /// The error the step produced.
        source: Box<HuskError>,
    },

    /// An operation failed and the compensating cleanup failed as well.
    #[error("{original} (cleanup also failed: {cleanup})")]
    Cleanup {
        /// The error that triggered the cleanup.
        original: Box<HuskError>,
        /// The error the cleanup produced.
        cleanup: Box<HuskError>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl HuskError {
    /// Wraps this error with the name of the step that produced it.
    #[must_use]
    pub fn in_step(self, step: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Builds a [`HuskError::Kernel`] from any error convertible to `io::Error`.
    pub fn kernel(step: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        Self::Kernel {
            step: step.into(),
            source: source.into(),
        }
    }

    /// Combines an original error with a failed cleanup attempt.
    ///
    /// Returns the original error unchanged when the cleanup succeeded.
    #[must_use]
    pub fn with_cleanup(self, cleanup: Result<()>) -> Self {
        match cleanup {
            Ok(()) => self,
            Err(cleanup) => Self::Cleanup {
                original: Box::new(self),
                cleanup: Box::new(cleanup),
            },
        }
    }
}

/// A single subsystem's failure inside a [`HuskError::FanOut`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemFailure {
    /// Subsystem name (`memory`, `cpu`, `cpuset`).
    pub subsystem: String,
    /// Rendered error message.
    pub message: String,
}

struct DisplayFailures<'a>(&'a [SubsystemFailure]);

impl fmt::Display for DisplayFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.subsystem, failure.message)?;
        }
        Ok(())
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HuskError>;

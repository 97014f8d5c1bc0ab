#![forbid(unsafe_code)]
//! Error types for udfck.
//!
//! Defines `UdfckError` and a `Result<T>` alias used throughout the
//! workspace, plus the fsck-style exit-status accumulator every run folds
//! its findings into.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use udfck_types::{Lsn, ParseError};

/// Unified error type for all udfck operations.
#[derive(Debug, Error)]
pub enum UdfckError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("not a UDF medium: {0}")]
    NotUdf(String),

    #[error("read past end of medium: offset {offset}, length {length}, medium {medium_len}")]
    OutOfBounds {
        offset: u64,
        length: usize,
        medium_len: u64,
    },

    #[error("medium opened read-only, refusing write at offset {0}")]
    ReadOnly(u64),

    #[error("corrupt {what} at LSN {lsn}: {detail}")]
    Corruption {
        what: &'static str,
        lsn: Lsn,
        detail: String,
    },

    #[error("duplicate {0} within one volume descriptor sequence")]
    DuplicateDescriptor(&'static str),

    #[error("unknown tag identifier {ident} at LSN {lsn}")]
    UnknownDescriptor { ident: u16, lsn: Lsn },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("repair failed: {0}")]
    RepairFailed(String),

    #[error("invalid argument: {0}")]
    Usage(String),
}

impl UdfckError {
    /// Exit-status contribution of this error.
    #[must_use]
    pub fn exit_class(&self) -> ExitStatus {
        match self {
            Self::Usage(_) => ExitStatus::USAGE,
            _ => ExitStatus::OPERATIONAL,
        }
    }
}

/// Result alias using `UdfckError`.
pub type Result<T> = std::result::Result<T, UdfckError>;

// ── Exit status ─────────────────────────────────────────────────────────────

/// fsck-style exit status, accumulated as OR of bits over the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExitStatus(pub u8);

impl ExitStatus {
    /// No error found.
    pub const OK: Self = Self(0);
    /// Errors found and fixed.
    pub const CORRECTED: Self = Self(1);
    /// Errors found and left unfixed.
    pub const UNCORRECTED: Self = Self(4);
    /// Probe failure, not a UDF medium, I/O error.
    pub const OPERATIONAL: Self = Self(8);
    /// Invalid user input.
    pub const USAGE: Self = Self(16);

    pub fn merge(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub fn is_clean(self) -> bool {
        self.0 == 0
    }

    /// Process exit code.
    #[must_use]
    pub fn code(self) -> i32 {
        i32::from(self.0)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "clean");
        }
        let names = [
            (Self::CORRECTED, "corrected-errors"),
            (Self::UNCORRECTED, "uncorrected-errors"),
            (Self::OPERATIONAL, "operational-error"),
            (Self::USAGE, "usage"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_accumulates() {
        let mut status = ExitStatus::OK;
        assert!(status.is_clean());
        assert_eq!(status.code(), 0);

        status.merge(ExitStatus::CORRECTED);
        status.merge(ExitStatus::UNCORRECTED);
        assert_eq!(status.code(), 5);
        assert!(status.contains(ExitStatus::CORRECTED));
        assert!(status.contains(ExitStatus::UNCORRECTED));
        assert!(!status.contains(ExitStatus::OPERATIONAL));
        assert_eq!(status.to_string(), "corrected-errors|uncorrected-errors");
    }

    #[test]
    fn error_exit_classes() {
        assert_eq!(
            UdfckError::Usage("bad blocksize".into()).exit_class(),
            ExitStatus::USAGE
        );
        assert_eq!(
            UdfckError::NotUdf("no VRS".into()).exit_class(),
            ExitStatus::OPERATIONAL
        );
        assert_eq!(
            UdfckError::DuplicateDescriptor("PVD").exit_class(),
            ExitStatus::OPERATIONAL
        );
    }
}

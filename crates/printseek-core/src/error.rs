// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for printseek.
//
// Network failures never escape the discovery engine as errors; they are
// classified into a `FailureKind` and folded into the record.  This type
// covers the internal plumbing and configuration I/O.

use thiserror::Error;

use crate::types::FailureKind;

/// Top-level error type for all printseek operations.
#[derive(Debug, Error)]
pub enum PrintseekError {
    #[error("printer discovery failed: {0}")]
    Discovery(String),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("request rejected by device: {0}")]
    Rejected(String),

    #[error("probe timed out after {0} ms")]
    Timeout(u64),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintseekError>;

/// Classify an error into the failure kind recorded on a printer record.
pub fn classify_error(err: &PrintseekError) -> FailureKind {
    match err {
        PrintseekError::Timeout(_) => FailureKind::Timeout,
        PrintseekError::Rejected(_) => FailureKind::ModelUnknown,
        PrintseekError::Io(io_err) => classify_io(io_err),
        PrintseekError::Probe(detail) | PrintseekError::Discovery(detail) => {
            classify_detail(detail)
        }
        PrintseekError::Serialization(_) => FailureKind::Unparseable,
        PrintseekError::Config(_) => FailureKind::ConnectionRefused,
    }
}

/// Classify a socket-level error.
pub fn classify_io(err: &std::io::Error) -> FailureKind {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => FailureKind::Timeout,
        std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
            FailureKind::Unparseable
        }
        _ => FailureKind::ConnectionRefused,
    }
}

/// Classify a free-form error message from a protocol library.
fn classify_detail(detail: &str) -> FailureKind {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("timed out") || lower.contains("timeout") {
        return FailureKind::Timeout;
    }

    if lower.contains("refused")
        || lower.contains("reset")
        || lower.contains("unreachable")
        || lower.contains("connect")
        || lower.contains("broken pipe")
        || lower.contains("sending request")
    {
        return FailureKind::ConnectionRefused;
    }

    FailureKind::Unparseable
}

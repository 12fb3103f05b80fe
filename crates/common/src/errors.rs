// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Crossbar contributors. All rights reserved.
//
//  Licensed under the MIT License (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://opensource.org/licenses/MIT
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! The public error taxonomy for the dispatch core.
//!
//! Every variant carries a stable SCREAMING_SNAKE code suitable for wire
//! serialization, so remote peers can classify failures without parsing
//! messages.

use thiserror::Error;

/// The main error type for all dispatch operations.
#[derive(Debug, Error)]
pub enum CrossbarError {
    /// No registered pattern matches the request.
    #[error("Pattern not found: {pattern}")]
    PatternNotFound { pattern: String },

    /// The per-call deadline expired before the handler completed.
    #[error("Pattern timed out after {timeout_ms} ms: {pattern}")]
    PatternTimeout { pattern: String, timeout_ms: u64 },

    /// The caller's meta-flags violated the header schema.
    #[error("Invalid headers: {reason}")]
    InvalidHeaders { reason: String },

    /// A pattern string or mapping could not be parsed.
    #[error("Invalid pattern: {reason}")]
    InvalidPattern { reason: String },

    /// The route references a transport which is not registered.
    #[error("No such transport: {name}")]
    NoSuchTransport { name: String },

    /// An exactly-equal pattern is already registered.
    #[error("Duplicate pattern: {pattern}")]
    DuplicatePattern { pattern: String },

    /// A transport with the same name is already registered.
    #[error("Duplicate transport: {name}")]
    DuplicateTransport { name: String },

    /// Plugin resolution did not produce a usable plugin.
    #[error("Invalid plugin: {reason}")]
    InvalidPlugin { reason: String },

    /// A handler failed and the classifier declined to mute the error.
    #[error("Handler failed: {source}")]
    HandlerFailure {
        #[source]
        source: anyhow::Error,
    },
}

impl CrossbarError {
    /// Returns the stable wire-level code for this error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::PatternNotFound { .. } => "PATTERN_NOT_FOUND",
            Self::PatternTimeout { .. } => "PATTERN_TIMEOUT",
            Self::InvalidHeaders { .. } => "INVALID_HEADERS",
            Self::InvalidPattern { .. } => "INVALID_PATTERN",
            Self::NoSuchTransport { .. } => "NO_SUCH_TRANSPORT",
            Self::DuplicatePattern { .. } => "DUPLICATE_PATTERN",
            Self::DuplicateTransport { .. } => "DUPLICATE_TRANSPORT",
            Self::InvalidPlugin { .. } => "INVALID_PLUGIN",
            Self::HandlerFailure { .. } => "HANDLER_FAILURE",
        }
    }
}

/// Raised when a handler panics inside the execution envelope.
///
/// Panics are surfaced to the error classifier under the name
/// `"HandlerPanic"` so configurations can decide whether a panicking handler
/// aborts the process.
#[derive(Debug, Error)]
#[error("Handler panicked: {0}")]
pub struct HandlerPanic(pub String);

/// Returns the classification name for an error raised inside the execution
/// envelope.
#[must_use]
pub fn error_name(error: &anyhow::Error) -> &'static str {
    if error.downcast_ref::<HandlerPanic>().is_some() {
        return "HandlerPanic";
    }
    if let Some(inner) = error.downcast_ref::<CrossbarError>() {
        return inner.code();
    }
    "HandlerFailure"
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_codes_are_stable() {
        let err = CrossbarError::PatternNotFound {
            pattern: "role:x".to_string(),
        };
        assert_eq!(err.code(), "PATTERN_NOT_FOUND");

        let err = CrossbarError::PatternTimeout {
            pattern: "role:x".to_string(),
            timeout_ms: 100,
        };
        assert_eq!(err.code(), "PATTERN_TIMEOUT");
    }

    #[rstest]
    fn test_error_name_for_panic() {
        let err = anyhow::Error::new(HandlerPanic("boom".to_string()));
        assert_eq!(error_name(&err), "HandlerPanic");
    }

    #[rstest]
    fn test_error_name_for_core_error() {
        let err = anyhow::Error::new(CrossbarError::NoSuchTransport {
            name: "amqp".to_string(),
        });
        assert_eq!(error_name(&err), "NO_SUCH_TRANSPORT");
    }

    #[rstest]
    fn test_error_name_for_arbitrary_error() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(error_name(&err), "HandlerFailure");
    }

    #[rstest]
    fn test_handler_failure_preserves_cause() {
        let cause = anyhow::anyhow!("division by zero");
        let err = CrossbarError::HandlerFailure { source: cause };
        assert!(err.to_string().contains("division by zero"));
    }
}

//! # Error Taxonomy
//!
//! Two categories reach API callers:
//!
//! - **Functional**: the caller can fix it (unknown id, invalid entrypoint,
//!   path traversal). Carries a stable code and a message safe to return.
//! - **Technical**: infrastructure failed (compiler exit, subprocess I/O,
//!   archive write). The message is generic; the detail is for logs only.
//!
//! Path-traversal attempts are their own variant so they can be told apart
//! in logs and tests, but they classify as functional.

use thiserror::Error;

/// Stable error codes returned to API callers.
pub mod codes {
    /// Bundle id or name did not resolve.
    pub const BUNDLE_NOT_FOUND: &str = "FUNC_003";
    /// Entitlement id did not resolve.
    pub const ENTITLEMENT_NOT_FOUND: &str = "FUNC_004";
    /// Policy id did not resolve.
    pub const POLICY_NOT_FOUND: &str = "FUNC_007";
    /// Binding was submitted without any policy.
    pub const BINDING_WITHOUT_POLICY: &str = "FUNC_009";
    /// Binding references policies that do not exist.
    pub const BINDING_UNKNOWN_POLICY: &str = "FUNC_010";
    /// Binding id did not resolve.
    pub const BINDING_NOT_FOUND: &str = "FUNC_011";
    /// A binding for the same resource type and context already exists.
    pub const BINDING_DUPLICATE: &str = "FUNC_012";
    /// Entrypoint name failed identifier validation.
    pub const INVALID_ENTRYPOINT: &str = "FUNC_013";
    /// Dry-run compilation of a new bundle failed.
    pub const BUNDLE_VALIDATION_FAILED: &str = "FUNC_014";
    /// A bundle with the same name already exists.
    pub const BUNDLE_DUPLICATE: &str = "FUNC_015";
    /// Policy filename escapes the build directory.
    pub const PATH_TRAVERSAL: &str = "SEC_001";
    /// Policy name is blank.
    pub const EMPTY_POLICY_NAME: &str = "VAL_001";
    /// Policy filename is blank.
    pub const EMPTY_FILENAME: &str = "VAL_002";
    /// Request body could not be decoded.
    pub const MALFORMED_REQUEST: &str = "VAL_003";
    /// Bundle generation failed.
    pub const BUNDLE_GENERATION: &str = "TECH_001";
    /// External compiler failed or could not be spawned.
    pub const COMPILER_FAILURE: &str = "TECH_004";
    /// External compiler exceeded its deadline.
    pub const COMPILER_TIMEOUT: &str = "TECH_005";

    /// Codes that mean "the referenced record does not exist".
    pub const NOT_FOUND: &[&str] = &[
        BUNDLE_NOT_FOUND,
        ENTITLEMENT_NOT_FOUND,
        POLICY_NOT_FOUND,
        BINDING_NOT_FOUND,
    ];

    /// Codes that mean "a record with the same natural key already exists".
    pub const CONFLICT: &[&str] = &[BINDING_DUPLICATE, BUNDLE_DUPLICATE];
}

/// Which side of the API boundary an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller-correctable.
    Functional,
    /// Infrastructure failure.
    Technical,
}

/// Error type shared by the build pipeline, the catalog, and the API.
#[derive(Error, Debug)]
pub enum PlaneError {
    /// Caller-correctable failure.
    #[error("{message}")]
    Functional {
        /// Stable error code.
        code: &'static str,
        /// Message safe to return to the caller.
        message: String,
    },

    /// A filename or path tried to leave its sandbox.
    #[error("security violation: {message}")]
    Security {
        /// Stable error code.
        code: &'static str,
        /// Description of the rejected input.
        message: String,
    },

    /// Infrastructure failure. `detail` must never be returned to callers.
    #[error("{message}")]
    Technical {
        /// Stable error code.
        code: &'static str,
        /// Short operator-facing summary.
        message: String,
        /// Full diagnostic detail (captured output, OS error).
        detail: Option<String>,
    },
}

impl PlaneError {
    /// Build a functional error.
    pub fn functional(code: &'static str, message: impl Into<String>) -> Self {
        Self::Functional {
            code,
            message: message.into(),
        }
    }

    /// Build a path-traversal rejection.
    pub fn path_traversal(candidate: &str) -> Self {
        Self::Security {
            code: codes::PATH_TRAVERSAL,
            message: format!("policy filename {candidate:?} escapes the build directory"),
        }
    }

    /// Build a technical error with no further detail.
    pub fn technical(code: &'static str, message: impl Into<String>) -> Self {
        Self::Technical {
            code,
            message: message.into(),
            detail: None,
        }
    }

    /// Build a technical error carrying diagnostic detail for the logs.
    pub fn technical_with(
        code: &'static str,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Technical {
            code,
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Functional { code, .. }
            | Self::Security { code, .. }
            | Self::Technical { code, .. } => code,
        }
    }

    /// Functional or technical.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Functional { .. } | Self::Security { .. } => ErrorCategory::Functional,
            Self::Technical { .. } => ErrorCategory::Technical,
        }
    }

    /// Diagnostic detail, present only on technical errors.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Technical { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// Whether this is a security-class rejection.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security { .. })
    }

    /// Whether the error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        codes::NOT_FOUND.contains(&self.code())
    }

    /// Whether the error reports a natural-key collision.
    pub fn is_conflict(&self) -> bool {
        codes::CONFLICT.contains(&self.code())
    }

    /// Re-classify a technical failure as caller-correctable.
    ///
    /// Used where the caller's own input is what broke the infrastructure
    /// call, e.g. a bundle definition that does not compile. The technical
    /// detail is folded into the message because the caller needs it to fix
    /// their input. Functional and security errors pass through unchanged.
    pub fn into_functional(self, code: &'static str) -> Self {
        match self {
            Self::Technical {
                message, detail, ..
            } => {
                let message = match detail {
                    Some(detail) if !detail.trim().is_empty() => {
                        format!("{message}: {}", detail.trim())
                    }
                    _ => message,
                };
                Self::Functional { code, message }
            }
            other => other,
        }
    }
}

impl From<std::io::Error> for PlaneError {
    fn from(err: std::io::Error) -> Self {
        Self::technical_with(codes::BUNDLE_GENERATION, "I/O failure", err.to_string())
    }
}

impl From<serde_json::Error> for PlaneError {
    fn from(err: serde_json::Error) -> Self {
        Self::technical_with(
            codes::BUNDLE_GENERATION,
            "manifest serialization failed",
            err.to_string(),
        )
    }
}

//! Reply envelope published back to RPC callers.

use serde::{Deserialize, Serialize};

/// Machine-readable failure category carried next to the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// Malformed or invalid request; never retried.
    Invalid,
    /// Nothing matched the request.
    NotFound,
    /// A concurrent update could not be resolved.
    Conflict,
    /// Infrastructure stayed unavailable through every retry.
    Unavailable,
    Internal,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCode::Invalid => write!(f, "invalid"),
            FailureCode::NotFound => write!(f, "not_found"),
            FailureCode::Conflict => write!(f, "conflict"),
            FailureCode::Unavailable => write!(f, "unavailable"),
            FailureCode::Internal => write!(f, "internal"),
        }
    }
}

/// A terminal handler failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub code: FailureCode,
    pub message: String,
}

impl Failure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(FailureCode::Invalid, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureCode::Internal, message)
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Body of every reply: `{success, data?, error?, code?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
    pub success: bool,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureCode>,
}

impl<T> Reply<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            code: None,
        }
    }

    pub fn failure(failure: &Failure) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(failure.message.clone()),
            code: Some(failure.code),
        }
    }

    /// Splits the envelope into the payload or the failure it reports.
    ///
    /// A failure without a code (e.g. from an older worker) is `Internal`.
    pub fn into_result(self) -> Result<Option<T>, Failure> {
        if self.success {
            Ok(self.data)
        } else {
            Err(Failure::new(
                self.code.unwrap_or(FailureCode::Internal),
                self.error.unwrap_or_else(|| "request failed".to_string()),
            ))
        }
    }
}

//! CIM status codes and the structured exception carried by responses.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Numeric CIM status code.
///
/// The DMTF-defined codes are available as associated constants. Providers may
/// raise any other value; it is carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CimStatusCode(pub u32);

impl CimStatusCode {
    pub const SUCCESS: Self = Self(0);
    pub const FAILED: Self = Self(1);
    pub const ACCESS_DENIED: Self = Self(2);
    pub const INVALID_NAMESPACE: Self = Self(3);
    pub const INVALID_PARAMETER: Self = Self(4);
    pub const INVALID_CLASS: Self = Self(5);
    pub const NOT_FOUND: Self = Self(6);
    pub const NOT_SUPPORTED: Self = Self(7);
    pub const CLASS_HAS_CHILDREN: Self = Self(8);
    pub const CLASS_HAS_INSTANCES: Self = Self(9);
    pub const INVALID_SUPERCLASS: Self = Self(10);
    pub const ALREADY_EXISTS: Self = Self(11);
    pub const NO_SUCH_PROPERTY: Self = Self(12);
    pub const TYPE_MISMATCH: Self = Self(13);
    pub const QUERY_LANGUAGE_NOT_SUPPORTED: Self = Self(14);
    pub const INVALID_QUERY: Self = Self(15);
    pub const METHOD_NOT_AVAILABLE: Self = Self(16);
    pub const METHOD_NOT_FOUND: Self = Self(17);

    /// Converts a provider-raised integer into a status code.
    ///
    /// Values that do not fit are reported as [`CimStatusCode::FAILED`].
    pub fn from_raised(value: i64) -> Self {
        u32::try_from(value).map(Self).unwrap_or(Self::FAILED)
    }

    /// Symbolic name of a DMTF code, `None` for provider-specific codes.
    pub fn name(&self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "CIM_ERR_SUCCESS",
            1 => "CIM_ERR_FAILED",
            2 => "CIM_ERR_ACCESS_DENIED",
            3 => "CIM_ERR_INVALID_NAMESPACE",
            4 => "CIM_ERR_INVALID_PARAMETER",
            5 => "CIM_ERR_INVALID_CLASS",
            6 => "CIM_ERR_NOT_FOUND",
            7 => "CIM_ERR_NOT_SUPPORTED",
            8 => "CIM_ERR_CLASS_HAS_CHILDREN",
            9 => "CIM_ERR_CLASS_HAS_INSTANCES",
            10 => "CIM_ERR_INVALID_SUPERCLASS",
            11 => "CIM_ERR_ALREADY_EXISTS",
            12 => "CIM_ERR_NO_SUCH_PROPERTY",
            13 => "CIM_ERR_TYPE_MISMATCH",
            14 => "CIM_ERR_QUERY_LANGUAGE_NOT_SUPPORTED",
            15 => "CIM_ERR_INVALID_QUERY",
            16 => "CIM_ERR_METHOD_NOT_AVAILABLE",
            17 => "CIM_ERR_METHOD_NOT_FOUND",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for CimStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "status {}", self.0),
        }
    }
}

/// Structured exception understood by the server's response model.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct CimException {
    /// Status code reported to the client
    pub code: CimStatusCode,
    /// Human readable description (may be empty)
    pub message: String,
    /// Source file that produced the exception
    pub file: Option<String>,
    /// Source line that produced the exception
    pub line: Option<u32>,
}

impl CimException {
    /// Create an exception without provenance.
    pub fn new(code: CimStatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    /// Create an exception annotated with the caller's file and line.
    #[track_caller]
    pub fn located(code: CimStatusCode, message: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        Self::new(code, message).at(location.file(), location.line())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(CimStatusCode::FAILED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CimStatusCode::NOT_FOUND, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(CimStatusCode::NOT_SUPPORTED, message)
    }

    /// Attach file/line provenance.
    pub fn at(mut self, file: &str, line: u32) -> Self {
        self.file = Some(file.to_string());
        self.line = Some(line);
        self
    }
}

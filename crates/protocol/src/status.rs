//! Terminal failure status carried back to the uploading side.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors produced while decoding protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown status code: {0}")]
    UnknownStatusCode(u8),
}

/// Failure category of a terminated upload.
///
/// Numeric values follow the RPC status code numbering so that logs line up
/// with other RPC tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StatusCode {
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    Aborted = 10,
    Internal = 13,
}

impl StatusCode {
    /// Wire representation.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name, as used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Cancelled => "cancelled",
            StatusCode::Unknown => "unknown",
            StatusCode::InvalidArgument => "invalid_argument",
            StatusCode::Aborted => "aborted",
            StatusCode::Internal => "internal",
        }
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StatusCode::Cancelled),
            2 => Ok(StatusCode::Unknown),
            3 => Ok(StatusCode::InvalidArgument),
            10 => Ok(StatusCode::Aborted),
            13 => Ok(StatusCode::Internal),
            other => Err(ProtocolError::UnknownStatusCode(other)),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit error status that terminates an upload stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_wire_values() {
        assert_eq!(StatusCode::Cancelled.as_u8(), 1);
        assert_eq!(StatusCode::InvalidArgument.as_u8(), 3);
        assert_eq!(StatusCode::Aborted.as_u8(), 10);
        assert_eq!(StatusCode::Internal.as_u8(), 13);
    }

    #[test]
    fn status_code_from_u8() {
        for code in [
            StatusCode::Cancelled,
            StatusCode::Unknown,
            StatusCode::InvalidArgument,
            StatusCode::Aborted,
            StatusCode::Internal,
        ] {
            assert_eq!(StatusCode::try_from(code.as_u8()).unwrap(), code);
        }
        assert!(matches!(
            StatusCode::try_from(42),
            Err(ProtocolError::UnknownStatusCode(42))
        ));
    }

    #[test]
    fn status_display() {
        let status = Status::new(StatusCode::InvalidArgument, "bad offset");
        assert_eq!(status.to_string(), "invalid_argument: bad offset");
    }

    #[test]
    fn status_json_uses_snake_case_code() {
        let status = Status::new(StatusCode::Internal, "disk full");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["code"], "internal");
        assert_eq!(json["message"], "disk full");
    }
}

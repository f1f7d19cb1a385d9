//! Request classification

use serde::{Deserialize, Serialize};
use std::fmt;

/// Read/write classification of an HTTP method.
///
/// Each category carries its own per-minute limit and monthly quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestCategory {
    /// GET, HEAD, OPTIONS
    Read,
    /// POST, PUT, PATCH, DELETE
    Write,
}

impl RequestCategory {
    /// Classify an HTTP method name.
    ///
    /// Methods outside the write set are treated as reads.
    pub fn from_method(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "POST" | "PUT" | "PATCH" | "DELETE" => Self::Write,
            _ => Self::Read,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write)
    }

    /// Stable identifier used in counter keys and database rows
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
        }
    }

    /// Parse the stored identifier back into a category
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "READ" => Some(Self::Read),
            "WRITE" => Some(Self::Write),
            _ => None,
        }
    }
}

impl fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_classification() {
        for method in ["GET", "HEAD", "OPTIONS", "get"] {
            assert_eq!(RequestCategory::from_method(method), RequestCategory::Read);
        }
        for method in ["POST", "PUT", "PATCH", "DELETE", "delete"] {
            assert_eq!(RequestCategory::from_method(method), RequestCategory::Write);
        }
    }

    #[test]
    fn test_unknown_method_is_read() {
        assert_eq!(RequestCategory::from_method("TRACE"), RequestCategory::Read);
    }

    #[test]
    fn test_stored_identifier() {
        assert_eq!(RequestCategory::parse("WRITE"), Some(RequestCategory::Write));
        assert_eq!(RequestCategory::parse("write"), None);
        assert_eq!(RequestCategory::Read.to_string(), "READ");
    }
}

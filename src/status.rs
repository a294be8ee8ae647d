//! Failure statuses reported to clients.
//!
//! A [`Status`] is what ends up inside a FAILURE message: a stable,
//! dot-separated status code, the matching GQL status, and a human readable
//! message. Collaborators report their failures as statuses too, so nothing
//! beyond these three strings leaks onto the wire.
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: String,
    pub gql_status: String,
    pub message: String,
}

pub mod code {
    pub const REQUEST_INVALID: (&str, &str) = ("Neo.ClientError.Request.Invalid", "08N06");
    pub const REQUEST_INVALID_FORMAT: (&str, &str) =
        ("Neo.ClientError.Request.InvalidFormat", "22N01");
    pub const UNAUTHORIZED: (&str, &str) = ("Neo.ClientError.Security.Unauthorized", "42NFF");
    pub const SYNTAX_ERROR: (&str, &str) = ("Neo.ClientError.Statement.SyntaxError", "42001");
    pub const TRANSACTION_TERMINATED: (&str, &str) =
        ("Neo.ClientError.Transaction.Terminated", "25N05");
    pub const DATABASE_NOT_FOUND: (&str, &str) =
        ("Neo.ClientError.Database.DatabaseNotFound", "22N51");
    pub const UNAVAILABLE: (&str, &str) = ("Neo.TransientError.General.DatabaseUnavailable", "51N38");
    pub const UNKNOWN: (&str, &str) = ("Neo.DatabaseError.General.UnknownError", "50N42");

    pub(crate) const ALL: [(&str, &str); 8] = [
        REQUEST_INVALID,
        REQUEST_INVALID_FORMAT,
        UNAUTHORIZED,
        SYNTAX_ERROR,
        TRANSACTION_TERMINATED,
        DATABASE_NOT_FOUND,
        UNAVAILABLE,
        UNKNOWN,
    ];
}

impl Status {
    pub fn new((code, gql_status): (&str, &str), message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            gql_status: gql_status.to_string(),
            message: message.into(),
        }
    }

    /// Builds a status from a bare code, as older FAILURE messages carry no
    /// GQL status. Unknown codes get the general processing status.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let gql_status = code::ALL
            .iter()
            .find(|(known, _)| *known == code)
            .map_or(code::UNKNOWN.1, |(_, gql)| *gql);
        Self {
            code: code.to_string(),
            gql_status: gql_status.to_string(),
            message: message.into(),
        }
    }

    pub fn request_invalid(message: impl Into<String>) -> Self {
        Self::new(code::REQUEST_INVALID, message)
    }

    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(code::REQUEST_INVALID_FORMAT, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(code::UNAUTHORIZED, message)
    }

    pub fn terminated(message: impl Into<String>) -> Self {
        Self::new(code::TRANSACTION_TERMINATED, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(code::UNKNOWN, message)
    }

    /// The classification segment of the code, e.g. `ClientError`.
    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("DatabaseError")
    }

    pub fn is_authentication_failure(&self) -> bool {
        self.code == code::UNAUTHORIZED.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_second_segment() {
        assert_eq!(Status::unauthorized("no").classification(), "ClientError");
        assert_eq!(Status::unknown("boom").classification(), "DatabaseError");
        assert_eq!(Status::new(code::UNAVAILABLE, "").classification(), "TransientError");
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(
            Status::request_invalid("bad").to_string(),
            "[Neo.ClientError.Request.Invalid] bad"
        );
    }
}

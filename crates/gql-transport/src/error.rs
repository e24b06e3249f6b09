//! Transport-level failures.
//!
//! These are failures to obtain a result at all. Errors the server reports
//! inside an otherwise well-formed response are carried by
//! [`gql_types::ExecutionResult::errors`] instead.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Server answered with a non-success HTTP status.
    Http {
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },
    /// The request could not be sent or the connection failed.
    Request(String),
    /// The response body was not a GraphQL response.
    Decode(String),
    /// The link gave up on the operation (e.g. the blocking worker died).
    Aborted(String),
}

impl TransportError {
    /// Longest response body kept on an [`TransportError::Http`] error.
    pub const MAX_BODY_LEN: usize = 512;

    pub fn http(status: u16, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > Self::MAX_BODY_LEN {
            let mut end = Self::MAX_BODY_LEN;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        TransportError::Http { status, body }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Http { status, body } => {
                write!(f, "HTTP {}", status)?;
                if !body.is_empty() {
                    write!(f, ": {}", body)?;
                }
                Ok(())
            }
            TransportError::Request(msg) => write!(f, "request failed: {}", msg),
            TransportError::Decode(msg) => write!(f, "failed to decode response: {}", msg),
            TransportError::Aborted(msg) => write!(f, "operation aborted: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(TransportError::http(502, "").to_string(), "HTTP 502");
        assert_eq!(
            TransportError::http(400, "bad query").to_string(),
            "HTTP 400: bad query"
        );
        assert_eq!(
            TransportError::Request("connection refused".into()).to_string(),
            "request failed: connection refused"
        );
    }

    #[test]
    fn test_http_body_truncated_on_char_boundary() {
        let body = "é".repeat(TransportError::MAX_BODY_LEN);
        match TransportError::http(500, body) {
            TransportError::Http { body, .. } => {
                assert!(body.len() <= TransportError::MAX_BODY_LEN);
                assert!(body.chars().all(|c| c == 'é'));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

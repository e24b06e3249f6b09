//! Operation errors surfaced by the client core.
//!
//! One composite type covers every failure a caller or listener can observe:
//!
//! | Variant | Origin | Retried by the core |
//! |---------|--------|---------------------|
//! | `InvalidArgument` | caller passed missing/conflicting options | never |
//! | `Invariant` | internal bookkeeping mismatch (e.g. id reused for another document) | never |
//! | `GraphQL` | server errors embedded in a result, under `ErrorPolicy::None` | never |
//! | `Network` | transport failure; carries the raw cause | never (callers/pollers re-issue) |
//! | `LocalState` | local resolver failure | never |
//! | `StoreReset` | store cleared while the request was in flight | never |
//! | `Stopped` | operation torn down while a fetch was pending | never |
//! | `Shutdown` | whole manager stopped | never |
//!
//! Stale results for superseded requests are not errors; they are dropped.

use std::fmt;

use gql_transport::TransportError;
use gql_types::GraphQLError;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Missing or conflicting caller arguments.
    InvalidArgument(String),
    /// Internal consistency check failed.
    Invariant(String),
    /// Server-reported errors.
    GraphQL(Vec<GraphQLError>),
    /// The link failed before producing a result.
    Network(TransportError),
    /// A local resolver failed.
    LocalState(String),
    /// The store was reset while the request was still in the link chain.
    StoreReset,
    /// The operation was stopped before its fetch completed.
    Stopped {
        /// Operation id
        id: String,
    },
    /// The query manager was stopped while the request was in flight.
    Shutdown,
}

impl ClientError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ClientError::InvalidArgument(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        ClientError::Invariant(msg.into())
    }

    /// GraphQL errors carried by this error (empty for other variants).
    pub fn graphql_errors(&self) -> &[GraphQLError] {
        match self {
            ClientError::GraphQL(errors) => errors,
            _ => &[],
        }
    }

    pub fn network_error(&self) -> Option<&TransportError> {
        match self {
            ClientError::Network(err) => Some(err),
            _ => None,
        }
    }

    /// Caller misuse, as opposed to a runtime failure.
    pub fn is_precondition(&self) -> bool {
        matches!(self, ClientError::InvalidArgument(_))
    }

    /// Raised by a teardown (reset, stop, shutdown) rather than by the operation itself.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            ClientError::StoreReset | ClientError::Stopped { .. } | ClientError::Shutdown
        )
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::Network(err)
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            ClientError::Invariant(msg) => write!(f, "Internal Error: {}", msg),
            ClientError::GraphQL(errors) => {
                let messages: Vec<String> = errors
                    .iter()
                    .map(|e| format!("GraphQL error: {}", e))
                    .collect();
                write!(f, "{}", messages.join("\n"))
            }
            ClientError::Network(err) => write!(f, "Network error: {}", err),
            ClientError::LocalState(msg) => write!(f, "Local state error: {}", msg),
            ClientError::StoreReset => write!(
                f,
                "Store reset while query was in flight (not completed in link chain)"
            ),
            ClientError::Stopped { id } => {
                write!(f, "Operation {} was stopped while its fetch was in flight", id)
            }
            ClientError::Shutdown => write!(f, "QueryManager stopped while query was in flight"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Network(err) => Some(err),
            _ => None,
        }
    }
}

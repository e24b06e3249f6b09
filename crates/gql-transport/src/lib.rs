//! GraphQL Transport Layer
//!
//! The network side of the client core:
//!
//! - [`link`]: the [`Link`] contract (`execute(operation) -> stream of results`)
//! - [`http`]: GraphQL-over-HTTP link backed by a blocking HTTP agent
//! - [`network`]: endpoint and timeout resolution from the environment
//! - [`mock`]: scriptable link for tests
//!
//! # Example
//!
//! ```ignore
//! use gql_transport::{HttpLink, Link, Operation};
//!
//! let link = HttpLink::new("https://api.example.com/graphql");
//! let mut results = link.execute(Operation::new(doc, variables));
//! while let Some(result) = results.next().await {
//!     println!("{:?}", result?);
//! }
//! ```

pub mod error;
pub mod http;
pub mod link;
pub mod mock;
pub mod network;

// Re-export main types for convenience
pub use error::TransportError;
pub use http::HttpLink;
pub use link::{Context, Link, Operation, ResultStream};
pub use mock::{Gate, MockLink, MockResponse};

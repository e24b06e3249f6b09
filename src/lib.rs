//! GraphQL client orchestration
//!
//! Facade over the workspace crates:
//!
//! - **Types**: documents, variables and execution results ([`types`])
//! - **Transport**: the link contract, an HTTP link and a scriptable mock ([`transport`])
//! - **Client**: the query manager that coordinates callers, cache and link ([`client`])
//!
//! Most applications only need [`QueryManager`] plus a [`transport::HttpLink`].

pub use gql_core as client;
pub use gql_transport as transport;
pub use gql_types as types;

pub use gql_core::{
    ClientConfig, ClientError, FetchPolicy, InMemoryCache, MutationOptions, QueryManager,
    QueryOptions, SubscriptionOptions,
};
pub use gql_types::{Document, ExecutionResult, Variables};

//! GraphQL client orchestration core.
//!
//! Everything between "a caller asked for an operation" and "the link and
//! the cache did their part":
//!
//! - [`registry`] / [`store`]: per-operation records and the network-status state machine
//! - [`fetch`]: fetch policies and stale-result discard by request sequence
//! - [`dedup`]: sharing of identical in-flight requests
//! - [`mutation`]: optimistic apply, query updaters, refetches, rollback
//! - [`broadcast`]: dirty tracking and the single listener flush
//! - [`poll`]: per-query poll timers with back-pressure
//! - [`transform`]: memoized document transforms
//! - [`watch`]: watched-query handles and their result streams
//! - [`subscription`]: GraphQL subscription streams
//!
//! The cache and local-state resolution are collaborators behind the
//! [`Cache`] and [`LocalResolver`] traits; [`InMemoryCache`] and
//! [`NoLocalState`] are the bundled implementations.
//!
//! # Example
//!
//! ```ignore
//! use gql_core::{QueryManager, QueryOptions};
//! use gql_transport::HttpLink;
//!
//! let manager = QueryManager::builder()
//!     .link(Arc::new(HttpLink::from_env()))
//!     .build()?;
//! let (handle, mut results) = manager.watch_query(QueryOptions::new(doc))?;
//! while let Some(result) = results.next().await {
//!     println!("{:?}", result?.data);
//! }
//! ```

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod local_state;
pub mod manager;
pub mod mutation;
pub mod options;
pub mod poll;
pub mod registry;
pub mod store;
pub mod subscription;
pub mod transform;
pub mod watch;

pub use cache::{Cache, CacheDiff, CacheWatch, CacheWrite, DiffOptions, InMemoryCache, WatchCancel};
pub use config::ClientConfig;
pub use error::ClientError;
pub use local_state::{LocalResolver, NoLocalState, ResolverRequest};
pub use manager::{BroadcastHook, QueryManager, QueryManagerBuilder, WeakQueryManager};
pub use mutation::{append_to_list, MutationRecord, MutationStore};
pub use options::{
    ErrorPolicy, FetchPolicy, FetchType, MutationOptions, MutationUpdateFn, OptimisticResponse,
    QueryOptions, QueryUpdater, RefetchQueries, RefetchQuery, SubscriptionOptions,
    UpdateQueryOptions,
};
pub use registry::{ListenerId, QueryListener};
pub use store::{NetworkStatus, QueryResult, StoreValue};
pub use subscription::SubscriptionStream;
pub use watch::{
    CurrentResult, FetchMoreOptions, FetchMoreResult, QueryHandle, QuerySubscription,
    WatchedQuery,
};

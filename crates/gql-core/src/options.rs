//! Caller-facing options for queries, mutations and subscriptions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gql_transport::Context;
use gql_types::{Document, ExecutionResult, Variables};

use crate::cache::Cache;

/// Where a query may read its data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Serve complete cached data; go to the network only on a miss.
    #[default]
    CacheFirst,
    /// Serve cached data immediately and always refresh from the network.
    CacheAndNetwork,
    /// Always go to the network; results are written to the cache.
    NetworkOnly,
    /// Never go to the network.
    CacheOnly,
    /// Always go to the network; results bypass the cache.
    NoCache,
    /// Registered but inert: never fetches, never reads the cache.
    Standby,
}

impl FetchPolicy {
    /// Policies that skip the cache read before fetching.
    pub fn is_network_only(&self) -> bool {
        matches!(self, FetchPolicy::NetworkOnly | FetchPolicy::NoCache)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cache-first" => Some(FetchPolicy::CacheFirst),
            "cache-and-network" => Some(FetchPolicy::CacheAndNetwork),
            "network-only" => Some(FetchPolicy::NetworkOnly),
            "cache-only" => Some(FetchPolicy::CacheOnly),
            "no-cache" => Some(FetchPolicy::NoCache),
            "standby" => Some(FetchPolicy::Standby),
            _ => None,
        }
    }
}

impl fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchPolicy::CacheFirst => "cache-first",
            FetchPolicy::CacheAndNetwork => "cache-and-network",
            FetchPolicy::NetworkOnly => "network-only",
            FetchPolicy::CacheOnly => "cache-only",
            FetchPolicy::NoCache => "no-cache",
            FetchPolicy::Standby => "standby",
        };
        write!(f, "{}", name)
    }
}

/// How server-reported GraphQL errors are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Errors are fatal to the result.
    #[default]
    None,
    /// Errors are discarded before delivery.
    Ignore,
    /// Errors are delivered alongside data.
    All,
}

/// Why a fetch was issued; selects the initial network status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchType {
    #[default]
    Normal,
    Refetch,
    Poll,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub document: Document,
    pub variables: Variables,
    pub fetch_policy: FetchPolicy,
    pub error_policy: ErrorPolicy,
    pub context: Context,
    pub poll_interval: Option<Duration>,
    pub return_partial_data: bool,
    pub notify_on_network_status_change: bool,
}

impl QueryOptions {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            variables: Variables::new(),
            fetch_policy: FetchPolicy::default(),
            error_policy: ErrorPolicy::default(),
            context: Context::new(),
            poll_interval: None,
            return_partial_data: false,
            notify_on_network_status_change: false,
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_return_partial_data(mut self, enabled: bool) -> Self {
        self.return_partial_data = enabled;
        self
    }

    pub fn with_notify_on_network_status_change(mut self, enabled: bool) -> Self {
        self.notify_on_network_status_change = enabled;
        self
    }
}

/// Optimistic mutation data: fixed, or computed from the mutation variables.
#[derive(Clone)]
pub enum OptimisticResponse {
    Value(Value),
    Computed(Arc<dyn Fn(&Variables) -> Value + Send + Sync>),
}

impl OptimisticResponse {
    pub fn resolve(&self, variables: &Variables) -> Value {
        match self {
            OptimisticResponse::Value(value) => value.clone(),
            OptimisticResponse::Computed(f) => f(variables),
        }
    }
}

/// Extra facts handed to a [`QueryUpdater`].
#[derive(Debug, Clone)]
pub struct UpdateQueryOptions {
    pub mutation_result: ExecutionResult,
    pub query_name: Option<String>,
    pub query_variables: Variables,
}

/// Rewrites a watched query's cached result in response to a mutation.
/// `Ok(None)` leaves the query untouched.
pub type QueryUpdater =
    Arc<dyn Fn(&Value, &UpdateQueryOptions) -> anyhow::Result<Option<Value>> + Send + Sync>;

/// Free-form cache update run inside the mutation's write transaction.
pub type MutationUpdateFn =
    Arc<dyn Fn(&dyn Cache, &ExecutionResult) -> anyhow::Result<()> + Send + Sync>;

/// A query to refetch once a mutation completes.
#[derive(Debug, Clone)]
pub enum RefetchQuery {
    /// Every watched query with this operation name.
    Named(String),
    /// A fresh `network-only` query.
    Document {
        document: Document,
        variables: Variables,
        context: Option<Context>,
    },
}

#[derive(Clone)]
pub enum RefetchQueries {
    List(Vec<RefetchQuery>),
    Computed(Arc<dyn Fn(&ExecutionResult) -> Vec<RefetchQuery> + Send + Sync>),
}

impl Default for RefetchQueries {
    fn default() -> Self {
        RefetchQueries::List(Vec::new())
    }
}

impl RefetchQueries {
    pub fn resolve(&self, result: &ExecutionResult) -> Vec<RefetchQuery> {
        match self {
            RefetchQueries::List(list) => list.clone(),
            RefetchQueries::Computed(f) => f(result),
        }
    }
}

#[derive(Clone, Default)]
pub struct MutationOptions {
    pub document: Option<Document>,
    pub variables: Variables,
    pub optimistic_response: Option<OptimisticResponse>,
    /// Query updaters keyed by the watched query's operation name.
    pub update_queries: HashMap<String, QueryUpdater>,
    pub refetch_queries: RefetchQueries,
    pub await_refetch_queries: bool,
    pub update: Option<MutationUpdateFn>,
    pub error_policy: ErrorPolicy,
    /// Only `NoCache` is accepted.
    pub fetch_policy: Option<FetchPolicy>,
    pub context: Context,
}

impl MutationOptions {
    pub fn new(document: Document) -> Self {
        Self {
            document: Some(document),
            ..Default::default()
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_optimistic_response(mut self, response: OptimisticResponse) -> Self {
        self.optimistic_response = Some(response);
        self
    }

    pub fn with_query_updater(mut self, query_name: &str, updater: QueryUpdater) -> Self {
        self.update_queries.insert(query_name.to_string(), updater);
        self
    }

    pub fn with_refetch_queries(mut self, queries: RefetchQueries, await_them: bool) -> Self {
        self.refetch_queries = queries;
        self.await_refetch_queries = await_them;
        self
    }

    pub fn with_update(mut self, update: MutationUpdateFn) -> Self {
        self.update = Some(update);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = Some(policy);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    pub document: Document,
    pub variables: Variables,
    pub fetch_policy: Option<FetchPolicy>,
    pub context: Context,
}

impl SubscriptionOptions {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            variables: Variables::new(),
            fetch_policy: None,
            context: Context::new(),
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = Some(policy);
        self
    }
}

//! Per-operation store values and the network-status state machine.
//!
//! ```text
//!            init                       result
//!  (none) ───────────▶ loading ────────────────────▶ ready
//!                      setVariables    error
//!                      refetch      ─────────────▶ error
//!                      poll
//!                      fetchMore
//! ```
//!
//! The initial in-flight variant is picked with priority
//! `setVariables > poll > refetch > loading`. A `ready` or `error` value
//! means no fetch is pending for the id; an absent value means the
//! operation was reset or stopped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gql_types::{Document, ExecutionResult, GraphQLError, Variables};

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkStatus {
    #[default]
    Loading,
    SetVariables,
    FetchMore,
    Refetch,
    Poll,
    Ready,
    Error,
}

impl NetworkStatus {
    /// A fetch is pending for the operation.
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, NetworkStatus::Ready | NetworkStatus::Error)
    }
}

/// Inputs to a store initialization; see [`StoreValue::init`].
#[derive(Debug, Clone)]
pub struct InitQuery {
    pub document: Document,
    pub variables: Variables,
    pub store_previous_variables: bool,
    pub is_poll: bool,
    pub is_refetch: bool,
    pub fetch_more_for_id: Option<String>,
}

impl InitQuery {
    pub fn new(document: Document, variables: Variables) -> Self {
        Self {
            document,
            variables,
            store_previous_variables: false,
            is_poll: false,
            is_refetch: false,
            fetch_more_for_id: None,
        }
    }
}

/// Network-facing state of one operation.
#[derive(Debug, Clone)]
pub struct StoreValue {
    pub document: Document,
    pub variables: Variables,
    /// Variables of a superseded, unfinished fetch.
    pub previous_variables: Option<Variables>,
    pub network_status: NetworkStatus,
    pub network_error: Option<ClientError>,
    pub graphql_errors: Vec<GraphQLError>,
}

impl PartialEq for StoreValue {
    fn eq(&self, other: &Self) -> bool {
        self.document.same_document(&other.document)
            && self.variables == other.variables
            && self.previous_variables == other.previous_variables
            && self.network_status == other.network_status
            && self.network_error == other.network_error
            && self.graphql_errors == other.graphql_errors
    }
}

impl StoreValue {
    /// Build the value for a fresh fetch, given whatever was stored before.
    pub fn init(previous: Option<&StoreValue>, query: &InitQuery) -> Self {
        let mut is_set_variables = false;
        let mut previous_variables = None;
        if let Some(previous) = previous {
            if query.store_previous_variables
                && previous.network_status != NetworkStatus::Loading
                && previous.variables != query.variables
            {
                is_set_variables = true;
                previous_variables = Some(previous.variables.clone());
            }
        }

        let network_status = if is_set_variables {
            NetworkStatus::SetVariables
        } else if query.is_poll {
            NetworkStatus::Poll
        } else if query.is_refetch {
            NetworkStatus::Refetch
        } else {
            NetworkStatus::Loading
        };

        Self {
            document: query.document.clone(),
            variables: query.variables.clone(),
            previous_variables,
            network_status,
            network_error: None,
            graphql_errors: previous
                .map(|p| p.graphql_errors.clone())
                .unwrap_or_default(),
        }
    }

    pub fn mark_result(&mut self, result: &ExecutionResult) {
        self.network_error = None;
        self.graphql_errors = result.errors.clone();
        self.previous_variables = None;
        self.network_status = NetworkStatus::Ready;
    }

    pub fn mark_error(&mut self, error: ClientError) {
        self.network_error = Some(error);
        self.network_status = NetworkStatus::Error;
    }

    /// Finish without a network result; stays in flight unless `complete`.
    pub fn mark_client_result(&mut self, complete: bool) {
        self.network_error = None;
        self.previous_variables = None;
        if complete {
            self.network_status = NetworkStatus::Ready;
        }
    }
}

/// What a watched query delivers to its subscribers.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub data: Option<Value>,
    pub errors: Vec<GraphQLError>,
    pub loading: bool,
    pub network_status: NetworkStatus,
    /// Data is the last complete result, not what is currently cached.
    pub stale: bool,
}

impl QueryResult {
    pub fn ready(data: Option<Value>) -> Self {
        Self {
            data,
            errors: Vec::new(),
            loading: false,
            network_status: NetworkStatus::Ready,
            stale: false,
        }
    }
}

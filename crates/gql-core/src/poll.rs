//! Poll scheduler.
//!
//! One timer task per polling id. Each tick either skips (the id still has
//! a request in flight) or runs a `network-only` fetch tagged as a poll;
//! the next tick is scheduled once that fetch settles, whatever its outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ClientError;
use crate::manager::{QueryManager, WeakQueryManager};
use crate::options::{FetchPolicy, FetchType, QueryOptions};
use crate::registry::QueryListener;

/// Bookkeeping for one polling id. Dropping it cancels the timer.
pub(crate) struct PollTimer {
    interval: Duration,
    token: Arc<()>,
    task: JoinHandle<()>,
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl QueryManager {
    /// Start polling `query_id` every `options.poll_interval`, replacing any
    /// earlier timer for the id. Does nothing in server-rendering mode.
    pub fn start_polling_query(
        &self,
        options: &QueryOptions,
        query_id: &str,
        listener: Option<QueryListener>,
    ) -> Result<(), ClientError> {
        let interval = options
            .poll_interval
            .filter(|interval| !interval.is_zero())
            .ok_or_else(|| {
                ClientError::invalid("attempted to start a polling query without a polling interval")
            })?;
        if self.inner.config.ssr_mode {
            return Ok(());
        }

        let options = QueryOptions {
            fetch_policy: FetchPolicy::NetworkOnly,
            ..options.clone()
        };
        if let Some(listener) = listener {
            self.add_query_listener(query_id, listener);
        }

        let token = Arc::new(());
        let task = tokio::spawn(poll_loop(
            self.downgrade(),
            query_id.to_string(),
            interval,
            options,
            Arc::downgrade(&token),
        ));
        // The replaced timer, if any, is aborted on drop.
        let replaced = self.inner.polls.lock().insert(
            query_id.to_string(),
            PollTimer {
                interval,
                token,
                task,
            },
        );
        drop(replaced);
        Ok(())
    }

    /// Cancel the timer for `query_id`. The operation itself is left alone.
    pub fn stop_polling_query(&self, query_id: &str) {
        let removed = self.inner.polls.lock().remove(query_id);
        drop(removed);
    }

    /// Interval of the active timer for `query_id`, if it is polling.
    pub fn polling_interval(&self, query_id: &str) -> Option<Duration> {
        self.inner.polls.lock().get(query_id).map(|timer| timer.interval)
    }

    /// Whether the timer identified by `token` is still the one registered for `query_id`.
    fn owns_poll(&self, query_id: &str, token: &std::sync::Weak<()>) -> bool {
        let Some(token) = token.upgrade() else {
            return false;
        };
        self.inner
            .polls
            .lock()
            .get(query_id)
            .is_some_and(|timer| Arc::ptr_eq(&timer.token, &token))
    }

    fn is_in_flight(&self, query_id: &str) -> bool {
        self.inner
            .registry
            .lock()
            .store_value(query_id)
            .is_some_and(|store| store.network_status.is_in_flight())
    }
}

async fn poll_loop(
    manager: WeakQueryManager,
    query_id: String,
    interval: Duration,
    options: QueryOptions,
    token: std::sync::Weak<()>,
) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(strong) = manager.upgrade() else {
            return;
        };
        if !strong.owns_poll(&query_id, &token) {
            return;
        }
        if strong.is_in_flight(&query_id) {
            debug!(query_id = %query_id, "poll tick skipped, request still in flight");
            continue;
        }

        // Run the fetch on its own task so cancelling the timer never drops
        // a request halfway through.
        let id = query_id.clone();
        let options = options.clone();
        let fetch = tokio::spawn(async move {
            strong
                .fetch_query(&id, options, FetchType::Poll, None)
                .await
        });
        match fetch.await {
            Ok(Err(e)) => debug!(query_id = %query_id, error = %e, "poll fetch failed"),
            Err(e) => debug!(query_id = %query_id, error = %e, "poll fetch task ended"),
            Ok(Ok(_)) => {}
        }
    }
}

//! `gql query`: one-shot or polled queries.

use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use futures::StreamExt;

use gql_core::{FetchPolicy, QueryOptions};
use gql_types::Document;

use super::output::{print_error, print_json};
use super::{connect, require_positive, OperationArgs};

#[derive(Debug, Parser)]
pub struct QueryCmd {
    #[command(flatten)]
    operation: OperationArgs,

    /// Fetch policy (cache-first, network-only, no-cache, ...)
    #[arg(long, value_name = "POLICY")]
    fetch_policy: Option<String>,

    /// Re-run the query every N milliseconds through the poll scheduler
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// Number of settled results to print while polling
    #[arg(long, default_value_t = 3, requires = "poll_ms")]
    polls: u64,
}

impl QueryCmd {
    fn fetch_policy(&self) -> Result<Option<FetchPolicy>> {
        self.fetch_policy
            .as_deref()
            .map(|raw| {
                FetchPolicy::parse(raw).ok_or_else(|| anyhow!("unknown fetch policy '{}'", raw))
            })
            .transpose()
    }

    fn options(&self) -> Result<QueryOptions> {
        let source = self.operation.source()?;
        let document = self
            .operation
            .named(Document::query(source.clone()), &source)
            .build();
        let mut options = QueryOptions::new(document).with_variables(self.operation.variables()?);
        if let Some(policy) = self.fetch_policy()? {
            options = options.with_fetch_policy(policy);
        }
        Ok(options)
    }

    pub async fn execute(&self, endpoint: Option<&str>) -> Result<()> {
        let options = self.options()?;
        let manager = connect(endpoint)?;

        let Some(poll_ms) = self.poll_ms else {
            let result = manager.query(options).await;
            return match result {
                Ok(result) => print_json(&result),
                Err(e) => Err(print_error(&e)),
            };
        };

        let interval = Duration::from_millis(require_positive(poll_ms, "--poll-ms")?);
        let polls = require_positive(self.polls, "--polls")?;
        // Cache-first cannot poll; default to the network.
        let policy = self.fetch_policy()?.unwrap_or(FetchPolicy::NetworkOnly);
        let options = options
            .with_fetch_policy(policy)
            .with_poll_interval(interval)
            .with_notify_on_network_status_change(true);

        let (_handle, mut results) = manager.watch_query(options).map_err(|e| print_error(&e))?;
        let mut settled = 0;
        while settled < polls {
            let Some(next) = results.next().await else {
                break;
            };
            let result = next.map_err(|e| print_error(&e))?;
            if result.loading {
                continue;
            }
            print_json(&result)?;
            settled += 1;
        }
        results.cancel();
        manager.stop();
        Ok(())
    }
}

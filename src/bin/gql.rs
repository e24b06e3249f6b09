//! gql: run GraphQL operations through the orchestration core
//!
//! ## Example Usage
//!
//! ```bash
//! # One-shot query
//! gql query 'query Todos { todos { id text } }'
//!
//! # Query with variables against a specific endpoint
//! gql --endpoint https://api.example.com/graphql \
//!     query 'query Todo($id: ID!) { todo(id: $id) { text } }' --variables '{"id": 1}'
//!
//! # Poll every 2 seconds, print 5 results
//! gql query @todos.graphql --poll-ms 2000 --polls 5
//!
//! # Mutation, refetching a query afterwards
//! gql mutate 'mutation AddTodo($text: String!) { addTodo(text: $text) { id } }' \
//!     --variables '{"text": "ship it"}' --refetch @todos.graphql
//! ```
//!
//! Logging follows `RUST_LOG` (default `warn`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod gql_cli;

use gql_cli::{mutate::MutateCmd, query::QueryCmd};

#[derive(Parser)]
#[command(
    name = "gql",
    author,
    version,
    about = "Run GraphQL operations through the client orchestration core"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// GraphQL endpoint (default: $GQL_ENDPOINT, then http://localhost:4000/graphql)
    #[arg(long, global = true)]
    endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query, once or on a polling interval
    Query(QueryCmd),
    /// Run a mutation
    Mutate(MutateCmd),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { command, endpoint } = Cli::parse();
    match command {
        Commands::Query(cmd) => cmd.execute(endpoint.as_deref()).await,
        Commands::Mutate(cmd) => cmd.execute(endpoint.as_deref()).await,
    }
}

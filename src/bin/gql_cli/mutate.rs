//! `gql mutate`: run a mutation and print its result.

use anyhow::Result;
use clap::Parser;

use gql_core::{ErrorPolicy, MutationOptions, RefetchQueries, RefetchQuery};
use gql_types::Document;

use super::output::{print_error, print_json};
use super::{connect, OperationArgs};

#[derive(Debug, Parser)]
pub struct MutateCmd {
    #[command(flatten)]
    operation: OperationArgs,

    /// Print the result even when the server reported GraphQL errors
    #[arg(long, default_value_t = false)]
    allow_errors: bool,

    /// Query document (or `@path`) to refetch once the mutation succeeds
    #[arg(long, value_name = "DOCUMENT")]
    refetch: Vec<String>,
}

impl MutateCmd {
    fn options(&self) -> Result<MutationOptions> {
        let source = self.operation.source()?;
        let document = self
            .operation
            .named(Document::mutation(source.clone()), &source)
            .build();
        let mut options =
            MutationOptions::new(document).with_variables(self.operation.variables()?);
        if self.allow_errors {
            options = options.with_error_policy(ErrorPolicy::All);
        }
        if !self.refetch.is_empty() {
            let mut targets = Vec::new();
            for raw in &self.refetch {
                let source = match raw.strip_prefix('@') {
                    Some(path) => std::fs::read_to_string(path)?,
                    None => raw.clone(),
                };
                let builder = Document::query(source.clone());
                let builder = match super::infer_operation_name(&source) {
                    Some(name) => builder.name(&name),
                    None => builder,
                };
                targets.push(RefetchQuery::Document {
                    document: builder.build(),
                    variables: Default::default(),
                    context: None,
                });
            }
            options = options.with_refetch_queries(RefetchQueries::List(targets), true);
        }
        Ok(options)
    }

    pub async fn execute(&self, endpoint: Option<&str>) -> Result<()> {
        let options = self.options()?;
        let manager = connect(endpoint)?;
        match manager.mutate(options).await {
            Ok(result) => print_json(&result),
            Err(e) => Err(print_error(&e)),
        }
    }
}

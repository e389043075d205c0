use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    diff::{diff, FilterError, IgnoredFields, ResponseFilter},
    env::ApiEnv,
    executor::{ExecuteError, QueryExecutor, ResponseOutcome},
    query::Query,
};

/// Fatal per-query failures. Everything else is recorded in the `Change`.
#[derive(Debug, Error)]
pub enum CompareError {
    #[error("could not run query {endpoint}")]
    Execute {
        endpoint: String,
        #[source]
        source: ExecuteError,
    },
    #[error("could not filter responses for {endpoint}")]
    Filter {
        endpoint: String,
        #[source]
        source: FilterError,
    },
}

/// Outcome of comparing one query, changed or not.
///
/// When a response filter is configured the stored response data is the
/// filtered projection that was diffed.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub query: Query,
    pub delta: Option<Value>,
    pub old_response: ResponseOutcome,
    pub new_response: Option<ResponseOutcome>,
}

impl Change {
    pub fn is_changed(&self) -> bool {
        self.delta.is_some()
    }
}

pub struct Comparator {
    executor: QueryExecutor,
    ignored_fields: IgnoredFields,
    filter: Option<ResponseFilter>,
}

impl Comparator {
    pub fn new(executor: QueryExecutor) -> Self {
        Self {
            executor,
            ignored_fields: IgnoredFields::new(),
            filter: None,
        }
    }

    pub fn with_ignored_fields<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.ignored_fields.extend(fields);
        self
    }

    pub fn with_filter(mut self, filter: ResponseFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Runs `query` against the old side (or its recorded baseline), then,
    /// when `new_env` is given, the new side, and diffs the bodies.
    pub async fn compare(
        &self,
        old_env: &ApiEnv,
        new_env: Option<&ApiEnv>,
        query: &Query,
    ) -> Result<Change, CompareError> {
        let execute_error = |source| CompareError::Execute {
            endpoint: query.endpoint.clone(),
            source,
        };

        // at most one outstanding request per query
        let mut old_response = match &query.baseline_response {
            Some(recorded) => ResponseOutcome::baseline(recorded.clone()),
            None => self
                .executor
                .execute(old_env, query)
                .await
                .map_err(execute_error)?,
        };
        let new_response = match new_env {
            Some(env) => Some(self.executor.execute(env, query).await.map_err(execute_error)?),
            None => None,
        };

        let Some(mut new_response) = new_response else {
            return Ok(Change {
                query: query.clone(),
                delta: None,
                old_response,
                new_response: None,
            });
        };

        if let Some(filter) = &self.filter {
            let old_filtered = self.apply_filter(filter, &old_response.data, query)?;
            let new_filtered = self.apply_filter(filter, &new_response.data, query)?;
            if is_empty(&old_filtered)
                && is_empty(&new_filtered)
                && !(is_empty(&old_response.data) && is_empty(&new_response.data))
            {
                warn!(
                    "response filter emptied both responses for {}, check the filter expression",
                    query.endpoint
                );
            }
            old_response.data = old_filtered;
            new_response.data = new_filtered;
        }

        let delta = diff(&old_response.data, &new_response.data, &self.ignored_fields);
        Ok(Change {
            query: query.clone(),
            delta,
            old_response,
            new_response: Some(new_response),
        })
    }

    fn apply_filter(
        &self,
        filter: &ResponseFilter,
        data: &Value,
        query: &Query,
    ) -> Result<Value, CompareError> {
        filter(data).map_err(|source| {
            error!("response filter failed on {}: {source}", query.endpoint);
            CompareError::Filter {
                endpoint: query.endpoint.clone(),
                source,
            }
        })
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

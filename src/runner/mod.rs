//! Bounded-concurrency batch execution of queries through a [`Comparator`].

use anyhow::{Error, Result};
use futures_util::{future, stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{compare::Comparator, env::ApiEnv, formatter::ResultFormatter, query::Query};

mod stats;

pub use stats::{LatencySummary, PerEnvStats, RunStatistics};

pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Maximum number of queries with outstanding requests.
    pub concurrency: usize,
    pub show_unchanged: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            show_unchanged: false,
        }
    }
}

/// Compares every query and reports each completion to `formatter`.
///
/// Cancelling `cancel` stops dispatch; queries already in flight still
/// finish and are reported. A fatal comparator error also stops dispatch,
/// drains in-flight work and finishes the formatter before it is returned.
pub async fn run_queries(
    comparator: &Comparator,
    old_env: &ApiEnv,
    new_env: Option<&ApiEnv>,
    queries: &[Query],
    options: &RunOptions,
    formatter: &mut dyn ResultFormatter,
    cancel: &CancellationToken,
) -> Result<RunStatistics> {
    let dispatch = cancel.child_token();
    let mut stats = RunStatistics::new(new_env.is_some());
    let mut fatal: Option<Error> = None;

    let mut completions = stream::iter(queries)
        .take_while(|_| future::ready(!dispatch.is_cancelled()))
        .map(|query| comparator.compare(old_env, new_env, query))
        .buffer_unordered(options.concurrency.max(1));

    while let Some(result) = completions.next().await {
        let change = match result {
            Ok(change) => change,
            Err(err) => {
                let err = Error::new(err);
                error!("aborting run: {err:#}");
                dispatch.cancel();
                fatal.get_or_insert(err);
                continue;
            }
        };

        formatter.on_query_completed(&change);
        if change.is_changed() || options.show_unchanged {
            if let Err(err) = formatter.on_change_logged(&change) {
                error!("aborting run: {err:#}");
                dispatch.cancel();
                fatal.get_or_insert(err);
            }
        }

        stats.old.record(&change.old_response);
        if let (Some(new_stats), Some(new_response)) = (stats.new.as_mut(), &change.new_response) {
            new_stats.record(new_response);
        }
    }
    drop(completions);

    if cancel.is_cancelled() {
        info!("run cancelled, reporting completed queries");
    }

    let finished = formatter.on_finished(&stats);
    match fatal {
        Some(err) => {
            if let Err(finish_err) = finished {
                error!("could not finish output: {finish_err:#}");
            }
            Err(err)
        }
        None => finished.map(|_| stats),
    }
}

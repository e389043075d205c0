use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::{
    compare::Change,
    env::ApiEnv,
    executor::ResponseOutcome,
    query::{Params, Query},
    runner::{LatencySummary, PerEnvStats, RunStatistics},
};

use super::{
    base::{now_rfc3339, FormatterCore},
    ResultFormatter,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonResponse {
    pub response: Value,
    pub url: String,
    pub status: u16,
}

impl From<&ResponseOutcome> for JsonResponse {
    fn from(outcome: &ResponseOutcome) -> Self {
        Self {
            response: outcome.data.clone(),
            url: outcome.url.clone(),
            status: outcome.status,
        }
    }
}

/// One logged change as it appears in the JSON report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonChange {
    pub id: String,
    pub query: Query,
    pub delta: Option<Value>,
    pub old: JsonResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<JsonResponse>,
}

impl From<&Change> for JsonChange {
    fn from(change: &Change) -> Self {
        Self {
            id: change_id(change.delta.as_ref(), &change.query.params),
            query: change.query.clone(),
            delta: change.delta.clone(),
            old: JsonResponse::from(&change.old_response),
            new: change.new_response.as_ref().map(JsonResponse::from),
        }
    }
}

/// Stable identifier derived from the delta and the query params, so the
/// same difference on the same query gets the same id across runs.
pub fn change_id(delta: Option<&Value>, params: &Params) -> String {
    let payload = json!({ "delta": delta, "params": params });
    let digest = Sha256::digest(payload.to_string().as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(32);
    id
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvReport {
    api_env: ApiEnv,
    response_times: LatencySummary,
    status_codes: BTreeMap<u16, u64>,
}

impl EnvReport {
    fn new(env: &ApiEnv, stats: &PerEnvStats) -> Self {
        Self {
            api_env: env.redacted(),
            response_times: stats.latency(),
            status_codes: stats.status_code_counts.clone(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    start_time: String,
    end_time: String,
    command: &'a str,
    total_queries: usize,
    num_queries_run: usize,
    num_queries_changed: usize,
    old: EnvReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    new: Option<EnvReport>,
    changes: &'a [JsonChange],
}

/// Buffers logged changes and writes one JSON document when finished.
pub struct JsonFormatter {
    core: FormatterCore,
    changes: Vec<JsonChange>,
}

impl JsonFormatter {
    pub fn new(core: FormatterCore) -> Self {
        Self {
            core,
            changes: Vec::new(),
        }
    }

    pub fn changes(&self) -> &[JsonChange] {
        &self.changes
    }

    pub(super) fn core_mut(&mut self) -> &mut FormatterCore {
        &mut self.core
    }

    /// Pretty-printed report document.
    pub fn render_report(&self, stats: &RunStatistics) -> Result<String> {
        let new = match (&self.core.new_env, &stats.new) {
            (Some(env), Some(new_stats)) => Some(EnvReport::new(env, new_stats)),
            _ => None,
        };
        let report = Report {
            start_time: self.core.start_time(),
            end_time: now_rfc3339(),
            command: &self.core.command,
            total_queries: self.core.total_queries,
            num_queries_run: self.core.num_queries_run,
            num_queries_changed: self.core.num_queries_changed,
            old: EnvReport::new(&self.core.old_env, &stats.old),
            new,
            changes: &self.changes,
        };
        serde_json::to_string_pretty(&report).context("serializing json report")
    }
}

impl ResultFormatter for JsonFormatter {
    fn on_query_completed(&mut self, change: &Change) {
        self.core.record_completion(change);
    }

    fn on_change_logged(&mut self, change: &Change) -> Result<()> {
        self.changes.push(JsonChange::from(change));
        Ok(())
    }

    fn on_finished(&mut self, stats: &RunStatistics) -> Result<()> {
        let report = self.render_report(stats)?;
        self.core.writeln(&report)?;
        self.core.finish()
    }
}

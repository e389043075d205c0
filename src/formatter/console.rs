use std::collections::BTreeSet;

use anyhow::Result;
use colored::Colorize;

use crate::{
    compare::Change,
    diff::render_delta,
    executor::{status_color, ResponseOutcome},
    query::Params,
    runner::{LatencySummary, PerEnvStats, RunStatistics},
};

use super::{base::FormatterCore, ResultFormatter};

/// Human-readable report written change by change.
pub struct ConsoleFormatter {
    core: FormatterCore,
}

impl ConsoleFormatter {
    pub fn new(core: FormatterCore) -> Self {
        Self { core }
    }

    fn render_change(change: &Change) -> String {
        let params = params_text(&change.query.params);
        let header = if change.is_changed() {
            format!("Changed: {} {}", change.query.endpoint, params).yellow()
        } else {
            format!("Unchanged: {} {}", change.query.endpoint, params).cyan()
        };

        let mut lines = vec![header.to_string()];
        lines.push(response_line("old", &change.old_response));
        if let Some(new_response) = &change.new_response {
            lines.push(response_line("new", new_response));
        }
        if let Some(delta) = &change.delta {
            lines.push(render_delta(delta));
        }
        lines.join("\n")
    }
}

fn params_text(params: &Params) -> String {
    serde_json::to_string(params).unwrap_or_else(|_| format!("{params:?}"))
}

fn response_line(label: &str, outcome: &ResponseOutcome) -> String {
    let url = if outcome.url.is_empty() {
        "(baseline)"
    } else {
        outcome.url.as_str()
    };
    let status = outcome.status.to_string().color(status_color(outcome.status));
    format!("    {label} {status} {url}")
}

impl ResultFormatter for ConsoleFormatter {
    fn on_query_completed(&mut self, change: &Change) {
        self.core.record_completion(change);
    }

    fn on_change_logged(&mut self, change: &Change) -> Result<()> {
        self.core.writeln(&Self::render_change(change))
    }

    fn on_finished(&mut self, stats: &RunStatistics) -> Result<()> {
        let elapsed = self.core.elapsed().as_secs_f64();
        self.core.writeln(&format!("Elapsed: {elapsed:.3} seconds"))?;

        let envs: Vec<(&str, &PerEnvStats)> = std::iter::once(("old", &stats.old))
            .chain(stats.new.as_ref().map(|new_stats| ("new", new_stats)))
            .collect();

        // only worth showing when something other than 200 came back
        let only_ok = envs
            .iter()
            .all(|(_, env_stats)| env_stats.status_code_counts.keys().all(|code| *code == 200));
        if !only_ok {
            self.core.writeln("Status codes")?;
            self.core.writeln(&status_table(&envs))?;
        }

        self.core.writeln("Response times (ms)")?;
        self.core.writeln(&latency_table(&envs))?;
        self.core.finish()
    }
}

fn header_row(envs: &[(&str, &PerEnvStats)]) -> Vec<String> {
    std::iter::once(String::new())
        .chain(envs.iter().map(|(label, _)| label.to_string()))
        .collect()
}

fn status_table(envs: &[(&str, &PerEnvStats)]) -> String {
    let codes: BTreeSet<u16> = envs
        .iter()
        .flat_map(|(_, env_stats)| env_stats.status_code_counts.keys().copied())
        .collect();

    let mut rows = vec![header_row(envs)];
    for code in codes {
        let mut row = vec![code.to_string()];
        for (_, env_stats) in envs {
            let count = env_stats.status_code_counts.get(&code).copied().unwrap_or(0);
            row.push(count.to_string());
        }
        rows.push(row);
    }
    table(&rows)
}

fn latency_table(envs: &[(&str, &PerEnvStats)]) -> String {
    let summaries: Vec<_> = envs
        .iter()
        .map(|(_, env_stats)| env_stats.latency().rows())
        .collect();

    let mut rows = vec![header_row(envs)];
    for (index, (name, _)) in LatencySummary::default().rows().into_iter().enumerate() {
        let mut row = vec![name.to_string()];
        for summary in &summaries {
            let value = summary[index].1;
            row.push(value.map(|ms| format!("{ms:.1}")).unwrap_or_else(|| "-".to_string()));
        }
        rows.push(row);
    }
    table(&rows)
}

fn table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    rows.iter()
        .map(|row| {
            row.iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{cell:<width$}"))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

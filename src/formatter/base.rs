use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::info;

use crate::{compare::Change, env::ApiEnv};

const PROGRESS_TEMPLATE: &str =
    "progress [{bar:40}] {percent}% | ETA: {eta} | {pos}/{len} | {msg}";

/// Where a report is written.
pub enum OutputSink {
    Stdout(io::Stdout),
    File {
        path: PathBuf,
        writer: BufWriter<File>,
    },
    Writer(Box<dyn Write + Send>),
}

impl OutputSink {
    /// `None` and `-` both mean standard output.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(OutputSink::Stdout(io::stdout())),
            Some(path) if path.as_os_str() == "-" => Ok(OutputSink::Stdout(io::stdout())),
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("creating output file {}", path.display()))?;
                Ok(OutputSink::File {
                    path: path.to_path_buf(),
                    writer: BufWriter::new(file),
                })
            }
        }
    }

    pub fn is_stdout(&self) -> bool {
        matches!(self, OutputSink::Stdout(_))
    }

    pub fn write_str(&mut self, text: &str) -> Result<()> {
        let result = match self {
            OutputSink::Stdout(stdout) => stdout.lock().write_all(text.as_bytes()),
            OutputSink::File { writer, .. } => writer.write_all(text.as_bytes()),
            OutputSink::Writer(writer) => writer.write_all(text.as_bytes()),
        };
        result.with_context(|| format!("writing report to {}", self.describe()))
    }

    /// Flushes buffered bytes and, for files, syncs them to disk.
    pub fn finish(&mut self) -> Result<()> {
        let result = match self {
            OutputSink::Stdout(stdout) => stdout.flush(),
            OutputSink::File { writer, .. } => writer.flush().and_then(|_| writer.get_ref().sync_all()),
            OutputSink::Writer(writer) => writer.flush(),
        };
        result.with_context(|| format!("flushing report to {}", self.describe()))
    }

    fn describe(&self) -> String {
        match self {
            OutputSink::Stdout(_) => "stdout".to_string(),
            OutputSink::File { path, .. } => path.display().to_string(),
            OutputSink::Writer(_) => "writer".to_string(),
        }
    }
}

pub struct FormatterSettings {
    pub old_env: ApiEnv,
    pub new_env: Option<ApiEnv>,
    pub total_queries: usize,
    pub show_unchanged: bool,
    /// Invoking command line, recorded in structured reports.
    pub command: String,
    /// Draw a progress bar on stderr (hidden anyway when stderr is not a terminal).
    pub progress: bool,
}

/// Bookkeeping shared by every formatter: counters, timing, progress and
/// the output sink.
pub struct FormatterCore {
    pub old_env: ApiEnv,
    pub new_env: Option<ApiEnv>,
    pub total_queries: usize,
    pub show_unchanged: bool,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub num_queries_run: usize,
    pub num_queries_changed: usize,
    started: Instant,
    progress: ProgressBar,
    sink: OutputSink,
}

impl FormatterCore {
    pub fn new(settings: FormatterSettings, sink: OutputSink) -> Self {
        let progress = if settings.progress {
            let bar = ProgressBar::with_draw_target(
                Some(settings.total_queries as u64),
                ProgressDrawTarget::stderr(),
            );
            bar.set_style(
                ProgressStyle::with_template(PROGRESS_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar.set_message("0 changed");
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            old_env: settings.old_env,
            new_env: settings.new_env,
            total_queries: settings.total_queries,
            show_unchanged: settings.show_unchanged,
            command: settings.command,
            started_at: Utc::now(),
            num_queries_run: 0,
            num_queries_changed: 0,
            started: Instant::now(),
            progress,
            sink,
        }
    }

    pub fn record_completion(&mut self, change: &Change) {
        self.num_queries_run += 1;
        if change.is_changed() {
            self.num_queries_changed += 1;
        }
        self.progress.set_position(self.num_queries_run as u64);
        self.progress
            .set_message(format!("{} changed", self.num_queries_changed));
    }

    /// Writes without tearing the progress bar.
    pub fn write(&mut self, text: &str) -> Result<()> {
        let sink = &mut self.sink;
        self.progress.suspend(|| sink.write_str(text))
    }

    pub fn writeln(&mut self, text: &str) -> Result<()> {
        self.write(&format!("{text}\n"))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn start_time(&self) -> String {
        self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn finish(&mut self) -> Result<()> {
        self.progress.finish_and_clear();
        info!(
            "DONE. {}/{} changed",
            self.num_queries_changed, self.num_queries_run
        );
        self.sink.finish()
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

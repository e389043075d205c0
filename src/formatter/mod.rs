//! Report output for a comparison run.
//!
//! The runner drives a [`ResultFormatter`] with one `on_query_completed`
//! call per finished query, `on_change_logged` for every change worth
//! reporting, and a single `on_finished` once the run is over.

use std::{fmt, str::FromStr};

use anyhow::{bail, Result};

use crate::{compare::Change, runner::RunStatistics};

mod base;
mod console;
mod html;
mod json;

pub use base::{FormatterCore, FormatterSettings, OutputSink};
pub use console::ConsoleFormatter;
pub use html::HtmlFormatter;
pub use json::{change_id, JsonChange, JsonFormatter, JsonResponse};

pub trait ResultFormatter: Send {
    /// Called for every finished query, changed or not.
    fn on_query_completed(&mut self, change: &Change);

    /// Called for changed queries, and unchanged ones when requested.
    fn on_change_logged(&mut self, change: &Change) -> Result<()>;

    /// Called once at the end of the run. All output is flushed on return.
    fn on_finished(&mut self, stats: &RunStatistics) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    #[default]
    Text,
    Json,
    Html,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Text => "text",
            OutputMode::Json => "json",
            OutputMode::Html => "html",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" | "console" => Ok(OutputMode::Text),
            "json" => Ok(OutputMode::Json),
            "html" => Ok(OutputMode::Html),
            other => bail!("Unknown output mode: {other}, expected text, json or html"),
        }
    }
}

pub fn make_formatter(
    mode: OutputMode,
    settings: FormatterSettings,
    sink: OutputSink,
) -> Box<dyn ResultFormatter> {
    let core = FormatterCore::new(settings, sink);
    match mode {
        OutputMode::Text => Box::new(ConsoleFormatter::new(core)),
        OutputMode::Json => Box::new(JsonFormatter::new(core)),
        OutputMode::Html => Box::new(HtmlFormatter::new(core)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{
        io::{self, Write},
        sync::{Arc, Mutex},
    };

    use serde_json::Value;

    use crate::{
        compare::Change,
        env::{ApiEnv, Protocol},
        executor::ResponseOutcome,
        query::{HttpMethod, Query},
    };

    use super::{FormatterSettings, OutputSink};

    /// Writer whose bytes stay readable after the sink is handed off.
    #[derive(Clone, Default)]
    pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub fn sink(&self) -> OutputSink {
            OutputSink::Writer(Box::new(self.clone()))
        }

        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub fn settings(total_queries: usize, show_unchanged: bool) -> FormatterSettings {
        let mut old_env = ApiEnv::new(Protocol::Https, "old.test");
        old_env.key = Some("old-secret".to_string());
        FormatterSettings {
            old_env,
            new_env: Some(ApiEnv::new(Protocol::Https, "new.test")),
            total_queries,
            show_unchanged,
            command: "apidiff compare".to_string(),
            progress: false,
        }
    }

    pub fn change(path: &str, old: Value, new: Value, delta: Option<Value>) -> Change {
        let query = Query::from_path_and_query(path, HttpMethod::Get);
        let outcome = |host: &str, data: Value| ResponseOutcome {
            status: 200,
            data,
            duration_ms: Some(5.0),
            url: format!("https://{host}{path}"),
        };
        Change {
            query,
            delta,
            old_response: outcome("old.test", old),
            new_response: Some(outcome("new.test", new)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_mode_parses_names() -> Result<()> {
        assert_eq!("json".parse::<OutputMode>()?, OutputMode::Json);
        assert_eq!("HTML".parse::<OutputMode>()?, OutputMode::Html);
        assert_eq!("console".parse::<OutputMode>()?, OutputMode::Text);
        assert!("xml".parse::<OutputMode>().is_err());
        Ok(())
    }
}

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use apidiff::{
    compare::Comparator,
    config::{load_config, resolve_config_path, ApiDiffConfig, LoadedConfig},
    diff::PathFilter,
    env::{build_api_env, ApiEnv, EnvArgs, KeyStore, Protocol},
    executor::{
        print_response, ExecuteOptions, QueryExecutor, ReqwestTransport, DEFAULT_MAX_RETRIES,
        DEFAULT_TIMEOUT,
    },
    formatter::{make_formatter, FormatterSettings, OutputMode, OutputSink},
    query::{insert_param, read_queries, HttpMethod, Query, QuerySource},
    runner::{run_queries, RunOptions, DEFAULT_CONCURRENCY},
};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Exit status after a forced interrupt, as shells report SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "apidiff",
    version,
    about = "Compare API responses between two server environments",
    disable_help_subcommand = true
)]
struct Cli {
    /// Config file with hosts and auth settings (defaults to $API_DIFF_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log debug diagnostics to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run queries against an old and a new environment and report differences
    Compare(CompareArgs),
    /// Record responses from one environment as a JSON baseline
    Baseline(BaselineArgs),
    /// Run a single request against one environment and print the response
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// HTTP method used for every query
    #[arg(long, default_value = "GET")]
    method: HttpMethod,

    /// Endpoint for --input-params, --input-csv and --input-json rows
    #[arg(long)]
    endpoint: Option<String>,

    /// File of query strings, one per line
    #[arg(long = "input-params", value_name = "FILE")]
    input_params: Vec<PathBuf>,

    /// CSV file; each row becomes one query
    #[arg(long = "input-csv", value_name = "FILE")]
    input_csv: Vec<PathBuf>,

    /// File of endpoint paths with query strings, one per line
    #[arg(long = "input-queries", value_name = "FILE")]
    input_queries: Vec<PathBuf>,

    /// File of JSON objects, one per line
    #[arg(long = "input-json", value_name = "FILE")]
    input_json: Vec<PathBuf>,

    /// JSON report from a previous run, replayed instead of calling the old environment
    #[arg(long = "input-json-baseline", value_name = "FILE")]
    input_json_baseline: Vec<PathBuf>,

    /// CSV column to param renames, csv_column_name=param_name
    #[arg(long = "key-map", value_delimiter = ',')]
    key_map: Vec<String>,

    /// Only run the first N queries
    #[arg(long = "limit-queries")]
    limit_queries: Option<usize>,
}

impl SourceArgs {
    fn to_source(&self) -> QuerySource {
        QuerySource {
            method: self.method,
            endpoint: self.endpoint.clone(),
            input_params: self.input_params.clone(),
            input_csv: self.input_csv.clone(),
            input_queries: self.input_queries.clone(),
            input_json: self.input_json.clone(),
            input_json_baseline: self.input_json_baseline.clone(),
            key_map: self.key_map.clone(),
            limit_queries: self.limit_queries,
        }
    }
}

#[derive(Args, Debug)]
struct OldEnvArgs {
    /// Named host from the config file, NAME or NAME=ARG
    #[arg(id = "old_env", long = "old-env")]
    env: Option<String>,
    /// Host (or full base URL) of the old environment
    #[arg(id = "old_host", long = "old-host")]
    host: Option<String>,
    #[arg(id = "old_protocol", long = "old-protocol")]
    protocol: Option<Protocol>,
    /// API key, instead of looking one up in .env
    #[arg(id = "old_key", long = "old-key")]
    key: Option<String>,
    #[arg(id = "old_key_env", long = "old-key-env")]
    key_env: Option<String>,
    #[arg(id = "old_key_type", long = "old-key-type")]
    key_type: Option<String>,
}

impl From<OldEnvArgs> for EnvArgs {
    fn from(args: OldEnvArgs) -> Self {
        EnvArgs {
            env: args.env,
            host: args.host,
            protocol: args.protocol,
            key: args.key,
            key_env: args.key_env,
            key_type: args.key_type,
        }
    }
}

#[derive(Args, Debug)]
struct NewEnvArgs {
    /// Named host from the config file, NAME or NAME=ARG
    #[arg(id = "new_env", long = "new-env")]
    env: Option<String>,
    /// Host (or full base URL) of the new environment
    #[arg(id = "new_host", long = "new-host")]
    host: Option<String>,
    #[arg(id = "new_protocol", long = "new-protocol")]
    protocol: Option<Protocol>,
    /// API key, instead of looking one up in .env
    #[arg(id = "new_key", long = "new-key")]
    key: Option<String>,
    #[arg(id = "new_key_env", long = "new-key-env")]
    key_env: Option<String>,
    #[arg(id = "new_key_type", long = "new-key-type")]
    key_type: Option<String>,
}

impl From<NewEnvArgs> for EnvArgs {
    fn from(args: NewEnvArgs) -> Self {
        EnvArgs {
            env: args.env,
            host: args.host,
            protocol: args.protocol,
            key: args.key,
            key_env: args.key_env,
            key_type: args.key_type,
        }
    }
}

#[derive(Args, Debug)]
struct EnvFlags {
    /// Named host from the config file, NAME or NAME=ARG
    #[arg(long)]
    env: Option<String>,
    /// Host (or full base URL)
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    protocol: Option<Protocol>,
    /// API key, instead of looking one up in .env
    #[arg(long)]
    key: Option<String>,
    #[arg(long = "key-env")]
    key_env: Option<String>,
    #[arg(long = "key-type")]
    key_type: Option<String>,
}

impl From<EnvFlags> for EnvArgs {
    fn from(args: EnvFlags) -> Self {
        EnvArgs {
            env: args.env,
            host: args.host,
            protocol: args.protocol,
            key: args.key,
            key_env: args.key_env,
            key_type: args.key_type,
        }
    }
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// Params added to every request, key=value (joined with & or repeated)
    #[arg(long = "extra-params", value_name = "K=V")]
    extra_params: Vec<String>,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_millis() as u64)]
    timeout: u64,

    /// Retries after a transport failure
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    retries: u32,
}

impl RequestArgs {
    fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            timeout: Duration::from_millis(self.timeout),
            max_retries: self.retries,
        }
    }
}

#[derive(Args, Debug)]
struct CompareArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    old: OldEnvArgs,
    #[command(flatten)]
    new: NewEnvArgs,
    #[command(flatten)]
    request: RequestArgs,

    /// Field names ignored at any depth when diffing
    #[arg(long = "ignored-fields", value_delimiter = ',')]
    ignored_fields: Vec<String>,

    /// Path selecting the part of each response to compare, e.g. results[0].address
    #[arg(long = "response-filter")]
    response_filter: Option<String>,

    /// Queries run in parallel
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Also report queries whose responses did not change
    #[arg(long)]
    unchanged: bool,

    #[arg(long = "output-mode", value_enum, default_value_t = OutputMode::Text)]
    output_mode: OutputMode,

    /// Write the report here instead of stdout (- for stdout)
    #[arg(short, long = "output-file")]
    output_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct BaselineArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    old: OldEnvArgs,
    #[command(flatten)]
    request: RequestArgs,

    /// Queries run in parallel
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Write the baseline here instead of stdout (- for stdout)
    #[arg(short, long = "output-file")]
    output_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[command(flatten)]
    env: EnvFlags,
    #[command(flatten)]
    request: RequestArgs,

    #[arg(long, default_value = "GET")]
    method: HttpMethod,

    /// Endpoint path, when not given as an argument
    #[arg(long)]
    endpoint: Option<String>,

    /// A full URL or a path, followed by key=value params
    #[arg(value_name = "ARGS")]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if cli.no_color {
        colored::control::set_override(false);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", "PROCESS FAILED".red().bold());
            eprintln!("{}", format!("{err:#}").yellow());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "apidiff=debug" } else { "apidiff=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = resolve_config_path(cli.config.as_deref());
    let loaded = load_config(config_path.as_deref()).context("loading configuration")?;
    if let Some(path) = &loaded.path {
        debug!(path = %path.display(), "loaded config");
    }
    let keys = KeyStore::from_dotenv(Path::new(".env"))?;

    match cli.command {
        Commands::Compare(args) => run_compare(args, &loaded, &keys).await,
        Commands::Baseline(args) => run_baseline(args, &loaded, &keys).await,
        Commands::Query(args) => run_single_query(args, &loaded, &keys).await,
    }
}

async fn run_compare(args: CompareArgs, loaded: &LoadedConfig, keys: &KeyStore) -> Result<()> {
    let extra_params = parse_extra_params(&args.request.extra_params)?;
    let old_env = build_api_env(&args.old.into(), &loaded.config, keys, &extra_params)
        .context("building old environment")?;
    let new_env = build_api_env(&args.new.into(), &loaded.config, keys, &extra_params)
        .context("building new environment")?;
    let queries = read_queries(&args.source.to_source())?;

    let mut comparator = Comparator::new(make_executor(&loaded.config, &args.request)?)
        .with_ignored_fields(args.ignored_fields);
    if let Some(expr) = args.response_filter.as_deref() {
        comparator = comparator.with_filter(PathFilter::parse(expr)?.into_response_filter());
    }

    let sink = OutputSink::open(args.output_file.as_deref())?;
    if !sink.is_stdout() {
        colored::control::set_override(false);
    }
    let mut formatter = make_formatter(
        args.output_mode,
        FormatterSettings {
            old_env: old_env.clone(),
            new_env: Some(new_env.clone()),
            total_queries: queries.len(),
            show_unchanged: args.unchanged,
            command: command_line(),
            progress: true,
        },
        sink,
    );

    let options = RunOptions {
        concurrency: args.concurrency,
        show_unchanged: args.unchanged,
    };
    run_queries(
        &comparator,
        &old_env,
        Some(&new_env),
        &queries,
        &options,
        &mut *formatter,
        &cancel_on_ctrlc(),
    )
    .await?;
    Ok(())
}

async fn run_baseline(args: BaselineArgs, loaded: &LoadedConfig, keys: &KeyStore) -> Result<()> {
    let extra_params = parse_extra_params(&args.request.extra_params)?;
    let old_env = build_api_env(&args.old.into(), &loaded.config, keys, &extra_params)
        .context("building old environment")?;
    let queries = read_queries(&args.source.to_source())?;
    let comparator = Comparator::new(make_executor(&loaded.config, &args.request)?);

    // every query is recorded so the file can be replayed with --input-json-baseline
    let mut formatter = make_formatter(
        OutputMode::Json,
        FormatterSettings {
            old_env: old_env.clone(),
            new_env: None,
            total_queries: queries.len(),
            show_unchanged: true,
            command: command_line(),
            progress: true,
        },
        OutputSink::open(args.output_file.as_deref())?,
    );

    let options = RunOptions {
        concurrency: args.concurrency,
        show_unchanged: true,
    };
    run_queries(
        &comparator,
        &old_env,
        None,
        &queries,
        &options,
        &mut *formatter,
        &cancel_on_ctrlc(),
    )
    .await?;
    Ok(())
}

async fn run_single_query(args: QueryArgs, loaded: &LoadedConfig, keys: &KeyStore) -> Result<()> {
    let mut env_args: EnvArgs = args.env.into();
    let mut target = None;
    let mut params = Vec::new();
    for arg in &args.args {
        if arg.starts_with("http://") || arg.starts_with("https://") || arg.starts_with('/') {
            if target.replace(arg.as_str()).is_some() {
                bail!("only one URL or path may be given, got another: {arg}");
            }
        } else {
            let (key, value) = arg
                .split_once('=')
                .with_context(|| format!("invalid param {arg}, must be of form key=value"))?;
            params.push((key.to_string(), value.to_string()));
        }
    }

    let mut query = match target {
        Some(url) if url.starts_with("http") => {
            let parsed = url::Url::parse(url).with_context(|| format!("parsing url {url}"))?;
            if env_args.is_empty() {
                env_args.host = Some(url.to_string());
            }
            let mut path = parsed.path().to_string();
            if let Some(query) = parsed.query() {
                path.push('?');
                path.push_str(query);
            }
            Query::from_path_and_query(&path, args.method)
        }
        Some(path) => Query::from_path_and_query(path, args.method),
        None => {
            let endpoint = args
                .endpoint
                .clone()
                .context("specify a URL, a path or --endpoint")?;
            Query::from_path_and_query(&endpoint, args.method)
        }
    };
    for (key, value) in params {
        insert_param(&mut query.params, key, value);
    }

    let extra_params = parse_extra_params(&args.request.extra_params)?;
    let env: ApiEnv = build_api_env(&env_args, &loaded.config, keys, &extra_params)?;
    let executor = make_executor(&loaded.config, &args.request)?;
    let outcome = executor.execute(&env, &query).await?;
    print_response(query.method, &outcome);
    Ok(())
}

fn make_executor(config: &ApiDiffConfig, request: &RequestArgs) -> Result<QueryExecutor> {
    let transport = ReqwestTransport::new().context("building http client")?;
    Ok(QueryExecutor::new(
        Arc::new(transport),
        config.auth_settings()?,
        request.execute_options(),
    ))
}

/// Accepts `a=1&b=2` as well as repeated `--extra-params a=1`.
fn parse_extra_params(items: &[String]) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for pair in items.iter().flat_map(|item| item.split('&')) {
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid extra param {pair}, must be of form key=value");
        };
        params.insert(key.to_string(), value.to_string());
    }
    Ok(params)
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// Stop dispatching and let in-flight queries drain.
    Drain,
    /// Already draining, leave now.
    Exit,
}

fn on_interrupt(cancel: &CancellationToken) -> Interrupt {
    if cancel.is_cancelled() {
        return Interrupt::Exit;
    }
    cancel.cancel();
    Interrupt::Drain
}

fn cancel_on_ctrlc() -> CancellationToken {
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    let installed = ctrlc::set_handler(move || match on_interrupt(&handler_token) {
        Interrupt::Drain => {
            eprintln!("Stopping after in-flight queries, press Ctrl-C again to exit now");
        }
        Interrupt::Exit => {
            eprintln!("{}", "Interrupted again, exiting".red());
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });
    if let Err(err) = installed {
        warn!("could not install Ctrl-C handler: {err}");
    }
    cancel
}

fn command_line() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}

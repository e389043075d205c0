use std::{fs, path::Path, sync::Arc};

use anyhow::Result;
use apidiff::{
    compare::Comparator,
    config::AuthSettings,
    diff::PathFilter,
    env::{ApiEnv, Protocol},
    executor::{ExecuteOptions, QueryExecutor, ReqwestTransport},
    formatter::{FormatterCore, FormatterSettings, JsonFormatter, OutputSink},
    query::{read_queries, HttpMethod, Query, QuerySource},
    runner::{run_queries, RunOptions},
};
use httpmock::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn env_for(server: &MockServer) -> ApiEnv {
    ApiEnv::new(Protocol::Http, format!("127.0.0.1:{}", server.port()))
}

fn comparator() -> Result<Comparator> {
    let executor = QueryExecutor::new(
        Arc::new(ReqwestTransport::new()?),
        AuthSettings::None,
        ExecuteOptions::default(),
    );
    Ok(Comparator::new(executor))
}

async fn run_to_file(
    comparator: &Comparator,
    old_env: &ApiEnv,
    new_env: Option<&ApiEnv>,
    queries: &[Query],
    show_unchanged: bool,
    report: &Path,
) -> Result<Value> {
    let settings = FormatterSettings {
        old_env: old_env.clone(),
        new_env: new_env.cloned(),
        total_queries: queries.len(),
        show_unchanged,
        command: "apidiff compare".to_string(),
        progress: false,
    };
    let mut formatter = JsonFormatter::new(FormatterCore::new(
        settings,
        OutputSink::open(Some(report))?,
    ));
    let options = RunOptions {
        concurrency: 2,
        show_unchanged,
    };
    run_queries(
        comparator,
        old_env,
        new_env,
        queries,
        &options,
        &mut formatter,
        &CancellationToken::new(),
    )
    .await?;

    Ok(serde_json::from_str(&fs::read_to_string(report)?)?)
}

#[tokio::test]
async fn identical_environments_report_nothing() -> Result<()> {
    let temp = tempdir()?;
    let old = MockServer::start_async().await;
    let new = MockServer::start_async().await;
    for server in [&old, &new] {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/foo");
                then.status(200).json_body(json!({"a": 1}));
            })
            .await;
    }

    let queries = vec![
        Query::from_path_and_query("/v1/foo?x=1", HttpMethod::Get),
        Query::from_path_and_query("/v1/foo?x=2", HttpMethod::Get),
    ];
    let report = run_to_file(
        &comparator()?,
        &env_for(&old),
        Some(&env_for(&new)),
        &queries,
        false,
        &temp.path().join("report.json"),
    )
    .await?;

    assert_eq!(report["numQueriesRun"], json!(2));
    assert_eq!(report["numQueriesChanged"], json!(0));
    assert_eq!(report["changes"], json!([]));
    assert_eq!(report["old"]["statusCodes"], json!({"200": 2}));
    assert_eq!(report["new"]["statusCodes"], json!({"200": 2}));
    assert!(report["old"]["responseTimes"]["p50"].is_number());
    Ok(())
}

#[tokio::test]
async fn baseline_report_replays_without_old_server() -> Result<()> {
    let temp = tempdir()?;
    let old = MockServer::start_async().await;
    let new = MockServer::start_async().await;
    let old_mock = old
        .mock_async(|when, then| {
            when.method(GET).path("/v1/foo");
            then.status(200).json_body(json!({"a": 1, "b": true}));
        })
        .await;
    new.mock_async(|when, then| {
        when.method(GET).path("/v1/foo");
        then.status(200).json_body(json!({"a": 2, "b": true}));
    })
    .await;

    let queries = vec![Query::from_path_and_query("/v1/foo?x=1", HttpMethod::Get)];
    let baseline_path = temp.path().join("baseline.json");
    let baseline = run_to_file(
        &comparator()?,
        &env_for(&old),
        None,
        &queries,
        true,
        &baseline_path,
    )
    .await?;
    assert_eq!(baseline["changes"][0]["old"]["response"], json!({"a": 1, "b": true}));
    assert!(baseline.get("new").is_none());

    let replayed = read_queries(&QuerySource {
        input_json_baseline: vec![baseline_path],
        ..QuerySource::default()
    })?;
    assert_eq!(replayed.len(), 1);
    assert!(replayed[0].baseline_response.is_some());

    let unreachable_old = ApiEnv::new(Protocol::Http, "127.0.0.1:1");
    let report = run_to_file(
        &comparator()?,
        &unreachable_old,
        Some(&env_for(&new)),
        &replayed,
        false,
        &temp.path().join("report.json"),
    )
    .await?;

    old_mock.assert_hits_async(1).await;
    assert_eq!(report["numQueriesChanged"], json!(1));
    assert_eq!(report["changes"][0]["delta"], json!({"a": [1, 2]}));
    assert_eq!(report["changes"][0]["old"]["status"], json!(200));
    Ok(())
}

#[tokio::test]
async fn filter_and_ignored_fields_narrow_the_diff() -> Result<()> {
    let temp = tempdir()?;
    let old = MockServer::start_async().await;
    let new = MockServer::start_async().await;
    old.mock_async(|when, then| {
        when.method(GET).path("/v1/geocode");
        then.status(200).json_body(json!({
            "debug": {"took": 3},
            "results": [{"label": "Main St", "timestamp": 1}],
        }));
    })
    .await;
    new.mock_async(|when, then| {
        when.method(GET).path("/v1/geocode");
        then.status(200).json_body(json!({
            "debug": {"took": 9},
            "results": [{"label": "Main Street", "timestamp": 2}],
        }));
    })
    .await;

    let comparator = comparator()?
        .with_ignored_fields(["timestamp".to_string()])
        .with_filter(PathFilter::parse("results[0]")?.into_response_filter());
    let queries = vec![Query::from_path_and_query("/v1/geocode?q=main", HttpMethod::Get)];

    let report = run_to_file(
        &comparator,
        &env_for(&old),
        Some(&env_for(&new)),
        &queries,
        false,
        &temp.path().join("report.json"),
    )
    .await?;

    let change = &report["changes"][0];
    assert_eq!(change["delta"], json!({"label": ["Main St", "Main Street"]}));
    assert_eq!(change["old"]["response"], json!({"label": "Main St", "timestamp": 1}));
    assert_eq!(change["id"].as_str().map(str::len), Some(32));
    Ok(())
}

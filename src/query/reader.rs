use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{
    tabular::parse_records,
    model::{insert_param, HttpMethod, ParamValue, Params, Query},
};

static NUMERIC_COLUMN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid regex"));

/// Where queries come from. Every `input_*` list may name several files.
#[derive(Debug, Clone, Default)]
pub struct QuerySource {
    pub method: HttpMethod,
    pub endpoint: Option<String>,
    pub input_params: Vec<PathBuf>,
    pub input_csv: Vec<PathBuf>,
    pub input_queries: Vec<PathBuf>,
    pub input_json: Vec<PathBuf>,
    pub input_json_baseline: Vec<PathBuf>,
    pub key_map: Vec<String>,
    pub limit_queries: Option<usize>,
}

#[derive(Deserialize)]
struct BaselineFile {
    changes: Vec<BaselineChange>,
}

#[derive(Deserialize)]
struct BaselineChange {
    query: Query,
    old: BaselineResponse,
}

#[derive(Deserialize)]
struct BaselineResponse {
    #[serde(default)]
    response: Value,
}

pub fn read_queries(source: &QuerySource) -> Result<Vec<Query>> {
    let mut queries = read_all(source)?;

    if queries.is_empty() {
        bail!(
            "No queries found, did you specify one of: --input-params, --input-csv, --input-queries, --input-json, --input-json-baseline?"
        );
    }

    if let Some(limit) = source.limit_queries.filter(|limit| *limit > 0) {
        queries.truncate(limit);
    }

    Ok(queries)
}

fn read_all(source: &QuerySource) -> Result<Vec<Query>> {
    let mut queries = Vec::new();

    for file in &source.input_json_baseline {
        queries.extend(read_baseline_file(file)?);
    }

    if !source.input_params.is_empty() {
        let endpoint = require_endpoint(source, "--input-params")?;
        for file in &source.input_params {
            for line in read_lines(file)? {
                queries.push(Query::from_path_and_query(
                    &format!("{endpoint}?{line}"),
                    source.method,
                ));
            }
        }
    }

    if !source.input_csv.is_empty() {
        let endpoint = require_endpoint(source, "--input-csv")?;
        let key_map = parse_key_map(&source.key_map)?;
        for file in &source.input_csv {
            let contents = read_file(file)?;
            for params in csv_to_params(&contents, &key_map)
                .with_context(|| format!("reading CSV {}", file.display()))?
            {
                queries.push(Query::new(endpoint, source.method, params));
            }
        }
    }

    for file in &source.input_queries {
        for line in read_lines(file)? {
            queries.push(Query::from_path_and_query(&line, source.method));
        }
    }

    if !source.input_json.is_empty() {
        let endpoint = require_endpoint(source, "--input-json")?;
        for file in &source.input_json {
            for (index, line) in read_lines(file)?.into_iter().enumerate() {
                let params = json_line_to_params(&line).with_context(|| {
                    format!("parsing line {} of {}", index + 1, file.display())
                })?;
                queries.push(Query::new(endpoint, source.method, params));
            }
        }
    }

    Ok(queries)
}

fn require_endpoint<'a>(source: &'a QuerySource, flag: &str) -> Result<&'a str> {
    match source.endpoint.as_deref() {
        Some(endpoint) if !endpoint.is_empty() => Ok(endpoint),
        _ => bail!("{flag} requires --endpoint"),
    }
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading query file {}", path.display()))
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    Ok(read_file(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn read_baseline_file(path: &Path) -> Result<Vec<Query>> {
    let contents = read_file(path)?;
    let baseline: BaselineFile = serde_json::from_str(&contents)
        .with_context(|| format!("parsing baseline {}", path.display()))?;

    Ok(baseline
        .changes
        .into_iter()
        .map(|change| change.query.with_baseline(change.old.response))
        .collect())
}

fn json_line_to_params(line: &str) -> Result<Params> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(map) = value else {
        bail!("expected a JSON object of params");
    };

    let mut params = Params::new();
    for (key, value) in map {
        let param = match value {
            Value::Array(items) => ParamValue::Multi(items.iter().map(scalar_to_string).collect()),
            other => ParamValue::Single(scalar_to_string(&other)),
        };
        params.insert(key, param);
    }
    Ok(params)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parses `csv_column=param_name` pairs.
pub fn parse_key_map(entries: &[String]) -> Result<BTreeMap<String, String>> {
    let mut key_map = BTreeMap::new();
    for entry in entries {
        match entry.split('=').collect::<Vec<_>>().as_slice() {
            [column, param] if !column.is_empty() && !param.is_empty() => {
                key_map.insert(column.to_string(), param.to_string());
            }
            _ => bail!("invalid keymap {entry}, must be of form csv_column_name=param_name"),
        }
    }
    Ok(key_map)
}

fn csv_to_params(contents: &str, key_map: &BTreeMap<String, String>) -> Result<Vec<Params>> {
    let records = parse_records(contents)?;
    let numeric =
        !key_map.is_empty() && key_map.keys().all(|column| NUMERIC_COLUMN.is_match(column));

    if numeric {
        return records
            .iter()
            .map(|row| {
                let mut params = Params::new();
                for (column, param) in key_map {
                    let index: usize = column.parse()?;
                    let Some(value) = row.get(index) else {
                        bail!("CSV input is missing column {column}, sample row: {row:?}");
                    };
                    insert_param(&mut params, param.clone(), value.clone());
                }
                Ok(params)
            })
            .collect();
    }

    let mut rows = records.into_iter();
    let Some(headers) = rows.next() else {
        return Ok(Vec::new());
    };

    for column in key_map.keys() {
        if !headers.iter().any(|header| header == column) {
            bail!("CSV input is missing specified header {column}, headers: {headers:?}");
        }
    }

    Ok(rows
        .map(|row| {
            let mut params = Params::new();
            for (header, value) in headers.iter().zip(row) {
                if header.is_empty() {
                    continue;
                }
                let name = key_map.get(header).unwrap_or(header);
                insert_param(&mut params, name.clone(), value);
            }
            params
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn reads_params_files_against_endpoint() -> Result<()> {
        let temp = tempdir()?;
        let file = write(temp.path(), "params.txt", "x=1\n\nx=2&y=a\n");

        let queries = read_queries(&QuerySource {
            endpoint: Some("/v1/foo".to_string()),
            input_params: vec![file],
            ..Default::default()
        })?;

        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].endpoint, "/v1/foo");
        assert_eq!(queries[1].params.get("y"), Some(&ParamValue::from("a")));
        Ok(())
    }

    #[test]
    fn params_file_requires_endpoint() -> Result<()> {
        let temp = tempdir()?;
        let file = write(temp.path(), "params.txt", "x=1\n");
        let err = read_queries(&QuerySource {
            input_params: vec![file],
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("requires --endpoint"));
        Ok(())
    }

    #[test]
    fn reads_query_lines_and_applies_limit() -> Result<()> {
        let temp = tempdir()?;
        let file = write(
            temp.path(),
            "queries.txt",
            "/v1/foo?x=1\n/v1/bar?x=2\n/v1/baz\n",
        );

        let queries = read_queries(&QuerySource {
            method: HttpMethod::Post,
            input_queries: vec![file],
            limit_queries: Some(2),
            ..Default::default()
        })?;

        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].endpoint, "/v1/bar");
        assert_eq!(queries[1].method, HttpMethod::Post);
        Ok(())
    }

    #[test]
    fn reads_csv_with_key_map() -> Result<()> {
        let temp = tempdir()?;
        let file = write(temp.path(), "in.csv", "query,,country\nparis,x,FR\n");

        let queries = read_queries(&QuerySource {
            endpoint: Some("/search".to_string()),
            input_csv: vec![file],
            key_map: vec!["query=q".to_string()],
            ..Default::default()
        })?;

        assert_eq!(queries.len(), 1);
        let params = &queries[0].params;
        assert_eq!(params.get("q"), Some(&ParamValue::from("paris")));
        assert_eq!(params.get("country"), Some(&ParamValue::from("FR")));
        assert_eq!(params.len(), 2);
        Ok(())
    }

    #[test]
    fn reads_headerless_csv_with_numeric_key_map() -> Result<()> {
        let temp = tempdir()?;
        let file = write(temp.path(), "in.csv", "paris,FR,ignored\nlyon,FR,x\n");

        let queries = read_queries(&QuerySource {
            endpoint: Some("/search".to_string()),
            input_csv: vec![file],
            key_map: vec!["0=q".to_string(), "1=country".to_string()],
            ..Default::default()
        })?;

        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].params.get("q"), Some(&ParamValue::from("lyon")));
        assert_eq!(queries[1].params.len(), 2);
        Ok(())
    }

    #[test]
    fn csv_missing_mapped_header_fails() -> Result<()> {
        let temp = tempdir()?;
        let file = write(temp.path(), "in.csv", "a,b\n1,2\n");
        let err = read_queries(&QuerySource {
            endpoint: Some("/search".to_string()),
            input_csv: vec![file],
            key_map: vec!["missing=q".to_string()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("missing specified header missing"));
        Ok(())
    }

    #[test]
    fn invalid_key_map_is_rejected() {
        let err = parse_key_map(&["a=b=c".to_string()]).unwrap_err();
        assert!(err.to_string().contains("invalid keymap a=b=c"));
    }

    #[test]
    fn reads_json_lines() -> Result<()> {
        let temp = tempdir()?;
        let file = write(
            temp.path(),
            "in.jsonl",
            "{\"q\":\"paris\",\"limit\":2,\"tags\":[\"a\",\"b\"]}\n",
        );

        let queries = read_queries(&QuerySource {
            endpoint: Some("/search".to_string()),
            input_json: vec![file],
            ..Default::default()
        })?;

        let params = &queries[0].params;
        assert_eq!(params.get("limit"), Some(&ParamValue::from("2")));
        assert_eq!(
            params.get("tags"),
            Some(&ParamValue::Multi(vec!["a".to_string(), "b".to_string()]))
        );
        Ok(())
    }

    #[test]
    fn reads_baseline_reports() -> Result<()> {
        let temp = tempdir()?;
        let file = write(
            temp.path(),
            "baseline.json",
            r#"{
  "changes": [
    {
      "id": "abc",
      "query": {"endpoint": "/v1/foo", "method": "GET", "params": {"x": "1"}},
      "delta": null,
      "old": {"response": {"a": 1}, "url": "http://old/v1/foo?x=1", "status": 200}
    }
  ]
}"#,
        );

        let queries = read_queries(&QuerySource {
            input_json_baseline: vec![file],
            ..Default::default()
        })?;

        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].endpoint, "/v1/foo");
        assert_eq!(
            queries[0].baseline_response,
            Some(serde_json::json!({"a": 1}))
        );
        Ok(())
    }

    #[test]
    fn no_queries_is_an_error() {
        let err = read_queries(&QuerySource::default()).unwrap_err();
        assert!(err.to_string().contains("No queries found"));
    }
}

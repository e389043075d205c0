use std::{collections::BTreeMap, fmt, str::FromStr};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether params travel in the request body instead of the query string.
    pub fn sends_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => bail!("Unsupported HTTP method: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Single(String),
    Multi(Vec<String>),
}

impl ParamValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            ParamValue::Single(value) => vec![value.as_str()],
            ParamValue::Multi(values) => values.iter().map(String::as_str).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            ParamValue::Single(existing) => {
                *self = ParamValue::Multi(vec![std::mem::take(existing), value]);
            }
            ParamValue::Multi(values) => values.push(value),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Single(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Single(value)
    }
}

pub type Params = BTreeMap<String, ParamValue>;

/// Adds a parameter, turning repeated keys into lists.
pub fn insert_param(params: &mut Params, key: String, value: String) {
    match params.get_mut(&key) {
        Some(existing) => existing.push(value),
        None => {
            params.insert(key, ParamValue::Single(value));
        }
    }
}

/// Parses a urlencoded `a=1&b=2&b=3` string.
pub fn parse_query_string(input: &str) -> Params {
    let mut params = Params::new();
    for (key, value) in url::form_urlencoded::parse(input.trim_start_matches('?').as_bytes()) {
        if key.is_empty() {
            continue;
        }
        insert_param(&mut params, key.into_owned(), value.into_owned());
    }
    params
}

/// One comparable request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub endpoint: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub params: Params,
    /// Recorded response standing in for a live call to the old environment.
    #[serde(default, skip_serializing)]
    pub baseline_response: Option<Value>,
}

impl Query {
    pub fn new(endpoint: impl Into<String>, method: HttpMethod, params: Params) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            params,
            baseline_response: None,
        }
    }

    /// Builds a query from a `/path?x=1` line.
    pub fn from_path_and_query(line: &str, method: HttpMethod) -> Self {
        let (endpoint, query) = line.split_once('?').unwrap_or((line, ""));
        Self::new(endpoint.trim(), method, parse_query_string(query.trim()))
    }

    pub fn with_baseline(mut self, response: Value) -> Self {
        self.baseline_response = Some(response);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_query_string_collects_repeated_keys() {
        let params = parse_query_string("a=1&b=2&b=3&empty=&=skipped");
        assert_eq!(params.get("a"), Some(&ParamValue::from("1")));
        assert_eq!(
            params.get("b"),
            Some(&ParamValue::Multi(vec!["2".to_string(), "3".to_string()]))
        );
        assert_eq!(params.get("empty"), Some(&ParamValue::from("")));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn from_path_and_query_splits_endpoint() {
        let query = Query::from_path_and_query("/v1/foo?x=1&y=hello%20world", HttpMethod::Get);
        assert_eq!(query.endpoint, "/v1/foo");
        assert_eq!(query.params.get("y"), Some(&ParamValue::from("hello world")));

        let bare = Query::from_path_and_query("/health", HttpMethod::Post);
        assert_eq!(bare.endpoint, "/health");
        assert!(bare.params.is_empty());
        assert_eq!(bare.method, HttpMethod::Post);
    }

    #[test]
    fn method_parsing_is_case_insensitive() -> Result<()> {
        assert_eq!("post".parse::<HttpMethod>()?, HttpMethod::Post);
        assert!("UPDATE".parse::<HttpMethod>().is_err());
        assert!(HttpMethod::Put.sends_body());
        assert!(!HttpMethod::Delete.sends_body());
        Ok(())
    }

    #[test]
    fn query_serializes_without_baseline() -> Result<()> {
        let query = Query::from_path_and_query("/v1/foo?x=1", HttpMethod::Get)
            .with_baseline(serde_json::json!({"a": 1}));
        let value = serde_json::to_value(&query)?;
        assert_eq!(
            value,
            serde_json::json!({"endpoint": "/v1/foo", "method": "GET", "params": {"x": "1"}})
        );
        Ok(())
    }
}

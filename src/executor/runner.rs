use std::{sync::Arc, time::Instant};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::AuthSettings,
    env::ApiEnv,
    query::{ParamValue, Params, Query},
};

use super::{
    models::{ExecuteOptions, ResponseOutcome},
    transport::{OutgoingRequest, Transport},
};

/// Request construction failures. These abort the run.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("invalid request url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("could not build {method} request for {url}: {message}")]
    InvalidRequest {
        method: String,
        url: String,
        message: String,
    },
}

/// Runs queries against one environment at a time, absorbing transport
/// failures into synthetic outcomes.
#[derive(Clone)]
pub struct QueryExecutor {
    transport: Arc<dyn Transport>,
    auth: AuthSettings,
    options: ExecuteOptions,
}

impl QueryExecutor {
    pub fn new(transport: Arc<dyn Transport>, auth: AuthSettings, options: ExecuteOptions) -> Self {
        Self {
            transport,
            auth,
            options,
        }
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.options
    }

    pub async fn execute(&self, env: &ApiEnv, query: &Query) -> Result<ResponseOutcome, ExecuteError> {
        let request = self.build_request(env, query)?;
        let display_url = request.url.to_string();

        let mut attempt = 0;
        loop {
            let start = Instant::now();
            let result = self.transport.send(&request).await;
            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(raw) => {
                    if raw.status >= 400 {
                        warn!("Got error code: {} for {}", raw.status, raw.url);
                    }
                    return Ok(ResponseOutcome {
                        status: raw.status,
                        data: parse_body(&raw.body),
                        duration_ms: Some(duration_ms),
                        url: raw.url,
                    });
                }
                Err(err) if !err.is_recoverable() => {
                    return Err(ExecuteError::InvalidRequest {
                        method: query.method.to_string(),
                        url: display_url,
                        message: err.to_string(),
                    });
                }
                Err(err) if attempt < self.options.max_retries => {
                    attempt += 1;
                    debug!(
                        attempt,
                        max_retries = self.options.max_retries,
                        "retrying {display_url} after {err}"
                    );
                }
                Err(err) => {
                    warn!("Error {} on {display_url}: {err}", err.code());
                    return Ok(ResponseOutcome::synthetic(&err, display_url, duration_ms));
                }
            }
        }
    }

    fn build_request(&self, env: &ApiEnv, query: &Query) -> Result<OutgoingRequest, ExecuteError> {
        let mut params: Params = env
            .extra_params
            .iter()
            .map(|(key, value)| (key.clone(), ParamValue::Single(value.clone())))
            .collect();
        // Per-query params win over environment defaults.
        params.extend(query.params.clone());

        let mut headers = Vec::new();
        match (&self.auth, env.key.as_deref()) {
            (AuthSettings::Header { scheme }, Some(key)) => {
                let value = [scheme.as_deref(), Some(key)]
                    .into_iter()
                    .flatten()
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                headers.push(("Authorization".to_string(), value));
            }
            (AuthSettings::Param { name }, Some(key)) => {
                params.insert(name.clone(), ParamValue::Single(key.to_string()));
            }
            _ => {}
        }

        let endpoint = if query.endpoint.starts_with('/') {
            query.endpoint.clone()
        } else {
            format!("/{}", query.endpoint)
        };
        let raw_url = format!("{}{}", env.base_url(), endpoint);
        let mut url = Url::parse(&raw_url).map_err(|source| ExecuteError::InvalidUrl {
            url: raw_url.clone(),
            source,
        })?;

        let body = if query.method.sends_body() {
            Some(params_to_json(&params))
        } else {
            if !params.is_empty() {
                let mut pairs = url.query_pairs_mut();
                for (key, value) in &params {
                    for item in value.values() {
                        pairs.append_pair(key, item);
                    }
                }
            }
            None
        };

        Ok(OutgoingRequest {
            method: query.method,
            url,
            headers,
            body,
            timeout: self.options.timeout,
        })
    }
}

fn params_to_json(params: &Params) -> Value {
    let map: Map<String, Value> = params
        .iter()
        .map(|(key, value)| {
            let json = match value {
                ParamValue::Single(single) => Value::String(single.clone()),
                ParamValue::Multi(items) => {
                    Value::Array(items.iter().cloned().map(Value::String).collect())
                }
            };
            (key.clone(), json)
        })
        .collect();
    Value::Object(map)
}

/// JSON bodies are parsed; anything else is kept as a string.
fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid response filter `{expr}`: {message}")]
    Parse { expr: String, message: String },
    #[error("response filter failed: {0}")]
    Failed(String),
}

/// Projection applied to each response body before diffing.
pub type ResponseFilter = Arc<dyn Fn(&Value) -> Result<Value, FilterError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// Dotted path selector such as `results[0].address` or `items[*].id`.
///
/// Selecting through a missing key, an out-of-range index or a value of the
/// wrong type yields `null` instead of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    expr: String,
    segments: Vec<Segment>,
}

impl PathFilter {
    pub fn parse(expr: &str) -> Result<Self, FilterError> {
        let error = |message: &str| FilterError::Parse {
            expr: expr.to_string(),
            message: message.to_string(),
        };

        let trimmed = expr.trim();
        let body = trimmed.strip_prefix('$').unwrap_or(trimmed);
        let body = body.strip_prefix('.').unwrap_or(body);
        if body.is_empty() {
            return Err(error("empty path"));
        }

        let mut segments = Vec::new();
        let mut key = String::new();
        let mut after_bracket = false;
        let mut chars = body.chars();

        while let Some(ch) = chars.next() {
            match ch {
                '.' => {
                    if key.is_empty() && !after_bracket {
                        return Err(error("empty path segment"));
                    }
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    after_bracket = false;
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    let mut inner = String::new();
                    let mut closed = false;
                    for next in chars.by_ref() {
                        if next == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(next);
                    }
                    if !closed {
                        return Err(error("missing closing `]`"));
                    }
                    let inner = inner.trim();
                    if inner == "*" {
                        segments.push(Segment::Wildcard);
                    } else {
                        let index = inner
                            .parse::<usize>()
                            .map_err(|_| error(&format!("invalid index `{inner}`")))?;
                        segments.push(Segment::Index(index));
                    }
                    after_bracket = true;
                }
                ']' => return Err(error("unexpected `]`")),
                ch if ch.is_whitespace() => return Err(error("unexpected whitespace")),
                ch => {
                    if after_bracket {
                        return Err(error("expected `.` or `[` after `]`"));
                    }
                    key.push(ch);
                }
            }
        }

        if !key.is_empty() {
            segments.push(Segment::Key(key));
        } else if !after_bracket {
            return Err(error("path ends with `.`"));
        }

        Ok(Self {
            expr: trimmed.to_string(),
            segments,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn select(&self, value: &Value) -> Value {
        select(value, &self.segments)
    }

    pub fn into_response_filter(self) -> ResponseFilter {
        Arc::new(move |value: &Value| -> Result<Value, FilterError> { Ok(self.select(value)) })
    }
}

fn select(value: &Value, segments: &[Segment]) -> Value {
    let Some((first, rest)) = segments.split_first() else {
        return value.clone();
    };
    match first {
        Segment::Key(key) => value
            .get(key.as_str())
            .map(|inner| select(inner, rest))
            .unwrap_or(Value::Null),
        Segment::Index(index) => value
            .get(*index)
            .map(|inner| select(inner, rest))
            .unwrap_or(Value::Null),
        Segment::Wildcard => match value {
            Value::Array(items) => Value::Array(items.iter().map(|item| select(item, rest)).collect()),
            Value::Object(map) => Value::Array(map.values().map(|item| select(item, rest)).collect()),
            _ => Value::Null,
        },
    }
}

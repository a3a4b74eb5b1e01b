use crate::path::{PathError, PathExpr, PathSegment};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// What the transport hands back for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: u16,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    /// Parsed JSON body, or the body text as a string when it was not JSON.
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub elapsed: Duration,
    #[serde(default)]
    pub encoding: Option<String>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers_value(&self) -> Value {
        string_map(&self.headers)
    }

    pub fn cookies_value(&self) -> Value {
        string_map(&self.cookies)
    }
}

fn string_map(source: &BTreeMap<String, String>) -> Value {
    let map: Map<String, Value> = source
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

/// Response part an extraction expression reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet {
    Status,
    Url,
    Headers,
    Cookies,
    Data,
}

const FACET_PREFIXES: &[(&str, Facet)] = &[
    ("$.status_code", Facet::Status),
    ("$.status", Facet::Status),
    ("$.url", Facet::Url),
    ("$.headers", Facet::Headers),
    ("$.cookies", Facet::Cookies),
    ("$.data", Facet::Data),
];

/// Splits an extraction expression into its facet and the remaining path.
/// Expressions without a facet prefix address the body.
pub fn split_facet(expression: &str) -> (Facet, &str) {
    let trimmed = expression.trim();
    for (prefix, facet) in FACET_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            if rest.is_empty() || rest.starts_with('.') || rest.starts_with('[') {
                return (*facet, rest);
            }
        }
    }
    (Facet::Data, trimmed)
}

/// Evaluates an extraction expression (`$.data.token`, `$.headers[Location]`,
/// `$.status`, ...) against a response.
pub fn extract_facet(response: &RawResponse, expression: &str) -> Result<Option<Value>, PathError> {
    let (facet, rest) = split_facet(expression);
    match facet {
        Facet::Status => Ok(Some(Value::from(response.status))),
        Facet::Url => Ok(Some(Value::String(response.url.clone()))),
        Facet::Data => crate::path::evaluate(&response.body, rest),
        Facet::Cookies => Ok(PathExpr::parse(rest)?.evaluate(&response.cookies_value())),
        Facet::Headers => {
            let expr = PathExpr::parse(rest)?;
            if let [PathSegment::Field(name) | PathSegment::Key(name)] = expr.segments() {
                return Ok(response.header(name).map(|v| Value::String(v.to_string())));
            }
            Ok(expr.evaluate(&response.headers_value()))
        }
    }
}

/// Resolves the field of a validation rule.
///
/// `$.status_code`, `$.headers`, `$.cookies`, `$.response_time`, `$.url` and
/// `$.encoding` address response metadata; any other `$`-path is evaluated
/// against the body. A field that does not start with `$` addresses the whole
/// body.
pub fn field_value(response: &RawResponse, field: &str) -> Result<Option<Value>, PathError> {
    let trimmed = field.trim();
    let Some(path) = trimmed.strip_prefix('$') else {
        return Ok(Some(response.body.clone()));
    };
    let path = path.strip_prefix('.').unwrap_or(path);

    let value = match path {
        "status_code" => Value::from(response.status),
        "headers" => response.headers_value(),
        "cookies" => response.cookies_value(),
        "response_time" => Value::from(response.elapsed.as_secs_f64()),
        "url" => Value::String(response.url.clone()),
        "encoding" => match &response.encoding {
            Some(encoding) => Value::String(encoding.clone()),
            None => return Ok(None),
        },
        "" => response.body.clone(),
        _ => return crate::path::evaluate(&response.body, path),
    };
    Ok(Some(value))
}

use apicase_core::{AuthKind, RawResponse, RequestBody, RequestSpec, Transport, TransportError};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::Method;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Blocking HTTP transport. Cookies set by one response are sent with every
/// later request of the same run.
pub struct HttpTransport {
    base_url: Option<String>,
    default_timeout: Duration,
    jar: Arc<Jar>,
    clients: HashMap<(bool, bool), Client>,
}

impl HttpTransport {
    pub fn new(base_url: Option<String>, default_timeout: Duration) -> Self {
        Self {
            base_url,
            default_timeout,
            jar: Arc::new(Jar::default()),
            clients: HashMap::new(),
        }
    }

    /// Redirect and certificate policies are per client in reqwest, so one
    /// client is kept for each combination a case asks for.
    fn client(&mut self, allow_redirects: bool, verify_ssl: bool) -> Result<Client, TransportError> {
        if let Some(client) = self.clients.get(&(allow_redirects, verify_ssl)) {
            return Ok(client.clone());
        }
        let policy = if allow_redirects {
            Policy::default()
        } else {
            Policy::none()
        };
        let client = Client::builder()
            .cookie_provider(self.jar.clone())
            .redirect(policy)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|err| TransportError::new(format!("failed to build HTTP client: {err}")))?;
        self.clients
            .insert((allow_redirects, verify_ssl), client.clone());
        Ok(client)
    }

    fn build(&mut self, request: &RequestSpec) -> Result<RequestBuilder, TransportError> {
        let url = resolve_url(self.base_url.as_deref(), request)?;
        let method = Method::from_bytes(request.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| TransportError::new(format!("invalid HTTP method '{}'", request.method)))?;
        let timeout = match request.timeout.filter(|secs| *secs > 0.0) {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|err| TransportError::new(format!("invalid timeout {secs}: {err}")))?,
            None => self.default_timeout,
        };

        let client = self.client(request.allow_redirects, request.verify_ssl)?;
        let mut builder = client.request(method, &url).timeout(timeout);

        for (name, value) in request.header_pairs() {
            builder = builder.header(name, value);
        }
        let query = request.query_pairs();
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        let cookies = request.cookie_pairs();
        if !cookies.is_empty() {
            let header = cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, header);
        }
        if let Some(auth) = &request.auth {
            builder = match auth.kind {
                AuthKind::Basic => builder.basic_auth(&auth.username, Some(&auth.password)),
                AuthKind::Bearer => builder.bearer_auth(&auth.token),
            };
        }
        builder = match request.body() {
            RequestBody::None => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Form(fields) => builder.form(&fields),
        };
        Ok(builder)
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, request: &RequestSpec) -> Result<RawResponse, TransportError> {
        let builder = self.build(request)?;
        let started = Instant::now();
        let response = builder
            .send()
            .map_err(|err| TransportError::new(format!("request failed: {err}")))?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let cookies: BTreeMap<String, String> = response
            .cookies()
            .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
            .collect();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let encoding = charset(&content_type);

        let text = response
            .text()
            .map_err(|err| TransportError::new(format!("failed to read response body: {err}")))?;
        let elapsed = started.elapsed();

        Ok(RawResponse {
            status,
            url,
            headers,
            cookies,
            body: parse_body(&content_type, text),
            elapsed,
            encoding,
        })
    }
}

/// `request.url` wins over the configured base URL; `request.path` is
/// appended to whichever applies unless it is itself absolute.
pub fn resolve_url(base_url: Option<&str>, request: &RequestSpec) -> Result<String, TransportError> {
    let base = request
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .or(base_url.map(str::trim).filter(|url| !url.is_empty()));
    let path = request
        .path
        .as_deref()
        .map(str::trim)
        .filter(|path| !path.is_empty());

    match (base, path) {
        (_, Some(path)) if path.starts_with("http://") || path.starts_with("https://") => {
            Ok(path.to_string())
        }
        (Some(base), Some(path)) => Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )),
        (Some(base), None) => Ok(base.to_string()),
        (None, Some(path)) => Ok(path.to_string()),
        (None, None) => Err(TransportError::new("request has neither url nor path")),
    }
}

fn charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("charset="))
        .map(|value| value.trim_matches('"').to_string())
        .next()
}

fn parse_body(content_type: &str, text: String) -> Value {
    if content_type.contains("application/json") {
        if let Ok(value) = serde_json::from_str(&text) {
            return value;
        }
    }
    Value::String(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(url: Option<&str>, path: Option<&str>) -> RequestSpec {
        RequestSpec {
            url: url.map(str::to_string),
            path: path.map(str::to_string),
            ..RequestSpec::default()
        }
    }

    #[test]
    fn joins_base_and_path() {
        let base = Some("http://dev.example.com/");
        assert_eq!(
            resolve_url(base, &request(None, Some("/login"))).expect("url"),
            "http://dev.example.com/login"
        );
        assert_eq!(
            resolve_url(base, &request(Some("http://other.test"), Some("users"))).expect("url"),
            "http://other.test/users"
        );
        assert_eq!(
            resolve_url(base, &request(None, Some("https://abs.test/x"))).expect("url"),
            "https://abs.test/x"
        );
        assert_eq!(
            resolve_url(base, &request(None, None)).expect("url"),
            "http://dev.example.com/"
        );
        assert!(resolve_url(None, &request(None, Some(" "))).is_err());
    }

    #[test]
    fn body_is_json_only_when_declared_and_valid() {
        assert_eq!(
            parse_body("application/json; charset=utf-8", r#"{"a":1}"#.into()),
            json!({"a": 1})
        );
        assert_eq!(parse_body("application/json", "not json".into()), json!("not json"));
        assert_eq!(parse_body("text/plain", r#"{"a":1}"#.into()), json!(r#"{"a":1}"#));
    }

    #[test]
    fn oversized_request_timeout_fails_the_request() {
        let mut transport = HttpTransport::new(None, Duration::from_secs(5));
        for secs in [1e30, f64::INFINITY] {
            let spec = RequestSpec {
                url: Some("http://localhost:1/".to_string()),
                timeout: Some(secs),
                ..RequestSpec::default()
            };
            let err = transport.build(&spec).err().expect("timeout rejected");
            assert!(err.to_string().contains("invalid timeout"), "{err}");
        }
    }

    #[test]
    fn reads_charset_parameter() {
        assert_eq!(
            charset("application/json; charset=\"utf-8\""),
            Some("utf-8".to_string())
        );
        assert_eq!(charset("text/html"), None);
    }
}

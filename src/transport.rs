//! HTTP dispatch.

use crate::error::{Error, TransportError};
use crate::model::{HttpMethod, RenderedRequest, ResponseRecord};
use crate::stream::{is_event_stream, parse_events};
use crate::timing::{HttpStat, NoTiming, TimingEstimator, TimingSample};
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::{Client, Method as ReqMethod};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

/// What a transport hands back for one request.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub response: ResponseRecord,
    pub timing: Option<HttpStat>,
}

/// Sends a rendered request. Implementations must be shareable across
/// concurrently running cases.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(&self, request: &RenderedRequest) -> Result<Exchange, TransportError>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    estimator: Arc<dyn TimingEstimator>,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(format!("drun/{}", crate::VERSION))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            estimator: Arc::new(NoTiming),
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TimingEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    fn convert_method(method: HttpMethod) -> ReqMethod {
        match method {
            HttpMethod::Get => ReqMethod::GET,
            HttpMethod::Post => ReqMethod::POST,
            HttpMethod::Put => ReqMethod::PUT,
            HttpMethod::Delete => ReqMethod::DELETE,
            HttpMethod::Patch => ReqMethod::PATCH,
            HttpMethod::Head => ReqMethod::HEAD,
            HttpMethod::Options => ReqMethod::OPTIONS,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn dispatch(&self, request: &RenderedRequest) -> Result<Exchange, TransportError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", request.url)))?;
        let https = url.scheme() == "https";

        let mut builder = self
            .client
            .request(Self::convert_method(request.method), url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.params.is_empty() {
            let query: Vec<(&String, &String)> = request.params.iter().collect();
            builder = builder.query(&query);
        }
        match &request.body {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => builder = builder.body(text.clone()),
            Some(json) => builder = builder.json(json),
        }

        debug!("Sending request");
        let started = Instant::now();
        let response = builder.send().await?;
        let status_code = response.status().as_u16();

        let mut headers: IndexMap<String, String> = IndexMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_ascii_lowercase())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let bytes = response.bytes().await?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!("Received {} ({} bytes) in {:.2} ms", status_code, bytes.len(), elapsed_ms);

        let text = String::from_utf8_lossy(&bytes);
        let content_type = headers.get("content-type").map(String::as_str);
        let stream_events = is_event_stream(content_type).then(|| parse_events(&text));

        let sample = TimingSample {
            elapsed_ms,
            https,
            connection_close: headers
                .get("connection")
                .is_some_and(|v| v.eq_ignore_ascii_case("close")),
            content_length: bytes.len(),
        };

        Ok(Exchange {
            response: ResponseRecord {
                status_code,
                body: parse_body(&text),
                headers,
                elapsed_ms,
                stream_events,
            },
            timing: self.estimator.estimate(&sample),
        })
    }
}

/// JSON when the text parses, the raw text otherwise, `null` when blank.
pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Join a request path onto an optional base URL.
///
/// Absolute URLs pass through. The base keeps its own path, so
/// `http://h/api` + `/users` is `http://h/api/users`.
pub fn join_url(base_url: Option<&str>, path: &str) -> Result<String, Error> {
    let path = path.trim();
    if path.contains("://") {
        return Ok(path.to_string());
    }
    let Some(base_url) = base_url.map(str::trim).filter(|b| !b.is_empty()) else {
        return Err(Error::InvalidRequest(format!(
            "relative path '{path}' needs a base_url"
        )));
    };

    let mut base = reqwest::Url::parse(base_url)
        .map_err(|e| Error::InvalidRequest(format!("invalid base_url '{base_url}': {e}")))?;
    if path.is_empty() {
        return Ok(base.to_string());
    }
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
        .map(|url| url.to_string())
        .map_err(|e| {
            Error::InvalidRequest(format!(
                "failed to join base_url '{base_url}' with path '{path}': {e}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url(Some("http://localhost:8000"), "/users").unwrap(),
            "http://localhost:8000/users"
        );
        assert_eq!(
            join_url(Some("http://localhost:8000/api"), "/users?x=1").unwrap(),
            "http://localhost:8000/api/users?x=1"
        );
        assert_eq!(
            join_url(Some("http://localhost:8000/api/"), "users").unwrap(),
            "http://localhost:8000/api/users"
        );
        assert_eq!(
            join_url(Some("http://localhost:8000"), "").unwrap(),
            "http://localhost:8000/"
        );
        assert_eq!(
            join_url(None, "https://example.com/x").unwrap(),
            "https://example.com/x"
        );
    }

    #[test]
    fn test_join_url_errors() {
        assert!(matches!(
            join_url(None, "/users"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            join_url(Some("not a url"), "/users"),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("  \n"), Value::Null);
        assert_eq!(parse_body(r#"{"a": 1}"#), json!({"a": 1}));
        assert_eq!(parse_body("plain text"), json!("plain text"));
    }

    #[tokio::test]
    async fn test_invalid_url_is_transport_error() {
        let transport = HttpTransport::new().unwrap();
        let request = RenderedRequest {
            method: HttpMethod::Get,
            url: "no scheme".into(),
            params: IndexMap::new(),
            headers: IndexMap::new(),
            body: None,
        };
        let err = transport.dispatch(&request).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }
}

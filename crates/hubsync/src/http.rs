use async_trait::async_trait;
use thiserror::Error;

/// HTTP methods the engine issues. Mirroring only ever reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
        }
    }
}

/// HTTP headers represented as key/value pairs.
///
/// Header names are treated case-insensitively by helper functions.
pub type HttpHeaders = Vec<(String, String)>;

/// A minimal HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HttpHeaders,
}

impl HttpRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http transport error: {0}")]
    Transport(String),

    #[error("no mock response registered for {method} {url}")]
    NoMockResponse { method: String, url: String },
}

/// Transport boundary for all HTTP I/O.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Get the first header value matching `name` (case-insensitive).
#[must_use]
pub fn header_get<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub mod reqwest_transport {
    use super::*;

    use std::time::Duration as StdDuration;

    /// A real HTTP transport backed by reqwest.
    ///
    /// Redirects are not followed here; the API client sees the 3xx and
    /// decides whether to follow it.
    #[derive(Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }

        pub fn with_timeout(timeout: StdDuration) -> Result<Self, HttpError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .map_err(|e| HttpError::Transport(e.to_string()))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
            };

            let mut builder = self.client.request(method, &request.url);
            for (k, v) in request.headers {
                builder = builder.header(&k, &v);
            }


            let resp = builder
                .send()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?;

            let status = resp.status().as_u16();
            let mut headers: HttpHeaders = Vec::new();
            for (name, value) in resp.headers().iter() {
                headers.push((
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                ));
            }

            let body = resp
                .bytes()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?
                .to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }
}

// ---------- Test-only mock transport ----------

#[cfg(test)]
use std::collections::{HashMap, VecDeque};
#[cfg(test)]
use std::sync::{Arc, Mutex};
#[cfg(test)]
use std::time::Duration;

/// In-memory mock transport.
///
/// This is designed for unit tests: no sockets, no loopback HTTP servers.
/// An optional latency keeps requests "in flight" so tests can observe
/// overlap; the highest number of simultaneously outstanding requests is
/// recorded.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[cfg(test)]
#[derive(Default)]
struct MockTransportInner {
    routes: HashMap<(HttpMethod, String), VecDeque<Result<HttpResponse, String>>>,
    requests: Vec<HttpRequest>,
    latency: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = Some(latency);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockTransportInner> {
        self.inner
            .lock()
            .expect("mock transport lock should not be poisoned")
    }

    /// Register a response for a method + URL.
    ///
    /// If multiple responses are registered for the same key, they are returned
    /// in FIFO order.
    pub fn push_response(
        &self,
        method: HttpMethod,
        url: impl Into<String>,
        response: HttpResponse,
    ) {
        self.lock()
            .routes
            .entry((method, url.into()))
            .or_default()
            .push_back(Ok(response));
    }

    /// Register a transport failure for a method + URL.
    pub fn push_failure(&self, method: HttpMethod, url: impl Into<String>, message: &str) {
        self.lock()
            .routes
            .entry((method, url.into()))
            .or_default()
            .push_back(Err(message.to_string()));
    }

    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.lock().requests.clone()
    }

    /// Number of recorded requests whose URL equals `url`.
    #[must_use]
    pub fn count(&self, url: &str) -> usize {
        self.lock().requests.iter().filter(|r| r.url == url).count()
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }
}

#[cfg(test)]
#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let (next, latency, key) = {
            let mut inner = self.lock();
            let key = (request.method, request.url.clone());
            inner.requests.push(request);
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            let next = inner.routes.get_mut(&key).and_then(|q| q.pop_front());
            (next, inner.latency, key)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.lock().in_flight -= 1;

        match next {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(message)) => Err(HttpError::Transport(message)),
            None => Err(HttpError::NoMockResponse {
                method: key.0.as_str().to_string(),
                url: key.1,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_get_is_case_insensitive_and_returns_first_match() {
        let headers: HttpHeaders = vec![
            ("ETag".to_string(), "W/\"abc\"".to_string()),
            ("etag".to_string(), "W/\"def\"".to_string()),
        ];
        assert_eq!(header_get(&headers, "etag"), Some("W/\"abc\""));
        assert_eq!(header_get(&headers, "ETAG"), Some("W/\"abc\""));
        assert_eq!(header_get(&headers, "missing"), None);
    }

    #[test]
    fn http_method_as_str_matches_expected_values() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
    }

    #[tokio::test]
    async fn mock_transport_returns_registered_responses_in_order() {
        let transport = MockTransport::new();
        let url = "https://example.com/api";

        transport.push_response(
            HttpMethod::Get,
            url,
            HttpResponse {
                status: 200,
                headers: vec![("X-Test".to_string(), "first".to_string())],
                body: b"hello".to_vec(),
            },
        );
        transport.push_failure(HttpMethod::Get, url, "connection reset");

        let req = HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
        };
        let resp = transport.send(req.clone()).await.expect("mock response");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("x-test"), Some("first"));

        let err = transport.send(req.clone()).await.expect_err("failure");
        assert!(matches!(err, HttpError::Transport(ref m) if m == "connection reset"));

        assert_eq!(transport.count(url), 2);
        assert_eq!(transport.requests()[0], req);
    }

    #[tokio::test]
    async fn mock_transport_errors_when_no_response_is_registered() {
        let transport = MockTransport::new();
        let req = HttpRequest {
            method: HttpMethod::Get,
            url: "https://example.com/missing".to_string(),
            headers: Vec::new(),
        };

        let err = transport
            .send(req)
            .await
            .expect_err("missing mock should error");
        match err {
            HttpError::NoMockResponse { method, url } => {
                assert_eq!(method, "GET");
                assert_eq!(url, "https://example.com/missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_tracks_overlapping_requests() {
        let transport = MockTransport::new().with_latency(Duration::from_millis(50));
        let req = HttpRequest {
            method: HttpMethod::Get,
            url: "https://example.com/slow".to_string(),
            headers: Vec::new(),
        };

        let (a, b) = tokio::join!(transport.send(req.clone()), transport.send(req));
        assert!(a.is_err() && b.is_err());
        assert_eq!(transport.max_in_flight(), 2);
    }

    #[test]
    fn reqwest_transport_with_timeout_builds_client() {
        let transport = reqwest_transport::ReqwestTransport::with_timeout(Duration::from_millis(1))
            .expect("reqwest transport should build");
        let _ = transport;
    }

    #[tokio::test]
    async fn reqwest_transport_send_returns_transport_error_for_invalid_url() {
        let transport = reqwest_transport::ReqwestTransport::new(reqwest::Client::new());
        let req = HttpRequest {
            method: HttpMethod::Get,
            url: "not a url".to_string(),
            headers: Vec::new(),
        };

        let err = transport.send(req).await.expect_err("expected error");
        assert!(matches!(err, HttpError::Transport(_)));
    }
}

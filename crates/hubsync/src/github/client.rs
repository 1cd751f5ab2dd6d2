//! Conditional, rate-limit aware GitHub REST client.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::cache::{
    AccessToken, CacheMetadata, RateLimitBudget, RateLimitRegistry, wait_unoccupied,
};
use crate::config::ClientConfig;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::pacing::ApiPacer;
use crate::retry::{RetryConfig, with_retry};

use super::error::ClientError;
use super::pagination::parse_link_header;
use super::types::{ApiErrorBody, ApiResponse, RateLimitResource, RateLimitResponse};

/// GitHub REST API version header value.
pub const API_VERSION: &str = "2022-11-28";

/// Wait applied to a secondary rate limit that names no retry time.
pub const SECONDARY_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// GitHub API client.
///
/// Every request passes the credential's admission gate, and every response
/// feeds the credential's budget before its status is looked at.
#[derive(Clone)]
pub struct GitHubClient {
    transport: Arc<dyn HttpTransport>,
    budgets: Arc<RateLimitRegistry>,
    pacer: Option<ApiPacer>,
    base_url: String,
    user_agent: String,
    max_redirects: u32,
    rate_limit_retries: u32,
    retry: RetryConfig,
}

impl GitHubClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        budgets: Arc<RateLimitRegistry>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            transport,
            budgets,
            pacer: config.requests_per_second.map(ApiPacer::new),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            max_redirects: config.max_redirects,
            rate_limit_retries: config.rate_limit_retries,
            retry: config.retry(),
        }
    }

    /// Shared budget registry this client reports into.
    pub fn budgets(&self) -> &Arc<RateLimitRegistry> {
        &self.budgets
    }

    /// Make a request, conditional when `cache` carries validators.
    ///
    /// `304 Not Modified` is a successful response with `result: None`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        token: &AccessToken,
        cache: Option<&CacheMetadata>,
    ) -> Result<ApiResponse<T>, ClientError> {
        self.request_inner(method, path, token, cache, true).await
    }

    /// Current core rate limit for `token`.
    ///
    /// `/rate_limit` does not count against the budget, so it bypasses the
    /// admission gate and works even while the token is exhausted.
    pub async fn rate_limit(&self, token: &AccessToken) -> Result<RateLimitResource, ClientError> {
        let response = self
            .request_inner::<RateLimitResponse>(HttpMethod::Get, "/rate_limit", token, None, false)
            .await?;
        let resource = response
            .result
            .map(|r| r.resources.core)
            .ok_or_else(|| ClientError::Decode("empty rate limit response".to_string()))?;
        if let Some(budget) = resource.budget() {
            self.budgets.update(token, budget);
        }
        Ok(resource)
    }

    async fn request_inner<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        token: &AccessToken,
        cache: Option<&CacheMetadata>,
        gated: bool,
    ) -> Result<ApiResponse<T>, ClientError> {
        let mut url = self.url_for(path);
        let mut redirect = None;
        let mut redirects = 0;
        let mut rate_limit_waits = 0;

        loop {
            let response = self.exchange(method, &url, token, cache, gated).await?;
            let status = response.status;

            if is_rate_limit_response(&response) {
                let snapshot = parse_rate_limit_headers(&response);
                if rate_limit_waits >= self.rate_limit_retries {
                    tracing::warn!(url, token = %token, status, "Rate limit retries exhausted");
                    return Err(ClientError::RateLimited {
                        reset: snapshot.map(|b| b.reset),
                    });
                }
                rate_limit_waits += 1;

                match retry_after(&response) {
                    Some(delay) => {
                        tracing::info!(url, delay_secs = delay.as_secs(), "Rate limited, honoring Retry-After");
                        wait_unoccupied(delay).await;
                    }
                    // The admission gate waits for the reset on the next attempt.
                    None if gated && snapshot.is_some_and(|b| b.is_exhausted()) => {}
                    None => wait_unoccupied(SECONDARY_RATE_LIMIT_WAIT).await,
                }
                continue;
            }

            match status {
                304 => return Ok(finish(&response, None, redirect)),
                200..=299 => {
                    let result = decode_body(&response)?;
                    return Ok(finish(&response, result, redirect));
                }
                301 | 302 | 307 | 308 => {
                    let location = response.header("location").ok_or_else(|| {
                        ClientError::Rejected {
                            status,
                            message: "redirect without Location header".to_string(),
                        }
                    })?;
                    let next = self.url_for(location);
                    if redirects >= self.max_redirects {
                        return Err(ClientError::TooManyRedirects { location: next });
                    }
                    redirects += 1;
                    tracing::debug!(from = url, to = next, status, "Following redirect");
                    redirect = Some(next.clone());
                    url = next;
                }
                _ => {
                    return Err(ClientError::from_status(
                        status,
                        decode_error_body(&response.body),
                    ));
                }
            }
        }
    }

    /// Send one request, retrying transport failures and server errors.
    async fn exchange(
        &self,
        method: HttpMethod,
        url: &str,
        token: &AccessToken,
        cache: Option<&CacheMetadata>,
        gated: bool,
    ) -> Result<HttpResponse, ClientError> {
        let request = self.build_request(method, url, token, cache);

        with_retry(
            &self.retry,
            || {
                let request = request.clone();
                async move {
                    if gated {
                        self.budgets.admit(token).await;
                    }
                    if let Some(pacer) = &self.pacer {
                        pacer.wait().await;
                    }

                    let response = self.transport.send(request).await?;
                    if let Some(budget) = parse_rate_limit_headers(&response) {
                        self.budgets.update(token, budget);
                    }

                    if response.status >= 500 {
                        return Err(ClientError::from_status(
                            response.status,
                            decode_error_body(&response.body),
                        ));
                    }
                    Ok(response)
                }
            },
            ClientError::is_retryable,
            url,
        )
        .await
    }

    fn build_request(
        &self,
        method: HttpMethod,
        url: &str,
        token: &AccessToken,
        cache: Option<&CacheMetadata>,
    ) -> HttpRequest {
        let mut headers = vec![
            (
                "Authorization".to_string(),
                format!("token {}", token.expose()),
            ),
            (
                "Accept".to_string(),
                "application/vnd.github+json".to_string(),
            ),
            ("User-Agent".to_string(), self.user_agent.clone()),
            ("X-GitHub-Api-Version".to_string(), API_VERSION.to_string()),
        ];

        if let Some(cache) = cache {
            if let Some(etag) = &cache.etag {
                headers.push(("If-None-Match".to_string(), etag.clone()));
            }
            if let Some(last_modified) = &cache.last_modified {
                headers.push(("If-Modified-Since".to_string(), last_modified.clone()));
            }
        }

        HttpRequest {
            method,
            url: url.to_string(),
            headers,
        }
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("max_redirects", &self.max_redirects)
            .finish_non_exhaustive()
    }
}

fn finish<T>(response: &HttpResponse, result: Option<T>, redirect: Option<String>) -> ApiResponse<T> {
    ApiResponse {
        status: response.status,
        result,
        etag: response.header("etag").map(str::to_string),
        last_modified: response.header("last-modified").map(str::to_string),
        expires: parse_expires(response, Utc::now()),
        rate_limit: parse_rate_limit_headers(response),
        redirect,
        pagination: response.header("link").map(parse_link_header),
    }
}

fn decode_body<T: DeserializeOwned>(response: &HttpResponse) -> Result<Option<T>, ClientError> {
    if response.status == 204 || response.body.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&response.body)
        .map(Some)
        .map_err(|e| ClientError::Decode(e.to_string()))
}

fn decode_error_body(body: &[u8]) -> Option<ApiErrorBody> {
    serde_json::from_slice(body).ok()
}

/// Parse the `X-RateLimit-*` headers into a budget snapshot.
pub fn parse_rate_limit_headers(response: &HttpResponse) -> Option<RateLimitBudget> {
    let limit = response.header("x-ratelimit-limit")?.trim().parse().ok()?;
    let remaining = response
        .header("x-ratelimit-remaining")?
        .trim()
        .parse()
        .ok()?;
    let reset_epoch: i64 = response.header("x-ratelimit-reset")?.trim().parse().ok()?;
    Some(RateLimitBudget {
        limit,
        remaining,
        reset: DateTime::from_timestamp(reset_epoch, 0)?,
    })
}

/// Freshness lifetime end: `Cache-Control: max-age` wins over `Expires`.
pub fn parse_expires(response: &HttpResponse, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(cache_control) = response.header("cache-control") {
        let mut max_age = None;
        for directive in cache_control.split(',').map(str::trim) {
            if directive.eq_ignore_ascii_case("no-cache") || directive.eq_ignore_ascii_case("no-store")
            {
                return None;
            }
            if let Some(secs) = directive.strip_prefix("max-age=") {
                max_age = secs.trim().parse::<i64>().ok();
            }
        }
        if let Some(secs) = max_age {
            // An unrepresentable lifetime counts as no lifetime at all.
            return chrono::Duration::try_seconds(secs).and_then(|age| now.checked_add_signed(age));
        }
    }

    response
        .header("expires")
        .and_then(|value| DateTime::parse_from_rfc2822(value.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// A 403/429 caused by rate limiting rather than missing permissions.
fn is_rate_limit_response(response: &HttpResponse) -> bool {
    matches!(response.status, 403 | 429)
        && (response.header("retry-after").is_some()
            || response
                .header("x-ratelimit-remaining")
                .is_some_and(|v| v.trim() == "0"))
}

fn retry_after(response: &HttpResponse) -> Option<Duration> {
    let value = response.header("retry-after")?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).to_std().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTransport;
    use serde_json::Value;

    const BASE: &str = "https://api.github.test";

    fn config() -> ClientConfig {
        ClientConfig {
            base_url: BASE.to_string(),
            retry_min_delay_ms: 10,
            retry_max_delay_ms: 50,
            max_retries: 2,
            ..ClientConfig::default()
        }
    }

    fn client(transport: &MockTransport) -> GitHubClient {
        GitHubClient::new(
            Arc::new(transport.clone()),
            Arc::new(RateLimitRegistry::new()),
            &config(),
        )
    }

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn url(path: &str) -> String {
        format!("{BASE}{path}")
    }

    fn token() -> AccessToken {
        AccessToken::new("ghp_test_token")
    }

    #[tokio::test]
    async fn test_first_fetch_then_not_modified_keeps_etag() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            url("/users/kogir"),
            response(200, &[("ETag", "\"E1\"")], r#"{"login":"kogir","id":1}"#),
        );
        transport.push_response(
            HttpMethod::Get,
            url("/users/kogir"),
            response(304, &[("ETag", "\"E1\"")], ""),
        );
        let client = client(&transport);

        let first: ApiResponse<Value> = client
            .request(HttpMethod::Get, "/users/kogir", &token(), None)
            .await
            .expect("first fetch");
        assert_eq!(first.status, 200);
        assert!(first.result.is_some());
        assert_eq!(first.etag.as_deref(), Some("\"E1\""));

        let cached = CacheMetadata::from_response(&first, Utc::now());
        let second: ApiResponse<Value> = client
            .request(HttpMethod::Get, "/users/kogir", &token(), Some(&cached))
            .await
            .expect("conditional fetch");
        assert!(second.is_not_modified());
        assert!(second.result.is_none());

        let revalidated = cached.revalidated(Utc::now());
        assert_eq!(revalidated.etag.as_deref(), Some("\"E1\""));

        let requests = transport.requests();
        assert_eq!(requests[0].header("if-none-match"), None);
        assert_eq!(requests[1].header("if-none-match"), Some("\"E1\""));
    }

    #[tokio::test]
    async fn test_request_sends_auth_and_conditional_headers() {
        let transport = MockTransport::new();
        transport.push_response(HttpMethod::Get, url("/repositories/42"), response(304, &[], ""));
        let client = client(&transport);

        let cache = CacheMetadata {
            etag: None,
            last_modified: Some("Wed, 21 Oct 2026 07:28:00 GMT".to_string()),
            expires: None,
            last_refresh: Utc::now(),
        };
        let _: ApiResponse<Value> = client
            .request(HttpMethod::Get, "/repositories/42", &token(), Some(&cache))
            .await
            .expect("request");

        let sent = &transport.requests()[0];
        assert_eq!(sent.header("authorization"), Some("token ghp_test_token"));
        assert_eq!(sent.header("accept"), Some("application/vnd.github+json"));
        assert_eq!(sent.header("user-agent"), Some("hubsync"));
        assert_eq!(
            sent.header("if-modified-since"),
            Some("Wed, 21 Oct 2026 07:28:00 GMT")
        );
        assert_eq!(sent.header("if-none-match"), None);
    }

    #[tokio::test]
    async fn test_every_response_updates_budget() {
        let transport = MockTransport::new();
        let reset = (Utc::now().timestamp() + 3600).to_string();
        transport.push_response(
            HttpMethod::Get,
            url("/repositories/1"),
            response(
                404,
                &[
                    ("X-RateLimit-Limit", "5000"),
                    ("X-RateLimit-Remaining", "4321"),
                    ("X-RateLimit-Reset", reset.as_str()),
                ],
                r#"{"message":"Not Found"}"#,
            ),
        );
        let client = client(&transport);

        let err = client
            .request::<Value>(HttpMethod::Get, "/repositories/1", &token(), None)
            .await
            .expect_err("404 should error");
        assert!(matches!(err, ClientError::Gone { status: 404 }));

        let budget = client.budgets().get(&token()).expect("budget recorded");
        assert_eq!(budget.limit, 5000);
        assert_eq!(budget.remaining, 4321);
        assert_eq!(transport.count(&url("/repositories/1")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_and_transport_failures_are_retried() {
        let transport = MockTransport::new();
        let target = url("/repositories/7");
        transport.push_failure(HttpMethod::Get, &target, "connection reset");
        transport.push_response(HttpMethod::Get, &target, response(502, &[], "bad gateway"));
        transport.push_response(HttpMethod::Get, &target, response(200, &[], r#"{"id":7}"#));
        let client = client(&transport);

        let ok: ApiResponse<Value> = client
            .request(HttpMethod::Get, "/repositories/7", &token(), None)
            .await
            .expect("eventually succeeds");
        assert_eq!(ok.result.and_then(|v| v["id"].as_i64()), Some(7));
        assert_eq!(transport.count(&target), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_surface_after_retries() {
        let transport = MockTransport::new();
        let target = url("/repositories/7");
        for _ in 0..3 {
            transport.push_response(HttpMethod::Get, &target, response(503, &[], ""));
        }
        let client = client(&transport);

        let err = client
            .request::<Value>(HttpMethod::Get, "/repositories/7", &token(), None)
            .await
            .expect_err("should fail");
        assert!(matches!(err, ClientError::Server { status: 503, .. }));
        assert!(err.is_transient());
        assert_eq!(transport.count(&target), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            url("/user/1"),
            response(401, &[], r#"{"message":"Bad credentials","documentation_url":"https://docs"}"#),
        );
        let client = client(&transport);

        let err = client
            .request::<Value>(HttpMethod::Get, "/user/1", &token(), None)
            .await
            .expect_err("401");
        match err {
            ClientError::Unauthorized { message } => assert_eq!(message, "Bad credentials"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(transport.count(&url("/user/1")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_response_waits_retry_after_then_retries() {
        let transport = MockTransport::new();
        let target = url("/repositories/9");
        transport.push_response(
            HttpMethod::Get,
            &target,
            response(429, &[("Retry-After", "30")], r#"{"message":"slow down"}"#),
        );
        transport.push_response(HttpMethod::Get, &target, response(200, &[], r#"{"id":9}"#));
        let client = client(&transport);

        let start = tokio::time::Instant::now();
        let ok: ApiResponse<Value> = client
            .request(HttpMethod::Get, "/repositories/9", &token(), None)
            .await
            .expect("retried after wait");
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(ok.status, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_are_bounded() {
        let transport = MockTransport::new();
        let target = url("/repositories/9");
        for _ in 0..3 {
            transport.push_response(
                HttpMethod::Get,
                &target,
                response(403, &[("Retry-After", "1")], r#"{"message":"secondary"}"#),
            );
        }
        let client = client(&transport);

        let err = client
            .request::<Value>(HttpMethod::Get, "/repositories/9", &token(), None)
            .await
            .expect_err("rate limited");
        assert!(err.is_rate_limited());
        assert_eq!(transport.count(&target), 3);
    }

    #[tokio::test]
    async fn test_plain_forbidden_is_not_a_rate_limit() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            url("/repositories/3/hooks/1"),
            response(
                403,
                &[("X-RateLimit-Remaining", "4000")],
                r#"{"message":"Must have admin rights"}"#,
            ),
        );
        let client = client(&transport);

        let err = client
            .request::<Value>(HttpMethod::Get, "/repositories/3/hooks/1", &token(), None)
            .await
            .expect_err("forbidden");
        assert!(matches!(err, ClientError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_redirects_are_followed_and_reported() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            url("/repositories/5"),
            response(301, &[("Location", "/repositories/6")], ""),
        );
        transport.push_response(
            HttpMethod::Get,
            url("/repositories/6"),
            response(200, &[], r#"{"id":6}"#),
        );
        let client = client(&transport);

        let ok: ApiResponse<Value> = client
            .request(HttpMethod::Get, "/repositories/5", &token(), None)
            .await
            .expect("redirect followed");
        assert_eq!(ok.redirect.as_deref(), Some(url("/repositories/6").as_str()));
        assert_eq!(ok.result.and_then(|v| v["id"].as_i64()), Some(6));
    }

    #[tokio::test]
    async fn test_redirect_loop_is_cut_off() {
        let transport = MockTransport::new();
        for _ in 0..4 {
            transport.push_response(
                HttpMethod::Get,
                url("/repositories/5"),
                response(302, &[("Location", "/repositories/5")], ""),
            );
        }
        let client = client(&transport);

        let err = client
            .request::<Value>(HttpMethod::Get, "/repositories/5", &token(), None)
            .await
            .expect_err("loop");
        assert!(matches!(err, ClientError::TooManyRedirects { .. }));
        assert_eq!(transport.count(&url("/repositories/5")), 4);
    }

    #[tokio::test]
    async fn test_no_content_has_no_result() {
        let transport = MockTransport::new();
        transport.push_response(HttpMethod::Get, url("/repositories/1/hooks/2"), response(204, &[], ""));
        let client = client(&transport);

        let ok: ApiResponse<Value> = client
            .request(HttpMethod::Get, "/repositories/1/hooks/2", &token(), None)
            .await
            .expect("no content");
        assert_eq!(ok.status, 204);
        assert!(ok.result.is_none());
    }

    #[tokio::test]
    async fn test_invalid_body_is_a_decode_error() {
        let transport = MockTransport::new();
        transport.push_response(HttpMethod::Get, url("/user/1"), response(200, &[], "{not json"));
        let client = client(&transport);

        let err = client
            .request::<Value>(HttpMethod::Get, "/user/1", &token(), None)
            .await
            .expect_err("decode");
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_defers_next_call_until_reset() {
        let transport = MockTransport::new();
        let now = Utc::now().timestamp();
        let reset = (now + 60).to_string();
        let next_reset = (now + 3660).to_string();
        let target = url("/repositories/1");
        transport.push_response(
            HttpMethod::Get,
            &target,
            response(
                200,
                &[
                    ("X-RateLimit-Limit", "5000"),
                    ("X-RateLimit-Remaining", "0"),
                    ("X-RateLimit-Reset", reset.as_str()),
                ],
                r#"{"id":1}"#,
            ),
        );
        transport.push_response(
            HttpMethod::Get,
            &target,
            response(
                200,
                &[
                    ("X-RateLimit-Limit", "5000"),
                    ("X-RateLimit-Remaining", "4999"),
                    ("X-RateLimit-Reset", next_reset.as_str()),
                ],
                r#"{"id":1}"#,
            ),
        );
        let client = client(&transport);
        client.budgets().update(
            &token(),
            RateLimitBudget {
                limit: 5000,
                remaining: 1,
                reset: DateTime::from_timestamp(now + 60, 0).expect("ts"),
            },
        );

        let start = tokio::time::Instant::now();
        let _: ApiResponse<Value> = client
            .request(HttpMethod::Get, "/repositories/1", &token(), None)
            .await
            .expect("first call admitted");
        assert!(start.elapsed() < Duration::from_secs(1));

        let _: ApiResponse<Value> = client
            .request(HttpMethod::Get, "/repositories/1", &token(), None)
            .await
            .expect("second call deferred, not rejected");
        assert!(start.elapsed() >= Duration::from_secs(59));
        assert_eq!(
            client.budgets().get(&token()).map(|b| b.remaining),
            Some(4999)
        );
    }

    #[tokio::test]
    async fn test_rate_limit_endpoint_bypasses_gate() {
        let transport = MockTransport::new();
        let reset = Utc::now().timestamp() + 600;
        transport.push_response(
            HttpMethod::Get,
            url("/rate_limit"),
            response(
                200,
                &[],
                &format!(
                    r#"{{"resources":{{"core":{{"limit":5000,"remaining":0,"reset":{reset},"used":5000}}}}}}"#
                ),
            ),
        );
        let client = client(&transport);
        client.budgets().update(
            &token(),
            RateLimitBudget {
                limit: 5000,
                remaining: 0,
                reset: DateTime::from_timestamp(reset, 0).expect("ts"),
            },
        );

        let core = client.rate_limit(&token()).await.expect("rate limit");
        assert_eq!(core.remaining, 0);
        assert_eq!(core.used, 5000);
    }

    #[test]
    fn test_parse_expires_prefers_max_age() {
        let now = Utc::now();
        let both = response(
            200,
            &[
                ("Cache-Control", "private, max-age=60, s-maxage=60"),
                ("Expires", "Wed, 21 Oct 2015 07:28:00 GMT"),
            ],
            "",
        );
        assert_eq!(parse_expires(&both, now), Some(now + chrono::Duration::seconds(60)));

        let expires_only = response(200, &[("Expires", "Wed, 21 Oct 2015 07:28:00 GMT")], "");
        assert_eq!(
            parse_expires(&expires_only, now).map(|e| e.timestamp()),
            Some(1_445_412_480)
        );

        let no_cache = response(200, &[("Cache-Control", "no-cache")], "");
        assert_eq!(parse_expires(&no_cache, now), None);
        assert_eq!(parse_expires(&response(200, &[("Expires", "0")], ""), now), None);
    }

    #[test]
    fn test_parse_expires_ignores_out_of_range_max_age() {
        let now = Utc::now();
        for max_age in ["max-age=9000000000000", "max-age=9223372036854775807"] {
            let huge = response(
                200,
                &[
                    ("Cache-Control", max_age),
                    ("Expires", "Wed, 21 Oct 2015 07:28:00 GMT"),
                ],
                "",
            );
            assert_eq!(parse_expires(&huge, now), None);
        }
    }

    #[test]
    fn test_parse_rate_limit_headers_requires_all_three() {
        let partial = response(200, &[("X-RateLimit-Limit", "60")], "");
        assert_eq!(parse_rate_limit_headers(&partial), None);

        let full = response(
            200,
            &[
                ("x-ratelimit-limit", "60"),
                ("x-ratelimit-remaining", "59"),
                ("x-ratelimit-reset", "1372700873"),
            ],
            "",
        );
        let budget = parse_rate_limit_headers(&full).expect("budget");
        assert_eq!((budget.limit, budget.remaining), (60, 59));
    }
}

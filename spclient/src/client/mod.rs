//! Request pipeline
//!
//! [`SPClient`] owns the HTTP transport, the bound auth strategy and the
//! interceptor chain. Every call goes through [`SPClient::execute`]: auth
//! header resolution, default header merging, interceptors, the wire call,
//! throttle-aware retries and structured error decoding. Success returns
//! the raw response bytes; normalization is the caller's concern.

pub mod config;
pub mod hooks;
pub mod http;
pub mod retry;

use std::pin::Pin;
use std::sync::Arc;

use log::{debug, warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use config::{NO_AUTH_HEADER, NO_HOOKS_HEADER, NO_RETRY_HEADER, RequestConfig};
pub use hooks::{HookContext, Interceptor};
pub use http::HttpClient;
pub use retry::{RetryConfig, is_retryable_status, parse_retry_after};

use crate::auth::AuthStrategy;
use crate::error::{Error, Result};

const DIGEST_HEADER: &str = "x-requestdigest";
/// Refresh the form digest this many seconds before the server timeout
const DIGEST_MARGIN_SECS: i64 = 60;

/// SharePoint-bound HTTP client with auth, retries and interceptors
pub struct SPClient {
    http: reqwest::Client,
    auth: Arc<dyn AuthStrategy>,
    retry: RetryConfig,
    interceptors: Vec<Arc<dyn Interceptor>>,
    digest: tokio::sync::Mutex<Option<(String, i64)>>,
}

impl SPClient {
    pub fn new(auth: impl AuthStrategy + 'static) -> Result<Self> {
        Self::with_auth(Arc::new(auth))
    }

    /// Build around an already-resolved strategy (e.g. from
    /// [`crate::auth::from_json`])
    pub fn with_auth(auth: Arc<dyn AuthStrategy>) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            auth,
            retry: RetryConfig::default(),
            interceptors: Vec::new(),
            digest: tokio::sync::Mutex::new(None),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Append an interceptor; hooks run in registration order
    pub fn register_interceptor(&mut self, hook: Arc<dyn Interceptor>) {
        self.interceptors.push(hook);
    }

    pub fn auth(&self) -> &dyn AuthStrategy {
        self.auth.as_ref()
    }

    pub fn site_url(&self) -> &str {
        self.auth.site_url()
    }

    /// Issue one pipeline call; the four HTTP primitives specialize this
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        config: Option<&RequestConfig>,
    ) -> Result<Vec<u8>> {
        let default_config = RequestConfig::default();
        let config = config.unwrap_or(&default_config);
        let cancel = config.cancel.clone();

        // format defaults first, caller headers win
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json;odata=verbose"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json;odata=verbose;charset=utf-8"),
        );

        let mut no_retry = config.disable_retry;
        let mut no_hooks = config.disable_hooks;
        let mut no_auth = false;
        for (name, value) in &config.headers {
            if name.eq_ignore_ascii_case(NO_RETRY_HEADER) {
                no_retry = value == "true";
                continue;
            }
            if name.eq_ignore_ascii_case(NO_HOOKS_HEADER) {
                no_hooks = value == "true";
                continue;
            }
            if name.eq_ignore_ascii_case(NO_AUTH_HEADER) {
                no_auth = value == "true";
                continue;
            }
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::config(format!("invalid header name {name:?}: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| Error::config(format!("invalid value for header {name:?}: {e}")))?;
            headers.insert(header_name, header_value);
        }

        // modifying verbs carry a form digest unless the caller set one
        if method == Method::POST
            && !headers.contains_key(DIGEST_HEADER)
            && !url.contains("/_api/contextinfo")
        {
            match self.form_digest(&cancel).await {
                Ok(digest) => {
                    let value = HeaderValue::from_str(&digest)
                        .map_err(|e| Error::auth(format!("unusable form digest: {e}")))?;
                    headers.insert(HeaderName::from_static(DIGEST_HEADER), value);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => debug!("proceeding without form digest: {e}"),
            }
        }

        let parsed_url =
            Url::parse(url).map_err(|e| Error::config(format!("invalid url {url:?}: {e}")))?;
        let request_id = uuid::Uuid::new_v4();

        let mut attempt: u32 = 0;
        let mut error_hook_fired = false;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut request = reqwest::Request::new(method.clone(), parsed_url.clone());
            *request.headers_mut() = headers.clone();
            if let Some(bytes) = &body {
                *request.body_mut() = Some(bytes.clone().into());
            }

            if !no_auth {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    res = self.auth.set_auth(&mut request, &self.http) => res?,
                }
            }

            if !no_hooks {
                let mut ctx = HookContext {
                    method: &method,
                    url,
                    headers: request.headers_mut(),
                    body: body.as_deref(),
                };
                let mut short_circuit = None;
                for hook in &self.interceptors {
                    if let Some(result) = hook.pre_request(&mut ctx).await? {
                        short_circuit = Some(result);
                        break;
                    }
                }
                if let Some(result) = short_circuit {
                    debug!("[{request_id}] short-circuited by interceptor");
                    return Ok(result);
                }
            }

            debug!("[{request_id}] {method} {url} attempt {}", attempt + 1);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                res = self.http.execute(request) => res,
            };

            let response = match outcome {
                Ok(response) => response,
                Err(e) if (e.is_timeout() || e.is_connect())
                    && !no_retry
                    && attempt + 1 < self.retry.max_attempts =>
                {
                    let delay = self.retry.delay_for(attempt);
                    warn!("[{request_id}] transport failure ({e}), retrying in {delay:?}");
                    sleep_or_cancel(&cancel, delay).await?;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(Error::Http(e)),
            };

            let status = response.status();
            if is_retryable_status(status.as_u16()) {
                if no_retry || attempt + 1 >= self.retry.max_attempts {
                    return Err(Error::Throttle(format!(
                        "{} after {} attempt(s)",
                        status_line(status),
                        attempt + 1
                    )));
                }
                let delay = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after)
                    .unwrap_or_else(|| self.retry.delay_for(attempt));
                warn!("[{request_id}] throttled with {status}, retrying in {delay:?}");
                sleep_or_cancel(&cancel, delay).await?;
                attempt += 1;
                continue;
            }

            let ok = status.is_success();
            let bytes = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                res = response.bytes() => res?,
            };
            if ok {
                return Ok(bytes.to_vec());
            }

            if !no_hooks && !error_hook_fired {
                let mut handled = false;
                for hook in &self.interceptors {
                    if hook.on_error(&method, url, status.as_u16(), &bytes).await? {
                        handled = true;
                        break;
                    }
                }
                if handled {
                    debug!("[{request_id}] {status} handled by interceptor, re-issuing");
                    error_hook_fired = true;
                    continue;
                }
            }

            let (code, message) = decode_error(&bytes, status);
            return Err(Error::Service {
                code,
                message,
                status: status.as_u16(),
            });
        }
    }

    /// Cached `X-RequestDigest` value, fetched from `/_api/contextinfo`
    //
    // Declared-`Send` boxed return type breaks the execute -> form_digest ->
    // execute auto-trait cycle that an `async fn` here cannot resolve.
    fn form_digest<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut guard = self.digest.lock().await;
            let now = chrono::Utc::now().timestamp();
            if let Some((digest, expires_at)) = guard.as_ref() {
                if now < *expires_at {
                    return Ok(digest.clone());
                }
            }

            let url = format!("{}/_api/contextinfo", self.auth.site_url());
            let conf = RequestConfig {
                disable_hooks: true,
                cancel: cancel.clone(),
                ..RequestConfig::default()
            };
            // boxed to break the execute -> form_digest -> execute cycle
            let call: Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + '_>> =
                Box::pin(self.execute(Method::POST, &url, None, Some(&conf)));
            let bytes = call.await?;

            let value: Value = serde_json::from_slice(&bytes)?;
            let info = value
                .pointer("/d/GetContextWebInformation")
                .or_else(|| value.get("GetContextWebInformation"))
                .unwrap_or(&value);
            let digest = info
                .get("FormDigestValue")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::auth("contextinfo response carries no form digest"))?
                .to_string();
            let timeout = info
                .get("FormDigestTimeoutSeconds")
                .and_then(Value::as_i64)
                .unwrap_or(1800);

            *guard = Some((digest.clone(), now + timeout - DIGEST_MARGIN_SECS));
            Ok(digest)
        })
    }
}

async fn sleep_or_cancel(cancel: &CancellationToken, delay: std::time::Duration) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}

/// Decode a structured service error body into `(code, message)`; falls
/// back to the HTTP status line when the body is not one of the known
/// error envelopes.
fn decode_error(body: &[u8], status: StatusCode) -> (String, String) {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        for key in ["error", "odata.error"] {
            let Some(err) = value.get(key) else { continue };
            if let Some(obj) = err.as_object() {
                let code = obj
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let message = match obj.get("message") {
                    Some(Value::String(text)) => text.clone(),
                    Some(nested) => nested
                        .get("value")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    None => String::new(),
                };
                if !code.is_empty() || !message.is_empty() {
                    return (code, message);
                }
            } else if let Some(code) = err.as_str() {
                // identity-provider style {"error": "...", "error_description": "..."}
                let message = value
                    .get("error_description")
                    .and_then(Value::as_str)
                    .and_then(|d| d.lines().next())
                    .unwrap_or_default()
                    .to_string();
                return (code.to_string(), message);
            }
        }
    }
    (status.as_u16().to_string(), status_line(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Pass-through strategy for pipeline tests; tags requests so mocks can
    /// assert auth ran
    #[derive(Debug)]
    struct StubAuth {
        site_url: String,
    }

    #[async_trait]
    impl AuthStrategy for StubAuth {
        fn parse_config(&mut self, _config: &[u8]) -> Result<()> {
            Ok(())
        }

        fn set_master_key(&mut self, _master_key: &str) {}

        async fn get_auth(&self) -> Result<(String, i64)> {
            Ok(("stub-token".to_string(), chrono::Utc::now().timestamp() + 3600))
        }

        async fn set_auth(
            &self,
            request: &mut reqwest::Request,
            _client: &reqwest::Client,
        ) -> Result<()> {
            let (token, _) = self.get_auth().await?;
            request.headers_mut().insert(
                reqwest::header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
            );
            Ok(())
        }

        fn site_url(&self) -> &str {
            &self.site_url
        }

        fn strategy(&self) -> &'static str {
            "stub"
        }
    }

    fn client_for(server: &MockServer) -> SPClient {
        SPClient::new(StubAuth {
            site_url: server.uri(),
        })
        .unwrap()
        .with_retry(RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        })
    }

    #[tokio::test]
    async fn get_attaches_auth_and_default_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_api/web"))
            .and(header("Authorization", "Bearer stub-token"))
            .and(header("Accept", "application/json;odata=verbose"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"d":{"Title":"web"}}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let bytes = client
            .execute(Method::GET, &format!("{}/_api/web", server.uri()), None, None)
            .await
            .unwrap();
        assert_eq!(bytes, br#"{"d":{"Title":"web"}}"#.to_vec());
    }

    #[tokio::test]
    async fn caller_headers_win_over_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_api/web"))
            .and(header("Accept", "application/json;odata=nometadata"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let config = RequestConfig::nometadata();
        client
            .execute(
                Method::GET,
                &format!("{}/_api/web", server.uri()),
                None,
                Some(&config),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn throttled_request_honors_retry_after_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_api/throttled"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("Retry-After", "1"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_api/throttled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let started = Instant::now();
        let bytes = client
            .execute(
                Method::GET,
                &format!("{}/_api/throttled", server.uri()),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(bytes, b"ok".to_vec());
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn disable_retry_fails_on_first_throttle() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_api/throttled"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let config = RequestConfig {
            disable_retry: true,
            ..RequestConfig::default()
        };
        let started = Instant::now();
        let err = client
            .execute(
                Method::GET,
                &format!("{}/_api/throttled", server.uri()),
                None,
                Some(&config),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Throttle(_)));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn throttle_surfaces_after_attempts_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_api/busy"))
            .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "0"))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .execute(Method::GET, &format!("{}/_api/busy", server.uri()), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Throttle(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn cancellation_mid_backoff_aborts_promptly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_api/throttled"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let cancel = CancellationToken::new();
        let config = RequestConfig::default().with_cancel(cancel.clone());

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = client
            .execute(
                Method::GET,
                &format!("{}/_api/throttled", server.uri()),
                None,
                Some(&config),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn service_error_body_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_api/web/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                r#"{"error":{"code":"-2130575338, Microsoft.SharePoint.SPException","message":{"lang":"en-US","value":"The file does not exist."}}}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .execute(
                Method::GET,
                &format!("{}/_api/web/missing", server.uri()),
                None,
                None,
            )
            .await
            .unwrap_err();
        match err {
            Error::Service { code, message, status } => {
                assert!(code.contains("-2130575338"));
                assert_eq!(message, "The file does not exist.");
                assert_eq!(status, 404);
            }
            other => panic!("expected service error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_error_falls_back_to_status_line() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_api/web/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .execute(
                Method::GET,
                &format!("{}/_api/web/broken", server.uri()),
                None,
                None,
            )
            .await
            .unwrap_err();
        match err {
            Error::Service { message, status, .. } => {
                assert_eq!(status, 500);
                assert!(message.contains("500"));
            }
            other => panic!("expected service error, got {other:?}"),
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Interceptor for ShortCircuit {
        async fn pre_request(&self, ctx: &mut HookContext<'_>) -> Result<Option<Vec<u8>>> {
            if ctx.url.ends_with("/_api/cached") {
                return Ok(Some(b"from-hook".to_vec()));
            }
            Ok(None)
        }
    }

    #[tokio::test]
    async fn interceptor_can_short_circuit() {
        let server = MockServer::start().await;
        // no mock mounted: a wire call would 404

        let mut client = client_for(&server);
        client.register_interceptor(Arc::new(ShortCircuit));
        let bytes = client
            .execute(
                Method::GET,
                &format!("{}/_api/cached", server.uri()),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(bytes, b"from-hook".to_vec());

        // hooks disabled: the wire call happens and fails
        let config = RequestConfig {
            disable_hooks: true,
            ..RequestConfig::default()
        };
        let err = client
            .execute(
                Method::GET,
                &format!("{}/_api/cached", server.uri()),
                None,
                Some(&config),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Service { .. }));
    }

    struct RepairOn404 {
        repaired: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Interceptor for RepairOn404 {
        async fn on_error(
            &self,
            _method: &Method,
            _url: &str,
            status: u16,
            _body: &[u8],
        ) -> Result<bool> {
            if status == 404 {
                self.repaired.store(true, std::sync::atomic::Ordering::SeqCst);
                return Ok(true);
            }
            Ok(false)
        }
    }

    #[tokio::test]
    async fn on_error_hook_triggers_one_reissue() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_api/provisioned"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_api/provisioned"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ready"))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        client.register_interceptor(Arc::new(RepairOn404 {
            repaired: std::sync::atomic::AtomicBool::new(false),
        }));
        let bytes = client
            .execute(
                Method::GET,
                &format!("{}/_api/provisioned", server.uri()),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(bytes, b"ready".to_vec());
    }

    #[tokio::test]
    async fn post_fetches_and_caches_the_form_digest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_api/contextinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"d":{"GetContextWebInformation":{"FormDigestValue":"digest-value","FormDigestTimeoutSeconds":1800}}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_api/web/lists"))
            .and(header("X-RequestDigest", "digest-value"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        for _ in 0..2 {
            client
                .execute(
                    Method::POST,
                    &format!("{}/_api/web/lists", server.uri()),
                    Some(b"{}".to_vec()),
                    None,
                )
                .await
                .unwrap();
        }
    }
}

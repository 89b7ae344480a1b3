//! Per-request configuration and OData format header presets

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

/// Control header: skip throttle retries for this request
pub const NO_RETRY_HEADER: &str = "X-SPClient-NoRetry";
/// Control header: skip registered interceptors for this request
pub const NO_HOOKS_HEADER: &str = "X-SPClient-NoHooks";
/// Control header: send the request without resolving auth
pub const NO_AUTH_HEADER: &str = "X-SPClient-NoAuth";

/// Transient per-call configuration
///
/// Control headers (`X-SPClient-*`) are honored the same as the boolean
/// flags and are stripped before the request goes on the wire.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    pub headers: HashMap<String, String>,
    pub disable_retry: bool,
    pub disable_hooks: bool,
    /// Caller-supplied cancellation; aborts sends and backoff sleeps
    pub cancel: CancellationToken,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers preset for the verbose OData envelope
    pub fn verbose() -> Self {
        Self::with_format("verbose")
    }

    /// Headers preset for the minimal metadata OData envelope
    pub fn minimalmetadata() -> Self {
        Self::with_format("minimalmetadata")
    }

    /// Headers preset for the nometadata OData envelope
    pub fn nometadata() -> Self {
        Self::with_format("nometadata")
    }

    fn with_format(format: &str) -> Self {
        let mut config = Self::default();
        config.headers.insert(
            "Accept".to_string(),
            format!("application/json;odata={format}"),
        );
        config.headers.insert(
            "Content-Type".to_string(),
            format!("application/json;odata={format};charset=utf-8"),
        );
        config
    }

    /// Builder-style header override
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Builder-style cancellation token binding
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_carry_matching_accept_and_content_type() {
        let verbose = RequestConfig::verbose();
        assert_eq!(verbose.headers["Accept"], "application/json;odata=verbose");
        assert_eq!(
            verbose.headers["Content-Type"],
            "application/json;odata=verbose;charset=utf-8"
        );

        let nometa = RequestConfig::nometadata();
        assert_eq!(nometa.headers["Accept"], "application/json;odata=nometadata");
    }

    #[test]
    fn header_builder_overrides() {
        let config = RequestConfig::verbose().header("Accept", "application/json");
        assert_eq!(config.headers["Accept"], "application/json");
    }
}

//! Request interceptors
//!
//! An explicit ordered list of hooks around each pipeline call, with two
//! invocation points: before the request goes out (may rewrite headers or
//! short-circuit the call with a ready result) and after a terminal error
//! response (may handle the failure, triggering exactly one re-issue).
//! Collaborators use these for cross-cutting concerns such as folder
//! auto-provisioning before uploads.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::HeaderMap;

use crate::error::Result;

/// Mutable view of an outgoing request offered to pre-request hooks
pub struct HookContext<'a> {
    pub method: &'a Method,
    pub url: &'a str,
    pub headers: &'a mut HeaderMap,
    pub body: Option<&'a [u8]>,
}

/// A pipeline interceptor; register with
/// [`crate::client::SPClient::register_interceptor`]
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Runs before the request is sent. Returning `Some(bytes)`
    /// short-circuits the call: the pipeline returns those bytes without
    /// touching the wire.
    async fn pre_request(&self, _ctx: &mut HookContext<'_>) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Runs on a terminal non-2xx response. Returning `true` marks the
    /// failure handled and makes the pipeline re-issue the request once.
    async fn on_error(
        &self,
        _method: &Method,
        _url: &str,
        _status: u16,
        _body: &[u8],
    ) -> Result<bool> {
        Ok(false)
    }
}

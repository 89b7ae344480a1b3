//! Response helpers over raw service bytes
//!
//! The pipeline hands back unmodified bytes; [`ApiResponse`] wraps them with
//! the typed-decode, normalization and pagination probes collaborators use.

use serde::de::DeserializeOwned;

use super::normalize;
use crate::error::Result;

/// Raw response payload with normalization helpers
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse(Vec<u8>);

impl ApiResponse {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw bytes exactly as the service sent them
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Canonical bytes: normalized entity object or array (§ shape detection)
    pub fn normalized(&self) -> Result<Vec<u8>> {
        if normalize::is_collection(&self.0) {
            normalize::normalize_odata_collection(&self.0)
        } else {
            normalize::normalize_odata_item(&self.0)
        }
    }

    /// Decode the normalized payload into a typed value
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        let normalized = self.normalized()?;
        Ok(serde_json::from_slice(&normalized)?)
    }

    /// Split a collection payload into per-entity responses, order preserved
    pub fn items(&self) -> Result<Vec<ApiResponse>> {
        let (blocks, _) = normalize::parse_odata_collection(&self.0)?;
        Ok(blocks.into_iter().map(ApiResponse).collect())
    }

    pub fn has_next_page(&self) -> bool {
        self.next_page_url().is_some()
    }

    /// Next-page URL of a collection envelope, if any
    pub fn next_page_url(&self) -> Option<String> {
        normalize::collection_next_page_url(&self.0)
    }
}

impl From<Vec<u8>> for ApiResponse {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

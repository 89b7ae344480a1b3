//! List item accessor

use crate::client::{HttpClient, RequestConfig};
use crate::error::Result;
use crate::odata::{ApiResponse, ODataMods, patch_metadata_type, to_url};

use super::{List, prior_endpoint};

/// Item API object
pub struct Item {
    http: HttpClient,
    endpoint: String,
    config: Option<RequestConfig>,
    modifiers: ODataMods,
}

impl Item {
    pub fn new(http: HttpClient, endpoint: impl Into<String>, config: Option<RequestConfig>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            config,
            modifiers: ODataMods::new(),
        }
    }

    pub fn conf(mut self, config: RequestConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn select(mut self, value: &str) -> Self {
        self.modifiers.add_select(value);
        self
    }

    pub fn expand(mut self, value: &str) -> Self {
        self.modifiers.add_expand(value);
        self
    }

    pub fn to_url(&self) -> String {
        to_url(&self.endpoint, &self.modifiers)
    }

    pub async fn get(&self) -> Result<ApiResponse> {
        let bytes = self.http.get(&self.to_url(), self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// Update item fields with MERGE semantics; injects the list's entity
    /// type when the payload carries none
    pub async fn update(&self, body: &[u8]) -> Result<ApiResponse> {
        let body = match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(value) if value.get("__metadata").is_none() => {
                let list_endpoint = prior_endpoint(&self.endpoint, "/items(");
                let list = List::new(self.http.clone(), list_endpoint, self.config.clone());
                match list.get_entity_type().await {
                    Ok(entity_type) => patch_metadata_type(body, &entity_type),
                    Err(_) => body.to_vec(),
                }
            }
            _ => body.to_vec(),
        };
        let bytes = self.http.update(&self.endpoint, body, self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// Delete this item; it cannot be restored from the recycle bin
    pub async fn delete(&self) -> Result<()> {
        self.http.delete(&self.endpoint, self.config.as_ref()).await
    }

    /// Move this item to the recycle bin
    pub async fn recycle(&self) -> Result<()> {
        let endpoint = format!("{}/Recycle", self.endpoint);
        self.http.post(&endpoint, Vec::new(), self.config.as_ref()).await?;
        Ok(())
    }
}

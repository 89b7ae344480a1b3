//! Folder accessor

use crate::client::{HttpClient, RequestConfig};
use crate::error::Result;
use crate::odata::{ApiResponse, ODataMods, patch_metadata_type, to_url};

use super::{Files, Folders};

/// Folder API object
pub struct Folder {
    http: HttpClient,
    endpoint: String,
    config: Option<RequestConfig>,
    modifiers: ODataMods,
}

impl Folder {
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

    /// Update folder metadata with MERGE semantics
    pub async fn update(&self, body: &[u8]) -> Result<ApiResponse> {
        let body = patch_metadata_type(body, "SP.Folder");
        let bytes = self.http.update(&self.endpoint, body, self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// Delete this folder; it cannot be restored from the recycle bin
    pub async fn delete(&self) -> Result<()> {
        self.http.delete(&self.endpoint, self.config.as_ref()).await
    }

    /// Move this folder to the recycle bin
    pub async fn recycle(&self) -> Result<()> {
        let endpoint = format!("{}/Recycle", self.endpoint);
        self.http.post(&endpoint, Vec::new(), self.config.as_ref()).await?;
        Ok(())
    }

    /// Sub-folders collection
    pub fn folders(&self) -> Folders {
        Folders::new(
            self.http.clone(),
            format!("{}/Folders", self.endpoint),
            self.config.clone(),
        )
    }

    /// Files collection of this folder
    pub fn files(&self) -> Files {
        Files::new(
            self.http.clone(),
            format!("{}/Files", self.endpoint),
            self.config.clone(),
        )
    }
}

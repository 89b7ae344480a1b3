//! Files collection and file accessors

use crate::client::{HttpClient, RequestConfig};
use crate::error::Result;
use crate::odata::{ApiResponse, ODataMods, to_url};

use super::escape_quoted;

/// Files API queryable collection, scoped to a folder
pub struct Files {
    http: HttpClient,
    endpoint: String,
    config: Option<RequestConfig>,
    modifiers: ODataMods,
}

/// File API object
pub struct File {
    http: HttpClient,
    endpoint: String,
    config: Option<RequestConfig>,
    modifiers: ODataMods,
}

impl Files {
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

    /// Upload a file into this folder
    pub async fn add(&self, name: &str, content: Vec<u8>, overwrite: bool) -> Result<ApiResponse> {
        let endpoint = format!(
            "{}/Add(overwrite={},url='{}')",
            self.endpoint,
            overwrite,
            escape_quoted(name)
        );
        let bytes = self.http.post(&endpoint, content, self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// File accessor by name within this folder
    pub fn get_by_name(&self, file_name: &str) -> File {
        File::new(
            self.http.clone(),
            format!("{}('{}')", self.endpoint, escape_quoted(file_name)),
            self.config.clone(),
        )
    }
}

impl File {
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

    pub fn to_url(&self) -> String {
        to_url(&self.endpoint, &self.modifiers)
    }

    pub async fn get(&self) -> Result<ApiResponse> {
        let bytes = self.http.get(&self.to_url(), self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// Raw file content; never normalized
    pub async fn download(&self) -> Result<Vec<u8>> {
        let endpoint = format!("{}/$value", self.endpoint);
        self.http.get(&endpoint, self.config.as_ref()).await
    }

    /// Delete this file; it cannot be restored from the recycle bin
    pub async fn delete(&self) -> Result<()> {
        self.http.delete(&self.endpoint, self.config.as_ref()).await
    }

    /// Move this file to the recycle bin
    pub async fn recycle(&self) -> Result<()> {
        let endpoint = format!("{}/Recycle", self.endpoint);
        self.http.post(&endpoint, Vec::new(), self.config.as_ref()).await?;
        Ok(())
    }
}

//! Folders collection accessor

use crate::client::{HttpClient, RequestConfig};
use crate::error::Result;
use crate::odata::{ApiResponse, ODataMods, to_url};

use super::{Folder, escape_quoted};

/// Folders API queryable collection
pub struct Folders {
    http: HttpClient,
    endpoint: String,
    config: Option<RequestConfig>,
    modifiers: ODataMods,
}

impl Folders {
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

    pub fn filter(mut self, value: &str) -> Self {
        self.modifiers.add_filter(value);
        self
    }

    pub fn to_url(&self) -> String {
        to_url(&self.endpoint, &self.modifiers)
    }

    pub async fn get(&self) -> Result<ApiResponse> {
        let bytes = self.http.get(&self.to_url(), self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// Create a child folder with the given name
    pub async fn add(&self, folder_name: &str) -> Result<ApiResponse> {
        let endpoint = format!("{}/Add('{}')", self.endpoint, escape_quoted(folder_name));
        let bytes = self.http.post(&endpoint, Vec::new(), self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// Child folder accessor by name
    pub fn get_by_name(&self, folder_name: &str) -> Folder {
        Folder::new(
            self.http.clone(),
            format!("{}('{}')", self.endpoint, escape_quoted(folder_name)),
            self.config.clone(),
        )
    }
}

//! Web (site) accessor

use crate::client::{HttpClient, NO_HOOKS_HEADER, NO_RETRY_HEADER, RequestConfig};
use crate::error::{Error, Result};
use crate::odata::{ApiResponse, ODataMods, to_url};

use super::{Folder, Lists, escape_quoted};

/// Site web API object
pub struct Web {
    http: HttpClient,
    endpoint: String,
    config: Option<RequestConfig>,
    modifiers: ODataMods,
}

impl Web {
    pub fn new(http: HttpClient, endpoint: impl Into<String>, config: Option<RequestConfig>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            config,
            modifiers: ODataMods::new(),
        }
    }

    /// Custom request config for calls made through this accessor
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

    /// Lists collection of this web
    pub fn lists(&self) -> Lists {
        Lists::new(
            self.http.clone(),
            format!("{}/Lists", self.endpoint),
            self.config.clone(),
        )
    }

    /// Folder object by its server-relative URL
    pub fn get_folder(&self, server_relative_url: &str) -> Folder {
        Folder::new(
            self.http.clone(),
            format!(
                "{}/GetFolderByServerRelativeUrl('{}')",
                self.endpoint,
                escape_quoted(server_relative_url)
            ),
            self.config.clone(),
        )
    }

    /// Ensure every segment of `server_relative_url` exists, creating
    /// missing folders from the deepest existing ancestor downward.
    ///
    /// Walks the path iteratively in both directions; retries and hooks are
    /// suppressed for the probe traffic since missing segments are the
    /// expected case.
    pub async fn ensure_folder(&self, server_relative_url: &str) -> Result<ApiResponse> {
        let segments: Vec<&str> = server_relative_url
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(Error::config("empty folder path"));
        }

        let mut conf = self.config.clone().unwrap_or_default();
        conf.headers.insert(NO_RETRY_HEADER.to_string(), "true".to_string());
        conf.headers.insert(NO_HOOKS_HEADER.to_string(), "true".to_string());

        // deepest existing ancestor first
        let mut found: Option<(usize, ApiResponse)> = None;
        for depth in (1..=segments.len()).rev() {
            let current = segments[..depth].join("/");
            match self.get_folder(&current).conf(conf.clone()).get().await {
                Ok(response) => {
                    found = Some((depth, response));
                    break;
                }
                Err(err) if depth == 1 => return Err(err),
                Err(_) => {}
            }
        }
        let (mut depth, mut response) =
            found.ok_or_else(|| Error::config("empty folder path"))?;

        // then create what is missing, one segment at a time
        while depth < segments.len() {
            let current = segments[..depth].join("/");
            response = self
                .get_folder(&current)
                .conf(conf.clone())
                .folders()
                .add(segments[depth])
                .await?;
            depth += 1;
        }
        Ok(response)
    }
}

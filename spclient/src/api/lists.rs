//! Lists collection accessor

use crate::client::{HttpClient, RequestConfig};
use crate::error::Result;
use crate::odata::{ApiResponse, ODataMods, patch_metadata_type, to_url};

use super::{List, escape_quoted};

/// Lists API queryable collection
pub struct Lists {
    http: HttpClient,
    endpoint: String,
    config: Option<RequestConfig>,
    modifiers: ODataMods,
}

impl Lists {
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

    pub fn top(mut self, value: usize) -> Self {
        self.modifiers.add_top(value);
        self
    }

    pub fn to_url(&self) -> String {
        to_url(&self.endpoint, &self.modifiers)
    }

    pub async fn get(&self) -> Result<ApiResponse> {
        let bytes = self.http.get(&self.to_url(), self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// Create a generic custom list with the given title
    pub async fn add(&self, title: &str) -> Result<ApiResponse> {
        let body = serde_json::to_vec(&serde_json::json!({
            "AllowContentTypes": true,
            "BaseTemplate": 100,
            "ContentTypesEnabled": false,
            "Title": title,
        }))?;
        let body = patch_metadata_type(&body, "SP.List");
        let bytes = self.http.post(&self.endpoint, body, self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// List accessor by display title
    pub fn get_by_title(&self, title: &str) -> List {
        List::new(
            self.http.clone(),
            format!("{}/GetByTitle('{}')", self.endpoint, escape_quoted(title)),
            self.config.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::sp_at;

    #[test]
    fn get_by_title_builds_quoted_endpoint() {
        let sp = sp_at("https://contoso.sharepoint.com/sites/test");
        let list = sp.web().lists().get_by_title("Team's Docs");
        assert_eq!(
            list.to_url(),
            "https://contoso.sharepoint.com/sites/test/_api/web/Lists/GetByTitle('Team''s Docs')"
        );
    }

    #[test]
    fn modifiers_serialize_onto_collection_url() {
        let sp = sp_at("https://contoso.sharepoint.com");
        let lists = sp.web().lists().select("Title").filter("Hidden eq false").top(10);
        let url = lists.to_url();
        assert!(url.contains("$select=Title"));
        assert!(url.contains("$top=10"));
        assert!(url.contains("$filter=Hidden%20eq%20false"));
    }
}

//! List accessor

use serde::Deserialize;

use crate::client::{HttpClient, RequestConfig};
use crate::error::Result;
use crate::odata::{ApiResponse, ODataMods, patch_metadata_type, to_url};

use super::Items;

/// List API object
pub struct List {
    http: HttpClient,
    endpoint: String,
    config: Option<RequestConfig>,
    modifiers: ODataMods,
}

impl List {
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

    /// Update list metadata with MERGE semantics
    pub async fn update(&self, body: &[u8]) -> Result<ApiResponse> {
        let body = patch_metadata_type(body, "SP.List");
        let bytes = self.http.update(&self.endpoint, body, self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// Delete this list; it cannot be restored from the recycle bin
    pub async fn delete(&self) -> Result<()> {
        self.http.delete(&self.endpoint, self.config.as_ref()).await
    }

    /// Items collection of this list
    pub fn items(&self) -> Items {
        Items::new(
            self.http.clone(),
            format!("{}/Items", self.endpoint),
            self.config.clone(),
        )
    }

    /// Entity type name new items of this list must carry in
    /// `__metadata.type`
    pub async fn get_entity_type(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct EntityTypeInfo {
            #[serde(rename = "ListItemEntityTypeFullName")]
            full_name: String,
        }

        let scoped = List::new(self.http.clone(), self.endpoint.clone(), self.config.clone())
            .select("ListItemEntityTypeFullName");
        let response = scoped.get().await?;
        let info: EntityTypeInfo = response.data()?;
        Ok(info.full_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api::test_support::sp_for;

    #[tokio::test]
    async fn entity_type_is_read_from_the_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_api/web/Lists/GetByTitle('Custom')"))
            .and(query_param("$select", "ListItemEntityTypeFullName"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"d":{"ListItemEntityTypeFullName":"SP.Data.CustomListItem"}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let sp = sp_for(&server);
        let entity_type = sp
            .web()
            .lists()
            .get_by_title("Custom")
            .get_entity_type()
            .await
            .unwrap();
        assert_eq!(entity_type, "SP.Data.CustomListItem");
    }

    #[tokio::test]
    async fn items_endpoint_hangs_off_the_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_api/web/Lists/GetByTitle('Custom')/Items"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"d":{"results":[]}}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let sp = sp_for(&server);
        let response = sp
            .web()
            .lists()
            .get_by_title("Custom")
            .items()
            .get()
            .await
            .unwrap();
        assert_eq!(response.items().unwrap().len(), 0);
    }
}

//! List items collection accessor

use serde_json::Value;

use crate::client::{HttpClient, RequestConfig};
use crate::error::Result;
use crate::odata::{ApiResponse, ODataMods, patch_metadata_type, to_url};

use super::{Item, List, prior_endpoint};

/// Items API queryable collection
pub struct Items {
    http: HttpClient,
    endpoint: String,
    config: Option<RequestConfig>,
    modifiers: ODataMods,
}

/// One page of an items collection with cursor-following access
pub struct ItemsPage {
    http: HttpClient,
    config: Option<RequestConfig>,
    pub items: ApiResponse,
}

impl Items {
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

    /// `$skiptoken` paging cursor
    pub fn skip(mut self, skip_token: &str) -> Self {
        self.modifiers.add_skip(skip_token);
        self
    }

    pub fn order_by(mut self, value: &str, ascending: bool) -> Self {
        self.modifiers.add_order_by(value, ascending);
        self
    }

    pub fn to_url(&self) -> String {
        to_url(&self.endpoint, &self.modifiers)
    }

    pub async fn get(&self) -> Result<ApiResponse> {
        let bytes = self.http.get(&self.to_url(), self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// First page of the collection with a follow-the-cursor helper
    pub async fn get_paged(&self) -> Result<ItemsPage> {
        let items = self.get().await?;
        Ok(ItemsPage {
            http: self.http.clone(),
            config: self.config.clone(),
            items,
        })
    }

    /// Every item of the list, following the paging cursor to the end.
    ///
    /// Custom filtering and ordering are dropped as the service rejects
    /// them on large lists; `$select`/`$expand`/`$top` carry over.
    pub async fn get_all(&self) -> Result<Vec<ApiResponse>> {
        let mut scoped = Items::new(self.http.clone(), self.endpoint.clone(), self.config.clone());
        for (key, value) in self.modifiers.get() {
            match *key {
                "$select" => {
                    scoped.modifiers.add_select(value);
                }
                "$expand" => {
                    scoped.modifiers.add_expand(value);
                }
                "$top" => {
                    if let Ok(top) = value.parse() {
                        scoped.modifiers.add_top(top);
                    }
                }
                _ => {}
            }
        }

        let mut response = scoped.get().await?;
        let mut all = response.items()?;
        while let Some(next_url) = response.next_page_url() {
            response = Items::new(self.http.clone(), next_url, self.config.clone())
                .get()
                .await?;
            all.extend(response.items()?);
        }
        Ok(all)
    }

    /// Add a new item; when the payload carries no `__metadata.type`, the
    /// list's entity type is resolved and injected first
    pub async fn add(&self, body: &[u8]) -> Result<ApiResponse> {
        let body = if has_metadata(body) {
            body.to_vec()
        } else {
            let list_endpoint = prior_endpoint(&self.endpoint, "/items");
            let list = List::new(self.http.clone(), list_endpoint, self.config.clone());
            match list.get_entity_type().await {
                Ok(entity_type) => patch_metadata_type(body, &entity_type),
                // the service will still accept untyped payloads on most lists
                Err(_) => body.to_vec(),
            }
        };
        let bytes = self.http.post(&self.endpoint, body, self.config.as_ref()).await?;
        Ok(ApiResponse::new(bytes))
    }

    /// Item accessor by numeric ID
    pub fn get_by_id(&self, item_id: i64) -> Item {
        Item::new(
            self.http.clone(),
            format!("{}({})", self.endpoint, item_id),
            self.config.clone(),
        )
    }
}

impl ItemsPage {
    pub fn has_next_page(&self) -> bool {
        self.items.has_next_page()
    }

    /// Fetch the next page, `None` when this page is the last
    pub async fn get_next_page(&self) -> Result<Option<ItemsPage>> {
        let Some(next_url) = self.items.next_page_url() else {
            return Ok(None);
        };
        let items = Items::new(self.http.clone(), next_url, self.config.clone());
        Ok(Some(items.get_paged().await?))
    }
}

fn has_metadata(body: &[u8]) -> bool {
    matches!(
        serde_json::from_slice::<Value>(body),
        Ok(Value::Object(map)) if map.contains_key("__metadata")
    )
}

//! Fluent entity accessors over the pipeline
//!
//! Mechanical CRUD glue: each builder holds the HTTP facade, its endpoint,
//! an optional request config and accumulated OData modifiers, and returns
//! raw [`ApiResponse`] payloads from the four pipeline primitives.

pub mod file;
pub mod folder;
pub mod folders;
pub mod item;
pub mod items;
pub mod list;
pub mod lists;
pub mod web;

use std::sync::Arc;

pub use file::{File, Files};
pub use folder::Folder;
pub use folders::Folders;
pub use item::Item;
pub use items::{Items, ItemsPage};
pub use list::List;
pub use lists::Lists;
pub use web::Web;

use crate::client::{HttpClient, SPClient};

/// Root accessor bound to one client
pub struct SP {
    http: HttpClient,
}

impl SP {
    pub fn new(client: Arc<SPClient>) -> Self {
        Self {
            http: HttpClient::new(client),
        }
    }

    /// Current site web accessor
    pub fn web(&self) -> Web {
        let endpoint = format!("{}/_api/web", self.http.client().site_url());
        Web::new(self.http.clone(), endpoint, None)
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }
}

/// Endpoint prefix before `needle`, case-insensitive; used to address a
/// parent object from a child collection endpoint
pub(crate) fn prior_endpoint(endpoint: &str, needle: &str) -> String {
    let lower = endpoint.to_lowercase();
    match lower.rfind(&needle.to_lowercase()) {
        Some(idx) => endpoint[..idx].to_string(),
        None => endpoint.to_string(),
    }
}

/// Escape a value for embedding between single quotes in an OData URL
pub(crate) fn escape_quoted(value: &str) -> String {
    value.replace('\'', "''")
}

//! SharePoint REST/SOAP client library
//!
//! Core layers:
//! - [`auth`] — one strategy per authentication protocol (ACS add-in, AAD
//!   certificate/credentials/device flows, forms, NTLM, SAML, ADFS, TMG)
//!   behind one trait, resolved from a `strategy`-discriminated JSON config.
//! - [`cache`] — process-wide token cache with key-scoped refresh locking.
//! - [`client`] — the request pipeline: auth attachment, interceptors,
//!   throttle-aware retries, structured error decoding, MERGE semantics.
//! - [`odata`] — envelope normalization, pagination cursors and the
//!   `$select`/`$expand`/`$filter` modifier accumulator.
//! - [`api`] — fluent entity accessors (web, lists, items, folders, files)
//!   built on the pipeline's four primitives.
//!
//! ```no_run
//! use std::sync::Arc;
//! use spclient::{SP, SPClient, auth};
//!
//! # async fn run() -> spclient::Result<()> {
//! let strategy = auth::from_file("private.json", None)?;
//! let client = Arc::new(SPClient::with_auth(Arc::from(strategy))?);
//! let sp = SP::new(client);
//!
//! let items = sp
//!     .web()
//!     .lists()
//!     .get_by_title("Documents")
//!     .items()
//!     .select("Id,Title")
//!     .top(10)
//!     .get()
//!     .await?;
//! for item in items.items()? {
//!     let value: serde_json::Value = item.data()?;
//!     println!("{}", value["Title"]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod cache;
pub mod client;
pub mod cpass;
pub mod error;
pub mod odata;

pub use api::{SP, File, Files, Folder, Folders, Item, Items, ItemsPage, List, Lists, Web};
pub use auth::{AuthStrategy, from_file, from_json, resolve_strategy};
pub use cache::{CacheKey, TokenCache};
pub use client::{
    HookContext, HttpClient, Interceptor, RequestConfig, RetryConfig, SPClient,
};
pub use cpass::Cpass;
pub use error::{Error, Result};
pub use odata::{ApiResponse, ODataMods};

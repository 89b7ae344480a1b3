//! Add-in only (ACS app principal) auth flow
//!
//! App-only client credentials against the Azure Access Control Service.
//! The tenant realm is taken from the config or discovered through the
//! 401 challenge on `/_vti_bin/client.svc`.
//!
//! Config sample:
//! ```json
//! {
//!     "siteUrl": "https://contoso.sharepoint.com/sites/test",
//!     "clientId": "e2763c6d-7ee6-41d6-b15c-dd1f75f90b8f",
//!     "clientSecret": "OqDSAAuBChzI+uOX0OUhXxiOYo1g6X7mjXCVA9mSF/0="
//! }
//! ```

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use serde::Deserialize;

use super::{AuthStrategy, host_of, post_token_form};
use crate::cache::{self, CacheKey};
use crate::cpass::Cpass;
use crate::error::{Error, Result};

/// Well-known SharePoint service principal
const SHAREPOINT_PRINCIPAL: &str = "00000003-0000-0ff1-ce00-000000000000";
const DEFAULT_ACS_HOST: &str = "https://accounts.accesscontrol.windows.net";

/// ACS app-only credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AddinAuth {
    pub site_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Tenant realm; discovered through a 401 probe when empty
    pub realm: String,
    /// ACS host override for sovereign clouds
    pub acs_host: Option<String>,
    #[serde(skip)]
    master_key: String,
}

impl AddinAuth {
    fn acs(&self) -> &str {
        self.acs_host.as_deref().unwrap_or(DEFAULT_ACS_HOST)
    }

    async fn handshake(&self) -> Result<(String, i64)> {
        let client = reqwest::Client::builder().build()?;
        let realm = if self.realm.is_empty() {
            self.discover_realm(&client).await?
        } else {
            self.realm.clone()
        };

        let host = host_of(&self.site_url)?;
        let resource = format!("{SHAREPOINT_PRINCIPAL}/{host}@{realm}");
        let client_id = format!("{}@{realm}", self.client_id);
        let token_url = format!("{}/{realm}/tokens/OAuth/2", self.acs());

        let response = post_token_form(
            &client,
            &token_url,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", &client_id),
                ("client_secret", &self.client_secret),
                ("resource", &resource),
            ],
        )
        .await?;
        response.into_token()
    }

    /// Tenant realm from the `WWW-Authenticate` challenge of an
    /// unauthenticated probe against the client service
    async fn discover_realm(&self, client: &reqwest::Client) -> Result<String> {
        let probe_url = format!("{}/_vti_bin/client.svc", super::site_root(&self.site_url)?);
        let response = client
            .get(&probe_url)
            .header(AUTHORIZATION, "Bearer")
            .send()
            .await?;

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::auth(format!("{probe_url} sent no auth challenge")))?;

        parse_realm(challenge)
            .ok_or_else(|| Error::auth(format!("no realm in auth challenge {challenge:?}")))
    }
}

fn parse_realm(challenge: &str) -> Option<String> {
    let start = challenge.find("realm=\"")? + "realm=\"".len();
    let rest = &challenge[start..];
    let end = rest.find('"')?;
    let realm = &rest[..end];
    (!realm.is_empty()).then(|| realm.to_string())
}

#[async_trait]
impl AuthStrategy for AddinAuth {
    fn parse_config(&mut self, config: &[u8]) -> Result<()> {
        let parsed: Self = serde_json::from_slice(config)
            .map_err(|e| Error::config(format!("malformed addin config: {e}")))?;
        let master_key = std::mem::take(&mut self.master_key);
        *self = parsed;
        self.master_key = master_key;

        if self.site_url.is_empty() {
            return Err(Error::config("empty siteUrl"));
        }
        if self.client_id.is_empty() {
            return Err(Error::config("empty clientId"));
        }
        if self.client_secret.is_empty() {
            return Err(Error::config("empty clientSecret"));
        }

        let crypt = Cpass::new(&self.master_key);
        if let Ok(secret) = crypt.decode(&self.client_secret) {
            self.client_secret = secret;
        }
        Ok(())
    }

    fn set_master_key(&mut self, master_key: &str) {
        self.master_key = master_key.to_string();
    }

    async fn get_auth(&self) -> Result<(String, i64)> {
        let key = CacheKey::new(&self.site_url, self.strategy())?
            .tenant(&self.realm)
            .client(&self.client_id)
            .secret(&self.client_secret);
        cache::shared()
            .get_or_refresh(&key, || self.handshake())
            .await
    }

    async fn set_auth(
        &self,
        request: &mut reqwest::Request,
        _client: &reqwest::Client,
    ) -> Result<()> {
        let (token, _) = self.get_auth().await?;
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::auth(format!("token is not a valid header value: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    fn site_url(&self) -> &str {
        &self.site_url
    }

    fn strategy(&self) -> &'static str {
        "addin"
    }
}

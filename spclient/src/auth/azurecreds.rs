//! AAD username/password (ROPC) auth flow
//!
//! Public client flows must be enabled on the app registration for this
//! strategy to work. Suited to Online tenants without MFA on the account.
//!
//! Config sample:
//! ```json
//! {
//!     "siteUrl": "https://contoso.sharepoint.com/sites/test",
//!     "tenantId": "e4d43069-8ecb-49c4-8178-5bec83c53e9d",
//!     "clientId": "628cc712-c9a4-48f0-a059-af64bdbb4be5",
//!     "username": "user@contoso.com",
//!     "password": "password"
//! }
//! ```

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;

use super::{AuthStrategy, DEFAULT_AUTHORITY_HOST, host_of, post_token_form};
use crate::cache::{self, CacheKey};
use crate::cpass::Cpass;
use crate::error::{Error, Result};

/// AAD username/password credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AzureCredsAuth {
    pub site_url: String,
    pub tenant_id: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// Authority host override for sovereign clouds
    pub authority_host: Option<String>,
    #[serde(skip)]
    master_key: String,
}

impl AzureCredsAuth {
    fn authority(&self) -> &str {
        self.authority_host.as_deref().unwrap_or(DEFAULT_AUTHORITY_HOST)
    }

    async fn handshake(&self) -> Result<(String, i64)> {
        let host = host_of(&self.site_url)?;
        let resource = format!("https://{host}");
        let token_url = format!("{}/{}/oauth2/token", self.authority(), self.tenant_id);

        let client = reqwest::Client::builder().build()?;
        let response = post_token_form(
            &client,
            &token_url,
            &[
                ("grant_type", "password"),
                ("client_id", &self.client_id),
                ("username", &self.username),
                ("password", &self.password),
                ("resource", &resource),
            ],
        )
        .await?;

        let (token, _) = response.into_token()?;
        // expiry comes from the bearer's own exp claim
        let exp = cache::jwt_expiry(&token)?;
        Ok((token, exp))
    }
}

#[async_trait]
impl AuthStrategy for AzureCredsAuth {
    fn parse_config(&mut self, config: &[u8]) -> Result<()> {
        let parsed: Self = serde_json::from_slice(config)
            .map_err(|e| Error::config(format!("malformed azurecreds config: {e}")))?;
        let master_key = std::mem::take(&mut self.master_key);
        *self = parsed;
        self.master_key = master_key;

        if self.site_url.is_empty() {
            return Err(Error::config("empty siteUrl"));
        }
        if self.tenant_id.is_empty() {
            return Err(Error::config("empty tenantId"));
        }
        if self.client_id.is_empty() {
            return Err(Error::config("empty clientId"));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(Error::config("empty username or password"));
        }

        let crypt = Cpass::new(&self.master_key);
        if let Ok(secret) = crypt.decode(&self.password) {
            self.password = secret;
        }
        Ok(())
    }

    fn set_master_key(&mut self, master_key: &str) {
        self.master_key = master_key.to_string();
    }

    async fn get_auth(&self) -> Result<(String, i64)> {
        let key = CacheKey::new(&self.site_url, self.strategy())?
            .tenant(&self.tenant_id)
            .client(&self.client_id)
            .identity(&self.username)
            .secret(&self.password);
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
        "azurecreds"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Vec<u8> {
        br#"{
            "strategy": "azurecreds",
            "siteUrl": "https://contoso.sharepoint.com/sites/test",
            "tenantId": "e4d43069-8ecb-49c4-8178-5bec83c53e9d",
            "clientId": "628cc712-c9a4-48f0-a059-af64bdbb4be5",
            "username": "user@contoso.com",
            "password": "password"
        }"#
        .to_vec()
    }

    #[test]
    fn parses_full_config() {
        let mut auth = AzureCredsAuth::default();
        auth.parse_config(&sample_config()).unwrap();
        assert_eq!(auth.username, "user@contoso.com");
        assert_eq!(auth.site_url(), "https://contoso.sharepoint.com/sites/test");
    }

    #[test]
    fn empty_site_url_is_rejected() {
        let mut auth = AzureCredsAuth::default();
        let err = auth
            .parse_config(br#"{"username":"u","password":"p","tenantId":"t","clientId":"c"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("siteUrl"));
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let mut auth = AzureCredsAuth::default();
        let err = auth
            .parse_config(
                br#"{"siteUrl":"https://contoso.sharepoint.com","tenantId":"t","clientId":"c"}"#,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn sealed_password_is_opened_with_master_key() {
        let sealed = Cpass::new("master").encode("password").unwrap();
        let config = format!(
            r#"{{
                "siteUrl": "https://contoso.sharepoint.com",
                "tenantId": "t",
                "clientId": "c",
                "username": "user@contoso.com",
                "password": "{sealed}"
            }}"#
        );
        let mut auth = AzureCredsAuth::default();
        auth.set_master_key("master");
        auth.parse_config(config.as_bytes()).unwrap();
        assert_eq!(auth.password, "password");
    }

    #[test]
    fn unsealed_password_is_kept_as_is_without_master_key() {
        let mut auth = AzureCredsAuth::default();
        auth.parse_config(&sample_config()).unwrap();
        assert_eq!(auth.password, "password");
    }
}

//! AAD device-code interactive auth flow
//!
//! Requests a user code, surfaces the verification message through the log,
//! and polls the token endpoint until the user completes sign-in or the
//! code expires. Public client flows must be enabled on the app
//! registration.
//!
//! Config sample:
//! ```json
//! {
//!     "siteUrl": "https://contoso.sharepoint.com/sites/test",
//!     "tenantId": "e4d43069-8ecb-49c4-8178-5bec83c53e9d",
//!     "clientId": "628cc712-c9a4-48f0-a059-af64bdbb4be5"
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use log::info;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;

use super::{AuthStrategy, DEFAULT_AUTHORITY_HOST, host_of, post_token_form};
use crate::cache::{self, CacheKey};
use crate::error::{Error, Result};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// AAD device-code credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceAuth {
    pub site_url: String,
    pub tenant_id: String,
    pub client_id: String,
    /// Authority host override for sovereign clouds
    pub authority_host: Option<String>,
    #[serde(skip)]
    master_key: String,
}

#[derive(Debug, Deserialize)]
struct DeviceCode {
    device_code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    interval: Option<u64>,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl DeviceAuth {
    fn authority(&self) -> &str {
        self.authority_host.as_deref().unwrap_or(DEFAULT_AUTHORITY_HOST)
    }

    async fn handshake(&self) -> Result<(String, i64)> {
        let host = host_of(&self.site_url)?;
        let resource = format!("https://{host}");
        let client = reqwest::Client::builder().build()?;

        let code_url = format!("{}/{}/oauth2/devicecode", self.authority(), self.tenant_id);
        let response = client
            .post(&code_url)
            .form(&[("client_id", self.client_id.as_str()), ("resource", &resource)])
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        let code: DeviceCode = serde_json::from_slice(&body).map_err(|_| {
            Error::auth(format!("device code endpoint answered {status} with an unreadable body"))
        })?;

        info!("{}", code.message);

        let token_url = format!("{}/{}/oauth2/token", self.authority(), self.tenant_id);
        let mut interval = code.interval.unwrap_or(5);
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(code.expires_in.unwrap_or(900));

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::auth("device code expired before sign-in completed"));
            }
            tokio::time::sleep(Duration::from_secs(interval)).await;

            let response = post_token_form(
                &client,
                &token_url,
                &[
                    ("grant_type", DEVICE_CODE_GRANT),
                    ("client_id", &self.client_id),
                    ("code", &code.device_code),
                ],
            )
            .await?;

            match response.into_token() {
                Ok((token, _)) => {
                    let exp = cache::jwt_expiry(&token)?;
                    return Ok((token, exp));
                }
                Err(err) => {
                    let text = err.to_string();
                    if text.contains("authorization_pending") {
                        continue;
                    }
                    if text.contains("slow_down") {
                        interval += 5;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl AuthStrategy for DeviceAuth {
    fn parse_config(&mut self, config: &[u8]) -> Result<()> {
        let parsed: Self = serde_json::from_slice(config)
            .map_err(|e| Error::config(format!("malformed device config: {e}")))?;
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
        Ok(())
    }

    fn set_master_key(&mut self, master_key: &str) {
        self.master_key = master_key.to_string();
    }

    async fn get_auth(&self) -> Result<(String, i64)> {
        let key = CacheKey::new(&self.site_url, self.strategy())?
            .tenant(&self.tenant_id)
            .client(&self.client_id);
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
        "device"
    }
}

//! AAD certificate-assertion auth flow (app-only)
//!
//! Builds an RS256 client-assertion JWT from a PEM private key and the
//! certificate thumbprint registered on the app, then trades it for an
//! access token at the AAD token endpoint.
//!
//! Config sample:
//! ```json
//! {
//!     "siteUrl": "https://contoso.sharepoint.com/sites/test",
//!     "tenantId": "e4d43069-8ecb-49c4-8178-5bec83c53e9d",
//!     "clientId": "628cc712-c9a4-48f0-a059-af64bdbb4be5",
//!     "certPath": "/secure/contoso.pem",
//!     "thumbprint": "3B1D3C27A4D2A4F12C8BE7C7F4DD6A0E9C7E1F55"
//! }
//! ```

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;

use super::{AuthStrategy, DEFAULT_AUTHORITY_HOST, host_of, post_token_form};
use crate::cache::{self, CacheKey};
use crate::error::{Error, Result};

const ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// AAD certificate credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AzureCertAuth {
    pub site_url: String,
    pub tenant_id: String,
    pub client_id: String,
    /// PEM file carrying the RSA private key
    pub cert_path: String,
    /// Hex SHA-1 thumbprint of the registered certificate
    pub thumbprint: String,
    /// Authority host override for sovereign clouds
    pub authority_host: Option<String>,
    #[serde(skip)]
    master_key: String,
}

impl AzureCertAuth {
    fn authority(&self) -> &str {
        self.authority_host.as_deref().unwrap_or(DEFAULT_AUTHORITY_HOST)
    }

    fn client_assertion(&self, token_url: &str) -> Result<String> {
        let pem = std::fs::read(&self.cert_path)
            .map_err(|e| Error::auth(format!("can't read certificate {}: {e}", self.cert_path)))?;
        let key = EncodingKey::from_rsa_pem(&pem)
            .map_err(|e| Error::auth(format!("certificate {} is not an RSA PEM: {e}", self.cert_path)))?;

        let mut header = Header::new(Algorithm::RS256);
        header.x5t = Some(x5t_of(&self.thumbprint)?);

        let now = chrono::Utc::now().timestamp();
        let claims = serde_json::json!({
            "aud": token_url,
            "iss": self.client_id,
            "sub": self.client_id,
            "jti": uuid::Uuid::new_v4().to_string(),
            "nbf": now,
            "exp": now + 600,
        });
        encode(&header, &claims, &key)
            .map_err(|e| Error::auth(format!("can't sign client assertion: {e}")))
    }

    async fn handshake(&self) -> Result<(String, i64)> {
        let host = host_of(&self.site_url)?;
        let resource = format!("https://{host}");
        let token_url = format!("{}/{}/oauth2/token", self.authority(), self.tenant_id);
        let assertion = self.client_assertion(&token_url)?;

        let client = reqwest::Client::builder().build()?;
        let response = post_token_form(
            &client,
            &token_url,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", &self.client_id),
                ("client_assertion_type", ASSERTION_TYPE),
                ("client_assertion", &assertion),
                ("resource", &resource),
            ],
        )
        .await?;
        response.into_token()
    }
}

/// Base64url-encoded certificate thumbprint for the JWT `x5t` header
fn x5t_of(thumbprint: &str) -> Result<String> {
    let hex: String = thumbprint.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    if hex.len() % 2 != 0 {
        return Err(Error::config(format!("odd-length thumbprint {thumbprint:?}")));
    }
    let mut raw = Vec::with_capacity(hex.len() / 2);
    for pair in hex.as_bytes().chunks(2) {
        let byte = u8::from_str_radix(std::str::from_utf8(pair).unwrap_or(""), 16)
            .map_err(|_| Error::config(format!("thumbprint {thumbprint:?} is not hex")))?;
        raw.push(byte);
    }
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

#[async_trait]
impl AuthStrategy for AzureCertAuth {
    fn parse_config(&mut self, config: &[u8]) -> Result<()> {
        let parsed: Self = serde_json::from_slice(config)
            .map_err(|e| Error::config(format!("malformed azurecert config: {e}")))?;
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
        if self.cert_path.is_empty() {
            return Err(Error::config("empty certPath"));
        }
        if self.thumbprint.is_empty() {
            return Err(Error::config("empty thumbprint"));
        }
        // validate early; the same decode runs on every assertion
        x5t_of(&self.thumbprint)?;
        Ok(())
    }

    fn set_master_key(&mut self, master_key: &str) {
        self.master_key = master_key.to_string();
    }

    async fn get_auth(&self) -> Result<(String, i64)> {
        let key = CacheKey::new(&self.site_url, self.strategy())?
            .tenant(&self.tenant_id)
            .client(&self.client_id)
            .secret(&self.thumbprint);
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
        "azurecert"
    }
}

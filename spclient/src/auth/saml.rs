//! SAML passive auth flow (SharePoint Online)
//!
//! Trades username/password for a binary security token at the Microsoft
//! Online STS, then relays it to the site's federated sign-in endpoint to
//! obtain the `FedAuth`/`rtFa` session cookies.
//!
//! Config sample:
//! ```json
//! {
//!     "siteUrl": "https://contoso.sharepoint.com/sites/test",
//!     "username": "user@contoso.onmicrosoft.com",
//!     "password": "password"
//! }
//! ```

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderValue};
use serde::Deserialize;

use super::{AuthStrategy, compact_xml, escape_xml, response_cookies, site_root};
use crate::cache::{self, CacheKey};
use crate::cpass::Cpass;
use crate::error::{Error, Result};

const DEFAULT_STS_ENDPOINT: &str = "https://login.microsoftonline.com/extSTS.srf";

/// SharePoint Online user credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SamlAuth {
    pub site_url: String,
    pub username: String,
    pub password: String,
    /// STS endpoint override for sovereign clouds
    pub sts_endpoint: Option<String>,
    #[serde(skip)]
    master_key: String,
}

fn rst_envelope(sts: &str, endpoint: &str, username: &str, password: &str) -> String {
    let template = format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing" xmlns:u="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
            <s:Header>
                <a:Action s:mustUnderstand="1">http://schemas.xmlsoap.org/ws/2005/02/trust/RST/Issue</a:Action>
                <a:ReplyTo>
                    <a:Address>http://www.w3.org/2005/08/addressing/anonymous</a:Address>
                </a:ReplyTo>
                <a:To s:mustUnderstand="1">{sts}</a:To>
                <o:Security s:mustUnderstand="1" xmlns:o="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
                    <o:UsernameToken>
                        <o:Username>{username}</o:Username>
                        <o:Password>{password}</o:Password>
                    </o:UsernameToken>
                </o:Security>
            </s:Header>
            <s:Body>
                <t:RequestSecurityToken xmlns:t="http://schemas.xmlsoap.org/ws/2005/02/trust">
                    <wsp:AppliesTo xmlns:wsp="http://schemas.xmlsoap.org/ws/2004/09/policy">
                        <a:EndpointReference>
                            <a:Address>{endpoint}</a:Address>
                        </a:EndpointReference>
                    </wsp:AppliesTo>
                    <t:KeyType>http://schemas.xmlsoap.org/ws/2005/05/identity/NoProofKey</t:KeyType>
                    <t:RequestType>http://schemas.xmlsoap.org/ws/2005/02/trust/Issue</t:RequestType>
                    <t:TokenType>urn:oasis:names:tc:SAML:1.0:assertion</t:TokenType>
                </t:RequestSecurityToken>
            </s:Body>
        </s:Envelope>"#,
        sts = sts,
        endpoint = escape_xml(endpoint),
        username = escape_xml(username),
        password = escape_xml(password),
    );
    compact_xml(&template)
}

impl SamlAuth {
    fn sts(&self) -> &str {
        self.sts_endpoint.as_deref().unwrap_or(DEFAULT_STS_ENDPOINT)
    }

    async fn handshake(&self) -> Result<(String, i64)> {
        let root = site_root(&self.site_url)?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        // security token from the STS
        let envelope = rst_envelope(self.sts(), &root, &self.username, &self.password);
        let response = client
            .post(self.sts())
            .header(CONTENT_TYPE, "application/soap+xml;charset=utf-8")
            .body(envelope)
            .send()
            .await?;
        let body = response.text().await?;
        // scoped so only owned values cross the next await
        let (token, expires) = {
            let doc = roxmltree::Document::parse(&body)
                .map_err(|e| Error::auth(format!("unreadable STS response: {e}")))?;

            if let Some(fault) = doc
                .descendants()
                .find(|n| n.tag_name().name() == "Fault")
            {
                let reason = fault
                    .descendants()
                    .filter_map(|n| n.text())
                    .map(str::trim)
                    .find(|t| !t.is_empty())
                    .unwrap_or("unknown STS fault");
                return Err(Error::auth(format!("token request failed: {reason}")));
            }

            let token = doc
                .descendants()
                .find(|n| n.tag_name().name() == "BinarySecurityToken")
                .and_then(|n| n.text())
                .ok_or_else(|| Error::auth("STS response carries no binary security token"))?
                .to_string();

            let expires = doc
                .descendants()
                .find(|n| n.tag_name().name() == "Expires")
                .and_then(|n| n.text())
                .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.timestamp())
                .unwrap_or_else(|| chrono::Utc::now().timestamp() + 8 * 3600);
            (token, expires)
        };

        // relay the token to the federated sign-in endpoint for cookies
        let signin_url = format!("{root}/_forms/default.aspx?wa=wsignin1.0");
        let response = client.post(&signin_url).body(token).send().await?;

        let cookies = response_cookies(&response);
        let fed_auth = cookies
            .iter()
            .find(|(name, _)| name == "FedAuth")
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Error::auth("sign-in set no FedAuth cookie"))?;
        let rt_fa = cookies
            .iter()
            .find(|(name, _)| name == "rtFa")
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Error::auth("sign-in set no rtFa cookie"))?;

        Ok((format!("FedAuth={fed_auth}; rtFa={rt_fa}"), expires))
    }
}

#[async_trait]
impl AuthStrategy for SamlAuth {
    fn parse_config(&mut self, config: &[u8]) -> Result<()> {
        let parsed: Self = serde_json::from_slice(config)
            .map_err(|e| Error::config(format!("malformed saml config: {e}")))?;
        let master_key = std::mem::take(&mut self.master_key);
        *self = parsed;
        self.master_key = master_key;

        if self.site_url.is_empty() {
            return Err(Error::config("empty siteUrl"));
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
        let (cookie, _) = self.get_auth().await?;
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| Error::auth(format!("cookie is not a valid header value: {e}")))?;
        request.headers_mut().insert(COOKIE, value);
        Ok(())
    }

    fn site_url(&self) -> &str {
        &self.site_url
    }

    fn strategy(&self) -> &'static str {
        "saml"
    }
}

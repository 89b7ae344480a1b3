//! ADFS auth flow (on-premises federation)
//!
//! Requests a SAML assertion from the ADFS `usernamemixed` WS-Trust 1.3
//! endpoint, relays it to the site's `/_trust/` sign-in handler, and uses
//! the resulting federation cookie as the request credential.
//!
//! Config sample:
//! ```json
//! {
//!     "siteUrl": "https://www.contoso.com/sites/test",
//!     "username": "user@contoso.com",
//!     "password": "password",
//!     "relyingParty": "urn:sharepoint:www",
//!     "adfsUrl": "https://login.contoso.com",
//!     "adfsCookie": "FedAuth"
//! }
//! ```

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderValue};
use serde::Deserialize;

use super::{AuthStrategy, compact_xml, escape_xml, response_cookies, site_root};
use crate::cache::{self, CacheKey};
use crate::cpass::Cpass;
use crate::error::{Error, Result};

/// ADFS user credentials and federation endpoints
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdfsAuth {
    pub site_url: String,
    pub username: String,
    pub password: String,
    /// Relying party identifier registered for the site
    pub relying_party: String,
    /// ADFS server base URL
    pub adfs_url: String,
    /// Federation cookie name, `FedAuth` unless customized
    pub adfs_cookie: String,
    #[serde(skip)]
    master_key: String,
}

fn rst_envelope(to: &str, relying_party: &str, username: &str, password: &str) -> String {
    let template = format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing" xmlns:u="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
            <s:Header>
                <a:Action s:mustUnderstand="1">http://docs.oasis-open.org/ws-sx/ws-trust/200512/RST/Issue</a:Action>
                <a:To s:mustUnderstand="1">{to}</a:To>
                <o:Security s:mustUnderstand="1" xmlns:o="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
                    <o:UsernameToken>
                        <o:Username>{username}</o:Username>
                        <o:Password>{password}</o:Password>
                    </o:UsernameToken>
                </o:Security>
            </s:Header>
            <s:Body>
                <trust:RequestSecurityToken xmlns:trust="http://docs.oasis-open.org/ws-sx/ws-trust/200512">
                    <wsp:AppliesTo xmlns:wsp="http://schemas.xmlsoap.org/ws/2004/09/policy">
                        <wsa:EndpointReference xmlns:wsa="http://www.w3.org/2005/08/addressing">
                            <wsa:Address>{relying_party}</wsa:Address>
                        </wsa:EndpointReference>
                    </wsp:AppliesTo>
                    <trust:KeyType>http://docs.oasis-open.org/ws-sx/ws-trust/200512/Bearer</trust:KeyType>
                    <trust:RequestType>http://docs.oasis-open.org/ws-sx/ws-trust/200512/Issue</trust:RequestType>
                    <trust:TokenType>urn:oasis:names:tc:SAML:1.0:assertion</trust:TokenType>
                </trust:RequestSecurityToken>
            </s:Body>
        </s:Envelope>"#,
        to = escape_xml(to),
        relying_party = escape_xml(relying_party),
        username = escape_xml(username),
        password = escape_xml(password),
    );
    compact_xml(&template)
}

fn wresult_envelope(created: &str, expires: &str, relying_party: &str, assertion: &str) -> String {
    let template = format!(
        r#"<t:RequestSecurityTokenResponse xmlns:t="http://schemas.xmlsoap.org/ws/2005/02/trust">
            <t:Lifetime>
                <wsu:Created xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">{created}</wsu:Created>
                <wsu:Expires xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">{expires}</wsu:Expires>
            </t:Lifetime>
            <wsp:AppliesTo xmlns:wsp="http://schemas.xmlsoap.org/ws/2004/09/policy">
                <wsa:EndpointReference xmlns:wsa="http://www.w3.org/2005/08/addressing">
                    <wsa:Address>{relying_party}</wsa:Address>
                </wsa:EndpointReference>
            </wsp:AppliesTo>
            <t:RequestedSecurityToken>{assertion}</t:RequestedSecurityToken>
            <t:TokenType>urn:oasis:names:tc:SAML:1.0:assertion</t:TokenType>
            <t:RequestType>http://schemas.xmlsoap.org/ws/2005/02/trust/Issue</t:RequestType>
            <t:KeyType>http://schemas.xmlsoap.org/ws/2005/05/identity/NoProofKey</t:KeyType>
        </t:RequestSecurityTokenResponse>"#,
        created = created,
        expires = expires,
        relying_party = escape_xml(relying_party),
        assertion = assertion,
    );
    compact_xml(&template)
}

impl AdfsAuth {
    async fn handshake(&self) -> Result<(String, i64)> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        // SAML assertion from the ADFS STS
        let sts_url = format!(
            "{}/adfs/services/trust/13/usernamemixed",
            self.adfs_url.trim_end_matches('/')
        );
        let envelope = rst_envelope(&sts_url, &self.relying_party, &self.username, &self.password);
        let response = client
            .post(&sts_url)
            .header(CONTENT_TYPE, "application/soap+xml;charset=utf-8")
            .body(envelope)
            .send()
            .await?;
        let body = response.text().await?;
        // scoped so only owned values cross the next await
        let (assertion, created, expires_text) = {
            let doc = roxmltree::Document::parse(&body)
                .map_err(|e| Error::auth(format!("unreadable ADFS response: {e}")))?;

            if let Some(fault) = doc.descendants().find(|n| n.tag_name().name() == "Fault") {
                let reason = fault
                    .descendants()
                    .filter_map(|n| n.text())
                    .map(str::trim)
                    .find(|t| !t.is_empty())
                    .unwrap_or("unknown ADFS fault");
                return Err(Error::auth(format!("token request failed: {reason}")));
            }

            let requested = doc
                .descendants()
                .find(|n| n.tag_name().name() == "RequestedSecurityToken")
                .ok_or_else(|| Error::auth("ADFS response carries no security token"))?;
            let assertion = requested
                .first_element_child()
                .map(|n| body[n.range()].to_string())
                .ok_or_else(|| Error::auth("ADFS security token is empty"))?;

            let created = doc
                .descendants()
                .find(|n| n.tag_name().name() == "Created")
                .and_then(|n| n.text())
                .map(str::to_string)
                .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
            let expires_text = doc
                .descendants()
                .find(|n| n.tag_name().name() == "Expires")
                .and_then(|n| n.text())
                .map(str::to_string)
                .unwrap_or_default();
            (assertion, created, expires_text)
        };
        let expires = chrono::DateTime::parse_from_rfc3339(&expires_text)
            .map(|t| t.timestamp())
            .unwrap_or_else(|_| chrono::Utc::now().timestamp() + 3600);

        // relay the assertion to the site's trust handler
        let root = site_root(&self.site_url)?;
        let wresult = wresult_envelope(&created, &expires_text, &self.relying_party, &assertion);
        let response = client
            .post(format!("{root}/_trust/"))
            .form(&[
                ("wa", "wsignin1.0"),
                ("wresult", wresult.as_str()),
                ("wctx", self.site_url.as_str()),
            ])
            .send()
            .await?;

        let cookie_name = if self.adfs_cookie.is_empty() {
            "FedAuth"
        } else {
            &self.adfs_cookie
        };
        let value = response_cookies(&response)
            .into_iter()
            .find(|(name, _)| name == cookie_name)
            .map(|(_, value)| value)
            .ok_or_else(|| Error::auth(format!("trust sign-in set no {cookie_name} cookie")))?;

        Ok((format!("{cookie_name}={value}"), expires))
    }
}

#[async_trait]
impl AuthStrategy for AdfsAuth {
    fn parse_config(&mut self, config: &[u8]) -> Result<()> {
        let parsed: Self = serde_json::from_slice(config)
            .map_err(|e| Error::config(format!("malformed adfs config: {e}")))?;
        let master_key = std::mem::take(&mut self.master_key);
        *self = parsed;
        self.master_key = master_key;

        if self.site_url.is_empty() {
            return Err(Error::config("empty siteUrl"));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(Error::config("empty username or password"));
        }
        if self.relying_party.is_empty() {
            return Err(Error::config("empty relyingParty"));
        }
        if self.adfs_url.is_empty() {
            return Err(Error::config("empty adfsUrl"));
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
            .tenant(&self.adfs_url)
            .client(&self.relying_party)
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
        "adfs"
    }
}

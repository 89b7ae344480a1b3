//! Forms-based auth flow (on-premises)
//!
//! POSTs a SOAP `Login` envelope to `/_vti_bin/authentication.asmx` and
//! turns the returned session cookie into the request credential.
//!
//! Config sample:
//! ```json
//! {
//!     "siteUrl": "https://www.contoso.com/sites/test",
//!     "username": "user",
//!     "password": "password"
//! }
//! ```

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderValue};
use serde::Deserialize;

use super::{AuthStrategy, compact_xml, escape_xml, site_root};
use crate::cache::{self, CacheKey};
use crate::cpass::Cpass;
use crate::error::{Error, Result};

const DEFAULT_TIMEOUT_SECS: i64 = 3600;

/// Forms-based credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FbaAuth {
    pub site_url: String,
    pub username: String,
    pub password: String,
    #[serde(skip)]
    master_key: String,
}

fn login_envelope(username: &str, password: &str) -> String {
    let template = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
        <soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
            <soap:Body>
                <Login xmlns="http://schemas.microsoft.com/sharepoint/soap/">
                    <username>{}</username>
                    <password>{}</password>
                </Login>
            </soap:Body>
        </soap:Envelope>"#,
        escape_xml(username),
        escape_xml(password),
    );
    compact_xml(&template)
}

fn soap_text<'a>(doc: &'a roxmltree::Document<'a>, tag: &str) -> Option<&'a str> {
    doc.descendants()
        .find(|n| n.tag_name().name() == tag)
        .and_then(|n| n.text())
}

impl FbaAuth {
    async fn handshake(&self) -> Result<(String, i64)> {
        let login_url = format!("{}/_vti_bin/authentication.asmx", site_root(&self.site_url)?);
        let client = reqwest::Client::builder().build()?;

        let response = client
            .post(&login_url)
            .header(CONTENT_TYPE, "text/xml;charset=utf-8")
            .body(login_envelope(&self.username, &self.password))
            .send()
            .await?;

        let cookies = super::response_cookies(&response);

        let body = response.text().await?;
        let doc = roxmltree::Document::parse(&body)
            .map_err(|e| Error::auth(format!("unreadable login response: {e}")))?;

        match soap_text(&doc, "ErrorCode") {
            Some("NoError") => {}
            Some(code) => return Err(Error::auth(format!("login rejected: {code}"))),
            None => return Err(Error::auth("login response carries no error code")),
        }

        let cookie_name = soap_text(&doc, "CookieName").unwrap_or("FedAuth");
        let timeout = soap_text(&doc, "TimeoutSeconds")
            .and_then(|t| t.parse::<i64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let value = cookies
            .iter()
            .find(|(name, _)| name == cookie_name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| Error::auth(format!("login set no {cookie_name} cookie")))?;

        let exp = chrono::Utc::now().timestamp() + timeout;
        Ok((format!("{cookie_name}={value}"), exp))
    }
}

#[async_trait]
impl AuthStrategy for FbaAuth {
    fn parse_config(&mut self, config: &[u8]) -> Result<()> {
        let parsed: Self = serde_json::from_slice(config)
            .map_err(|e| Error::config(format!("malformed fba config: {e}")))?;
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
        "fba"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOGIN_OK: &str = r#"<?xml version="1.0" encoding="utf-8"?>
        <soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
            <soap:Body>
                <LoginResponse xmlns="http://schemas.microsoft.com/sharepoint/soap/">
                    <LoginResult>
                        <CookieName>FedAuth</CookieName>
                        <ErrorCode>NoError</ErrorCode>
                        <TimeoutSeconds>1800</TimeoutSeconds>
                    </LoginResult>
                </LoginResponse>
            </soap:Body>
        </soap:Envelope>"#;

    const LOGIN_DENIED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
        <soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
            <soap:Body>
                <LoginResponse xmlns="http://schemas.microsoft.com/sharepoint/soap/">
                    <LoginResult>
                        <ErrorCode>PasswordNotMatch</ErrorCode>
                    </LoginResult>
                </LoginResponse>
            </soap:Body>
        </soap:Envelope>"#;

    #[test]
    fn envelope_escapes_credentials() {
        let envelope = login_envelope("dom\\user", "p<a>&'\"");
        assert!(envelope.contains("<username>dom\\user</username>"));
        assert!(envelope.contains("p&lt;a&gt;&amp;&apos;&quot;"));
        assert!(!envelope.contains('\n'));
    }

    #[test]
    fn config_requires_credentials() {
        let mut auth = FbaAuth::default();
        let err = auth
            .parse_config(br#"{"siteUrl":"https://www.contoso.com"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn login_yields_session_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_vti_bin/authentication.asmx"))
            .and(body_string_contains("<username>fba-user</username>"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Set-Cookie", "FedAuth=77u/PD94bWw; path=/; HttpOnly")
                    .set_body_string(LOGIN_OK),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut auth = FbaAuth::default();
        auth.parse_config(
            format!(
                r#"{{"siteUrl":"{}/sites/fba-ok","username":"fba-user","password":"pass"}}"#,
                server.uri()
            )
            .as_bytes(),
        )
        .unwrap();

        let (cookie, exp) = auth.get_auth().await.unwrap();
        assert_eq!(cookie, "FedAuth=77u/PD94bWw");
        assert!(exp > chrono::Utc::now().timestamp());

        // cached within the session timeout; the mock expects one login
        auth.get_auth().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_login_surfaces_the_error_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_vti_bin/authentication.asmx"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_DENIED))
            .mount(&server)
            .await;

        let mut auth = FbaAuth::default();
        auth.parse_config(
            format!(
                r#"{{"siteUrl":"{}/sites/fba-denied","username":"fba-user","password":"wrong"}}"#,
                server.uri()
            )
            .as_bytes(),
        )
        .unwrap();

        let err = auth.get_auth().await.unwrap_err();
        assert!(err.to_string().contains("PasswordNotMatch"));
    }
}

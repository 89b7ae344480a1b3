//! TMG reverse-proxy auth flow (on-premises)
//!
//! Forefront TMG fronts the farm with a forms login at `/CookieAuth.dll`;
//! posting the credentials form yields the proxy session cookie used for
//! all subsequent requests.
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

use super::{AuthStrategy, response_cookies, site_root};
use crate::cache::{self, CacheKey};
use crate::cpass::Cpass;
use crate::error::{Error, Result};

/// Proxy sessions give no expiry hint; refresh hourly
const SESSION_TTL_SECS: i64 = 3600;

/// TMG forms credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TmgAuth {
    pub site_url: String,
    pub username: String,
    pub password: String,
    #[serde(skip)]
    master_key: String,
}

impl TmgAuth {
    async fn handshake(&self) -> Result<(String, i64)> {
        let logon_url = format!("{}/CookieAuth.dll?Logon", site_root(&self.site_url)?);
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let body = format!(
            "curl=Z2F&flags=0&forcedownlevel=0&formdir=3&username={}&password={}&SubmitCreds=Sign+In",
            urlencoding::encode(&self.username),
            urlencoding::encode(&self.password),
        );
        let response = client
            .post(&logon_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let (name, value) = response_cookies(&response)
            .into_iter()
            .next()
            .ok_or_else(|| Error::auth("TMG logon set no session cookie"))?;

        let exp = chrono::Utc::now().timestamp() + SESSION_TTL_SECS;
        Ok((format!("{name}={value}"), exp))
    }
}

#[async_trait]
impl AuthStrategy for TmgAuth {
    fn parse_config(&mut self, config: &[u8]) -> Result<()> {
        let parsed: Self = serde_json::from_slice(config)
            .map_err(|e| Error::config(format!("malformed tmg config: {e}")))?;
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
        "tmg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn empty_site_url_should_not_go() {
        let mut auth = TmgAuth::default();
        let err = auth
            .parse_config(br#"{"username":"u","password":"p"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn logon_form_yields_proxy_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/CookieAuth.dll"))
            .and(body_string_contains("username=tmg-user"))
            .respond_with(
                ResponseTemplate::new(302)
                    .append_header("Set-Cookie", "cadata=proxy-session; path=/; secure")
                    .append_header("Location", "/sites/tmg"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut auth = TmgAuth::default();
        auth.parse_config(
            format!(
                r#"{{"siteUrl":"{}/sites/tmg","username":"tmg-user","password":"pass"}}"#,
                server.uri()
            )
            .as_bytes(),
        )
        .unwrap();

        let (cookie, _) = auth.get_auth().await.unwrap();
        assert_eq!(cookie, "cadata=proxy-session");
    }
}

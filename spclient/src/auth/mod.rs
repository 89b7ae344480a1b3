//! Authentication strategy framework
//!
//! One strategy per supported protocol, all behind [`AuthStrategy`]. A
//! strategy is constructed by [`resolve_strategy`] from the `strategy`
//! discriminator of a JSON config document, fed its config through
//! `parse_config`, and bound to a client. Each instance owns its handshake
//! state exclusively; tokens are shared only through the process-wide
//! [`crate::cache`] keyed by identity.

pub mod addin;
pub mod adfs;
pub mod azurecert;
pub mod azurecreds;
pub mod device;
pub mod fba;
pub mod ntlm;
pub mod saml;
pub mod tmg;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Capability set every authentication protocol adapter implements
#[async_trait]
pub trait AuthStrategy: std::fmt::Debug + Send + Sync {
    /// Decode a JSON config payload into the strategy's fields.
    ///
    /// Fails with a config error on missing required fields. Secret fields
    /// stored through the reversible cipher are decrypted when a master key
    /// was set; values that do not decode are kept as-is.
    fn parse_config(&mut self, config: &[u8]) -> Result<()>;

    /// Master key for the reversible secret cipher; empty means plaintext
    fn set_master_key(&mut self, master_key: &str);

    /// Perform the protocol handshake, returning a bearer token or cookie
    /// string plus its Unix expiry. Cached per identity; repeated calls
    /// inside the validity window do not re-handshake.
    async fn get_auth(&self) -> Result<(String, i64)>;

    /// Mutate an outgoing request with this strategy's credential header.
    /// Calls [`AuthStrategy::get_auth`] internally; a single instance is
    /// self-sufficient. `client` is the pipeline's transport, for protocols
    /// whose handshake must ride the same connection pool as the request.
    async fn set_auth(&self, request: &mut reqwest::Request, client: &reqwest::Client)
    -> Result<()>;

    /// Target site URL the strategy was configured for
    fn site_url(&self) -> &str;

    /// Strategy discriminator name
    fn strategy(&self) -> &'static str;
}

/// Pure mapping from a strategy discriminator to a fresh strategy instance
pub fn resolve_strategy(strategy: &str) -> Result<Box<dyn AuthStrategy>> {
    match strategy {
        "addin" => Ok(Box::new(addin::AddinAuth::default())),
        "adfs" => Ok(Box::new(adfs::AdfsAuth::default())),
        "azurecert" => Ok(Box::new(azurecert::AzureCertAuth::default())),
        "azurecreds" => Ok(Box::new(azurecreds::AzureCredsAuth::default())),
        "device" => Ok(Box::new(device::DeviceAuth::default())),
        "fba" => Ok(Box::new(fba::FbaAuth::default())),
        "ntlm" => Ok(Box::new(ntlm::NtlmAuth::default())),
        "saml" => Ok(Box::new(saml::SamlAuth::default())),
        "tmg" => Ok(Box::new(tmg::TmgAuth::default())),
        other => Err(Error::config(format!("can't resolve the strategy: {other}"))),
    }
}

/// Resolve and parse a strategy from a JSON document carrying a `strategy`
/// discriminator plus strategy-specific fields
pub fn from_json(config: &[u8], master_key: Option<&str>) -> Result<Box<dyn AuthStrategy>> {
    #[derive(Deserialize)]
    struct Probe {
        strategy: Option<String>,
    }
    let probe: Probe = serde_json::from_slice(config)
        .map_err(|e| Error::config(format!("malformed auth config: {e}")))?;
    let name = probe
        .strategy
        .ok_or_else(|| Error::config("auth config has no strategy field"))?;

    let mut auth = resolve_strategy(&name)?;
    if let Some(key) = master_key {
        auth.set_master_key(key);
    }
    auth.parse_config(config)?;
    Ok(auth)
}

/// [`from_json`] over a config file on disk
pub fn from_file(path: impl AsRef<std::path::Path>, master_key: Option<&str>) -> Result<Box<dyn AuthStrategy>> {
    let bytes = std::fs::read(path.as_ref())
        .map_err(|e| Error::config(format!("can't read auth config {:?}: {e}", path.as_ref())))?;
    from_json(&bytes, master_key)
}

pub(crate) const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// `scheme://host[:port]` of a site URL
pub(crate) fn site_root(site_url: &str) -> Result<String> {
    let url = reqwest::Url::parse(site_url)
        .map_err(|e| Error::config(format!("invalid site url {site_url:?}: {e}")))?;
    let origin = url.origin().ascii_serialization();
    if origin == "null" {
        return Err(Error::config(format!("site url {site_url:?} has no host")));
    }
    Ok(origin)
}

pub(crate) fn host_of(site_url: &str) -> Result<String> {
    let url = reqwest::Url::parse(site_url)
        .map_err(|e| Error::config(format!("invalid site url {site_url:?}: {e}")))?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| Error::config(format!("site url {site_url:?} has no host")))
}

/// Escape a credential value for embedding into a SOAP envelope
pub(crate) fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Collapse a readable multi-line template into one wire-ready line
pub(crate) fn compact_xml(template: &str) -> String {
    template
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// `(name, value)` pairs from a response's `Set-Cookie` headers
pub(crate) fn response_cookies(response: &reqwest::Response) -> Vec<(String, String)> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| {
            let pair = v.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Token endpoint response shared by the AAD/ACS grant flows
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: Option<String>,
    expires_on: Option<Value>,
    expires_in: Option<Value>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    /// Extract `(token, unix expiry)`, preferring the endpoint-supplied
    /// expiry and falling back to the token's own `exp` claim
    pub(crate) fn into_token(self) -> Result<(String, i64)> {
        if let Some(error) = self.error {
            let description = self.error_description.unwrap_or_default();
            let description = description.lines().next().unwrap_or_default();
            return Err(Error::auth(format!("{error}: {description}")));
        }
        let token = self
            .access_token
            .ok_or_else(|| Error::auth("token response carries no access_token"))?;

        let exp = if let Some(on) = self.expires_on.as_ref().and_then(coerce_seconds) {
            on
        } else if let Some(within) = self.expires_in.as_ref().and_then(coerce_seconds) {
            chrono::Utc::now().timestamp() + within
        } else {
            crate::cache::jwt_expiry(&token)?
        };
        Ok((token, exp))
    }
}

/// Some token endpoints send numbers, some send numeric strings
fn coerce_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// POST a form to a token endpoint and decode the grant response
pub(crate) async fn post_token_form(
    client: &reqwest::Client,
    url: &str,
    params: &[(&str, &str)],
) -> Result<TokenResponse> {
    let response = client.post(url).form(params).send().await?;
    let status = response.status();
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|_| {
        Error::auth(format!(
            "token endpoint {url} answered {status} with an unreadable body"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_every_known_strategy() {
        for name in [
            "addin",
            "adfs",
            "azurecert",
            "azurecreds",
            "device",
            "fba",
            "ntlm",
            "saml",
            "tmg",
        ] {
            let auth = resolve_strategy(name).unwrap();
            assert_eq!(auth.strategy(), name);
        }
    }

    #[test]
    fn unknown_strategy_is_a_config_error() {
        let err = resolve_strategy("kerberos").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("kerberos"));
    }

    #[test]
    fn from_json_dispatches_on_discriminator() {
        let config = br#"{
            "strategy": "azurecreds",
            "siteUrl": "https://contoso.sharepoint.com/sites/test",
            "tenantId": "e4d43069-8ecb-49c4-8178-5bec83c53e9d",
            "clientId": "628cc712-c9a4-48f0-a059-af64bdbb4be5",
            "username": "user@contoso.com",
            "password": "password"
        }"#;
        let auth = from_json(config, None).unwrap();
        assert_eq!(auth.strategy(), "azurecreds");
        assert_eq!(auth.site_url(), "https://contoso.sharepoint.com/sites/test");
    }

    #[test]
    fn from_json_requires_discriminator() {
        let err = from_json(br#"{"siteUrl": "https://contoso.sharepoint.com"}"#, None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn escape_xml_covers_reserved_chars() {
        assert_eq!(
            escape_xml(r#"a&b<c>d"e'f"#),
            "a&amp;b&lt;c&gt;d&quot;e&apos;f"
        );
    }

    #[test]
    fn compact_xml_strips_template_whitespace() {
        let template = "\n  <a>\n    <b>x</b>\n  </a>\n";
        assert_eq!(compact_xml(template), "<a><b>x</b></a>");
    }

    #[test]
    fn site_root_drops_path() {
        assert_eq!(
            site_root("https://contoso.sharepoint.com/sites/test").unwrap(),
            "https://contoso.sharepoint.com"
        );
    }

    #[test]
    fn token_response_prefers_expires_on() {
        let resp: TokenResponse = serde_json::from_str(
            r#"{"access_token":"t","expires_on":"1700000000"}"#,
        )
        .unwrap();
        assert_eq!(resp.into_token().unwrap(), ("t".to_string(), 1700000000));
    }

    #[test]
    fn token_response_surfaces_grant_errors() {
        let resp: TokenResponse = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"AADSTS70002: bad creds\nTrace ID: x"}"#,
        )
        .unwrap();
        let err = resp.into_token().unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
        assert!(err.to_string().contains("AADSTS70002"));
        assert!(!err.to_string().contains("Trace ID"));
    }
}

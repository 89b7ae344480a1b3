//! Process-wide token cache
//!
//! Auth strategies funnel their handshakes through [`TokenCache::get_or_refresh`]
//! so that repeated requests against the same identity reuse one token until
//! it nears expiry. Entries are keyed by a composite identity fingerprint and
//! guarded by key-scoped locks: refreshes for unrelated identities never
//! serialize, while concurrent lookups for the same key ride a single
//! handshake.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Tokens are refreshed this many seconds before their actual expiry
const EXPIRY_MARGIN_SECS: i64 = 60;

static STORAGE: Lazy<TokenCache> = Lazy::new(TokenCache::new);

/// The shared process-wide cache used by all auth strategies
pub fn shared() -> &'static TokenCache {
    &STORAGE
}

/// Composite fingerprint of one independent token refresh lifecycle.
///
/// Two configs differing in any identity field never share a cache entry.
/// The secret participates as a SHA-256 fingerprint, never in clear.
#[derive(Debug, Clone)]
pub struct CacheKey {
    host: String,
    strategy: &'static str,
    tenant: String,
    client: String,
    identity: String,
    secret_hash: String,
}

impl CacheKey {
    pub fn new(site_url: &str, strategy: &'static str) -> Result<Self> {
        let url = reqwest::Url::parse(site_url)
            .map_err(|e| Error::config(format!("invalid site url {site_url:?}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::config(format!("site url {site_url:?} has no host")))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(Self {
            host,
            strategy,
            tenant: String::new(),
            client: String::new(),
            identity: String::new(),
            secret_hash: String::new(),
        })
    }

    pub fn tenant(mut self, tenant: &str) -> Self {
        self.tenant = tenant.to_string();
        self
    }

    pub fn client(mut self, client: &str) -> Self {
        self.client = client.to_string();
        self
    }

    pub fn identity(mut self, identity: &str) -> Self {
        self.identity = identity.to_string();
        self
    }

    pub fn secret(mut self, secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        self.secret_hash = digest
            .iter()
            .take(16)
            .map(|b| format!("{b:02x}"))
            .collect();
        self
    }

    fn as_string(&self) -> String {
        format!(
            "{}#{}#{}#{}#{}#{}",
            self.host, self.strategy, self.tenant, self.client, self.identity, self.secret_hash
        )
    }
}

#[derive(Debug, Clone)]
struct Token {
    value: String,
    expires_at: i64,
}

type Slot = Arc<tokio::sync::Mutex<Option<Token>>>;

/// Token store with key-scoped refresh locking
pub struct TokenCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached token for `key`, or run `handshake` to obtain one.
    ///
    /// The handshake result `(token, exp)` carries the raw Unix expiry; the
    /// cache stores it with a safety margin applied. A token already at or
    /// past its margined expiry is handed back to the caller but never
    /// cached, so the next lookup is an immediate miss. Handshake errors are
    /// never cached.
    pub async fn get_or_refresh<F, Fut>(&self, key: &CacheKey, handshake: F) -> Result<(String, i64)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, i64)>>,
    {
        let slot = self.slot(key);
        let mut entry = slot.lock().await;

        let now = chrono::Utc::now().timestamp();
        if let Some(token) = entry.as_ref() {
            if now < token.expires_at {
                return Ok((token.value.clone(), token.expires_at));
            }
            *entry = None;
        }

        let (value, exp) = handshake().await?;
        let expires_at = exp - EXPIRY_MARGIN_SECS;
        if expires_at > now {
            *entry = Some(Token {
                value: value.clone(),
                expires_at,
            });
        }
        Ok((value, expires_at))
    }

    /// Drop all entries; subsequent lookups are misses
    pub fn clear(&self) {
        self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        slots.entry(key.as_string()).or_default().clone()
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the `exp` claim of a bearer JWT.
///
/// Fails when the token does not have exactly three dot-delimited segments
/// or its payload is not base64url. A payload without an `exp` claim yields
/// zero, which the cache treats as already expired.
pub fn jwt_expiry(token: &str) -> Result<i64> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(Error::auth("incorrect jwt"));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|_| Error::auth("can't decode jwt base64 string"))?;

    #[derive(serde::Deserialize)]
    struct Claims {
        #[serde(default)]
        exp: i64,
    }
    let claims: Claims = serde_json::from_slice(&payload)
        .map_err(|_| Error::auth("can't decode jwt payload"))?;
    Ok(claims.exp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn key(identity: &str) -> CacheKey {
        CacheKey::new("https://contoso.sharepoint.com/sites/test", "test")
            .unwrap()
            .identity(identity)
            .secret("secret")
    }

    fn fake_jwt(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("{header}.{payload}.sig")
    }

    #[tokio::test]
    async fn second_lookup_reuses_token_without_handshake() {
        let cache = TokenCache::new();
        let calls = AtomicU32::new(0);
        let exp = chrono::Utc::now().timestamp() + 3600;

        for _ in 0..2 {
            let (token, _) = cache
                .get_or_refresh(&key("reuse@contoso.com"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(("token-1".to_string(), exp))
                })
                .await
                .unwrap();
            assert_eq!(token, "token-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_token_is_not_cached() {
        let cache = TokenCache::new();
        let calls = AtomicU32::new(0);
        // raw expiry within the safety margin: margined TTL is non-positive
        let exp = chrono::Utc::now().timestamp() + 30;

        for _ in 0..2 {
            cache
                .get_or_refresh(&key("expired@contoso.com"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(("short-lived".to_string(), exp))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn handshake_error_is_not_cached() {
        let cache = TokenCache::new();
        let res = cache
            .get_or_refresh(&key("broken@contoso.com"), || async {
                Err(Error::auth("rejected"))
            })
            .await;
        assert!(res.is_err());

        let exp = chrono::Utc::now().timestamp() + 3600;
        let (token, _) = cache
            .get_or_refresh(&key("broken@contoso.com"), || async {
                Ok(("recovered".to_string(), exp))
            })
            .await
            .unwrap();
        assert_eq!(token, "recovered");
    }

    #[tokio::test]
    async fn distinct_identities_get_distinct_entries() {
        let cache = TokenCache::new();
        let exp = chrono::Utc::now().timestamp() + 3600;
        let (a, _) = cache
            .get_or_refresh(&key("alice@contoso.com"), || async {
                Ok(("token-a".to_string(), exp))
            })
            .await
            .unwrap();
        let (b, _) = cache
            .get_or_refresh(&key("bob@contoso.com"), || async {
                Ok(("token-b".to_string(), exp))
            })
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_handshake() {
        let cache = Arc::new(TokenCache::new());
        let calls = Arc::new(AtomicU32::new(0));
        let exp = chrono::Utc::now().timestamp() + 3600;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(&key("flight@contoso.com"), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(("shared".to_string(), exp))
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            let (token, _) = handle.await.unwrap();
            assert_eq!(token, "shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jwt_expiry_decodes_exp_claim() {
        assert_eq!(jwt_expiry(&fake_jwt(1700000000)).unwrap(), 1700000000);
    }

    #[test]
    fn jwt_expiry_requires_three_segments() {
        assert!(jwt_expiry("only.two").is_err());
        assert!(jwt_expiry("a.b.c.d").is_err());
    }

    #[test]
    fn jwt_expiry_rejects_bad_base64() {
        assert!(jwt_expiry("head.@@not-base64@@.sig").is_err());
    }

    #[test]
    fn secret_never_appears_in_key() {
        let k = key("user@contoso.com");
        assert!(!k.as_string().contains("secret"));
    }
}

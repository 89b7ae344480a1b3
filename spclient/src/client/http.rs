//! HTTP facade over the pipeline
//!
//! The four primitives entity builders consume. `update` and `delete` ride
//! POST with a method-override header because intermediate proxies commonly
//! reject the native verbs.

use std::sync::Arc;

use reqwest::Method;

use super::{RequestConfig, SPClient};
use crate::error::Result;

/// Pipeline primitives bound to one [`SPClient`]
#[derive(Clone)]
pub struct HttpClient {
    client: Arc<SPClient>,
}

impl HttpClient {
    pub fn new(client: Arc<SPClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &SPClient {
        &self.client
    }

    pub async fn get(&self, url: &str, config: Option<&RequestConfig>) -> Result<Vec<u8>> {
        self.client.execute(Method::GET, url, None, config).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        config: Option<&RequestConfig>,
    ) -> Result<Vec<u8>> {
        self.client.execute(Method::POST, url, Some(body), config).await
    }

    /// Partial modification with MERGE semantics: `If-Match: *` plus an
    /// `X-HTTP-Method: MERGE` override unless the caller set their own
    pub async fn update(
        &self,
        url: &str,
        body: Vec<u8>,
        config: Option<&RequestConfig>,
    ) -> Result<Vec<u8>> {
        let mut conf = config.cloned().unwrap_or_default();
        merge_default(&mut conf, "If-Match", "*");
        merge_default(&mut conf, "X-HTTP-Method", "MERGE");
        self.client.execute(Method::POST, url, Some(body), Some(&conf)).await
    }

    /// Delete with the verb-override convention; ignores the response body
    pub async fn delete(&self, url: &str, config: Option<&RequestConfig>) -> Result<()> {
        let mut conf = config.cloned().unwrap_or_default();
        merge_default(&mut conf, "If-Match", "*");
        merge_default(&mut conf, "X-HTTP-Method", "DELETE");
        self.client.execute(Method::POST, url, None, Some(&conf)).await?;
        Ok(())
    }
}

fn merge_default(config: &mut RequestConfig, name: &str, value: &str) {
    let present = config
        .headers
        .keys()
        .any(|existing| existing.eq_ignore_ascii_case(name));
    if !present {
        config.headers.insert(name.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::auth::AuthStrategy;

    #[derive(Debug)]
    struct NoAuth {
        site_url: String,
    }

    #[async_trait]
    impl AuthStrategy for NoAuth {
        fn parse_config(&mut self, _config: &[u8]) -> Result<()> {
            Ok(())
        }
        fn set_master_key(&mut self, _master_key: &str) {}
        async fn get_auth(&self) -> Result<(String, i64)> {
            Ok((String::new(), 0))
        }
        async fn set_auth(
            &self,
            _request: &mut reqwest::Request,
            _client: &reqwest::Client,
        ) -> Result<()> {
            Ok(())
        }
        fn site_url(&self) -> &str {
            &self.site_url
        }
        fn strategy(&self) -> &'static str {
            "noauth"
        }
    }

    fn http_for(server: &MockServer) -> HttpClient {
        HttpClient::new(Arc::new(
            SPClient::new(NoAuth {
                site_url: server.uri(),
            })
            .unwrap(),
        ))
    }

    async fn mount_contextinfo(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/_api/contextinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"d":{"GetContextWebInformation":{"FormDigestValue":"digest","FormDigestTimeoutSeconds":1800}}}"#,
            ))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn update_sets_merge_semantics_by_default() {
        let server = MockServer::start().await;
        mount_contextinfo(&server).await;
        Mock::given(method("POST"))
            .and(path("/_api/web/lists/getByTitle('Custom')"))
            .and(header("If-Match", "*"))
            .and(header("X-HTTP-Method", "MERGE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let http = http_for(&server);
        http.update(
            &format!("{}/_api/web/lists/getByTitle('Custom')", server.uri()),
            br#"{"Title":"Renamed"}"#.to_vec(),
            None,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn update_respects_caller_precondition() {
        let server = MockServer::start().await;
        mount_contextinfo(&server).await;
        Mock::given(method("POST"))
            .and(path("/_api/web/lists/getByTitle('Custom')"))
            .and(header("If-Match", "\"3\""))
            .and(header("X-HTTP-Method", "MERGE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let http = http_for(&server);
        let config = RequestConfig::new().header("If-Match", "\"3\"");
        http.update(
            &format!("{}/_api/web/lists/getByTitle('Custom')", server.uri()),
            br#"{"Title":"Renamed"}"#.to_vec(),
            Some(&config),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn delete_uses_verb_override() {
        let server = MockServer::start().await;
        mount_contextinfo(&server).await;
        Mock::given(method("POST"))
            .and(path("/_api/web/lists/getByTitle('Old')"))
            .and(header("X-HTTP-Method", "DELETE"))
            .and(header("If-Match", "*"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let http = http_for(&server);
        http.delete(
            &format!("{}/_api/web/lists/getByTitle('Old')", server.uri()),
            None,
        )
        .await
        .unwrap();
    }
}

//! NTLM auth flow (on-premises)
//!
//! Computes the NTLMv2 negotiate/challenge/authenticate exchange in-crate.
//! NTLM authenticates a connection rather than issuing a token, so the
//! challenge legs run over the pipeline's own client: the authenticated
//! keep-alive connection is then reused for the actual request.
//!
//! Config sample:
//! ```json
//! {
//!     "siteUrl": "https://www.contoso.com/sites/test",
//!     "domain": "CONTOSO",
//!     "username": "user",
//!     "password": "password"
//! }
//! ```

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::Md5;
use rand::RngCore;
use reqwest::header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};
use serde::Deserialize;
use sha2::Digest;

use super::AuthStrategy;
use crate::cpass::Cpass;
use crate::error::{Error, Result};

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_OEM: u32 = 0x0000_0002;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

/// Seconds between the Windows epoch (1601) and the Unix epoch
const WINDOWS_EPOCH_OFFSET: u64 = 11_644_473_600;

/// NTLM domain credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NtlmAuth {
    pub site_url: String,
    pub domain: String,
    pub username: String,
    pub password: String,
    #[serde(skip)]
    master_key: String,
}

struct Challenge {
    server_challenge: [u8; 8],
    target_info: Vec<u8>,
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac = Hmac::<Md5>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// NTOWFv2: HMAC-MD5 of the uppercased user + domain under the MD4 password
/// hash
fn ntowf_v2(password: &str, username: &str, domain: &str) -> [u8; 16] {
    let password_hash: [u8; 16] = Md4::digest(utf16le(password)).into();
    let identity = utf16le(&format!("{}{}", username.to_uppercase(), domain));
    hmac_md5(&password_hash, &identity)
}

/// Type 1 negotiate message with empty domain/workstation fields
fn negotiate_message() -> Vec<u8> {
    let flags = NEGOTIATE_UNICODE
        | NEGOTIATE_OEM
        | REQUEST_TARGET
        | NEGOTIATE_NTLM
        | NEGOTIATE_ALWAYS_SIGN
        | NEGOTIATE_EXTENDED_SECURITY
        | NEGOTIATE_128
        | NEGOTIATE_56;

    let mut message = Vec::with_capacity(32);
    message.extend_from_slice(SIGNATURE);
    message.extend_from_slice(&1u32.to_le_bytes());
    message.extend_from_slice(&flags.to_le_bytes());
    // empty domain and workstation security buffers pointing past the header
    for _ in 0..2 {
        message.extend_from_slice(&0u16.to_le_bytes());
        message.extend_from_slice(&0u16.to_le_bytes());
        message.extend_from_slice(&32u32.to_le_bytes());
    }
    message
}

/// Server challenge and target info out of a type 2 message
fn parse_challenge(data: &[u8]) -> Result<Challenge> {
    if data.len() < 48 || &data[..8] != SIGNATURE {
        return Err(Error::auth("malformed NTLM challenge"));
    }
    if u32::from_le_bytes(data[8..12].try_into().unwrap_or_default()) != 2 {
        return Err(Error::auth("unexpected NTLM message type in challenge"));
    }

    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(&data[24..32]);

    let info_len = u16::from_le_bytes([data[40], data[41]]) as usize;
    let info_offset = u32::from_le_bytes(data[44..48].try_into().unwrap_or_default()) as usize;
    if info_offset + info_len > data.len() {
        return Err(Error::auth("NTLM challenge target info out of bounds"));
    }
    let target_info = data[info_offset..info_offset + info_len].to_vec();

    Ok(Challenge {
        server_challenge,
        target_info,
    })
}

/// Type 3 authenticate message carrying the NTLMv2 responses
fn authenticate_message(
    challenge: &Challenge,
    domain: &str,
    username: &str,
    password: &str,
) -> Vec<u8> {
    let ntowf = ntowf_v2(password, username, domain);

    let mut client_nonce = [0u8; 8];
    rand::rng().fill_bytes(&mut client_nonce);

    let timestamp =
        (chrono::Utc::now().timestamp() as u64 + WINDOWS_EPOCH_OFFSET) * 10_000_000;

    // NTLMv2 blob: version, timestamp, client nonce, target info
    let mut blob = Vec::new();
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(&client_nonce);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&challenge.target_info);
    blob.extend_from_slice(&[0u8; 4]);

    let mut proof_input = Vec::with_capacity(8 + blob.len());
    proof_input.extend_from_slice(&challenge.server_challenge);
    proof_input.extend_from_slice(&blob);
    let nt_proof = hmac_md5(&ntowf, &proof_input);

    let mut nt_response = Vec::with_capacity(16 + blob.len());
    nt_response.extend_from_slice(&nt_proof);
    nt_response.extend_from_slice(&blob);

    let mut lm_input = [0u8; 16];
    lm_input[..8].copy_from_slice(&challenge.server_challenge);
    lm_input[8..].copy_from_slice(&client_nonce);
    let mut lm_response = Vec::with_capacity(24);
    lm_response.extend_from_slice(&hmac_md5(&ntowf, &lm_input));
    lm_response.extend_from_slice(&client_nonce);

    let domain_bytes = utf16le(domain);
    let user_bytes = utf16le(username);
    let workstation_bytes: Vec<u8> = Vec::new();
    let session_key: Vec<u8> = Vec::new();

    let flags = NEGOTIATE_UNICODE
        | REQUEST_TARGET
        | NEGOTIATE_NTLM
        | NEGOTIATE_ALWAYS_SIGN
        | NEGOTIATE_EXTENDED_SECURITY
        | NEGOTIATE_TARGET_INFO
        | NEGOTIATE_128
        | NEGOTIATE_56;

    const HEADER_LEN: usize = 64;
    let payload_order: [&[u8]; 6] = [
        &domain_bytes,
        &user_bytes,
        &workstation_bytes,
        &lm_response,
        &nt_response,
        &session_key,
    ];

    // security buffer table precedes the payload in lm, nt, domain, user,
    // workstation, session key order
    let mut offsets = [0usize; 6];
    let mut cursor = HEADER_LEN;
    for (i, part) in payload_order.iter().enumerate() {
        offsets[i] = cursor;
        cursor += part.len();
    }

    let buffer = |data: &[u8], offset: usize| {
        let mut field = Vec::with_capacity(8);
        field.extend_from_slice(&(data.len() as u16).to_le_bytes());
        field.extend_from_slice(&(data.len() as u16).to_le_bytes());
        field.extend_from_slice(&(offset as u32).to_le_bytes());
        field
    };

    let mut message = Vec::with_capacity(cursor);
    message.extend_from_slice(SIGNATURE);
    message.extend_from_slice(&3u32.to_le_bytes());
    message.extend_from_slice(&buffer(&lm_response, offsets[3]));
    message.extend_from_slice(&buffer(&nt_response, offsets[4]));
    message.extend_from_slice(&buffer(&domain_bytes, offsets[0]));
    message.extend_from_slice(&buffer(&user_bytes, offsets[1]));
    message.extend_from_slice(&buffer(&workstation_bytes, offsets[2]));
    message.extend_from_slice(&buffer(&session_key, offsets[5]));
    message.extend_from_slice(&flags.to_le_bytes());
    for part in payload_order {
        message.extend_from_slice(part);
    }
    message
}

impl NtlmAuth {
    /// Run the negotiate/challenge legs against the site and produce the
    /// `Authorization` value carrying the type 3 response
    async fn handshake(&self, client: &reqwest::Client) -> Result<String> {
        let type1 = BASE64.encode(negotiate_message());
        let response = client
            .get(&self.site_url)
            .header(AUTHORIZATION, format!("NTLM {type1}"))
            .send()
            .await?;

        let challenge_b64 = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| v.trim().strip_prefix("NTLM "))
            .ok_or_else(|| Error::auth("endpoint offered no NTLM challenge"))?;
        let type2 = BASE64
            .decode(challenge_b64.trim())
            .map_err(|e| Error::auth(format!("NTLM challenge is not base64: {e}")))?;

        let challenge = parse_challenge(&type2)?;
        let type3 = authenticate_message(&challenge, &self.domain, &self.username, &self.password);
        Ok(format!("NTLM {}", BASE64.encode(type3)))
    }
}

#[async_trait]
impl AuthStrategy for NtlmAuth {
    fn parse_config(&mut self, config: &[u8]) -> Result<()> {
        let parsed: Self = serde_json::from_slice(config)
            .map_err(|e| Error::config(format!("malformed ntlm config: {e}")))?;
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

    /// NTLM authenticates the connection, not the principal: there is no
    /// reusable token, so this always reports an immediate expiry and the
    /// real work happens in [`AuthStrategy::set_auth`].
    async fn get_auth(&self) -> Result<(String, i64)> {
        Ok((String::new(), 0))
    }

    async fn set_auth(
        &self,
        request: &mut reqwest::Request,
        client: &reqwest::Client,
    ) -> Result<()> {
        self.get_auth().await?;
        let authorization = self.handshake(client).await?;
        let value = HeaderValue::from_str(&authorization)
            .map_err(|e| Error::auth(format!("NTLM response is not a valid header value: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    fn site_url(&self) -> &str {
        &self.site_url
    }

    fn strategy(&self) -> &'static str {
        "ntlm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn type2_message(challenge: [u8; 8]) -> Vec<u8> {
        // minimal target info: NetBIOS domain av-pair plus terminator
        let name = utf16le("CONTOSO");
        let mut info = Vec::new();
        info.extend_from_slice(&2u16.to_le_bytes());
        info.extend_from_slice(&(name.len() as u16).to_le_bytes());
        info.extend_from_slice(&name);
        info.extend_from_slice(&0u16.to_le_bytes());
        info.extend_from_slice(&0u16.to_le_bytes());

        let mut message = Vec::new();
        message.extend_from_slice(SIGNATURE);
        message.extend_from_slice(&2u32.to_le_bytes());
        // target name buffer: empty, past the 48-byte header
        message.extend_from_slice(&0u16.to_le_bytes());
        message.extend_from_slice(&0u16.to_le_bytes());
        message.extend_from_slice(&48u32.to_le_bytes());
        message.extend_from_slice(&(NEGOTIATE_UNICODE | NEGOTIATE_NTLM).to_le_bytes());
        message.extend_from_slice(&challenge);
        message.extend_from_slice(&[0u8; 8]);
        message.extend_from_slice(&(info.len() as u16).to_le_bytes());
        message.extend_from_slice(&(info.len() as u16).to_le_bytes());
        message.extend_from_slice(&48u32.to_le_bytes());
        message.extend_from_slice(&info);
        message
    }

    #[test]
    fn negotiate_message_layout() {
        let message = negotiate_message();
        assert_eq!(&message[..8], SIGNATURE);
        assert_eq!(u32::from_le_bytes(message[8..12].try_into().unwrap()), 1);
        assert_eq!(message.len(), 32);
    }

    #[test]
    fn challenge_round_trips_through_parser() {
        let type2 = type2_message([7, 7, 7, 7, 7, 7, 7, 7]);
        let challenge = parse_challenge(&type2).unwrap();
        assert_eq!(challenge.server_challenge, [7u8; 8]);
        assert!(!challenge.target_info.is_empty());
    }

    #[test]
    fn parser_rejects_garbage() {
        assert!(parse_challenge(b"definitely not ntlm").is_err());
        assert!(parse_challenge(&negotiate_message()).is_err());
    }

    #[test]
    fn authenticate_message_embeds_proof_over_challenge() {
        let type2 = type2_message([1, 2, 3, 4, 5, 6, 7, 8]);
        let challenge = parse_challenge(&type2).unwrap();
        let message = authenticate_message(&challenge, "CONTOSO", "user", "password");

        assert_eq!(&message[..8], SIGNATURE);
        assert_eq!(u32::from_le_bytes(message[8..12].try_into().unwrap()), 3);

        // recompute the proof from the embedded blob and compare
        let nt_len = u16::from_le_bytes([message[20], message[21]]) as usize;
        let nt_offset = u32::from_le_bytes(message[24..28].try_into().unwrap()) as usize;
        let nt_response = &message[nt_offset..nt_offset + nt_len];
        let (proof, blob) = nt_response.split_at(16);

        let ntowf = ntowf_v2("password", "user", "CONTOSO");
        let mut input = challenge.server_challenge.to_vec();
        input.extend_from_slice(blob);
        assert_eq!(proof, hmac_md5(&ntowf, &input));
    }

    #[tokio::test]
    async fn set_auth_answers_the_challenge() {
        let server = MockServer::start().await;
        let type2 = BASE64.encode(type2_message([9u8; 8]));

        Mock::given(method("GET"))
            .and(path("/sites/ntlm"))
            .and(header_exists("Authorization"))
            .respond_with(
                ResponseTemplate::new(401)
                    .append_header("WWW-Authenticate", format!("NTLM {type2}").as_str()),
            )
            .mount(&server)
            .await;

        let mut auth = NtlmAuth::default();
        auth.parse_config(
            format!(
                r#"{{"siteUrl":"{}/sites/ntlm","domain":"CONTOSO","username":"user","password":"password"}}"#,
                server.uri()
            )
            .as_bytes(),
        )
        .unwrap();

        let client = reqwest::Client::new();
        let mut request = reqwest::Request::new(
            reqwest::Method::GET,
            reqwest::Url::parse(&format!("{}/sites/ntlm/_api/web", server.uri())).unwrap(),
        );
        auth.set_auth(&mut request, &client).await.unwrap();

        let header = request.headers().get(AUTHORIZATION).unwrap().to_str().unwrap();
        let type3 = BASE64.decode(header.strip_prefix("NTLM ").unwrap()).unwrap();
        assert_eq!(&type3[..8], SIGNATURE);
        assert_eq!(u32::from_le_bytes(type3[8..12].try_into().unwrap()), 3);
    }
}

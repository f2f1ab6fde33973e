//! Signed requests against the Bittrex v1.1 private API
//!
//! The signature is a hex HMAC-SHA512 of the full request URI, so the order
//! of the query fields (`apikey`, `nonce`, then caller params) is part of the
//! contract with the exchange.

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::Value;
use sha2::Sha512;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::form_urlencoded;

use crate::error::{ExchangeError, ExchangeResult};

type HmacSha512 = Hmac<Sha512>;

pub const DEFAULT_API_HOST: &str = "bittrex.com";
pub const DEFAULT_API_VERSION: &str = "v1.1";
const PRIVATE_TIMEOUT: Duration = Duration::from_secs(60);

const API_KEY_VAR: &str = "BITTREX_API_KEY";
const API_SECRET_VAR: &str = "BITTREX_API_SECRET";

/// API key pair for private calls
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read `BITTREX_API_KEY` / `BITTREX_API_SECRET`; both must be non-empty
    pub fn from_env() -> ExchangeResult<Self> {
        let api_key = read_var(API_KEY_VAR)?;
        let api_secret = read_var(API_SECRET_VAR)?;
        Ok(Self::new(api_key, api_secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}

fn read_var(name: &'static str) -> ExchangeResult<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ExchangeError::MissingCredential(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

/// A fully built private request, ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub http_method: HttpMethod,
    pub uri: String,
    /// Form-encoded payload (nonce first, then caller params)
    pub body: String,
    pub nonce: String,
    /// Hex HMAC-SHA512 of `uri`
    pub signature: String,
}

/// Client for the signed private API
#[derive(Clone)]
pub struct PrivateClient {
    client: Client,
    host: String,
    version: String,
    credentials: Credentials,
}

impl PrivateClient {
    pub fn new(credentials: Credentials) -> ExchangeResult<Self> {
        let client = Client::builder().timeout(PRIVATE_TIMEOUT).build()?;
        Ok(Self {
            client,
            host: DEFAULT_API_HOST.to_string(),
            version: DEFAULT_API_VERSION.to_string(),
            credentials,
        })
    }

    pub fn with_host(mut self, host: impl Into<String>, version: impl Into<String>) -> Self {
        self.host = host.into();
        self.version = version.into();
        self
    }

    /// Build the signed request for `method` (e.g. `/account/getbalance`).
    /// A caller param named `nonce` replaces the generated nonce.
    pub fn build_request(
        &self,
        method: &str,
        params: &[(&str, &str)],
        nonce: u64,
        http_method: HttpMethod,
    ) -> ExchangeResult<SignedRequest> {
        let nonce = params
            .iter()
            .find(|(key, _)| *key == "nonce")
            .map(|(_, value)| value.to_string())
            .unwrap_or_else(|| nonce.to_string());

        let extra: Vec<(&str, &str)> = params
            .iter()
            .filter(|(key, _)| *key != "nonce")
            .copied()
            .collect();

        let mut uri = format!(
            "https://{}/api/{}{}?apikey={}&nonce={}",
            self.host, self.version, method, self.credentials.api_key, nonce
        );
        let query = encode_pairs(&extra);
        if !query.is_empty() {
            uri.push('&');
            uri.push_str(&query);
        }

        let mut payload = vec![("nonce", nonce.as_str())];
        payload.extend(extra.iter().copied());
        let body = encode_pairs(&payload);

        let signature = sign(&uri, &self.credentials.api_secret)?;

        Ok(SignedRequest {
            http_method,
            uri,
            body,
            nonce,
            signature,
        })
    }

    /// Sign and send a private call, returning the decoded JSON payload
    pub async fn call(
        &self,
        method: &str,
        params: &[(&str, &str)],
        http_method: HttpMethod,
    ) -> ExchangeResult<Value> {
        let request = self.build_request(method, params, current_nonce(), http_method)?;

        debug!(method, nonce = %request.nonce, "Calling private Bittrex API");

        let builder = match request.http_method {
            HttpMethod::Get => self.client.get(&request.uri),
            HttpMethod::Post => self.client.post(&request.uri),
        };

        let response = builder
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("Key", &self.credentials.api_key)
            .header("apisign", &request.signature)
            .body(request.body)
            .send()
            .await?;

        let body = response.text().await?;
        parse_private_response(&body)
    }
}

/// Whole seconds since the Unix epoch
pub fn current_nonce() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Hex HMAC-SHA512 of `message` keyed with `secret`
pub fn sign(message: &str, secret: &str) -> ExchangeResult<String> {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).map_err(|_| ExchangeError::InvalidSecret)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn encode_pairs(pairs: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish()
}

/// Decode a private API body, turning a truthy `error` field into
/// [`ExchangeError::Api`]
pub fn parse_private_response(body: &str) -> ExchangeResult<Value> {
    let payload: Value = serde_json::from_str(body).map_err(|source| ExchangeError::Decode {
        body: body.to_string(),
        source,
    })?;

    if let Some(error) = payload.get("error").filter(|e| is_truthy(e)) {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(ExchangeError::Api(message));
    }

    Ok(payload)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

//! Registry authentication method negotiation
//!
//! Probes the registry `/v2/` endpoint, parses the `Www-Authenticate`
//! challenge and obtains a token through the negotiated method: `None`
//! (open registry), `Basic` (credentials are the token) or `Bearer`
//! (token issued by a separate authentication service).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

use crate::error::{LstagsError, Result};

/// Authentication method negotiated with the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMethod {
    None,
    Basic,
    Bearer,
}

impl std::fmt::Display for TokenMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenMethod::None => "None",
            TokenMethod::Basic => "Basic",
            TokenMethod::Bearer => "Bearer",
        };

        f.write_str(s)
    }
}

/// Token obtained from an authentication service (or synthesized for the
/// `None`/`Basic` methods)
#[derive(Debug, Clone)]
pub struct Token {
    method: TokenMethod,
    token: String,
    expires_in: u64,
}

impl Token {
    pub fn none() -> Self {
        Self {
            method: TokenMethod::None,
            token: String::new(),
            expires_in: 0,
        }
    }

    pub fn method(&self) -> TokenMethod {
        self.method
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    /// Value for the `Authorization` request header
    pub fn auth_header(&self) -> String {
        format!("{} {}", self.method, self.token).trim_end().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub method: String,
    pub params: HashMap<String, String>,
}

/// Parses a `Www-Authenticate` header into method and `k="v"` parameters.
/// A missing header means the registry is open (method `None`).
pub fn parse_www_authenticate(header: Option<&str>) -> Result<AuthChallenge> {
    let header = match header {
        Some(h) => h,
        None => "None realm=none",
    };

    let (method, param_string) = header.split_once(' ').ok_or_else(|| {
        LstagsError::Auth(format!("unexpected 'Www-Authenticate' header: {}", header))
    })?;

    let mut params = HashMap::new();
    for key_value in param_string.split(',') {
        if let Some((key, value)) = key_value.split_once('=') {
            params.insert(
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }

    Ok(AuthChallenge {
        method: method.to_lowercase(),
        params,
    })
}

#[derive(Debug, Deserialize)]
struct BearerResponse {
    token: String,
    #[serde(default)]
    expires_in: u64,
}

async fn request_basic_token(
    http: &reqwest::Client,
    url: &str,
    username: &str,
    password: &str,
) -> Result<Token> {
    let resp = http
        .get(url)
        .basic_auth(username, Some(password))
        .send()
        .await?;

    let status = resp.status().as_u16();
    if status != 200 && status != 403 {
        return Err(LstagsError::Auth(format!(
            "[AUTH::BASIC] bad response status: {} >> {}",
            status, url
        )));
    }

    // The base64 pair we just sent is the token itself
    Ok(Token {
        method: TokenMethod::Basic,
        token: BASE64.encode(format!("{}:{}", username, password)),
        expires_in: 0,
    })
}

async fn request_bearer_token(
    http: &reqwest::Client,
    username: &str,
    password: &str,
    scope: &str,
    params: &HashMap<String, String>,
) -> Result<Token> {
    let realm = params
        .get("realm")
        .ok_or_else(|| LstagsError::Auth("no realm in 'Www-Authenticate' header".to_string()))?;

    let mut token_url = url::Url::parse(realm)
        .map_err(|e| LstagsError::Auth(format!("bad authentication realm '{}': {}", realm, e)))?;

    token_url
        .query_pairs_mut()
        .append_pair("service", params.get("service").map(String::as_str).unwrap_or(""))
        .append_pair("scope", scope);

    let mut request = http.get(token_url.clone());
    if !username.is_empty() && !password.is_empty() {
        request = request.basic_auth(username, Some(password));
    }

    let resp = request.send().await?;

    if resp.status().as_u16() != 200 {
        return Err(LstagsError::Auth(format!(
            "[AUTH::BEARER] bad response status: {} >> {}",
            resp.status(),
            token_url
        )));
    }

    let bearer: BearerResponse = resp.json().await?;

    Ok(Token {
        method: TokenMethod::Bearer,
        token: bearer.token,
        expires_in: bearer.expires_in,
    })
}

/// Obtains a token for the given registry URL and scope: detects the
/// authentication method from the `/v2/` probe, then delegates to the
/// method-specific acquisition. A failing `Basic` attempt degrades to an
/// anonymous `None` token so open registries behind misconfigured proxies
/// keep working.
pub async fn new_token(
    http: &reqwest::Client,
    url: &str,
    username: &str,
    password: &str,
    scope: &str,
) -> Result<Token> {
    let resp = http.get(url).send().await?;

    let www_authenticate = resp
        .headers()
        .get("www-authenticate")
        .and_then(|h| h.to_str().ok())
        .map(|h| h.to_string());

    let challenge = parse_www_authenticate(www_authenticate.as_deref())?;

    match challenge.method.as_str() {
        "none" => Ok(Token::none()),
        "basic" => match request_basic_token(http, url, username, password).await {
            Ok(token) => Ok(token),
            Err(_) => Ok(Token::none()),
        },
        "bearer" => request_bearer_token(http, username, password, scope, &challenge.params).await,
        method => Err(LstagsError::Auth(format!(
            "unknown authentication method: {}",
            method
        ))),
    }
}

/// Cache of already obtained tokens, keyed by registry host or by a
/// registry-qualified repository path. Prevents excess token requests
/// (error 429 on busy registries). An optional delay throttles issuance
/// of new tokens.
pub struct TokenCache {
    items: Mutex<HashMap<String, Token>>,
    wait_between: Duration,
}

impl TokenCache {
    pub fn new(wait_between: Duration) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            wait_between,
        }
    }

    pub fn get(&self, key: &str) -> Option<Token> {
        self.items
            .lock()
            .map(|items| items.get(key).cloned())
            .unwrap_or(None)
    }

    pub fn set(&self, key: &str, token: Token) {
        if let Ok(mut items) = self.items.lock() {
            items.insert(key.to_string(), token);
        }
    }

    /// Waits out the configured issuance delay before a new token request
    pub async fn throttle(&self) {
        if !self.wait_between.is_zero() {
            tokio::time::sleep(self.wait_between).await;
        }
    }
}

//! Authenticated HTTP transport to the LMS.

use registrar_types::{LmsError, LmsMethod, LmsResponse, LmsTransport};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Refresh the access token this long before it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// LMS transport that authenticates with the OAuth2 client-credentials grant
/// (`POST {base_url}/oauth2/access_token`) and sends `Authorization: JWT <token>`.
pub struct HttpLmsClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl HttpLmsClient {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: Mutex::new(None),
        }
    }

    pub fn from_env() -> Self {
        let base_url =
            std::env::var("LMS_BASE_URL").unwrap_or_else(|_| "http://localhost:18000".to_string());
        let client_id = std::env::var("BACKEND_SERVICE_EDX_OAUTH2_KEY").unwrap_or_default();
        let client_secret = std::env::var("BACKEND_SERVICE_EDX_OAUTH2_SECRET").unwrap_or_default();
        Self::new(base_url, client_id, client_secret)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn access_token(&self) -> Result<String, LmsError> {
        let mut guard = self.token.lock().await;
        if let Some(ref cached) = *guard {
            if cached.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(cached.value.clone());
            }
        }
        let url = format!("{}/oauth2/access_token", self.base_url.trim_end_matches('/'));
        let res = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("token_type", "jwt"),
            ])
            .send()
            .await
            .map_err(|e| LmsError::Auth(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LmsError::Auth(format!("status: {}, body: {}", status, body)));
        }
        let token: AccessTokenResponse = res
            .json()
            .await
            .map_err(|e| LmsError::Auth(e.to_string()))?;
        let value = token.access_token.clone();
        *guard = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }
}

impl fmt::Debug for HttpLmsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLmsClient")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .finish()
    }
}

#[async_trait::async_trait]
impl LmsTransport for HttpLmsClient {
    async fn send(
        &self,
        method: LmsMethod,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<LmsResponse, LmsError> {
        let token = self.access_token().await?;
        let mut req = match method {
            LmsMethod::Get => self.client.get(url),
            LmsMethod::Post => self.client.post(url),
            LmsMethod::Patch => self.client.patch(url),
            LmsMethod::Put => self.client.put(url),
        };
        req = req.header(reqwest::header::AUTHORIZATION, format!("JWT {}", token));
        if let Some(body) = body {
            req = req.json(body);
        }
        let res = req
            .send()
            .await
            .map_err(|e| LmsError::Transport(e.to_string()))?;
        let status = res.status().as_u16();
        let text = res
            .text()
            .await
            .map_err(|e| LmsError::Transport(e.to_string()))?;
        Ok(LmsResponse::new(status, text))
    }
}

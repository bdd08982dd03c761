//! HTTP client for the catalog (discovery) service.

use registrar_types::{CatalogClient, CatalogError};
use std::fmt;

const DISCOVERY_PROGRAM_API_TPL: &str = "api/v1/programs";

/// Catalog client that GETs `{base_url}/api/v1/programs/{uuid}/`.
pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_token,
        }
    }

    pub fn from_env() -> Self {
        let base_url = std::env::var("DISCOVERY_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:18381".to_string());
        let api_token = std::env::var("DISCOVERY_API_TOKEN").ok();
        Self::new(base_url, api_token)
    }

    fn program_url(&self, program_uuid: &str) -> String {
        format!(
            "{}/{}/{}/",
            self.base_url.trim_end_matches('/'),
            DISCOVERY_PROGRAM_API_TPL,
            program_uuid
        )
    }
}

impl fmt::Debug for HttpCatalogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCatalogClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait::async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn fetch_program(
        &self,
        program_uuid: &str,
    ) -> Result<Option<serde_json::Value>, CatalogError> {
        let mut req = self.client.get(self.program_url(program_uuid));
        if let Some(ref token) = self.api_token {
            req = req.bearer_auth(token);
        }
        let res = req
            .send()
            .await
            .map_err(|e| CatalogError::Http(e.to_string()))?;
        let status = res.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }
        let body = res
            .json::<serde_json::Value>()
            .await
            .map_err(|e| CatalogError::Parse(e.to_string()))?;
        Ok(Some(body))
    }
}

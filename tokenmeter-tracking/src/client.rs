use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{DestinationId, DispatchError, DispatchOptions, WorkflowDispatcher};

#[derive(Clone)]
pub struct HttpDispatcherConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

impl fmt::Debug for HttpDispatcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let api_key = if self.api_key.is_some() {
            "<redacted>"
        } else {
            "<none>"
        };
        f.debug_struct("HttpDispatcherConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &api_key)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpDispatcherConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Starts destination workflows over HTTP: one POST per batch to
/// `{base_url}/workflows/{destination}/execute`. No retries.
#[derive(Clone)]
pub struct HttpDispatcher {
    client: Client,
    config: HttpDispatcherConfig,
}

impl HttpDispatcher {
    pub fn new(config: HttpDispatcherConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self, destination: &DestinationId) -> String {
        format!(
            "{}/workflows/{}/execute",
            self.config.base_url.trim_end_matches('/'),
            destination
        )
    }
}

#[async_trait]
impl WorkflowDispatcher for HttpDispatcher {
    async fn execute_workflow(
        &self,
        destination: &DestinationId,
        items: Vec<Value>,
        options: &DispatchOptions,
    ) -> Result<(), DispatchError> {
        let body = json!({
            "items": items,
            "options": serde_json::to_value(options)?,
        });
        let mut request = self
            .client
            .post(self.endpoint(destination))
            .timeout(self.config.timeout)
            .header("x-idempotency-key", Uuid::new_v4().to_string())
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-api-key", key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Http { status, body })
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use serde_json::{json, Value};

use crate::config;
use crate::delivery::models::Delivery;
use super::adapter::{AdapterError, DeliveryAttempt, DestinationAdapter, IntegrationStore};
use super::models::{IntegrationConfig, IntegrationKind, TenantIntegration, WebhookAuth, WebhookConfig};

/// key: webhook-adapter -> verbatim payload to a tenant URL
///
/// Produces no delivery-specific external id; the integration row's
/// `last_sync_at` is its completion marker.
pub struct WebhookAdapter {
    client: Client,
    store: Arc<dyn IntegrationStore>,
}

impl WebhookAdapter {
    pub fn new(store: Arc<dyn IntegrationStore>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(*config::ADAPTER_TIMEOUT_SECS))
                .build()
                .expect("client build"),
            store,
        }
    }

    fn parse_config(
        integration: &TenantIntegration,
    ) -> Result<(WebhookConfig, Method), AdapterError> {
        let config: IntegrationConfig = serde_json::from_value(integration.config.clone())
            .map_err(|err| AdapterError::configuration(format!("invalid webhook config: {err}")))?;
        let IntegrationConfig::Webhook(config) = config else {
            return Err(AdapterError::configuration(
                "integration config is not a webhook config",
            ));
        };
        if config.url.trim().is_empty() {
            return Err(AdapterError::configuration("webhook url is required"));
        }
        let method = match config.method.as_deref() {
            None => Method::POST,
            Some(raw) => Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
                .map_err(|_| AdapterError::configuration(format!("invalid webhook method: {raw}")))?,
        };
        Ok((config, method))
    }

    async fn mark_synced(&self, integration: &TenantIntegration, error: Option<&str>) {
        if let Err(err) = self
            .store
            .mark_synced(integration.id, Utc::now(), error)
            .await
        {
            tracing::warn!(?err, integration_id = %integration.id, "failed to update webhook sync marker");
        }
    }
}

#[async_trait]
impl DestinationAdapter for WebhookAdapter {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Webhook
    }

    async fn deliver(
        &self,
        delivery: &Delivery,
        integration: &TenantIntegration,
    ) -> Result<DeliveryAttempt, AdapterError> {
        let (config, method) = Self::parse_config(integration)?;

        let mut request = self
            .client
            .request(method.clone(), &config.url)
            .json(&delivery.payload);

        let mut header_snapshot = serde_json::Map::new();
        if let Some(headers) = &config.headers {
            for (name, value) in headers {
                request = request.header(name, value);
                header_snapshot.insert(name.clone(), Value::String(value.clone()));
            }
        }
        match &config.auth {
            Some(WebhookAuth::Bearer { token }) => {
                request = request.bearer_auth(token);
                header_snapshot.insert(
                    "authorization".to_string(),
                    Value::String("[REDACTED]".to_string()),
                );
            }
            Some(WebhookAuth::ApiKey { header, key }) => {
                request = request.header(header, key);
                // The header name is tenant-chosen, so the sync log's
                // field-name redaction cannot recognize it. The key never
                // enters the snapshot at all.
                header_snapshot.insert(header.clone(), Value::String("[REDACTED]".to_string()));
            }
            None => {}
        }

        let request_snapshot = json!({
            "url": config.url,
            "method": method.as_str(),
            "headers": Value::Object(header_snapshot),
            "body": delivery.payload,
        });

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let detail = format!("webhook request failed: {err}");
                self.mark_synced(integration, Some(&detail)).await;
                return Err(AdapterError::Transport {
                    detail,
                    request: Some(request_snapshot),
                });
            }
        };

        let status = response.status();
        let response_body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let detail = format!("webhook returned status {status}: {response_body}");
            self.mark_synced(integration, Some(&detail)).await;
            return Err(AdapterError::Rejected {
                detail,
                request: Some(request_snapshot),
                response: Some(response_body),
            });
        }

        self.mark_synced(integration, None).await;

        Ok(DeliveryAttempt {
            external_id: None,
            request: request_snapshot,
            response: Some(response_body),
        })
    }
}

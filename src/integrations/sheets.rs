use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config;
use crate::delivery::models::{Delivery, DeliveryPayload};
use super::adapter::{AdapterError, DeliveryAttempt, DestinationAdapter, IntegrationStore};
use super::models::{
    ColumnMapping, IntegrationConfig, IntegrationKind, SheetsConfig, TenantIntegration,
};

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Refresh the OAuth access token once it is within this window of expiry.
const TOKEN_REFRESH_WINDOW_SECS: i64 = 5 * 60;

/// key: sheets-adapter -> range append
///
/// Prefers the tenant's refreshable OAuth tokens, persisting refreshed
/// credentials back onto the integration row; falls back to the legacy
/// service-account key only when no OAuth tokens exist.
pub struct SheetsAdapter {
    client: Client,
    store: Arc<dyn IntegrationStore>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl SheetsAdapter {
    pub fn new(store: Arc<dyn IntegrationStore>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(*config::ADAPTER_TIMEOUT_SECS))
                .build()
                .expect("client build"),
            store,
        }
    }

    fn parse_config(integration: &TenantIntegration) -> Result<SheetsConfig, AdapterError> {
        let config: IntegrationConfig = serde_json::from_value(integration.config.clone())
            .map_err(|err| AdapterError::configuration(format!("invalid sheets config: {err}")))?;
        let IntegrationConfig::Sheets(config) = config else {
            return Err(AdapterError::configuration(
                "integration config is not a sheets config",
            ));
        };
        if config.spreadsheet_id.trim().is_empty() {
            return Err(AdapterError::configuration("sheets spreadsheet_id is required"));
        }
        if config.oauth.is_none() && config.service_account.is_none() {
            return Err(AdapterError::configuration(
                "sheets integration needs oauth tokens or a service account key",
            ));
        }
        Ok(config)
    }

    async fn exchange_token(&self, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse, AdapterError> {
        let response = self
            .client
            .post(token_uri)
            .form(form)
            .send()
            .await
            .map_err(|err| AdapterError::Transport {
                detail: format!("token endpoint unreachable: {err}"),
                request: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Rejected {
                detail: format!("token endpoint returned {status}: {body}"),
                request: None,
                response: serde_json::from_str(&body).ok(),
            });
        }

        response.json().await.map_err(|err| AdapterError::Transport {
            detail: format!("invalid token response: {err}"),
            request: None,
        })
    }

    /// Resolves a bearer token, refreshing and persisting OAuth credentials
    /// when they are about to lapse.
    async fn access_token(
        &self,
        integration: &TenantIntegration,
        config: &SheetsConfig,
    ) -> Result<String, AdapterError> {
        let token_uri = config
            .token_uri
            .clone()
            .unwrap_or_else(|| config::SHEETS_TOKEN_URI.clone());

        if let Some(oauth) = &config.oauth {
            let remaining = (oauth.expires_at - Utc::now()).num_seconds();
            if remaining > TOKEN_REFRESH_WINDOW_SECS {
                return Ok(oauth.access_token.clone());
            }

            let token = self
                .exchange_token(
                    &token_uri,
                    &[
                        ("client_id", oauth.client_id.as_str()),
                        ("client_secret", oauth.client_secret.as_str()),
                        ("refresh_token", oauth.refresh_token.as_str()),
                        ("grant_type", "refresh_token"),
                    ],
                )
                .await?;

            let mut refreshed = config.clone();
            if let Some(tokens) = refreshed.oauth.as_mut() {
                tokens.access_token = token.access_token.clone();
                tokens.expires_at =
                    Utc::now() + chrono::Duration::seconds(token.expires_in.unwrap_or(3600));
            }
            match serde_json::to_value(IntegrationConfig::Sheets(refreshed)) {
                Ok(value) => {
                    if let Err(err) = self.store.persist_config(integration.id, &value).await {
                        tracing::warn!(?err, integration_id = %integration.id, "failed to persist refreshed sheets token");
                    }
                }
                Err(err) => {
                    tracing::warn!(?err, integration_id = %integration.id, "failed to serialize refreshed sheets config");
                }
            }
            return Ok(token.access_token);
        }

        let Some(account) = config.service_account.as_ref() else {
            return Err(AdapterError::configuration(
                "sheets integration needs oauth tokens or a service account key",
            ));
        };
        let now = Utc::now().timestamp();
        let claims = ServiceAccountClaims {
            iss: &account.client_email,
            scope: SHEETS_SCOPE,
            aud: &token_uri,
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes()).map_err(|err| {
            AdapterError::configuration(format!("invalid service account private key: {err}"))
        })?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|err| AdapterError::configuration(format!("failed to sign jwt: {err}")))?;

        let token = self
            .exchange_token(
                &token_uri,
                &[
                    ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                    ("assertion", assertion.as_str()),
                ],
            )
            .await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl DestinationAdapter for SheetsAdapter {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Sheets
    }

    async fn deliver(
        &self,
        delivery: &Delivery,
        integration: &TenantIntegration,
    ) -> Result<DeliveryAttempt, AdapterError> {
        let config = Self::parse_config(integration)?;
        let token = self.access_token(integration, &config).await?;

        let row = match &config.column_mapping {
            Some(mapping) if !mapping.is_empty() => mapped_row(mapping, &delivery.payload),
            _ => fixed_row(delivery),
        };

        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| config::SHEETS_API_BASE.clone());
        let endpoint = format!(
            "{}/v4/spreadsheets/{}/values/{}:append",
            api_base.trim_end_matches('/'),
            config.spreadsheet_id,
            config.range,
        );
        let body = json!({ "values": [row] });
        let request_snapshot = json!({
            "endpoint": endpoint,
            "access_token": token,
            "body": body,
        });

        let response = self
            .client
            .post(&endpoint)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|err| AdapterError::Transport {
                detail: format!("sheets append failed: {err}"),
                request: Some(request_snapshot.clone()),
            })?;

        let status = response.status();
        let response_body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(AdapterError::Rejected {
                detail: format!("sheets returned status {status}: {response_body}"),
                request: Some(request_snapshot),
                response: Some(response_body),
            });
        }

        let row_number = response_body
            .pointer("/updates/updatedRange")
            .and_then(Value::as_str)
            .and_then(row_number_from_range);

        Ok(DeliveryAttempt {
            external_id: row_number,
            request: request_snapshot,
            response: Some(response_body),
        })
    }
}

/// Default layout when the tenant has not configured a column mapping.
fn fixed_row(delivery: &Delivery) -> Vec<String> {
    let payload = DeliveryPayload::from_value(&delivery.payload);
    vec![
        Utc::now().to_rfc3339(),
        payload.lead.full_name.clone().unwrap_or_default(),
        payload.lead.email.clone().unwrap_or_default(),
        payload.lead.phone.clone().unwrap_or_default(),
        format_cell(&payload.qualification),
        payload
            .score
            .total
            .map(|total| total.to_string())
            .unwrap_or_default(),
        format_cell(&payload.score.breakdown),
        payload.conversation_summary.clone().unwrap_or_default(),
        delivery.lead_id.to_string(),
        delivery.id.to_string(),
    ]
}

fn mapped_row(mapping: &[ColumnMapping], payload: &Value) -> Vec<String> {
    mapping
        .iter()
        .map(|entry| format_cell(resolve_path(payload, &entry.path)))
        .collect()
}

/// Walks a dot-path through the canonical payload; numeric segments index
/// into arrays.
fn resolve_path<'a>(payload: &'a Value, path: &str) -> &'a Value {
    let mut current = payload;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment).unwrap_or(&Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|idx| items.get(idx))
                .unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
    }
    current
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(format_cell)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
        other => other.to_string(),
    }
}

fn row_number_from_range(range: &str) -> Option<String> {
    let cell = range.rsplit('!').next()?.split(':').next()?;
    let digits: String = cell.chars().filter(|ch| ch.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

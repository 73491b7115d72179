use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config;
use crate::delivery::models::{Delivery, DeliveryPayload};
use super::adapter::{AdapterError, DeliveryAttempt, DestinationAdapter};
use super::models::{CrmConfig, IntegrationConfig, IntegrationKind, TenantIntegration};

/// key: crm-adapter -> webcontact creation
///
/// The destination API authenticates with a key in the query string and is
/// known to return 200 with an application-level error payload, so the body
/// is always parsed and the status code alone is never trusted.
pub struct CrmAdapter {
    client: Client,
}

impl CrmAdapter {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(*config::ADAPTER_TIMEOUT_SECS))
                .build()
                .expect("client build"),
        }
    }

    fn parse_config(integration: &TenantIntegration) -> Result<CrmConfig, AdapterError> {
        let config: IntegrationConfig = serde_json::from_value(integration.config.clone())
            .map_err(|err| AdapterError::configuration(format!("invalid crm config: {err}")))?;
        let IntegrationConfig::Crm(config) = config else {
            return Err(AdapterError::configuration(
                "integration config is not a crm config",
            ));
        };
        if config.api_key.trim().is_empty() {
            return Err(AdapterError::configuration("crm api_key is required"));
        }
        if config.base_url.trim().is_empty() {
            return Err(AdapterError::configuration("crm base_url is required"));
        }
        Ok(config)
    }
}

impl Default for CrmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DestinationAdapter for CrmAdapter {
    fn kind(&self) -> IntegrationKind {
        IntegrationKind::Crm
    }

    async fn deliver(
        &self,
        delivery: &Delivery,
        integration: &TenantIntegration,
    ) -> Result<DeliveryAttempt, AdapterError> {
        let config = Self::parse_config(integration)?;
        let payload = DeliveryPayload::from_value(&delivery.payload);

        let body = json!({
            "name": payload.lead.full_name.clone().unwrap_or_default(),
            "email": payload.lead.email.clone().unwrap_or_default(),
            "phone": payload
                .lead
                .phone
                .as_deref()
                .map(normalize_phone)
                .unwrap_or_default(),
            "comment": build_comment(delivery, &payload),
        });

        let endpoint = format!("{}/webcontact", config.base_url.trim_end_matches('/'));
        let request_snapshot = json!({
            "endpoint": endpoint,
            "api_key": config.api_key,
            "body": body,
        });

        let response = self
            .client
            .post(&endpoint)
            .query(&[("key", config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|err| AdapterError::Transport {
                detail: format!("crm request failed: {err}"),
                request: Some(request_snapshot.clone()),
            })?;

        let status = response.status();
        let response_body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(AdapterError::Rejected {
                detail: format!("crm returned status {status}: {response_body}"),
                request: Some(request_snapshot),
                response: Some(response_body),
            });
        }

        // 200 with an error payload is still a failure.
        if let Some(detail) = application_error(&response_body) {
            return Err(AdapterError::Rejected {
                detail: format!("crm rejected webcontact: {detail}"),
                request: Some(request_snapshot),
                response: Some(response_body),
            });
        }

        let contact_id = response_body
            .get("webcontact_id")
            .or_else(|| response_body.get("id"))
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });

        Ok(DeliveryAttempt {
            external_id: contact_id,
            request: request_snapshot,
            response: Some(response_body),
        })
    }
}

fn application_error(body: &Value) -> Option<String> {
    if body.get("status").and_then(Value::as_bool) == Some(false) {
        let detail = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("status=false");
        return Some(detail.to_string());
    }
    body.get("error").map(|err| match err {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Keeps digits and one leading plus; everything else is destination noise.
pub fn normalize_phone(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (idx, ch) in raw.trim().char_indices() {
        if ch.is_ascii_digit() || (ch == '+' && idx == 0) {
            out.push(ch);
        }
    }
    out
}

fn build_comment(delivery: &Delivery, payload: &DeliveryPayload) -> String {
    let mut lines = Vec::new();

    lines.push("Qualified lead".to_string());
    if let Some(name) = &payload.lead.full_name {
        lines.push(format!("Name: {name}"));
    }
    if let Some(email) = &payload.lead.email {
        lines.push(format!("Email: {email}"));
    }
    if let Some(phone) = &payload.lead.phone {
        lines.push(format!("Phone: {}", normalize_phone(phone)));
    }

    if let Some(fields) = payload.qualification.as_object() {
        if !fields.is_empty() {
            lines.push("Qualification:".to_string());
            for (key, value) in fields {
                lines.push(format!("  {key}: {}", flatten(value)));
            }
        }
    }

    if let Some(total) = payload.score.total {
        lines.push(format!("Score: {total}"));
    }
    if let Some(breakdown) = payload.score.breakdown.as_object() {
        for (key, value) in breakdown {
            lines.push(format!("  {key}: {}", flatten(value)));
        }
    }

    if let Some(summary) = &payload.conversation_summary {
        if !summary.trim().is_empty() {
            lines.push(format!("Conversation: {summary}"));
        }
    }

    lines.push(format!("Lead: {} / Delivery: {}", delivery.lead_id, delivery.id));
    lines.join("\n")
}

fn flatten(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_keeps_digits_and_leading_plus() {
        assert_eq!(normalize_phone("+54 (911) 5555-0001"), "+549115550001");
        assert_eq!(normalize_phone("011 4444 5555"), "01144445555");
        assert_eq!(normalize_phone("54+11"), "5411");
    }

    #[test]
    fn error_body_detected_despite_success_status() {
        assert_eq!(
            application_error(&json!({"status": false, "message": "duplicated contact"})),
            Some("duplicated contact".to_string())
        );
        assert_eq!(
            application_error(&json!({"error": "invalid key"})),
            Some("invalid key".to_string())
        );
        assert_eq!(application_error(&json!({"webcontact_id": "c_1"})), None);
    }
}

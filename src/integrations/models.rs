use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// key: integration-kind -> closed destination set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    Sheets,
    Crm,
    Webhook,
}

impl IntegrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationKind::Sheets => "sheets",
            IntegrationKind::Crm => "crm",
            IntegrationKind::Webhook => "webhook",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "sheets" => Some(IntegrationKind::Sheets),
            "crm" => Some(IntegrationKind::Crm),
            "webhook" => Some(IntegrationKind::Webhook),
            _ => None,
        }
    }
}

/// key: integration-model -> tenant destination row
///
/// `config` stays a raw JSON document on the row; the owning adapter parses
/// it into its typed struct and rejects missing fields before any network
/// call. The orchestrator never inspects it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TenantIntegration {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub integration_type: String,
    pub config: serde_json::Value,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantIntegration {
    pub fn kind(&self) -> Option<IntegrationKind> {
        IntegrationKind::from_str(&self.integration_type)
    }
}

/// Typed union over the closed set of destination configs. Serialized with a
/// `type` tag so a stored config is self-describing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrationConfig {
    Sheets(SheetsConfig),
    Crm(CrmConfig),
    Webhook(WebhookConfig),
}

/// One entry of a tenant-defined spreadsheet layout: the dot-path resolved
/// against the canonical payload, in column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub path: String,
    pub column: String,
}

/// Refreshable OAuth credential for the spreadsheet API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub expires_at: DateTime<Utc>,
}

/// Legacy static service-account credential, used only when no OAuth tokens
/// are configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    #[serde(default = "default_sheet_range")]
    pub range: String,
    #[serde(default)]
    pub column_mapping: Option<Vec<ColumnMapping>>,
    #[serde(default)]
    pub oauth: Option<OauthTokens>,
    #[serde(default)]
    pub service_account: Option<ServiceAccountKey>,
    /// Overrides for stub environments; production tenants leave these unset.
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

fn default_sheet_range() -> String {
    "Leads!A:Z".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum WebhookAuth {
    Bearer { token: String },
    ApiKey { header: String, key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub auth: Option<WebhookAuth>,
}

pub mod adapter;
pub mod crm;
pub mod models;
pub mod sheets;
pub mod webhook;

pub use adapter::{
    AdapterError, AdapterRegistry, DeliveryAttempt, DestinationAdapter, IntegrationStore,
    PgIntegrationStore,
};
pub use crm::CrmAdapter;
pub use models::{
    ColumnMapping, CrmConfig, IntegrationConfig, IntegrationKind, OauthTokens, ServiceAccountKey,
    SheetsConfig, TenantIntegration, WebhookAuth, WebhookConfig,
};
pub use sheets::SheetsAdapter;
pub use webhook::WebhookAdapter;

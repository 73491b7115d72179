pub mod api;
pub mod models;
pub mod orchestrator;
pub mod store;

pub use api::{process_delivery, refund_delivery, RefundRequest, RefundResponse};
pub use models::{
    BillingEligibility, Delivery, DeliveryPayload, DeliveryStatus, LeadContact, ProcessOutcome,
    ScoreSnapshot, LEAD_OFFER_SENT_TO_DEVELOPER,
};
pub use orchestrator::Orchestrator;
pub use store::{DeliveryStore, PgStore};

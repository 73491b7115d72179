pub mod config;
pub mod delivery;
pub mod error;
pub mod integrations;
pub mod ledger;
pub mod routes;
pub mod sync_log;

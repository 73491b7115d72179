use once_cell::sync::Lazy;

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// key: delivery-config -> per-adapter call timeout
pub static ADAPTER_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("ADAPTER_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(12)
});

/// key: delivery-config -> timeout for the billing eligibility pre-check
pub static LEDGER_CHECK_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("LEDGER_CHECK_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(5)
});

/// Token endpoint used for Google OAuth refresh and service-account exchange.
/// Overridable so integration environments can point at a stub server.
pub static SHEETS_TOKEN_URI: Lazy<String> = Lazy::new(|| {
    std::env::var("SHEETS_TOKEN_URI")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "https://oauth2.googleapis.com/token".to_string())
});

/// Base URL of the spreadsheet API. Defaults to the Google Sheets endpoint.
pub static SHEETS_API_BASE: Lazy<String> = Lazy::new(|| {
    std::env::var("SHEETS_API_BASE")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "https://sheets.googleapis.com".to_string())
});

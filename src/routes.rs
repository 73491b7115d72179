use axum::{routing::post, Router};

use crate::delivery;

pub fn api_routes() -> Router {
    Router::new()
        .route(
            "/api/deliveries/:id/process",
            post(delivery::process_delivery),
        )
        .route(
            "/api/deliveries/:id/refund",
            post(delivery::refund_delivery),
        )
}

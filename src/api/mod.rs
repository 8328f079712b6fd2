//! HTTP surface of the validator
//!
//! Provides:
//! - Registration API (bind, unbind, bulk unbind, listings, metrics, health)
//! - Secure HTTP client for outbound calls (telemetry, publisher, peers)
//! - Request middleware (rate limiting, size limits, headers, logging)

pub mod http;
pub mod middleware;
pub mod registration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::trace::TraceLayer;

pub use http::{HttpSecurityConfig, SecureHttpClient};
pub use middleware::{
    RateLimiter, SecurityMiddlewareConfig, SecurityState, body_size_middleware,
    logging_middleware, rate_limit_middleware, security_headers_middleware,
};
pub use registration::{
    ApiJson, ApiRejection, BodyRejection, IdentityMetrics, RegistrationApiState, RejectionBody,
    create_router,
};

/// Registration routes wrapped in the full middleware stack
pub fn build_app(state: RegistrationApiState, security: SecurityState) -> Router {
    let max_body = security.config.max_request_size;

    create_router(state)
        // Order matters: the last layer added runs first
        .layer(DefaultBodyLimit::max(max_body))
        .layer(axum::middleware::from_fn_with_state(
            security.clone(),
            body_size_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            security.clone(),
            rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            security,
            logging_middleware,
        ))
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
}

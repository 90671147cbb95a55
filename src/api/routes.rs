use crate::api::{handlers, AppState};
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
        .route("/health/ready", get(handlers::health_check))
        // Telephony callbacks
        .route("/v1/telephony/incoming", post(handlers::incoming_call))
        .route("/v1/telephony/answered", post(handlers::call_answered))
        .route(
            "/v1/telephony/attempt-result",
            post(handlers::attempt_result),
        )
        // Incident reads
        .route("/v1/incidents", get(handlers::list_incidents))
        .route("/v1/incidents/:id", get(handlers::get_incident))
        // Incident mutations
        .route("/v1/incidents/:id/accept", post(handlers::accept_incident))
        .route("/v1/incidents/:id/decline", post(handlers::decline_incident))
        .route("/v1/incidents/:id/status", post(handlers::update_status))
        .route("/v1/incidents/:id/close", post(handlers::close_incident))
        .route("/v1/incidents/:id/assign", post(handlers::assign_incident))
        .route(
            "/v1/incidents/:id/escalate",
            post(handlers::escalate_incident),
        )
        // Directory administration
        .route("/v1/users", post(handlers::create_user))
        .route("/v1/users", get(handlers::list_users))
        .route("/v1/users/:id", put(handlers::update_user))
        .route("/v1/sites", post(handlers::create_site))
        .route("/v1/sites", get(handlers::list_sites))
        .route("/v1/schedule", post(handlers::create_schedule_entry))
        // Runtime configuration
        .route(
            "/v1/config/business-hours",
            get(handlers::get_business_hours).put(handlers::put_business_hours),
        )
        .route(
            "/v1/config/ring-duration",
            get(handlers::get_ring_duration).put(handlers::put_ring_duration),
        )
        .route(
            "/v1/config/ladders",
            get(handlers::get_ladders).put(handlers::put_ladders),
        )
        // Add state
        .with_state(state)
        // Add middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CorsLayer::permissive())
}

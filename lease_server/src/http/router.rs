use core::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::AUTHORIZATION},
    routing::{self, post},
};
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt as _, request_id::MakeRequestUuid, timeout::TimeoutLayer, trace::TraceLayer,
};
use tunlease_common::protocol::LEASE_PATH;

use crate::{
    app::AppState,
    http::{lease, middleware::LevelAdjustingOnFailure},
};

pub(crate) fn create_app_router() -> Router<AppState> {
    Router::new().route(LEASE_PATH, post(lease::handle_new_peer_lease))
}

/// The full application with its middleware stack.
pub(crate) fn create_app(app_state: AppState) -> Router<()> {
    let middleware_stack = ServiceBuilder::new()
        .sensitive_headers([AUTHORIZATION])
        .set_x_request_id(MakeRequestUuid)
        .propagate_x_request_id()
        .layer(TraceLayer::new_for_http().on_failure(LevelAdjustingOnFailure))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ));

    create_app_router()
        .with_state(app_state)
        .fallback(routing::any(|req: Request<Body>| async move {
            tracing::warn!(method = %req.method(), uri = %req.uri(), "Unhandled request");
            StatusCode::NOT_FOUND
        }))
        .layer(middleware_stack)
}

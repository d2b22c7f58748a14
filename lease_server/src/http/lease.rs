//! The lease endpoint: authenticates the caller, leases an address for its
//! public key and describes the server peer in the response.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use tracing::{debug, error, info, warn};
use tunlease_common::{LeaseRequest, LeaseResponse, validate_public_key};

use crate::{
    app::{AllocError, AppState, GrantError},
    auth::{self, AuthError},
};

type Rejection = (StatusCode, &'static str);

fn auth_rejection(err: &AuthError) -> Rejection {
    match *err {
        AuthError::Introspection(ref e) => {
            warn!("Token introspection failed: {e}");
            (StatusCode::BAD_GATEWAY, "Token introspection failed")
        }
        ref other => {
            info!("Rejected token: {other}");
            (StatusCode::UNAUTHORIZED, "Invalid token")
        }
    }
}

fn grant_rejection(err: &GrantError) -> Rejection {
    match *err {
        GrantError::Alloc(AllocError::PoolExhausted(pool)) => {
            warn!(%pool, "Address pool exhausted");
            (StatusCode::SERVICE_UNAVAILABLE, "Address pool exhausted")
        }
        GrantError::Alloc(ref e @ AllocError::ExpiryNotInFuture(_)) => {
            info!("Rejected lease: {e}");
            (StatusCode::UNAUTHORIZED, "Invalid token")
        }
        GrantError::PeerSync(ref e) => {
            error!("Failed to synchronize peers: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to install peer")
        }
        GrantError::Persist(ref e) => {
            error!("Lease granted but not persisted: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist lease")
        }
    }
}

/// Handles `POST /newPeerLease`.
///
/// Requires `Authorization: Bearer <token>` and a JSON body `{"PubKey": "<base64>"}`.
/// The lease lasts until the token expires. Repeated requests by the same owner
/// keep the same address.
#[tracing::instrument(skip_all)]
pub(crate) async fn handle_new_peer_lease(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<LeaseRequest>, JsonRejection>,
) -> Result<Json<LeaseResponse>, Rejection> {
    let token = auth::bearer_token(&headers)
        .ok_or((StatusCode::UNAUTHORIZED, "Missing bearer token"))?;
    let identity = state
        .auth
        .authenticate(&token, Utc::now())
        .await
        .map_err(|e| auth_rejection(&e))?;

    let Json(request) = body.map_err(|rejection| {
        debug!("Invalid lease request body: {rejection}");
        (StatusCode::BAD_REQUEST, "Invalid request body")
    })?;
    let public_key = request.pub_key.trim();
    validate_public_key(public_key).map_err(|e| {
        debug!(owner = %identity.owner, "Invalid public key: {e}");
        (StatusCode::BAD_REQUEST, "Invalid public key")
    })?;

    let record = state
        .allocator
        .grant(&identity.owner, public_key, identity.expiry)
        .await
        .map_err(|e| grant_rejection(&e))?;

    Ok(Json(
        state
            .server
            .lease_response(&record, state.allocator.pool()),
    ))
}

//! Collaborator routes for the REST write path
//!
//! Out-of-process REST handlers use these to ask whether a recipient is
//! online and to hand finished writes to the event dispatcher.

use axum::{
    extract::{Path, State},
    Json,
};
use murmur_shared::{DomainEvent, Identity};
use serde::Serialize;

use crate::error::ApiResult;
use crate::state::AppState;
use crate::websocket::{DispatchReport, RealtimeGateway};

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub identity: Identity,
    pub online: bool,
}

/// Whether a user currently has a live connection
pub async fn presence(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Json<PresenceResponse> {
    let identity = Identity::from(identity);
    let online = state.dispatcher.is_online(&identity);
    Json(PresenceResponse { identity, online })
}

/// Push a domain event to its recipient, best-effort
pub async fn push_event(
    State(state): State<AppState>,
    Json(event): Json<DomainEvent>,
) -> ApiResult<Json<DispatchReport>> {
    let report = state.dispatcher.push(event)?;
    Ok(Json(report))
}

//! Punishment Admin API
//!
//! Lets operators issue and pardon punishments and inspect cached state on
//! this node without going through a game client.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::moderation::PunishmentError;

use crate::moderation::{
    ApplyOutcome, Issuer, PunishmentEngine, PunishmentRecord, PunishmentType,
};

/// API state for punishment endpoints
#[derive(Clone)]
pub struct ModerationApiState {
    pub engine: Arc<PunishmentEngine>,
}

// Request / response types

#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    /// Type name, e.g. "temp_ban"
    pub kind: String,
    pub target: Uuid,
    pub issuer: Option<Uuid>,
    #[serde(default)]
    pub can_override: bool,
    #[serde(default)]
    pub reason: String,
    pub duration_secs: Option<i64>,
    #[serde(default)]
    pub silent: bool,
}

#[derive(Debug, Deserialize)]
pub struct PardonRequest {
    /// Type names to pardon; empty means any ban type
    #[serde(default)]
    pub kinds: Vec<String>,
    pub by: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PunishmentView {
    pub id: Uuid,
    pub kind: PunishmentType,
    pub target: Uuid,
    pub issuer: Option<Uuid>,
    pub reason: String,
    pub issued_at: String,
    pub expires_at: Option<String>,
    pub active: bool,
    pub source_server: String,
}

impl From<&PunishmentRecord> for PunishmentView {
    fn from(record: &PunishmentRecord) -> Self {
        Self {
            id: record.id(),
            kind: record.kind(),
            target: record.target_id(),
            issuer: record.issuer_id(),
            reason: record.reason().to_string(),
            issued_at: record.issued_at().to_rfc3339(),
            expires_at: record.expires_at().map(|at| at.to_rfc3339()),
            active: record.is_active(),
            source_server: record.source_server().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IssueResponse {
    pub outcome: String,
    pub punishment: PunishmentView,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
}

// Endpoints

/// GET /health
pub async fn health(State(state): State<ModerationApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: state.engine.service().to_string(),
    })
}

/// POST /punishments - Issue a punishment on this node
pub async fn issue_punishment(
    State(state): State<ModerationApiState>,
    Json(payload): Json<IssueRequest>,
) -> Result<(StatusCode, Json<IssueResponse>), (StatusCode, String)> {
    let kind: PunishmentType = payload
        .kind
        .parse()
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("{}", e)))?;

    let issuer = match payload.issuer {
        Some(id) => Issuer::player(id, payload.can_override),
        None => Issuer::console(),
    };
    let duration = payload
        .duration_secs
        .map(|secs| {
            chrono::Duration::try_seconds(secs).ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    PunishmentError::DurationOutOfRange.to_string(),
                )
            })
        })
        .transpose()?;

    let issued = state
        .engine
        .issue(
            kind,
            payload.target,
            issuer,
            &payload.reason,
            duration,
            true,
            payload.silent,
        )
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let status = match issued.outcome {
        ApplyOutcome::Applied => StatusCode::CREATED,
        ApplyOutcome::Exempt => StatusCode::FORBIDDEN,
        ApplyOutcome::Duplicate => StatusCode::OK,
    };

    info!(
        record = %issued.record.id(),
        outcome = ?issued.outcome,
        "Punishment issued via admin API"
    );

    Ok((
        status,
        Json(IssueResponse {
            outcome: format!("{:?}", issued.outcome).to_lowercase(),
            punishment: PunishmentView::from(issued.record.as_ref()),
        }),
    ))
}

/// POST /punishments/{target}/pardon - Pardon the latest matching punishment
pub async fn pardon_punishment(
    State(state): State<ModerationApiState>,
    Path(target): Path<Uuid>,
    Json(payload): Json<PardonRequest>,
) -> Result<Json<PunishmentView>, (StatusCode, String)> {
    let kinds = if payload.kinds.is_empty() {
        crate::moderation::BAN_TYPES.to_vec()
    } else {
        payload
            .kinds
            .iter()
            .map(|name| name.parse::<PunishmentType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    };

    let by = match payload.by {
        Some(id) => Issuer::player(id, true),
        None => Issuer::console(),
    };

    let pardoned = state
        .engine
        .pardon(target, &kinds, &by)
        .await
        .map_err(|e| {
            warn!(target = %target, error = %e, "Pardon failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    match pardoned {
        Some(record) => Ok(Json(PunishmentView::from(&record))),
        None => Err((
            StatusCode::NOT_FOUND,
            "No active punishment found".to_string(),
        )),
    }
}

/// GET /mutes/{target} - Live cached mute
pub async fn get_mute(
    State(state): State<ModerationApiState>,
    Path(target): Path<Uuid>,
) -> Result<Json<PunishmentView>, (StatusCode, String)> {
    state
        .engine
        .get_cached_mute(target)
        .map(|mute| Json(PunishmentView::from(mute.as_ref())))
        .ok_or((StatusCode::NOT_FOUND, "Not muted".to_string()))
}

/// GET /issuers/{issuer}/last - Most recent punishment by an issuer
pub async fn get_last_punishment(
    State(state): State<ModerationApiState>,
    Path(issuer): Path<Uuid>,
) -> Result<Json<PunishmentView>, (StatusCode, String)> {
    state
        .engine
        .get_last_punishment(issuer)
        .map(|record| Json(PunishmentView::from(record.as_ref())))
        .ok_or((
            StatusCode::NOT_FOUND,
            "No recent punishment for issuer".to_string(),
        ))
}

/// Create the admin API router
pub fn create_router(state: ModerationApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/punishments", post(issue_punishment))
        .route("/punishments/{target}/pardon", post(pardon_punishment))
        .route("/mutes/{target}", get(get_mute))
        .route("/issuers/{issuer}/last", get(get_last_punishment))
        .with_state(state)
}

/// Realtime gateway endpoints
///
/// The socket itself lives outside the authenticated scope: browsers cannot
/// set headers on a WebSocket handshake, so the token may also arrive as
/// `?token=`. It is validated before the upgrade.
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::ApiResponse;
use crate::error::{AppError, Result};
use crate::middleware::{bearer_token, require_role, AuthUser};
use crate::models::{normalize_department, UserRole};
use crate::realtime::{RealtimeEvent, RealtimeSession};
use crate::security::JwtValidator;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

async fn authenticate(
    req: &HttpRequest,
    params: &WsParams,
    validator: &JwtValidator,
    state: &AppState,
) -> Result<(AuthUser, Option<String>)> {
    let token = params
        .token
        .clone()
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(req.headers()))
        .ok_or_else(|| AppError::Unauthorized("missing token".to_string()))?;

    let user = AuthUser::try_from(validator.validate(&token)?)?;
    let account = state.users.find_active(user.id).await?;

    // A malformed stored department only costs the department channel
    let department = account
        .department
        .as_deref()
        .and_then(|raw| normalize_department(raw).ok());

    Ok((user, department))
}

/// GET /ws
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    params: web::Query<WsParams>,
    validator: web::Data<JwtValidator>,
    state: web::Data<AppState>,
) -> std::result::Result<HttpResponse, Error> {
    let (user, department) = authenticate(&req, &params, &validator, &state).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let (connection_id, channels) = state.hub.connect(&user, department.as_deref(), tx).await;

    let connected = RealtimeEvent::Connected {
        connection_id: connection_id.0,
        user_id: user.id,
        channels: channels.iter().map(ToString::to_string).collect(),
        timestamp: Utc::now().timestamp(),
    };
    state.hub.send_to_connection(connection_id, &connected).await;

    info!(
        user_id = %user.id,
        role = %user.role,
        channels = channels.len(),
        "WebSocket connection accepted"
    );

    let session = RealtimeSession::new(connection_id, user, state.hub.clone(), rx);
    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            error!(error = %e, "WebSocket handshake failed");
            state.hub.disconnect(connection_id).await;
            Err(e)
        }
    }
}

/// GET /api/v1/realtime/stats
pub async fn stats(state: web::Data<AppState>, user: AuthUser) -> Result<HttpResponse> {
    require_role(&user, &[UserRole::Admin])?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "connections": state.hub.connection_count().await,
        "users": state.hub.connected_users_count().await,
    }))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/realtime").route("/stats", web::get().to(stats)));
}

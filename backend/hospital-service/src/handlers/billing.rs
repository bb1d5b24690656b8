use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use super::ApiResponse;
use crate::error::Result;
use crate::middleware::{require_role, AuthUser};
use crate::models::UserRole;
use crate::state::AppState;

const BILLING_STAFF: &[UserRole] = &[UserRole::Billing, UserRole::Admin];

/// GET /api/v1/billing/queue
pub async fn billing_queue(state: web::Data<AppState>, user: AuthUser) -> Result<HttpResponse> {
    require_role(&user, BILLING_STAFF)?;
    let queue = state.billing.queue().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "queue": queue }))))
}

/// POST /api/v1/billing/visits/{visit_id}/clear
pub async fn clear_visit(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    require_role(&user, BILLING_STAFF)?;
    let visit = state.billing.clear(path.into_inner(), user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(visit)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/billing")
            .route("/queue", web::get().to(billing_queue))
            .route("/visits/{visit_id}/clear", web::post().to(clear_visit)),
    );
}

use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use super::ApiResponse;
use crate::error::Result;
use crate::middleware::AuthUser;
use crate::models::normalize_department;
use crate::state::AppState;

/// Live queue of a department
///
/// GET /api/v1/queue/{department}
pub async fn department_queue(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let department = normalize_department(&path.into_inner())?;
    let queue = state.queue.live_queue(&department).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "department": department,
        "queue": queue,
    }))))
}

/// GET /api/v1/queue/visits/{visit_id}/position
pub async fn visit_position(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let position = state.queue.position(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(position)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/queue")
            .route("/visits/{visit_id}/position", web::get().to(visit_position))
            .route("/{department}", web::get().to(department_queue)),
    );
}

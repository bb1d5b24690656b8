use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use super::ApiResponse;
use crate::error::Result;
use crate::middleware::AuthUser;
use crate::models::NotificationListQuery;
use crate::state::AppState;

/// GET /api/v1/notifications
pub async fn list_notifications(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<NotificationListQuery>,
) -> Result<HttpResponse> {
    let page = state
        .notifications
        .list(user.id, query.page, query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(page)))
}

/// GET /api/v1/notifications/unread-count
pub async fn unread_count(state: web::Data<AppState>, user: AuthUser) -> Result<HttpResponse> {
    let count = state.notifications.unread_count(user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "count": count }))))
}

/// PATCH /api/v1/notifications/{id}/read
pub async fn mark_as_read(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let notification = state
        .notifications
        .mark_read(path.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(notification)))
}

/// POST /api/v1/notifications/mark-all-read
pub async fn mark_all_read(state: web::Data<AppState>, user: AuthUser) -> Result<HttpResponse> {
    let updated = state.notifications.mark_all_read(user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "updated": updated }))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/notifications")
            .route("", web::get().to(list_notifications))
            .route("/unread-count", web::get().to(unread_count))
            .route("/mark-all-read", web::post().to(mark_all_read))
            .route("/{id}/read", web::patch().to(mark_as_read)),
    );
}

use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use super::ApiResponse;
use crate::error::Result;
use crate::middleware::{require_role, AuthUser};
use crate::models::{DispenseRequest, PrescriptionQueueQuery, UserRole};
use crate::state::AppState;

const PHARMACY_STAFF: &[UserRole] = &[UserRole::Pharmacist, UserRole::Admin];

/// GET /api/v1/pharmacy/prescriptions/pending
pub async fn pending_prescriptions(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<PrescriptionQueueQuery>,
) -> Result<HttpResponse> {
    require_role(&user, PHARMACY_STAFF)?;
    let prescriptions = state.pharmacy.pending(query.status).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "prescriptions": prescriptions }))))
}

/// GET /api/v1/pharmacy/prescriptions/{id}
pub async fn prescription_details(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let prescription = state.pharmacy.details(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(prescription)))
}

/// POST /api/v1/pharmacy/prescriptions/{id}/dispense
pub async fn dispense(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    body: Option<web::Json<DispenseRequest>>,
) -> Result<HttpResponse> {
    require_role(&user, PHARMACY_STAFF)?;
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let prescription = state
        .pharmacy
        .dispense(path.into_inner(), user.id, request)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(prescription)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/pharmacy/prescriptions")
            .route("/pending", web::get().to(pending_prescriptions))
            .route("/{id}", web::get().to(prescription_details))
            .route("/{id}/dispense", web::post().to(dispense)),
    );
}

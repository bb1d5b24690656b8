use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use super::ApiResponse;
use crate::error::Result;
use crate::middleware::{require_role, AuthUser};
use crate::models::{LabQueueQuery, UpdateLabTestRequest, UserRole};
use crate::state::AppState;

const LAB_STAFF: &[UserRole] = &[UserRole::LabTechnician, UserRole::Admin];

/// GET /api/v1/lab/pending
pub async fn pending_tests(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<LabQueueQuery>,
) -> Result<HttpResponse> {
    require_role(&user, LAB_STAFF)?;
    let tests = state.lab.pending(query.status).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "tests": tests }))))
}

/// PATCH /api/v1/lab/{test_id}
pub async fn update_test(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    body: web::Json<UpdateLabTestRequest>,
) -> Result<HttpResponse> {
    require_role(&user, LAB_STAFF)?;
    let test = state
        .lab
        .update(path.into_inner(), user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(test)))
}

/// GET /api/v1/lab/{test_id}
pub async fn test_details(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let test = state.lab.details(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(test)))
}

/// GET /api/v1/lab/patient/{patient_id}
pub async fn patient_tests(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let tests = state.lab.for_patient(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "tests": tests }))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/lab")
            .route("/pending", web::get().to(pending_tests))
            .route("/patient/{patient_id}", web::get().to(patient_tests))
            .route("/{test_id}", web::get().to(test_details))
            .route("/{test_id}", web::patch().to(update_test)),
    );
}

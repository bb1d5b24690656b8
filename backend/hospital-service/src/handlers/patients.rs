use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use super::ApiResponse;
use crate::error::Result;
use crate::middleware::{require_role, AuthUser};
use crate::models::{
    CheckInRequest, PatientListQuery, RegisterPatientRequest, UpdatePatientRequest, UserRole,
};
use crate::state::AppState;

const FRONT_DESK: &[UserRole] = &[UserRole::Receptionist, UserRole::Admin];
const CHECK_IN: &[UserRole] = &[UserRole::Receptionist, UserRole::Nurse, UserRole::Admin];
const LISTING: &[UserRole] = &[
    UserRole::Receptionist,
    UserRole::Doctor,
    UserRole::Nurse,
    UserRole::Admin,
];

/// Register a new patient
///
/// POST /api/v1/patients
pub async fn register_patient(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<RegisterPatientRequest>,
) -> Result<HttpResponse> {
    require_role(&user, FRONT_DESK)?;
    let patient = state.patients.register(body.into_inner(), user.id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(patient)))
}

/// List patients with search and status filters
///
/// GET /api/v1/patients
pub async fn list_patients(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<PatientListQuery>,
) -> Result<HttpResponse> {
    require_role(&user, LISTING)?;
    let (patients, pagination) = state.patients.list(&query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "patients": patients,
        "pagination": pagination,
    }))))
}

/// GET /api/v1/patients/{id}
pub async fn get_patient(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let patient = state.patients.get(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(patient)))
}

/// GET /api/v1/patients/{id}/history
pub async fn patient_history(
    state: web::Data<AppState>,
    _user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let history = state.patients.history(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(history)))
}

/// PATCH /api/v1/patients/{id}
pub async fn update_patient(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    body: web::Json<UpdatePatientRequest>,
) -> Result<HttpResponse> {
    require_role(&user, FRONT_DESK)?;
    let patient = state
        .patients
        .update(path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(patient)))
}

/// Open a visit and queue the patient
///
/// POST /api/v1/patients/{id}/check-in
pub async fn check_in(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    body: web::Json<CheckInRequest>,
) -> Result<HttpResponse> {
    require_role(&user, CHECK_IN)?;
    let visit = state
        .patients
        .check_in(path.into_inner(), body.into_inner(), user.id)
        .await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(visit)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/patients")
            .route("", web::post().to(register_patient))
            .route("", web::get().to(list_patients))
            .route("/{id}", web::get().to(get_patient))
            .route("/{id}", web::patch().to(update_patient))
            .route("/{id}/history", web::get().to(patient_history))
            .route("/{id}/check-in", web::post().to(check_in)),
    );
}

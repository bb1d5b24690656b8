use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use super::ApiResponse;
use crate::error::Result;
use crate::middleware::{require_role, AuthUser};
use crate::models::{
    CompleteConsultationQuery, IssuePrescriptionRequest, MyPatientsQuery, OrderLabTestsRequest,
    UpdateConsultationRequest, UserRole,
};
use crate::state::AppState;

const CLINICIANS: &[UserRole] = &[UserRole::Doctor, UserRole::Admin];

/// GET /api/v1/doctors/my-patients
pub async fn my_patients(
    state: web::Data<AppState>,
    user: AuthUser,
    query: web::Query<MyPatientsQuery>,
) -> Result<HttpResponse> {
    require_role(&user, CLINICIANS)?;
    let visits = state.consultations.my_patients(user.id, &query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "visits": visits }))))
}

/// POST /api/v1/doctors/consultations/{visit_id}/start
pub async fn start_consultation(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    require_role(&user, CLINICIANS)?;
    let visit = state.consultations.start(path.into_inner(), user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(visit)))
}

/// PATCH /api/v1/doctors/consultations/{visit_id}
pub async fn update_consultation(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    body: web::Json<UpdateConsultationRequest>,
) -> Result<HttpResponse> {
    require_role(&user, CLINICIANS)?;
    let visit = state
        .consultations
        .update(path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(visit)))
}

/// POST /api/v1/doctors/consultations/{visit_id}/prescriptions
pub async fn issue_prescription(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    body: web::Json<IssuePrescriptionRequest>,
) -> Result<HttpResponse> {
    require_role(&user, CLINICIANS)?;
    let prescription = state
        .consultations
        .issue_prescription(path.into_inner(), user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(prescription)))
}

/// POST /api/v1/doctors/consultations/{visit_id}/lab-tests
pub async fn order_lab_tests(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    body: web::Json<OrderLabTestsRequest>,
) -> Result<HttpResponse> {
    require_role(&user, CLINICIANS)?;
    let tests = state
        .consultations
        .order_lab_tests(path.into_inner(), user.id, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(json!({ "tests": tests }))))
}

/// POST /api/v1/doctors/consultations/{visit_id}/complete
pub async fn complete_consultation(
    state: web::Data<AppState>,
    user: AuthUser,
    path: web::Path<Uuid>,
    query: web::Query<CompleteConsultationQuery>,
) -> Result<HttpResponse> {
    require_role(&user, CLINICIANS)?;
    let visit = state
        .consultations
        .complete(path.into_inner(), user.id, &query)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(visit)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/doctors")
            .route("/my-patients", web::get().to(my_patients))
            .route("/consultations/{visit_id}", web::patch().to(update_consultation))
            .route("/consultations/{visit_id}/start", web::post().to(start_consultation))
            .route(
                "/consultations/{visit_id}/prescriptions",
                web::post().to(issue_prescription),
            )
            .route("/consultations/{visit_id}/lab-tests", web::post().to(order_lab_tests))
            .route("/consultations/{visit_id}/complete", web::post().to(complete_consultation)),
    );
}

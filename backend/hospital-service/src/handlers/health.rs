use actix_web::HttpResponse;
use chrono::Utc;
use serde_json::json;

/// GET /health
pub async fn liveness() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// GET /api/v1/health
pub async fn api_health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

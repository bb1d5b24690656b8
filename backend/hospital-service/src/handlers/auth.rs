use actix_web::{web, HttpResponse};

use super::ApiResponse;
use crate::error::Result;
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Current staff account
///
/// GET /api/v1/auth/me
pub async fn me(state: web::Data<AppState>, user: AuthUser) -> Result<HttpResponse> {
    let account = state.users.find_active(user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(account)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/auth").route("/me", web::get().to(me)));
}

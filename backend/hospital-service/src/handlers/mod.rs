/// HTTP handlers for the hospital flow API
pub mod auth;
pub mod billing;
pub mod doctors;
pub mod health;
pub mod lab;
pub mod notifications;
pub mod patients;
pub mod pharmacy;
pub mod queue;
pub mod realtime;

use actix_web::web;
use serde::Serialize;

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Routes mounted under the authenticated `/api/v1` scope.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    auth::register_routes(cfg);
    patients::register_routes(cfg);
    doctors::register_routes(cfg);
    lab::register_routes(cfg);
    pharmacy::register_routes(cfg);
    billing::register_routes(cfg);
    queue::register_routes(cfg);
    notifications::register_routes(cfg);
    realtime::register_routes(cfg);
}

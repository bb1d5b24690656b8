/// JWT authentication middleware for Bearer token validation
/// Validates the token against the shared secret, refuses accounts that have
/// since been deactivated, and stores the caller's identity in request
/// extensions for the `AuthUser` extractor.
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    error::ErrorInternalServerError,
    http::header::{HeaderMap, AUTHORIZATION},
    web, Error, FromRequest, HttpMessage, HttpRequest,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use serde::Serialize;
use std::rc::Rc;
use uuid::Uuid;

use crate::error::{self, AppError};
use crate::models::UserRole;
use crate::security::{Claims, JwtValidator};
use crate::state::AppState;

/// Authenticated staff member, taken from validated JWT claims
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
}

impl TryFrom<Claims> for AuthUser {
    type Error = AppError;

    fn try_from(claims: Claims) -> error::Result<Self> {
        let id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::Unauthorized("invalid user id in token".to_string()))?;
        Ok(Self {
            id,
            email: claims.email,
            role: claims.role,
        })
    }
}

/// 403 unless the caller holds one of `allowed`.
pub fn require_role(user: &AuthUser, allowed: &[UserRole]) -> error::Result<()> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role {} may not perform this action",
            user.role
        )))
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// JWT authentication middleware factory
pub struct JwtAuthMiddleware;

impl<S, B> Transform<S, ServiceRequest> for JwtAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtAuthMiddlewareService<S>;
    type Future = Ready<std::result::Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct JwtAuthMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            // Read everything needed from the request before touching extensions_mut
            let validator = req
                .app_data::<web::Data<JwtValidator>>()
                .cloned()
                .ok_or_else(|| ErrorInternalServerError("token validator not configured"))?;

            let token = bearer_token(req.headers()).ok_or_else(|| {
                AppError::Unauthorized("missing or malformed Authorization header".to_string())
            })?;

            let user = AuthUser::try_from(validator.validate(&token)?)?;

            let state = req
                .app_data::<web::Data<AppState>>()
                .cloned()
                .ok_or_else(|| ErrorInternalServerError("application state not configured"))?;
            state.users.ensure_active(user.id).await?;

            req.extensions_mut().insert(user);

            service.call(req).await
        })
    }
}

impl FromRequest for AuthUser {
    type Error = Error;
    type Future = Ready<std::result::Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| AppError::Unauthorized("authentication required".to_string()).into()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderValue;

    fn user(role: UserRole) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            email: "staff@hospital.test".into(),
            role,
        }
    }

    #[test]
    fn require_role_gates_by_membership() {
        let pharmacist = user(UserRole::Pharmacist);
        assert!(require_role(&pharmacist, &[UserRole::Pharmacist, UserRole::Admin]).is_ok());
        assert!(matches!(
            require_role(&pharmacist, &[UserRole::Doctor]),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));
    }

    #[actix_web::test]
    async fn middleware_rejects_requests_without_bearer_token() {
        use actix_web::{http::StatusCode, test, App, HttpResponse};

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(JwtValidator::new("unit-test-secret")))
                .wrap(JwtAuthMiddleware)
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;

        let err = test::try_call_service(&app, test::TestRequest::get().uri("/").to_request())
            .await
            .expect_err("missing token");
        assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn claims_with_bad_subject_are_rejected() {
        let claims = Claims {
            sub: "not-a-uuid".into(),
            email: "x@y".into(),
            role: UserRole::Nurse,
            iat: 0,
            exp: 0,
        };
        assert!(AuthUser::try_from(claims).is_err());
    }
}

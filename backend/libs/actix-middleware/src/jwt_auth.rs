use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    error::InternalError,
    Error, FromRequest, HttpMessage, HttpRequest, HttpResponse,
};
use chat_schema::Role;
use crypto_core::{JwtVerifier, TokenKind};
use ::error_types::{error_codes, error_types, ErrorResponse};
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// Caller identity resolved from the bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

fn unauthorized(code: &str, message: &str) -> Error {
    let body = ErrorResponse::new(
        "Unauthorized",
        message,
        401,
        error_types::AUTHENTICATION_ERROR,
        code,
    );
    InternalError::from_response(message.to_string(), HttpResponse::Unauthorized().json(body))
        .into()
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validates an identity token and resolves it to an [`Identity`].
pub fn resolve_identity(verifier: &JwtVerifier, token: &str) -> Result<Identity, Error> {
    let claims = verifier.validate(token, TokenKind::Access).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        unauthorized(error_codes::TOKEN_INVALID, "Invalid token")
    })?;

    let user_id = claims.user_id().map_err(|e| {
        tracing::warn!("Invalid user_id in token: {}", e);
        unauthorized(error_codes::TOKEN_INVALID, "Invalid token: malformed user_id")
    })?;

    let role = claims
        .role
        .as_deref()
        .ok_or_else(|| unauthorized(error_codes::TOKEN_INVALID, "Invalid token: missing role"))?
        .parse::<Role>()
        .map_err(|e| {
            tracing::warn!("Unknown role in token: {}", e);
            unauthorized(error_codes::TOKEN_INVALID, "Invalid token: unknown role")
        })?;

    Ok(Identity { user_id, role })
}

/// JWT Authentication Middleware
#[derive(Clone)]
pub struct JwtAuth {
    verifier: Arc<JwtVerifier>,
}

impl JwtAuth {
    pub fn new(verifier: Arc<JwtVerifier>) -> Self {
        Self { verifier }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtAuthService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthService {
            service: Rc::new(service),
            verifier: self.verifier.clone(),
        }))
    }
}

pub struct JwtAuthService<S> {
    service: Rc<S>,
    verifier: Arc<JwtVerifier>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let verifier = self.verifier.clone();

        Box::pin(async move {
            let identity = {
                let token = bearer_token(req.request()).ok_or_else(|| {
                    unauthorized(error_codes::TOKEN_MISSING, "Missing Authorization header")
                })?;
                resolve_identity(&verifier, token)?
            };

            req.extensions_mut().insert(identity);

            service.call(req).await
        })
    }
}

impl FromRequest for Identity {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        match req.extensions().get::<Identity>() {
            Some(identity) => ready(Ok(*identity)),
            None => ready(Err(unauthorized(
                error_codes::TOKEN_MISSING,
                "User not authenticated",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, web, App};
    use chrono::Duration;
    use crypto_core::testing::{TEST_PRIVATE_KEY, TEST_PUBLIC_KEY};
    use crypto_core::JwtSigner;

    async fn whoami(identity: Identity) -> HttpResponse {
        HttpResponse::Ok().body(format!("{}:{}", identity.user_id, identity.role))
    }

    fn auth() -> JwtAuth {
        JwtAuth::new(Arc::new(JwtVerifier::from_rsa_pem(TEST_PUBLIC_KEY).unwrap()))
    }

    fn token(role: Option<&str>, kind: TokenKind, user_id: Uuid) -> String {
        JwtSigner::from_rsa_pem(TEST_PRIVATE_KEY)
            .unwrap()
            .issue(user_id, role, kind, Duration::minutes(5))
            .unwrap()
            .token
    }

    #[actix_rt::test]
    async fn valid_token_yields_identity() {
        let app =
            test::init_service(App::new().wrap(auth()).route("/", web::get().to(whoami))).await;
        let user_id = Uuid::new_v4();
        let req = test::TestRequest::get()
            .uri("/")
            .insert_header((
                "Authorization",
                format!("Bearer {}", token(Some("landlord"), TokenKind::Access, user_id)),
            ))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(body, format!("{user_id}:landlord"));
    }

    #[actix_rt::test]
    async fn missing_header_is_unauthorized() {
        let app =
            test::init_service(App::new().wrap(auth()).route("/", web::get().to(whoami))).await;
        let err = test::try_call_service(&app, test::TestRequest::get().uri("/").to_request())
            .await
            .err()
            .expect("request must be rejected");
        assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn channel_token_is_not_an_identity() {
        let app =
            test::init_service(App::new().wrap(auth()).route("/", web::get().to(whoami))).await;
        let req = test::TestRequest::get()
            .uri("/")
            .insert_header((
                "Authorization",
                format!("Bearer {}", token(None, TokenKind::Channel, Uuid::new_v4())),
            ))
            .to_request();
        let err = test::try_call_service(&app, req).await.err().unwrap();
        assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn token_without_role_is_rejected() {
        let verifier = JwtVerifier::from_rsa_pem(TEST_PUBLIC_KEY).unwrap();
        let result = resolve_identity(&verifier, &token(None, TokenKind::Access, Uuid::new_v4()));
        assert!(result.is_err());
    }
}

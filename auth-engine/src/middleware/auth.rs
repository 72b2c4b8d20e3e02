use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::{
    models::Principal,
    services::{AccessTokenClaims, ServiceError},
    AppState,
};

/// Raw bearer token of the current request, kept for logout.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authenticate the bearer token and attach a freshly loaded [`Principal`]
/// to the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?
        .to_string();

    let claims = state.auth.validate_bearer(&token).await?;

    let principal = match state.users.find_principal(&claims.sub).await {
        Ok(principal) if principal.is_active => principal,
        Ok(_) | Err(ServiceError::UserNotFound) => {
            tracing::info!(user_id = %claims.sub, "Bearer token for missing or inactive user");
            return Err(AppError::Unauthorized(anyhow::anyhow!(
                "Invalid or expired token"
            )));
        }
        Err(e) => return Err(e.into()),
    };

    req.extensions_mut().insert(principal);
    req.extensions_mut().insert::<AccessTokenClaims>(claims);
    req.extensions_mut().insert(BearerToken(token));

    Ok(next.run(req).await)
}

/// Extractor for the principal attached by [`auth_middleware`].
pub struct CurrentPrincipal(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(CurrentPrincipal)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))
    }
}

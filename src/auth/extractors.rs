use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, instrument, warn};

use super::{jwt::TokenError, repo_types::User};
use crate::{error::AuthError, state::AppState};

pub(crate) const NOT_LOGGED_IN: &str = "You are not logged in! Please log in to get access.";
pub(crate) const USER_GONE: &str = "The user belonging to this token does no longer exist.";
pub(crate) const PASSWORD_CHANGED: &str = "User recently changed password! Please log in again.";

/// The acting user, resolved by [`protect`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolves the user behind a request's bearer token.
///
/// Rejects with `Unauthenticated` when the header is missing, the token does
/// not verify, the user is gone or deactivated, or the password changed after
/// the token was issued.
#[instrument(skip_all)]
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, AuthError> {
    let token = bearer_token(headers).ok_or_else(|| AuthError::unauthenticated(NOT_LOGGED_IN))?;

    let verified = state.tokens.verify(token).map_err(|e| {
        warn!(error = %e, "bearer token rejected");
        AuthError::unauthenticated(match e {
            TokenError::Expired => "Your token has expired! Please log in again.",
            TokenError::InvalidSignature | TokenError::Malformed => {
                "Invalid token. Please log in again!"
            }
        })
    })?;

    let user = state
        .store
        .find_by_id(verified.user_id, false)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %verified.user_id, "token for missing user");
            AuthError::unauthenticated(USER_GONE)
        })?;

    if user.changed_password_after(verified.issued_at) {
        warn!(user_id = %user.id, "stale token after password change");
        return Err(AuthError::unauthenticated(PASSWORD_CHANGED));
    }

    debug!(user_id = %user.id, "request authenticated");
    Ok(user)
}

/// Middleware gate: authenticates and passes the user on in the request
/// extensions, or short-circuits with the rejection.
pub async fn protect(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = authenticate(&state, req.headers()).await?;
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AuthError::unauthenticated(NOT_LOGGED_IN))
    }
}

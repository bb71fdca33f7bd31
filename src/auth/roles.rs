use axum::{extract::Request, middleware::Next, response::Response};
use tracing::warn;

use super::{extractors::CurrentUser, repo_types::{Role, User}};
use crate::error::AuthError;

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Passes when the user's role is one of `allowed`.
pub fn authorize(user: &User, allowed: &[Role]) -> Result<(), AuthError> {
    if allowed.contains(&user.role()) {
        return Ok(());
    }
    warn!(user_id = %user.id, role = %user.role(), "role not permitted");
    Err(AuthError::forbidden(
        "You do not have permission to perform this action",
    ))
}

/// Role gate for routes behind [`super::extractors::protect`]. Requires the
/// user that `protect` placed in the request extensions.
pub async fn restrict_to(
    allowed: &'static [Role],
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let CurrentUser(user) = req
        .extensions()
        .get::<CurrentUser>()
        .cloned()
        .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("role gate ran before protect")))?;
    authorize(&user, allowed)?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::test_user as user_with;
    use crate::error::ErrorKind;

    #[test]
    fn plain_user_is_not_admin() {
        let err = authorize(&user_with(Role::User), ADMIN_ONLY).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn any_listed_role_passes() {
        let allowed = [Role::Admin, Role::User];
        assert!(authorize(&user_with(Role::Admin), &allowed).is_ok());
        assert!(authorize(&user_with(Role::User), &allowed).is_ok());
        assert!(authorize(&user_with(Role::Guide), &allowed).is_err());
    }

    #[test]
    fn empty_set_admits_nobody() {
        assert!(authorize(&user_with(Role::Admin), &[]).is_err());
    }
}

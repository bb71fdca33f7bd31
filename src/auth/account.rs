use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{PublicUser, UpdateMeRequest},
    extractors::USER_GONE,
    repo_types::User,
};
use crate::{error::AuthError, state::AppState};

/// Updates name and email of the logged-in user. Anything touching the
/// password must go through `update_password` instead.
#[instrument(skip_all, fields(user_id = %current.id))]
pub async fn update_me(
    state: &AppState,
    current: &User,
    req: UpdateMeRequest,
) -> Result<PublicUser, AuthError> {
    if req.password.is_some() || req.password_confirm.is_some() {
        return Err(AuthError::validation(
            "This route is not for password updates. Please use /updateMyPassword.",
        ));
    }

    let mut user = state
        .store
        .find_by_id(current.id, false)
        .await?
        .ok_or_else(|| AuthError::unauthenticated(USER_GONE))?;

    user.set_profile(
        req.name.map(|n| n.trim().to_string()),
        req.email.map(|e| e.trim().to_lowercase()),
    );
    state.store.save(&user, true).await?;

    info!("profile updated");
    Ok(PublicUser::from(&user))
}

/// Soft delete: the record stays but every lookup stops seeing it.
#[instrument(skip_all, fields(user_id = %current.id))]
pub async fn deactivate_me(state: &AppState, current: &User) -> Result<(), AuthError> {
    let mut user = current.clone();
    user.deactivate();
    state.store.save(&user, false).await?;
    info!("account deactivated");
    Ok(())
}

pub async fn get_user(state: &AppState, id: Uuid) -> Result<PublicUser, AuthError> {
    state
        .store
        .find_by_id(id, false)
        .await?
        .map(|u| PublicUser::from(&u))
        .ok_or_else(|| AuthError::not_found("No user found with that ID"))
}

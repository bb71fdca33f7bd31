use tracing::{info, instrument, warn};

use super::{
    dto::{LoginRequest, PublicUser, Session, SignupRequest, UpdatePasswordRequest},
    extractors::USER_GONE,
    repo::StoreError,
    repo_types::{is_valid_email, NewUser, Role, User},
};
use crate::{error::AuthError, state::AppState};

pub(crate) const MIN_PASSWORD_LEN: usize = 8;
pub(crate) const BAD_CREDENTIALS: &str = "Incorrect email or password";

/// Checks a new password against its confirmation and the length floor.
pub(crate) fn check_new_password(password: &str, confirm: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password != confirm {
        return Err(AuthError::validation("Passwords are not the same!"));
    }
    Ok(())
}

pub(crate) fn issue_session(state: &AppState, user: &User) -> Result<Session, AuthError> {
    let token = state.tokens.issue(user.id)?;
    Ok(Session {
        token,
        user: PublicUser::from(user),
    })
}

#[instrument(skip_all, fields(email = %req.email))]
pub async fn signup(state: &AppState, req: SignupRequest) -> Result<Session, AuthError> {
    let name = req.name.trim().to_string();
    let email = req.email.trim().to_lowercase();

    if name.is_empty() {
        return Err(AuthError::validation("Please tell us your name!"));
    }
    if !is_valid_email(&email) {
        warn!("invalid email");
        return Err(AuthError::validation("Please provide a valid email"));
    }
    check_new_password(&req.password, &req.password_confirm)?;

    let password_hash = state.hasher.hash(&req.password)?;
    let user = state
        .store
        .create(NewUser {
            name,
            email,
            password_hash,
            role: Role::User,
        })
        .await
        .map_err(|e| {
            if matches!(e, StoreError::DuplicateEmail) {
                warn!("email already registered");
            }
            e
        })?;

    info!(user_id = %user.id, "user signed up");
    issue_session(state, &user)
}

/// Verifies credentials. Unknown email and wrong password fail identically,
/// in message and in time spent.
#[instrument(skip_all)]
pub async fn login(state: &AppState, req: LoginRequest) -> Result<Session, AuthError> {
    let email = req.email.map(|e| e.trim().to_lowercase()).unwrap_or_default();
    let password = req.password.unwrap_or_default();
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::validation("Please provide email and password!"));
    }

    let user = state.store.find_by_email(&email, true).await?;
    let verified = match &user {
        Some(u) => match u.password_hash() {
            Some(hash) => state.hasher.verify(&password, hash)?,
            None => false,
        },
        None => {
            state.hasher.verify_dummy(&password);
            false
        }
    };

    let user = match user {
        Some(u) if verified => u,
        _ => {
            warn!(email = %email, "login rejected");
            return Err(AuthError::unauthorized(BAD_CREDENTIALS));
        }
    };

    info!(user_id = %user.id, "user logged in");
    issue_session(state, &user)
}

/// Changes the password of a logged-in user who can still prove the old one.
/// Tokens issued before the change stop working.
#[instrument(skip_all, fields(user_id = %current.id))]
pub async fn update_password(
    state: &AppState,
    current: &User,
    req: UpdatePasswordRequest,
) -> Result<Session, AuthError> {
    let mut user = state
        .store
        .find_by_id(current.id, true)
        .await?
        .ok_or_else(|| AuthError::unauthenticated(USER_GONE))?;

    let stored = user.password_hash().unwrap_or_default();
    let matches = !stored.is_empty() && state.hasher.verify(&req.password_current, stored)?;
    if !matches {
        warn!("current password rejected");
        return Err(AuthError::unauthorized("Your current password is incorrect"));
    }
    check_new_password(&req.password, &req.password_confirm)?;

    let hash = state.hasher.hash(&req.password)?;
    user.set_password(hash, state.clock.now());
    state.store.save(&user, true).await?;

    info!("password updated");
    issue_session(state, &user)
}

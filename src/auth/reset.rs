//! Forgotten-password flow: a single-use secret is mailed to the account
//! address and only its SHA-256 digest is kept on the user record.

use time::Duration;
use tracing::{error, info, instrument, warn};

use super::{
    dto::{ResetPasswordRequest, Session},
    password::{digest_token, generate_secret},
    repo_types::PendingReset,
    services::{check_new_password, issue_session},
};
use crate::{error::AuthError, state::AppState};

pub(crate) const INVALID_RESET: &str = "Token is invalid or has expired";

fn reset_url(public_url: &str, secret: &str) -> String {
    format!(
        "{}/api/v1/users/resetPassword/{secret}",
        public_url.trim_end_matches('/')
    )
}

/// Stores a fresh reset digest for `email` and mails the raw secret.
///
/// A new request replaces any earlier outstanding secret. When the mail
/// cannot be sent the digest is removed again and the caller sees
/// `DeliveryFailed`.
#[instrument(skip_all)]
pub async fn request_reset(state: &AppState, email: &str) -> Result<(), AuthError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AuthError::validation("Please provide your email address"));
    }

    let Some(mut user) = state.store.find_by_email(&email, false).await? else {
        warn!(email = %email, "reset requested for unknown email");
        return Err(AuthError::not_found(
            "There is no user with that email address.",
        ));
    };

    let ttl = state.config.reset.ttl_minutes;
    let secret = generate_secret();
    user.set_reset(Some(PendingReset {
        token_hash: digest_token(&secret),
        expires_at: state.clock.now() + Duration::minutes(ttl),
    }));
    state.store.save(&user, false).await?;

    let url = reset_url(&state.config.reset.public_url, &secret);
    let subject = format!("Your password reset token (valid for {ttl} min)");
    let body = format!(
        "Forgot your password? Submit a PATCH request with your new password and \
         passwordConfirm to: {url}\nIf you didn't forget your password, please ignore this email!"
    );

    if let Err(e) = state.mailer.send(user.email(), &subject, &body).await {
        error!(user_id = %user.id, error = %e, "reset mail failed, withdrawing secret");
        user.set_reset(None);
        if let Err(rollback) = state.store.save(&user, false).await {
            error!(user_id = %user.id, error = %rollback, "could not withdraw reset secret");
        }
        return Err(e.into());
    }

    info!(user_id = %user.id, "reset secret mailed");
    Ok(())
}

/// Redeems a mailed secret: sets the new password, consumes the secret and
/// opens a session. A rejected password leaves the secret usable.
#[instrument(skip_all)]
pub async fn complete_reset(
    state: &AppState,
    secret: &str,
    req: ResetPasswordRequest,
) -> Result<Session, AuthError> {
    let digest = digest_token(secret);
    let mut user = state
        .store
        .find_by_reset_token_hash(&digest, state.clock.now())
        .await?
        .ok_or_else(|| {
            warn!("unknown or expired reset secret");
            AuthError::invalid_or_expired_token(INVALID_RESET)
        })?;

    check_new_password(&req.password, &req.password_confirm)?;

    let hash = state.hasher.hash(&req.password)?;
    user.set_password(hash, state.clock.now());
    state.store.save(&user, true).await?;

    info!(user_id = %user.id, "password reset");
    issue_session(state, &user)
}

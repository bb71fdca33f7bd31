use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{header::SET_COOKIE, HeaderName, StatusCode},
    middleware::{from_fn, from_fn_with_state, Next},
    routing::{delete, get, patch, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::{
        account,
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, PublicUser, ResetPasswordRequest,
            Session, SignupRequest, UpdateMeRequest, UpdatePasswordRequest,
        },
        extractors::{protect, CurrentUser},
        reset,
        roles::{restrict_to, ADMIN_ONLY},
        services,
    },
    error::AuthError,
    state::AppState,
};

type Body<T> = Result<Json<T>, JsonRejection>;

type SessionResponse = (StatusCode, [(HeaderName, String); 1], Json<AuthResponse>);

/// `jwt` cookie mirroring the bearer token, living as long as the token.
/// The guard itself only reads the `Authorization` header.
fn session_cookie(state: &AppState, token: &str) -> String {
    let jwt = &state.config.jwt;
    let mut cookie = format!(
        "jwt={token}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        jwt.ttl_minutes * 60
    );
    if jwt.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn send_session(state: &AppState, status: StatusCode, session: Session) -> SessionResponse {
    let cookie = session_cookie(state, &session.token);
    (
        status,
        [(SET_COOKIE, cookie)],
        Json(AuthResponse::session(session)),
    )
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
        .route("/users/forgotPassword", post(forgot_password))
        .route("/users/resetPassword/:token", patch(reset_password))
}

pub fn me_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/users/updateMyPassword", patch(update_my_password))
        .route("/users/me", get(get_me))
        .route("/users/updateMe", patch(update_me))
        .route("/users/deleteMe", delete(delete_me))
        .route_layer(from_fn_with_state(state.clone(), protect))
}

/// Admin-only routes. `protect` is the outer layer, so the role gate always
/// sees a resolved user.
pub fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/users/:id", get(get_user))
        .route_layer(from_fn(|req: Request, next: Next| {
            restrict_to(ADMIN_ONLY, req, next)
        }))
        .route_layer(from_fn_with_state(state.clone(), protect))
}

#[instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    payload: Body<SignupRequest>,
) -> Result<SessionResponse, AuthError> {
    let Json(req) = payload?;
    let session = services::signup(&state, req).await?;
    Ok(send_session(&state, StatusCode::CREATED, session))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: Body<LoginRequest>,
) -> Result<SessionResponse, AuthError> {
    let Json(req) = payload?;
    let session = services::login(&state, req).await?;
    Ok(send_session(&state, StatusCode::OK, session))
}

#[instrument(skip_all)]
pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Body<ForgotPasswordRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let Json(req) = payload?;
    reset::request_reset(&state, &req.email).await?;
    Ok(Json(AuthResponse::message("Token sent to email!")))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    payload: Body<ResetPasswordRequest>,
) -> Result<SessionResponse, AuthError> {
    let Json(req) = payload?;
    let session = reset::complete_reset(&state, &token, req).await?;
    Ok(send_session(&state, StatusCode::OK, session))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_my_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Body<UpdatePasswordRequest>,
) -> Result<SessionResponse, AuthError> {
    let Json(req) = payload?;
    let session = services::update_password(&state, &user, req).await?;
    Ok(send_session(&state, StatusCode::OK, session))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<AuthResponse> {
    Json(AuthResponse::user(PublicUser::from(&user)))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Body<UpdateMeRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let Json(req) = payload?;
    let updated = account::update_me(&state, &user, req).await?;
    Ok(Json(AuthResponse::user(updated)))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AuthError> {
    account::deactivate_me(&state, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuthResponse>, AuthError> {
    let user = account::get_user(&state, id).await?;
    Ok(Json(AuthResponse::user(user)))
}

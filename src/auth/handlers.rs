use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Form, Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{CredentialsForm, LoginResponse, RegisterResponse},
        services::{normalize_username, AccountRegistry},
        session::SessionKeys,
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

#[instrument(skip(registry, form), fields(username = %form.username))]
pub async fn register(
    State(registry): State<AccountRegistry>,
    Form(form): Form<CredentialsForm>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let id = registry
        .register(&form.username, form.password.as_bytes())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id,
            username: normalize_username(&form.username),
        }),
    ))
}

#[instrument(skip(registry, keys, form), fields(username = %form.username))]
pub async fn login(
    State(registry): State<AccountRegistry>,
    State(keys): State<SessionKeys>,
    Form(form): Form<CredentialsForm>,
) -> Result<Json<LoginResponse>, AppError> {
    let authenticated = registry
        .authenticate(&form.username, form.password.as_bytes())
        .await?;
    let token = keys.sign(&authenticated.username)?;
    Ok(Json(LoginResponse {
        token,
        username: authenticated.username,
    }))
}

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::session::AuthUser,
    credits::{dto::DashboardResponse, services::CreditsLedger},
    error::AppError,
    state::AppState,
};

pub fn credits_routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/buy_credits", post(buy_credits))
}

#[instrument(skip(ledger))]
pub async fn dashboard(
    State(ledger): State<CreditsLedger>,
    AuthUser(username): AuthUser,
) -> Result<Json<DashboardResponse>, AppError> {
    let remaining_credits = ledger.get_balance(&username).await?;
    info!(%username, remaining_credits, "dashboard viewed");
    Ok(Json(DashboardResponse {
        username,
        remaining_credits,
    }))
}

/// Adds the configured top-up amount and answers with the new balance as text.
#[instrument(skip(state))]
pub async fn buy_credits(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
) -> Result<String, AppError> {
    let balance = state
        .ledger
        .credit(&username, state.config.ledger.top_up_amount)
        .await?;
    Ok(balance.to_string())
}

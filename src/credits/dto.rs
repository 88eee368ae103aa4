use serde::Serialize;

/// Dashboard payload for the logged-in user.
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub username: String,
    pub remaining_credits: i64,
}

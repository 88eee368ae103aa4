use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Form body shared by `/register` and `/login`.
#[derive(Deserialize)]
pub struct CredentialsForm {
    pub username: String,
    #[serde(rename = "pass")]
    pub password: String,
}

// Manual Debug so the password never reaches a log line.
impl std::fmt::Debug for CredentialsForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsForm")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Response returned after registration.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: Uuid,
    pub username: String,
}

/// Response returned after login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
}

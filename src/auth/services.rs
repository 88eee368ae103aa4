use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    auth::{
        password::{burn_verification, hash_password, verify_password, PasswordError},
        repo::{Account, AccountId, UserRecord},
    },
    credits::services::{CreditsLedger, LedgerError},
    store::{DocumentStore, StoreError},
};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("That username already exists!")]
    DuplicateUsername,
    #[error("That username is not an email address!")]
    InvalidUsernameFormat,
    #[error(transparent)]
    Hashing(#[from] PasswordError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Ledger(LedgerError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub username: String,
}

/// Case-folds a username. Whitespace is kept, so `" alice"` and `"alice"`
/// are different accounts.
pub fn normalize_username(raw: &str) -> String {
    raw.to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[A-Za-z0-9_.+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Creates and looks up accounts. Usernames are compared after
/// [`normalize_username`].
#[derive(Clone)]
pub struct AccountRegistry {
    store: Arc<dyn DocumentStore>,
    ledger: CreditsLedger,
    starting_credits: i64,
    require_email: bool,
}

impl AccountRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        ledger: CreditsLedger,
        starting_credits: i64,
        require_email: bool,
    ) -> Self {
        Self {
            store,
            ledger,
            starting_credits,
            require_email,
        }
    }

    /// Scans the whole `users` collection and returns the first account whose
    /// normalized username matches.
    pub async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let wanted = normalize_username(username);
        let found = UserRecord::all(self.store.as_ref())
            .await?
            .into_iter()
            .find(|a| normalize_username(&a.username) == wanted);
        Ok(found)
    }

    pub async fn register(
        &self,
        username: &str,
        password: &[u8],
    ) -> Result<AccountId, RegistrationError> {
        let username = normalize_username(username);

        if self.find_account(&username).await?.is_some() {
            warn!(%username, "username already registered");
            return Err(RegistrationError::DuplicateUsername);
        }

        if self.require_email && !is_valid_email(&username) {
            warn!(%username, "username is not an email address");
            return Err(RegistrationError::InvalidUsernameFormat);
        }

        let record = UserRecord {
            username: username.clone(),
            password_hash: hash_password(password)?,
        };

        let id = match record.insert(self.store.as_ref()).await {
            Ok(id) => id,
            Err(StoreError::Conflict) => {
                warn!(%username, "username registered concurrently");
                return Err(RegistrationError::DuplicateUsername);
            }
            Err(e) => return Err(e.into()),
        };

        match self
            .ledger
            .initialize_balance(&username, self.starting_credits)
            .await
        {
            Ok(created) => {
                if !created {
                    debug!(%username, "credits record already present");
                }
            }
            Err(e) => {
                error!(%username, error = %e, "credits initialization failed; rolling back account");
                if let Err(del) = UserRecord::delete(self.store.as_ref(), id).await {
                    error!(%username, account_id = %id, error = %del, "account rollback failed");
                }
                return Err(match e {
                    LedgerError::Storage(s) => RegistrationError::Storage(s),
                    other => RegistrationError::Ledger(other),
                });
            }
        }

        info!(%username, account_id = %id, "user registered");
        Ok(id)
    }

    pub async fn authenticate(
        &self,
        username: &str,
        password: &[u8],
    ) -> Result<Authenticated, AuthError> {
        let username = normalize_username(username);

        let Some(account) = self.find_account(&username).await? else {
            burn_verification(password);
            warn!(%username, "login unknown username");
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(password, &account.password_hash) {
            warn!(%username, account_id = %account.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        info!(%username, "user logged in");
        Ok(Authenticated { username })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Collection, MemoryDocumentStore};
    use serde_json::json;

    fn registry_with(store: Arc<dyn DocumentStore>, require_email: bool) -> AccountRegistry {
        AccountRegistry::new(store.clone(), CreditsLedger::new(store), 42, require_email)
    }

    fn registry() -> (Arc<MemoryDocumentStore>, AccountRegistry) {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = registry_with(store.clone(), true);
        (store, registry)
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("first.last+tag_1@mail.example.co.uk"));
        assert!(!is_valid_email("plainaddress"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a@@b.com"));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email("@b.com"));
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a@b..com"));
    }

    #[test]
    fn normalization_only_lowercases() {
        assert_eq!(normalize_username("User@Example.COM"), "user@example.com");
        assert_eq!(normalize_username(" Alice"), " alice");
    }

    #[tokio::test]
    async fn surrounding_whitespace_is_part_of_the_username() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let registry = registry_with(store.clone(), false);
        registry.register("alice", b"pw1").await.unwrap();
        registry.register(" alice", b"pw2").await.unwrap();

        assert_eq!(store.find_all(Collection::Users).await.unwrap().len(), 2);
        assert!(registry.authenticate("alice", b"pw1").await.is_ok());
        assert!(registry.authenticate(" alice", b"pw2").await.is_ok());
        assert!(registry.authenticate(" alice", b"pw1").await.is_err());
    }

    #[tokio::test]
    async fn ledger_rejection_rolls_back_the_account() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let ledger = CreditsLedger::new(store.clone());
        let registry = AccountRegistry::new(store.clone(), ledger, -1, true);

        let err = registry.register("a@b.com", b"pw").await.unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Ledger(LedgerError::InvalidAmount(-1))
        ));
        assert!(store.find_all(Collection::Users).await.unwrap().is_empty());
        assert!(store.find_all(Collection::UserCredits).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_then_authenticate_is_case_insensitive() {
        let (_, registry) = registry();
        registry.register("User@Example.com", b"secret").await.unwrap();
        let auth = registry
            .authenticate("user@example.com", b"secret")
            .await
            .expect("login should succeed");
        assert_eq!(auth.username, "user@example.com");
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected_and_stored_once() {
        let (store, registry) = registry();
        registry.register("a@b.com", b"pw1").await.unwrap();
        let err = registry.register("A@B.com", b"pw2").await.unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateUsername));

        let users = store.find_all(Collection::Users).await.unwrap();
        assert_eq!(users.len(), 1);
        let credits = store.find_all(Collection::UserCredits).await.unwrap();
        assert_eq!(credits.len(), 1);
    }

    #[tokio::test]
    async fn invalid_format_is_rejected_even_on_empty_store() {
        let (store, registry) = registry();
        let err = registry.register("not-an-email", b"pw").await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidUsernameFormat));
        assert!(store.find_all(Collection::Users).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lenient_registry_accepts_plain_usernames() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let registry = registry_with(store, false);
        registry.register("alice", b"pw").await.unwrap();
        assert!(registry.authenticate("ALICE", b"pw").await.is_ok());
    }

    #[tokio::test]
    async fn stored_password_is_hashed() {
        let (store, registry) = registry();
        registry.register("a@b.com", b"plaintext-pw").await.unwrap();
        let users = store.find_all(Collection::Users).await.unwrap();
        let stored = users[0].body["password"].as_str().unwrap();
        assert_ne!(stored, "plaintext-pw");
        assert!(verify_password(b"plaintext-pw", stored));
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_are_indistinguishable() {
        let (_, registry) = registry();
        registry.register("real@example.com", b"right").await.unwrap();

        let unknown = registry
            .authenticate("nobody@example.com", b"x")
            .await
            .unwrap_err();
        let wrong = registry
            .authenticate("real@example.com", b"wrong")
            .await
            .unwrap_err();

        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn registration_seeds_starting_balance() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let ledger = CreditsLedger::new(store.clone());
        let registry = AccountRegistry::new(store, ledger.clone(), 42, true);
        registry.register("u@example.com", b"pw").await.unwrap();
        assert_eq!(ledger.get_balance("u@example.com").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn legacy_mixed_case_records_still_match() {
        let (store, registry) = registry();
        let hash = hash_password(b"pw").unwrap();
        store
            .insert_one(
                Collection::Users,
                json!({ "username": "Legacy@Example.com", "password": hash })
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(registry.authenticate("legacy@example.com", b"pw").await.is_ok());
        let err = registry.register("legacy@example.com", b"pw").await.unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateUsername));
    }

    #[tokio::test]
    async fn first_record_wins_when_duplicates_exist() {
        let store = Arc::new(MemoryDocumentStore::new());
        let registry = registry_with(store.clone(), true);
        // The memory store enforces uniqueness on the exact value only, so two
        // differently cased legacy records can coexist.
        for (name, pw) in [("Dup@Example.com", b"first"), ("DUP@example.com", b"other")] {
            store
                .insert_one(
                    Collection::Users,
                    json!({ "username": name, "password": hash_password(pw).unwrap() })
                        .as_object()
                        .cloned()
                        .unwrap(),
                )
                .await
                .unwrap();
        }
        assert!(registry.authenticate("dup@example.com", b"first").await.is_ok());
        assert!(registry.authenticate("dup@example.com", b"other").await.is_err());
    }

    #[tokio::test]
    async fn existing_credits_record_is_not_duplicated() {
        let (store, registry) = registry();
        store
            .insert_one(
                Collection::UserCredits,
                json!({ "username": "a@b.com", "credits": 7 })
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .await
            .unwrap();
        registry.register("a@b.com", b"pw").await.unwrap();
        let credits = store.find_all(Collection::UserCredits).await.unwrap();
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].body["credits"], json!(7));
    }
}

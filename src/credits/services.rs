use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    credits::repo::CreditsRecord,
    store::{DocumentStore, StoreError},
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no credits record for `{0}`")]
    UnknownAccount(String),
    #[error("invalid credit amount {0}")]
    InvalidAmount(i64),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Per-user credit balances keyed by the exact (already normalized) username.
#[derive(Clone)]
pub struct CreditsLedger {
    store: Arc<dyn DocumentStore>,
}

impl CreditsLedger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Stored balance, or 0 when the user has no credits record.
    pub async fn get_balance(&self, username: &str) -> Result<i64, LedgerError> {
        let balance = CreditsRecord::find(self.store.as_ref(), username)
            .await?
            .map(|r| r.credits)
            .unwrap_or(0);
        debug!(username, balance, "balance read");
        Ok(balance)
    }

    /// Creates the record unless one exists. Returns whether it was created.
    pub async fn initialize_balance(
        &self,
        username: &str,
        starting_balance: i64,
    ) -> Result<bool, LedgerError> {
        if starting_balance < 0 {
            return Err(LedgerError::InvalidAmount(starting_balance));
        }
        let record = CreditsRecord {
            username: username.to_string(),
            credits: starting_balance,
        };
        Ok(record.insert_if_absent(self.store.as_ref()).await?)
    }

    /// Adds a positive `amount` and returns the new balance.
    pub async fn credit(&self, username: &str, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        match CreditsRecord::increment(self.store.as_ref(), username, amount).await? {
            Some(balance) => {
                info!(username, amount, balance, "credits added");
                Ok(balance)
            }
            None => {
                warn!(username, "credit for user without credits record");
                Err(LedgerError::UnknownAccount(username.to_string()))
            }
        }
    }
}

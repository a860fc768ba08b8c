//! Bootstrap account: make sure the configured default user exists.

use crate::config::DefaultUser;
use crate::service::{Dbo, Lookup};
use serde_json::json;

/// Model the default account is stored in.
pub const ACCOUNT_MODEL: &str = "accountuser";

#[derive(Clone, Debug, PartialEq)]
pub enum SeedOutcome {
    AlreadyPresent,
    Created(serde_json::Value),
    /// The lookup or the insert failed; the DBO has already reported why.
    Failed,
}

/// Insert `user` into `accounts` unless a record with the same username exists. The
/// password is hashed by the model's write hook, never here.
pub async fn ensure_default_account(accounts: &Dbo, user: &DefaultUser) -> SeedOutcome {
    match accounts.find_one(&json!({ "username": user.username }), None).await {
        Lookup::Found(_) => {
            tracing::debug!(username = %user.username, "default account present");
            SeedOutcome::AlreadyPresent
        }
        Lookup::Failed => SeedOutcome::Failed,
        Lookup::NotFound => {
            let record = json!({ "username": user.username, "password": user.password });
            match accounts.insert(&record).await {
                Some(created) => {
                    tracing::info!(username = %user.username, model = ACCOUNT_MODEL, "default account created");
                    SeedOutcome::Created(created)
                }
                None => SeedOutcome::Failed,
            }
        }
    }
}

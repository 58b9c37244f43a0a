//! Identity-provider admin operations and the self-hosted user table.

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{Instrument, info_span, instrument};

/// User attribute holding the pending magic-link token (private challenge parameter).
pub const CHALLENGE_ATTRIBUTE: &str = "custom:authChallenge";
pub const EMAIL_ATTRIBUTE: &str = "email";
pub const EMAIL_VERIFIED_ATTRIBUTE: &str = "email_verified";

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedUser {
    /// Lowercased email, also the username.
    pub username: String,
    pub attributes: HashMap<String, String>,
    /// A permanent password is set, so the account is not waiting on a forced change.
    pub password_permanent: bool,
}

impl ProvisionedUser {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Account to create for a resource owner. Accounts are created silently:
/// no welcome or temporary-password message is ever sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email_verified: bool,
}

impl NewUser {
    #[must_use]
    pub fn verified(email: &str) -> Self {
        Self {
            username: normalize_email(email),
            email_verified: true,
        }
    }
}

/// Admin operations of the identity provider behind the custom challenge.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_user(&self, username: &str) -> Result<Option<ProvisionedUser>>;

    /// Create the account if absent; `false` means it already existed.
    async fn create_user(&self, user: &NewUser) -> Result<bool>;

    /// Set a permanent password so the account never has to change it on first use.
    async fn set_permanent_password(&self, username: &str, password: &SecretString) -> Result<()>;

    async fn update_user_attribute(&self, username: &str, name: &str, value: &str) -> Result<()>;
}

/// [`IdentityProvider`] over the `identity_users` table.
///
/// Passwords are random 32-character secrets, so a plain SHA-256 digest is
/// stored rather than a slow password hash.
#[derive(Clone, Debug)]
pub struct PgIdentityProvider {
    pool: PgPool,
}

impl PgIdentityProvider {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn hash_password(password: &SecretString) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(password.expose_secret().as_bytes());
    hasher.finalize().to_vec()
}

fn attributes_from_json(value: Value) -> HashMap<String, String> {
    match value {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key, s)),
                Value::Bool(b) => Some((key, b.to_string())),
                _ => None,
            })
            .collect(),
        _ => HashMap::new(),
    }
}

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    #[instrument(skip(self))]
    async fn get_user(&self, username: &str) -> Result<Option<ProvisionedUser>> {
        let query = "SELECT username, attributes, password_permanent FROM identity_users WHERE username = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row: Option<(String, Value, bool)> = sqlx::query_as(query)
            .bind(normalize_email(username))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch identity user")?;

        Ok(row.map(|(username, attributes, password_permanent)| ProvisionedUser {
            username,
            attributes: attributes_from_json(attributes),
            password_permanent,
        }))
    }

    #[instrument(skip(self))]
    async fn create_user(&self, user: &NewUser) -> Result<bool> {
        let query = r"
            INSERT INTO identity_users (username, email_verified, attributes)
            VALUES ($1, $2, jsonb_build_object('email', $1::text, 'email_verified', $2::boolean))
            ON CONFLICT (username) DO NOTHING
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&user.username)
            .bind(user.email_verified)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to create identity user")?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, password))]
    async fn set_permanent_password(&self, username: &str, password: &SecretString) -> Result<()> {
        let query = r"
            UPDATE identity_users
            SET password_hash = $2, password_permanent = TRUE, updated_at = NOW()
            WHERE username = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(normalize_email(username))
            .bind(hash_password(password))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to set permanent password")?;

        anyhow::ensure!(result.rows_affected() == 1, "identity user {username} not found");
        Ok(())
    }

    #[instrument(skip(self, value))]
    async fn update_user_attribute(&self, username: &str, name: &str, value: &str) -> Result<()> {
        let query = r"
            UPDATE identity_users
            SET attributes = attributes || jsonb_build_object($2::text, $3::text), updated_at = NOW()
            WHERE username = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(normalize_email(username))
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update identity user attribute")?;

        anyhow::ensure!(result.rows_affected() == 1, "identity user {username} not found");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn new_user_is_verified() {
        let user = NewUser::verified("Owner@Example.com");
        assert_eq!(user.username, "owner@example.com");
        assert!(user.email_verified);
    }

    #[test]
    fn attributes_keep_strings_and_flags() {
        let attributes = attributes_from_json(json!({
            "email": "a@b.co",
            "email_verified": true,
            "custom:authChallenge": "dG9rZW4=",
            "nested": {"ignored": 1}
        }));

        assert_eq!(attributes.get("email").map(String::as_str), Some("a@b.co"));
        assert_eq!(
            attributes.get("email_verified").map(String::as_str),
            Some("true")
        );
        assert_eq!(
            attributes.get(CHALLENGE_ATTRIBUTE).map(String::as_str),
            Some("dG9rZW4=")
        );
        assert!(!attributes.contains_key("nested"));
    }

    #[test]
    fn password_digest_is_stable() {
        let password = SecretString::from("correct horse".to_string());
        assert_eq!(hash_password(&password), hash_password(&password));
        assert_eq!(hash_password(&password).len(), 32);
    }
}

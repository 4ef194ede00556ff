//! User document schema
//!
//! Stores account credentials, role, and wallet binding. Users are never
//! hard-deleted; deactivation flips `is_active`.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// Failed logins tolerated before the account locks
pub const MAX_FAILED_LOGINS: i32 = 5;

/// Lockout duration in minutes after too many failed logins
pub const LOCKOUT_MINUTES: i64 = 15;

/// KYC verification state
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KycStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Login identifier, unique
    pub email: String,

    /// Display name
    pub name: String,

    /// Argon2 password hash
    pub password_hash: String,

    /// Account role; drives the capability table
    pub role: Role,

    /// Ethereum wallet address (unique when present)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,

    /// Supplementary permission grants beyond the role table
    #[serde(default)]
    pub permissions: Vec<String>,

    /// KYC verification state
    #[serde(default)]
    pub kyc_status: KycStatus,

    /// Consecutive failed login attempts
    #[serde(default)]
    pub failed_login_attempts: i32,

    /// Account locked until this time after repeated failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime>,

    /// Token version for invalidation (increment to invalidate all tokens)
    #[serde(default)]
    pub token_version: i32,

    /// Whether the user account is active
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl UserDoc {
    /// Create a new user document
    pub fn new(
        email: String,
        name: String,
        password_hash: String,
        role: Role,
        wallet_address: Option<String>,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            email,
            name,
            password_hash,
            role,
            wallet_address,
            permissions: Vec::new(),
            kyc_status: KycStatus::Pending,
            failed_login_attempts: 0,
            locked_until: None,
            token_version: 1,
            is_active: true,
        }
    }

    /// Whether the account is currently locked out
    pub fn is_locked(&self, now: DateTime) -> bool {
        match self.locked_until {
            Some(until) => until > now,
            None => false,
        }
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on email
            (
                doc! { "email": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("email_unique".to_string())
                        .build(),
                ),
            ),
            // Wallet addresses are unique when present; sparse so unset
            // wallets don't collide
            (
                doc! { "wallet_address": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .sparse(true)
                        .name("wallet_unique".to_string())
                        .build(),
                ),
            ),
            // Role lookups for role-filtered listings
            (
                doc! { "role": 1 },
                Some(IndexOptions::builder().name("role_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_defaults() {
        let user = UserDoc::new(
            "producer@example.com".into(),
            "Producer One".into(),
            "$argon2id$...".into(),
            Role::Producer,
            None,
        );
        assert!(user.is_active);
        assert_eq!(user.kyc_status, KycStatus::Pending);
        assert_eq!(user.failed_login_attempts, 0);
        assert_eq!(user.token_version, 1);
    }

    #[test]
    fn test_lockout_window() {
        let mut user = UserDoc::new(
            "a@example.com".into(),
            "A".into(),
            "hash".into(),
            Role::Producer,
            None,
        );
        let now = DateTime::now();
        assert!(!user.is_locked(now));

        user.locked_until =
            Some(DateTime::from_millis(now.timestamp_millis() + 60_000));
        assert!(user.is_locked(now));

        user.locked_until =
            Some(DateTime::from_millis(now.timestamp_millis() - 1));
        assert!(!user.is_locked(now));
    }
}

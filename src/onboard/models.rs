use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

/// A registered account.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    /// Argon2id PHC string.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// A one-time password issued to a user.
#[derive(Debug, Clone, FromRow)]
pub struct Otp {
    pub id: i64,
    pub user_id: i64,
    pub code: String,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpState {
    Live,
    Expired,
    Used,
}

impl Otp {
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> OtpState {
        if self.is_used {
            OtpState::Used
        } else if self.expires_at > now {
            OtpState::Live
        } else {
            OtpState::Expired
        }
    }

    /// Whether `code` would verify against this record at `now`.
    #[must_use]
    pub fn accepts(&self, user_id: i64, code: &str, now: DateTime<Utc>) -> bool {
        self.user_id == user_id && self.code == code && self.state_at(now) == OtpState::Live
    }
}

/// Append-only link from a legacy account id to a local user.
#[derive(Debug, Clone, FromRow)]
pub struct MigrationRecord {
    pub id: i64,
    pub old_system_user_id: String,
    pub new_system_user_id: i64,
    pub migrated_at: DateTime<Utc>,
}

/// User fields supplied at registration, already validated and hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// An OTP about to be persisted; the owner is supplied by the store call.
#[derive(Debug, Clone)]
pub struct NewOtp {
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMigrationRecord {
    pub old_system_user_id: String,
    pub new_system_user_id: i64,
    pub migrated_at: DateTime<Utc>,
}

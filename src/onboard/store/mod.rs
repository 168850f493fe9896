//! Persistence port for the account service.
//!
//! Each method that touches more than one row is a single transaction in the
//! backing store. Implementations must keep these guarantees:
//!
//! - `create_user` inserts the user and its first OTP together, and reports a
//!   taken email before a taken phone number.
//! - `consume_otp` marks at most one live OTP used and flips the owner to
//!   verified in the same transaction. Two concurrent calls with one code
//!   cannot both succeed.
//! - `replace_otp` invalidates every unused OTP of the user and inserts the new
//!   one, serialized per user.

use crate::onboard::models::{MigrationRecord, NewMigrationRecord, NewOtp, NewUser, Otp, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("phone number already registered")]
    DuplicatePhone,
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Liveness check used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError>;

    async fn phone_exists(&self, phone_number: &str) -> Result<bool, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn create_user(&self, user: NewUser, otp: NewOtp) -> Result<(User, Otp), StoreError>;

    /// Consume the live OTP matching `user_id` and `code` at `now`.
    ///
    /// Returns `None` when no such OTP exists (wrong, used or expired code).
    async fn consume_otp(
        &self,
        user_id: i64,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Otp>, StoreError>;

    /// Invalidate every unused OTP of `user_id` and insert `otp`.
    ///
    /// Returns the number of invalidated rows along with the new OTP.
    async fn replace_otp(&self, user_id: i64, otp: NewOtp) -> Result<(u64, Otp), StoreError>;

    /// Every OTP of `user_id`, oldest first. Inspection hook, no service
    /// operation reads it.
    async fn list_otps(&self, user_id: i64) -> Result<Vec<Otp>, StoreError>;

    async fn insert_migration(
        &self,
        record: NewMigrationRecord,
    ) -> Result<MigrationRecord, StoreError>;

    /// Migration records pointing at `new_system_user_id`, oldest first.
    /// Inspection hook, no service operation reads it.
    async fn list_migrations(
        &self,
        new_system_user_id: i64,
    ) -> Result<Vec<MigrationRecord>, StoreError>;
}

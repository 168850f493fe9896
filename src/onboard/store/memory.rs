//! In-process store. State lives for the lifetime of the value; selected with
//! a `memory://` DSN and used by the test suite.

use super::{Store, StoreError};
use crate::onboard::models::{MigrationRecord, NewMigrationRecord, NewOtp, NewUser, Otp, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    otps: Vec<Otp>,
    migrations: Vec<MigrationRecord>,
}

impl Tables {
    fn user_mut(&mut self, id: i64) -> Option<&mut User> {
        self.users.iter_mut().find(|user| user.id == id)
    }

    fn next_otp_id(&self) -> i64 {
        self.otps.last().map_or(1, |otp| otp.id + 1)
    }
}

/// All mutations take one lock, which serializes them the way row locks do in
/// the Postgres store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an OTP row as-is, bypassing the service policy.
    ///
    /// # Errors
    /// Returns [`StoreError::UserNotFound`] if the owner does not exist.
    #[cfg(test)]
    pub(crate) async fn insert_otp_raw(
        &self,
        user_id: i64,
        otp: NewOtp,
    ) -> Result<Otp, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.user_mut(user_id).is_none() {
            return Err(StoreError::UserNotFound(user_id));
        }
        let otp = Otp {
            id: tables.next_otp_id(),
            user_id,
            code: otp.code,
            is_used: false,
            created_at: otp.created_at,
            expires_at: otp.expires_at,
        };
        tables.otps.push(otp.clone());
        Ok(otp)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|user| user.id == id).cloned())
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().any(|user| user.email == email))
    }

    async fn phone_exists(&self, phone_number: &str) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .any(|user| user.phone_number == phone_number))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.clone())
    }

    async fn create_user(&self, user: NewUser, otp: NewOtp) -> Result<(User, Otp), StoreError> {
        let mut tables = self.tables.lock().await;

        // Same precedence as the unique constraints in the SQL schema.
        if tables.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        if tables
            .users
            .iter()
            .any(|u| u.phone_number == user.phone_number)
        {
            return Err(StoreError::DuplicatePhone);
        }

        let user = User {
            id: tables.users.last().map_or(1, |u| u.id + 1),
            full_name: user.full_name,
            email: user.email,
            phone_number: user.phone_number,
            password_hash: user.password_hash,
            is_verified: false,
            created_at: user.created_at,
        };
        let otp = Otp {
            id: tables.next_otp_id(),
            user_id: user.id,
            code: otp.code,
            is_used: false,
            created_at: otp.created_at,
            expires_at: otp.expires_at,
        };

        tables.users.push(user.clone());
        tables.otps.push(otp.clone());

        Ok((user, otp))
    }

    async fn consume_otp(
        &self,
        user_id: i64,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Otp>, StoreError> {
        let mut tables = self.tables.lock().await;

        let Some(otp) = tables
            .otps
            .iter_mut()
            .rev()
            .find(|otp| otp.accepts(user_id, code, now))
        else {
            return Ok(None);
        };
        otp.is_used = true;
        let consumed = otp.clone();

        let user = tables
            .user_mut(user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.is_verified = true;

        Ok(Some(consumed))
    }

    async fn replace_otp(&self, user_id: i64, otp: NewOtp) -> Result<(u64, Otp), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.user_mut(user_id).is_none() {
            return Err(StoreError::UserNotFound(user_id));
        }

        let mut invalidated = 0;
        for existing in tables
            .otps
            .iter_mut()
            .filter(|otp| otp.user_id == user_id && !otp.is_used)
        {
            existing.is_used = true;
            invalidated += 1;
        }

        let otp = Otp {
            id: tables.next_otp_id(),
            user_id,
            code: otp.code,
            is_used: false,
            created_at: otp.created_at,
            expires_at: otp.expires_at,
        };
        tables.otps.push(otp.clone());

        Ok((invalidated, otp))
    }

    async fn list_otps(&self, user_id: i64) -> Result<Vec<Otp>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .otps
            .iter()
            .filter(|otp| otp.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_migration(
        &self,
        record: NewMigrationRecord,
    ) -> Result<MigrationRecord, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.user_mut(record.new_system_user_id).is_none() {
            return Err(StoreError::UserNotFound(record.new_system_user_id));
        }

        let record = MigrationRecord {
            id: tables.migrations.last().map_or(1, |m| m.id + 1),
            old_system_user_id: record.old_system_user_id,
            new_system_user_id: record.new_system_user_id,
            migrated_at: record.migrated_at,
        };
        tables.migrations.push(record.clone());
        Ok(record)
    }

    async fn list_migrations(
        &self,
        new_system_user_id: i64,
    ) -> Result<Vec<MigrationRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .migrations
            .iter()
            .filter(|m| m.new_system_user_id == new_system_user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::onboard::models::OtpState;
    use chrono::Duration;

    fn new_user(email: &str, phone: &str) -> NewUser {
        NewUser {
            full_name: "Test User".to_string(),
            email: email.to_string(),
            phone_number: phone.to_string(),
            password_hash: "hash".to_string(),
            created_at: Utc::now(),
        }
    }

    fn new_otp(code: &str, ttl: Duration) -> NewOtp {
        let now = Utc::now();
        NewOtp {
            code: code.to_string(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    fn live(code: &str) -> NewOtp {
        new_otp(code, Duration::minutes(5))
    }

    async fn seed(store: &MemoryStore, email: &str, phone: &str, otp: NewOtp) -> (User, Otp) {
        let user = new_user(email, phone);
        store.create_user(user, otp).await.unwrap()
    }

    #[tokio::test]
    async fn ids_are_sequential_from_one() {
        let store = MemoryStore::new();
        let (a, otp_a) = seed(&store, "a@x.com", "555-1", live("111111")).await;
        let (b, otp_b) = seed(&store, "b@x.com", "555-2", live("222222")).await;
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!((otp_a.id, otp_b.id), (1, 2));
        assert_eq!(otp_b.user_id, 2);
    }

    #[tokio::test]
    async fn duplicate_email_wins_over_duplicate_phone() {
        let store = MemoryStore::new();
        seed(&store, "a@x.com", "555-1", live("111111")).await;

        let err = store
            .create_user(new_user("a@x.com", "555-1"), live("222222"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));

        let err = store
            .create_user(new_user("c@x.com", "555-1"), live("222222"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePhone));
    }

    #[tokio::test]
    async fn consume_is_single_use() {
        let store = MemoryStore::new();
        let (user, _) = seed(&store, "a@x.com", "555-1", live("123456")).await;

        let consumed = store
            .consume_otp(user.id, "123456", Utc::now())
            .await
            .unwrap();
        assert!(consumed.is_some_and(|otp| otp.is_used));
        let user = store.find_user(user.id).await.unwrap().unwrap();
        assert!(user.is_verified);

        let again = store
            .consume_otp(user.id, "123456", Utc::now())
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn consume_ignores_expired() {
        let store = MemoryStore::new();
        let expired = new_otp("123456", Duration::seconds(-1));
        let (user, _) = seed(&store, "a@x.com", "555-1", expired).await;

        let consumed = store
            .consume_otp(user.id, "123456", Utc::now())
            .await
            .unwrap();
        assert!(consumed.is_none());
        let user = store.find_user(user.id).await.unwrap().unwrap();
        assert!(!user.is_verified);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_consume_succeeds_once() {
        let store = MemoryStore::new();
        let (user, _) = seed(&store, "a@x.com", "555-1", live("123456")).await;

        let now = Utc::now();
        let (first, second) = tokio::join!(
            store.consume_otp(user.id, "123456", now),
            store.consume_otp(user.id, "123456", now),
        );
        let consumed = [first.unwrap(), second.unwrap()];
        assert_eq!(consumed.iter().filter(|otp| otp.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn replace_invalidates_expired_and_live() {
        let store = MemoryStore::new();
        let (user, _) = seed(&store, "a@x.com", "555-1", live("111111")).await;
        store
            .insert_otp_raw(user.id, new_otp("222222", Duration::seconds(-10)))
            .await
            .unwrap();

        let (invalidated, fresh) = store.replace_otp(user.id, live("333333")).await.unwrap();
        assert_eq!(invalidated, 2);
        assert!(!fresh.is_used);

        let otps = store.list_otps(user.id).await.unwrap();
        assert_eq!(otps.len(), 3);
        assert_eq!(otps.iter().filter(|otp| !otp.is_used).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_replace_leaves_one_live_code() {
        let store = MemoryStore::new();
        let (user, _) = seed(&store, "a@x.com", "555-1", live("111111")).await;

        let (first, second) = tokio::join!(
            store.replace_otp(user.id, live("222222")),
            store.replace_otp(user.id, live("333333")),
        );
        first.unwrap();
        second.unwrap();

        let now = Utc::now();
        let otps = store.list_otps(user.id).await.unwrap();
        assert_eq!(otps.len(), 3);
        assert_eq!(
            otps.iter()
                .filter(|otp| otp.state_at(now) == OtpState::Live)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn replace_for_missing_user_fails() {
        let store = MemoryStore::new();
        let err = store.replace_otp(99, live("111111")).await.unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(99)));
    }
}

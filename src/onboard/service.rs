use crate::onboard::{
    error::ServiceError,
    models::{MigrationRecord, NewMigrationRecord, NewOtp, NewUser, Otp, User},
    otp::{self, CodeGenerator, OsRngCodes},
    password::hash_password,
    store::Store,
};
use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const DEFAULT_OTP_TTL_SECONDS: i64 = 300;

/// Registration input after request validation.
#[derive(Debug)]
pub struct Registration {
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub password: SecretString,
}

#[derive(Debug, Clone)]
pub struct Registered {
    pub user: User,
    pub otp: Otp,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
    codes: Arc<dyn CodeGenerator>,
    otp_ttl: Duration,
}

impl AccountService {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            codes: Arc::new(OsRngCodes),
            otp_ttl: Duration::seconds(DEFAULT_OTP_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_code_generator(mut self, codes: Arc<dyn CodeGenerator>) -> Self {
        self.codes = codes;
        self
    }

    #[must_use]
    pub fn with_otp_ttl(mut self, otp_ttl: Duration) -> Self {
        self.otp_ttl = otp_ttl;
        self
    }

    fn new_otp(&self) -> NewOtp {
        let created_at = Utc::now();
        NewOtp {
            code: self.codes.generate(),
            created_at,
            expires_at: created_at + self.otp_ttl,
        }
    }

    async fn require_user(&self, user_id: i64) -> Result<User, ServiceError> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    /// Register a user and issue the first OTP.
    ///
    /// # Errors
    /// [`ServiceError::DuplicateEmail`] or [`ServiceError::DuplicatePhone`] when
    /// the contact details are taken (email is checked first).
    #[instrument(skip(self, registration), fields(email = %registration.email))]
    pub async fn register(&self, registration: Registration) -> Result<Registered, ServiceError> {
        if self.store.email_exists(&registration.email).await? {
            return Err(ServiceError::DuplicateEmail);
        }

        if self.store.phone_exists(&registration.phone_number).await? {
            return Err(ServiceError::DuplicatePhone);
        }

        // Argon2 blocks; run it off the async workers.
        let password = registration.password;
        let hashing = move || hash_password(password.expose_secret());
        let password_hash = tokio::task::spawn_blocking(hashing)
            .await
            .map_err(|err| ServiceError::Internal(err.into()))?
            .map_err(ServiceError::Internal)?;

        let new_user = NewUser {
            full_name: registration.full_name,
            email: registration.email,
            phone_number: registration.phone_number,
            password_hash,
            created_at: Utc::now(),
        };

        // A concurrent registration can still win the race; the store reports
        // it through the same duplicate errors.
        let (user, otp) = self.store.create_user(new_user, self.new_otp()).await?;

        info!(
            user_id = user.id,
            otp_id = otp.id,
            expires_at = %otp.expires_at,
            "user registered, otp issued"
        );

        Ok(Registered { user, otp })
    }

    /// Consume a live OTP and mark its owner verified.
    ///
    /// # Errors
    /// [`ServiceError::UserNotFound`] for an unknown user and
    /// [`ServiceError::InvalidOrExpiredOtp`] when the code is wrong, used or
    /// expired.
    #[instrument(skip(self, code))]
    pub async fn verify_otp(&self, user_id: i64, code: &str) -> Result<(), ServiceError> {
        self.require_user(user_id).await?;

        let code = code.trim();
        if !otp::well_formed(code) {
            debug!("malformed otp code");
            return Err(ServiceError::InvalidOrExpiredOtp);
        }

        match self.store.consume_otp(user_id, code, Utc::now()).await? {
            Some(otp) => {
                info!(otp_id = otp.id, "otp verified, user verified");
                Ok(())
            }
            None => Err(ServiceError::InvalidOrExpiredOtp),
        }
    }

    /// Invalidate every unused OTP of the user and issue a fresh one.
    ///
    /// # Errors
    /// [`ServiceError::UserNotFound`] for an unknown user.
    #[instrument(skip(self))]
    pub async fn resend_otp(&self, user_id: i64) -> Result<Otp, ServiceError> {
        self.require_user(user_id).await?;

        let (invalidated, otp) = self.store.replace_otp(user_id, self.new_otp()).await?;

        info!(
            otp_id = otp.id,
            invalidated,
            expires_at = %otp.expires_at,
            "otp reissued"
        );

        Ok(otp)
    }

    /// Record that `old_system_user_id` now lives at `new_system_user_id`.
    ///
    /// # Errors
    /// [`ServiceError::UserNotFound`] when the new user does not exist.
    #[instrument(skip(self))]
    pub async fn migrate_user(
        &self,
        old_system_user_id: String,
        new_system_user_id: i64,
    ) -> Result<MigrationRecord, ServiceError> {
        self.require_user(new_system_user_id).await?;

        let record = self
            .store
            .insert_migration(NewMigrationRecord {
                old_system_user_id,
                new_system_user_id,
                migrated_at: Utc::now(),
            })
            .await?;

        info!(migration_id = record.id, "user migrated");

        Ok(record)
    }

    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn list_users(&self) -> Result<Vec<User>, ServiceError> {
        Ok(self.store.list_users().await?)
    }

    /// # Errors
    /// Returns an error if the store is unreachable.
    pub async fn ping(&self) -> Result<(), ServiceError> {
        Ok(self.store.ping().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::onboard::store::MemoryStore;
    use std::{collections::VecDeque, sync::Mutex};

    struct FixedCodes(Mutex<VecDeque<&'static str>>);

    impl FixedCodes {
        fn new(codes: &[&'static str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(codes.iter().copied().collect())))
        }
    }

    impl CodeGenerator for FixedCodes {
        fn generate(&self) -> String {
            self.0.lock().unwrap().pop_front().unwrap().to_string()
        }
    }

    fn registration(email: &str, phone: &str) -> Registration {
        Registration {
            full_name: "Ada Lovelace".to_string(),
            email: email.to_string(),
            phone_number: phone.to_string(),
            password: SecretString::from("hunter22".to_string()),
        }
    }

    fn service(codes: &[&'static str]) -> (AccountService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = AccountService::new(store.clone())
            .with_code_generator(FixedCodes::new(codes));
        (service, store)
    }

    #[tokio::test]
    async fn register_then_verify_end_to_end() {
        let (service, store) = service(&["482193"]);

        let registered = service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap();
        assert_eq!(registered.user.id, 1);
        assert_eq!(registered.otp.code, "482193");
        assert!(!registered.user.is_verified);
        assert_eq!(
            registered.otp.expires_at - registered.otp.created_at,
            Duration::seconds(DEFAULT_OTP_TTL_SECONDS)
        );

        service.verify_otp(1, "482193").await.unwrap();

        let user = store.find_user(1).await.unwrap().unwrap();
        assert!(user.is_verified);
        let otps = store.list_otps(1).await.unwrap();
        assert!(otps[0].is_used);
    }

    #[tokio::test]
    async fn password_is_stored_hashed() {
        let (service, store) = service(&["111111"]);
        service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap();
        let user = store.find_user(1).await.unwrap().unwrap();
        assert_ne!(user.password_hash, "hunter22");
        assert!(user.password_hash.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn duplicate_email_rejected_regardless_of_other_fields() {
        let (service, _) = service(&["111111", "222222"]);
        service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap();

        let err = service
            .register(registration("a@x.com", "555-9"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateEmail));

        // Email is checked before phone.
        let err = service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateEmail));
    }

    #[tokio::test]
    async fn duplicate_phone_rejected() {
        let (service, _) = service(&["111111", "222222"]);
        service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap();

        let err = service
            .register(registration("b@x.com", "555-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicatePhone));
    }

    #[tokio::test]
    async fn second_verification_with_same_code_fails() {
        let (service, _) = service(&["482193"]);
        service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap();

        service.verify_otp(1, "482193").await.unwrap();
        let err = service.verify_otp(1, "482193").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOrExpiredOtp));
    }

    #[tokio::test]
    async fn expired_code_does_not_verify() {
        let (service, store) = service(&["482193"]);
        let service = service.with_otp_ttl(Duration::zero());
        service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap();

        let err = service.verify_otp(1, "482193").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOrExpiredOtp));

        let otps = store.list_otps(1).await.unwrap();
        assert!(!otps[0].is_used);
        assert!(!store.find_user(1).await.unwrap().unwrap().is_verified);
    }

    #[tokio::test]
    async fn wrong_or_malformed_code_fails() {
        let (service, _) = service(&["482193"]);
        service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap();

        for code in ["000000", "48219", "abcdef", ""] {
            let err = service.verify_otp(1, code).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidOrExpiredOtp), "{code}");
        }
    }

    #[tokio::test]
    async fn verify_unknown_user_is_not_found() {
        let (service, _) = service(&[]);
        let err = service.verify_otp(42, "482193").await.unwrap_err();
        assert!(matches!(err, ServiceError::UserNotFound));
    }

    #[tokio::test]
    async fn resend_twice_only_latest_code_verifies() {
        let (service, _) = service(&["111111", "222222", "333333"]);
        service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap();

        let first = service.resend_otp(1).await.unwrap();
        let second = service.resend_otp(1).await.unwrap();
        assert_eq!(first.code, "222222");
        assert_eq!(second.code, "333333");

        let err = service.verify_otp(1, &first.code).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOrExpiredOtp));
        let err = service.verify_otp(1, "111111").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOrExpiredOtp));

        service.verify_otp(1, &second.code).await.unwrap();
    }

    #[tokio::test]
    async fn resend_invalidates_expired_codes_too() {
        let (service, store) = service(&["111111", "222222"]);
        let service = service.with_otp_ttl(Duration::zero());
        service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap();

        service.resend_otp(1).await.unwrap();

        let otps = store.list_otps(1).await.unwrap();
        assert_eq!(otps.len(), 2);
        assert!(otps[0].is_used);
        assert!(!otps[1].is_used);
    }

    #[tokio::test]
    async fn resend_unknown_user_is_not_found() {
        let (service, _) = service(&["111111"]);
        let err = service.resend_otp(7).await.unwrap_err();
        assert!(matches!(err, ServiceError::UserNotFound));
    }

    #[tokio::test]
    async fn migrate_appends_one_record() {
        let (service, store) = service(&["111111"]);
        service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap();

        let record = service
            .migrate_user("legacy-77".to_string(), 1)
            .await
            .unwrap();
        assert_eq!(record.old_system_user_id, "legacy-77");
        assert_eq!(record.new_system_user_id, 1);

        let records = store.list_migrations(1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].old_system_user_id, "legacy-77");

        // Repeats are allowed and append another row.
        service
            .migrate_user("legacy-77".to_string(), 1)
            .await
            .unwrap();
        assert_eq!(store.list_migrations(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn migrate_to_missing_user_is_not_found() {
        let (service, store) = service(&[]);
        let err = service
            .migrate_user("legacy-1".to_string(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UserNotFound));
        assert!(store.list_migrations(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_users_returns_every_user() {
        let (service, _) = service(&["111111", "222222"]);
        service
            .register(registration("a@x.com", "555-1"))
            .await
            .unwrap();
        service
            .register(registration("b@x.com", "555-2"))
            .await
            .unwrap();

        let users = service.list_users().await.unwrap();
        let emails: Vec<&str> = users.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, vec!["a@x.com", "b@x.com"]);
    }
}

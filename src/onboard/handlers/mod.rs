pub mod health;
pub use self::health::health;

pub mod types;

pub mod users;
pub use self::users::{list_users, migrate_user, register, resend_otp, verify_otp};

// common functions for the handlers
use axum::http::{header::AUTHORIZATION, HeaderMap};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

const MAX_FULL_NAME_LEN: usize = 200;
const MAX_PASSWORD_LEN: usize = 1024;

/// Settings the HTTP layer applies on top of the account service.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Echo issued OTP codes in responses (demo only).
    pub expose_otp: bool,
    /// When set, listing users requires `Authorization: Bearer <token>`.
    pub admin_token: Option<SecretString>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            expose_otp: true,
            admin_token: None,
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.admin_token else {
            return true;
        };

        let Some(presented) = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
        else {
            return false;
        };

        // Compare digests, not raw tokens.
        Sha256::digest(presented.trim().as_bytes())
            == Sha256::digest(expected.expose_secret().as_bytes())
    }
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_or(false, |re| re.is_match(email))
}

pub fn valid_phone_number(phone_number: &str) -> bool {
    // digits with optional leading '+', inner spaces or dashes, 3 to 20 chars
    Regex::new(r"^(?:\+[0-9][0-9 \-]{0,17}|[0-9][0-9 \-]{1,18})[0-9]$")
        .map_or(false, |re| re.is_match(phone_number))
}

pub fn valid_full_name(full_name: &str) -> bool {
    let trimmed = full_name.trim();
    !trimmed.is_empty() && trimmed.chars().count() <= MAX_FULL_NAME_LEN
}

pub fn valid_password(password: &str) -> bool {
    !password.is_empty() && password.len() <= MAX_PASSWORD_LEN
}

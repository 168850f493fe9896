//! # Onboard
//!
//! `onboard` registers accounts and proves control of them with short-lived
//! numeric one-time passwords (OTP).
//!
//! ## OTP lifecycle
//!
//! Every OTP record moves through a small state machine:
//!
//! - **Live:** unused and not yet expired. Only live codes verify.
//! - **Expired:** unused but past `expires_at`. Never verifies again.
//! - **Used:** consumed by a successful verification, or force-invalidated by a
//!   resend for the same user. Terminal.
//!
//! Resending invalidates every unused code of the user before issuing a new one,
//! so at most one code per user is live. The Postgres store serializes resends
//! per user with a row lock.
//!
//! ## Migration records
//!
//! A migration record links a legacy account identifier to a local user id. It
//! is append-only and has no behavioral effect.

pub mod cli;
pub mod onboard;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }
}

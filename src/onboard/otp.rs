//! One-time password code generation.
//!
//! Codes are six decimal digits drawn uniformly from `100000..=999999`. The
//! service owns one generator for its lifetime; the default draws from the
//! operating system CSPRNG.

use rand::{rngs::OsRng, CryptoRng, Rng, RngCore};

pub const OTP_MIN: u32 = 100_000;
pub const OTP_MAX: u32 = 999_999;
pub const OTP_LEN: usize = 6;

pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Draws codes from [`OsRng`].
#[derive(Clone, Copy, Debug, Default)]
pub struct OsRngCodes;

impl CodeGenerator for OsRngCodes {
    fn generate(&self) -> String {
        generate_with_rng(&mut OsRng)
    }
}

pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    rng.gen_range(OTP_MIN..=OTP_MAX).to_string()
}

/// Cheap shape check done before touching the store.
#[must_use]
pub fn well_formed(code: &str) -> bool {
    code.len() == OTP_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

use data_encoding::BASE32_NOPAD;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use super::repo_types::{Scope, Token};
use crate::validator::Validator;

pub const ACTIVATION_TTL: Duration = Duration::days(3);
pub const AUTHENTICATION_TTL: Duration = Duration::hours(24);
pub const PASSWORD_RESET_TTL: Duration = Duration::minutes(45);

/// 16 random bytes in unpadded base32.
pub const PLAINTEXT_LEN: usize = 26;

pub fn generate(user_id: i64, ttl: Duration, scope: Scope) -> Token {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    let plaintext = BASE32_NOPAD.encode(&bytes);

    Token {
        hash: digest(&plaintext),
        plaintext,
        user_id,
        expiry: OffsetDateTime::now_utc() + ttl,
        scope,
    }
}

pub fn digest(plaintext: &str) -> [u8; 32] {
    Sha256::digest(plaintext.as_bytes()).into()
}

pub fn validate_plaintext(v: &mut Validator, plaintext: &str) {
    v.check(!plaintext.is_empty(), "token", "must be provided");
    v.check(plaintext.len() == PLAINTEXT_LEN, "token", "must be 26 bytes long");
}

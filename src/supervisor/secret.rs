//! Per-session shared secret sent in the `Authentication-Token` header.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;

/// Number of random bytes behind each token.
pub const TOKEN_BYTES: usize = 64;

/// Generate a fresh token: [`TOKEN_BYTES`] bytes from the thread CSPRNG,
/// base64 encoded with the URL-safe alphabet and no padding.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

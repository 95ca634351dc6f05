//! Short human-facing access codes.
//!
//! Codes are drawn from an alphabet without the easily confused glyphs
//! `I`, `O`, `0` and `1`. Uniqueness among live files is not checked here:
//! the repository claims each candidate atomically and asks for another
//! one on collision.

use rand::{Rng, TryRngCore, rngs::OsRng};

pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LEN: usize = 6;
/// Candidates tried before an upload gives up.
pub const MAX_ATTEMPTS: usize = 20;

/// Draw a random code from the OS RNG.
pub fn generate() -> String {
    let mut rng = OsRng.unwrap_err();
    (0..CODE_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Normalize a code typed by a human before lookup.
pub fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Whether `code` could have been produced by [`generate`].
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| ALPHABET.contains(&b))
}

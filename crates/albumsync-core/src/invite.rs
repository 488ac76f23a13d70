//! Invite codes for shared albums
//!
//! An invite code is a short token people read out loud or type by hand:
//! exactly six characters drawn from `A-Z0-9`. Codes are generated at album
//! creation and must be unique among active albums; the directory retries on
//! collision (see [`crate::album::AlbumDirectory::create_album`]).
//!
//! User input is forgiving: lowercase letters are upper-cased and anything
//! that is not alphanumeric (spaces, dashes) is dropped before validation.

use rand::Rng;

use crate::error::AlbumError;

/// Length of every invite code
pub const INVITE_CODE_LEN: usize = 6;

/// Characters an invite code may contain
pub const INVITE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a fresh random invite code.
pub fn generate_invite_code() -> String {
    generate_invite_code_with(&mut rand::rng())
}

/// Generate an invite code from the given RNG.
pub fn generate_invite_code_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.random_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

/// Check a code is exactly six uppercase alphanumeric characters.
pub fn is_valid_invite_code(code: &str) -> bool {
    code.len() == INVITE_CODE_LEN && code.bytes().all(|b| INVITE_ALPHABET.contains(&b))
}

/// Normalize user input into a canonical invite code.
///
/// # Errors
///
/// Returns `AlbumError::InvalidInput` if fewer or more than six
/// alphanumeric characters remain after normalization.
pub fn normalize_invite_code(input: &str) -> Result<String, AlbumError> {
    let code: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if code.len() != INVITE_CODE_LEN {
        return Err(AlbumError::InvalidInput(format!(
            "invite code must have {} letters or digits, got {}",
            INVITE_CODE_LEN,
            code.len()
        )));
    }
    Ok(code)
}

//! Opaque token generation and digest helpers.
//!
//! Raw tokens are only returned to the caller; persistence and the key-value
//! store only ever see a digest.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

/// Create a 32-byte url-safe random token (sessions, invitations, resets).
///
/// # Errors
/// Returns an error if the system RNG is unavailable.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Lowercase SHA-256 hex digest. Used to store bearer tokens and for the
/// indexed lookup column next to bcrypt-verified tokens.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64ct::{Base64UrlUnpadded, Encoding};

    #[test]
    fn tokens_decode_to_32_bytes() -> anyhow::Result<()> {
        let token = generate_token()?;
        let bytes = Base64UrlUnpadded::decode_vec(&token)
            .map_err(|_| anyhow::anyhow!("token is not base64url"))?;
        assert_eq!(bytes.len(), 32);
        Ok(())
    }

    #[test]
    fn tokens_are_unique() -> anyhow::Result<()> {
        assert_ne!(generate_token()?, generate_token()?);
        Ok(())
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sha256_hex("abc").len(), 64);
    }
}

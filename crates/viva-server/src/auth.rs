//! HMAC-signed bearer tokens.
//!
//! The gateway trusts whoever holds the shared secret to mint tokens; its own
//! job is verification. A token binds a user id to an expiry window, so a
//! leaked token is useless after expiry and cannot be rebound to a different
//! user without the key.

use axum::http::StatusCode;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Default validity window for minted tokens (24 hours).
pub const TOKEN_TTL_SECS: u64 = 86_400;

/// Derives the 32-byte HMAC key from the configured shared secret. The
/// domain-separation prefix keeps this key independent of any other use of
/// the secret.
pub fn derive_token_secret(shared_secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"viva-token-v1:");
    hasher.update(shared_secret.as_bytes());
    let result = hasher.finalize();
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&result);
    secret
}

/// Mints a signed bearer token for `user_id`, valid for [`TOKEN_TTL_SECS`].
///
/// Token format: `base64url(user_id|expires_unix_secs|hmac_signature_hex)`.
pub fn generate_token(user_id: &str, secret: &[u8; 32]) -> String {
    let expires = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + TOKEN_TTL_SECS;
    make_token(user_id, expires, secret)
}

fn make_token(user_id: &str, expires: u64, secret: &[u8; 32]) -> String {
    let payload = format!("{}|{}", user_id, expires);

    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC key length is valid");
    mac.update(payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    let token_bytes = format!("{}|{}", payload, hex::encode(signature));
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token_bytes.as_bytes())
}

/// Verifies a signed bearer token. Returns the bound user id if the
/// signature matches and the token has not expired.
pub fn verify_token(token: &str, secret: &[u8; 32]) -> Result<String, StatusCode> {
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let token_str = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    // Parse: user_id|expires|signature_hex
    let parts: Vec<&str> = token_str.splitn(3, '|').collect();
    if parts.len() != 3 {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let user_id = parts[0];
    let expires_str = parts[1];
    let sig_hex = parts[2];

    let payload = format!("{}|{}", user_id, expires_str);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC key length is valid");
    mac.update(payload.as_bytes());
    let expected_sig = mac.finalize().into_bytes();
    let provided_sig = hex::decode(sig_hex).map_err(|_| StatusCode::UNAUTHORIZED)?;

    if expected_sig.as_slice() != provided_sig.as_slice() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let expires: u64 = expires_str.parse().map_err(|_| StatusCode::UNAUTHORIZED)?;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    if now > expires {
        return Err(StatusCode::UNAUTHORIZED);
    }

    if user_id.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(user_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips() {
        let secret = derive_token_secret("test-secret");
        let token = generate_token("alice", &secret);
        assert_eq!(verify_token(&token, &secret).unwrap(), "alice");
    }

    #[test]
    fn expired_token_is_rejected() {
        let secret = derive_token_secret("test-secret");
        let token = make_token("alice", 1_000, &secret); // long past
        assert_eq!(
            verify_token(&token, &secret),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn wrong_key_is_rejected() {
        let secret = derive_token_secret("test-secret");
        let other = derive_token_secret("other-secret");
        let token = generate_token("alice", &secret);
        assert_eq!(verify_token(&token, &other), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn tampered_user_id_is_rejected() {
        let secret = derive_token_secret("test-secret");
        let token = generate_token("alice", &secret);

        // Re-encode the token with the user id swapped out.
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .unwrap();
        let tampered = String::from_utf8(decoded).unwrap().replacen("alice", "mallory", 1);
        let tampered = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tampered);

        assert_eq!(
            verify_token(&tampered, &secret),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let secret = derive_token_secret("test-secret");
        assert!(verify_token("not-base64!!!", &secret).is_err());
        assert!(verify_token("", &secret).is_err());
        let no_parts = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("just-a-name");
        assert!(verify_token(&no_parts, &secret).is_err());
    }
}

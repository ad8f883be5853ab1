use ed25519_dalek::{Signature, Verifier};

use crate::error::TokenError;
use crate::keyset::Keyset;
use crate::payload::TokenPayload;

/// Domain separator prefixed to every attach token and to the signed
/// message itself, so a token can never be confused with some other
/// signed artifact that happens to share the Ed25519 key.
pub const TOKEN_PREFIX: &str = "fsec.v1.token";

/// Parameters a verifier checks a token against; supplied by whichever
/// component is doing the verifying (a standalone tool, or the
/// tunnel's attach stage), not carried by the token itself.
pub struct VerifyParams<'a> {
    pub now: i64,
    pub audience: &'a str,
    pub issuer: &'a str,
    pub clock_skew_secs: i64,
}

/// Parses, authenticates, and time-checks an attach token against
/// `keyset`. Does not consult or update the replay cache; callers do
/// that with the returned payload's `token_id`.
pub fn verify(token: &str, keyset: &Keyset, params: &VerifyParams<'_>) -> Result<TokenPayload, TokenError> {
    let mut parts = token.split('.');
    let prefix = parts.next().ok_or(TokenError::BadFormat)?;
    let payload_b64u = parts.next().ok_or(TokenError::BadFormat)?;
    let sig_b64u = parts.next().ok_or(TokenError::BadFormat)?;
    if parts.next().is_some() {
        return Err(TokenError::BadFormat);
    }
    if prefix != TOKEN_PREFIX {
        return Err(TokenError::BadFormat);
    }

    let payload_bytes = flowersec_common::decode_b64u(payload_b64u).map_err(|_| TokenError::BadFormat)?;
    let payload: TokenPayload =
        serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::BadFormat)?;

    let key = keyset.get(&payload.kid).ok_or(TokenError::UnknownKid)?;

    let sig_bytes = flowersec_common::decode_b64u(sig_b64u).map_err(|_| TokenError::BadFormat)?;
    let sig_bytes: [u8; 64] = sig_bytes.try_into().map_err(|_| TokenError::BadFormat)?;
    let signature = Signature::from_bytes(&sig_bytes);

    let signed_message = format!("{TOKEN_PREFIX}.{payload_b64u}");
    key.verify(signed_message.as_bytes(), &signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    if payload.aud != params.audience {
        return Err(TokenError::InvalidAudience);
    }
    if payload.iss != params.issuer {
        return Err(TokenError::InvalidIssuer);
    }
    if params.now > payload.exp + params.clock_skew_secs {
        return Err(TokenError::TokenExpired);
    }
    if params.now < payload.iat - params.clock_skew_secs {
        return Err(TokenError::TokenNotYetValid);
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use super::*;
    use crate::payload::Role;

    fn signed_token(signing: &SigningKey, kid: &str, payload: &TokenPayload) -> String {
        let payload_json = serde_json::to_vec(payload).unwrap();
        let payload_b64u = flowersec_common::encode_b64u(&payload_json);
        let signed_message = format!("{TOKEN_PREFIX}.{payload_b64u}");
        let sig = signing.sign(signed_message.as_bytes());
        let sig_b64u = flowersec_common::encode_b64u(sig.to_bytes());
        let _ = kid;
        format!("{TOKEN_PREFIX}.{payload_b64u}.{sig_b64u}")
    }

    fn sample_payload() -> TokenPayload {
        TokenPayload {
            kid: "kid_1".to_string(),
            aud: "flowersec-tunnel".to_string(),
            iss: "flowersec-issuer".to_string(),
            channel_id: "ch_1".to_string(),
            role: Role::Client,
            token_id: "tok_1".to_string(),
            init_exp: 1_000,
            idle_timeout_seconds: 60,
            iat: 100,
            exp: 200,
        }
    }

    fn sample_keyset(kid: &str, signing: &SigningKey) -> Keyset {
        let json = format!(
            r#"{{"keys":[{{"kid":"{kid}","pubkey_b64u":"{}"}}]}}"#,
            flowersec_common::encode_b64u(signing.verifying_key().as_bytes())
        );
        Keyset::from_json(json.as_bytes()).unwrap()
    }

    fn default_params() -> VerifyParams<'static> {
        VerifyParams {
            now: 150,
            audience: "flowersec-tunnel",
            issuer: "flowersec-issuer",
            clock_skew_secs: 30,
        }
    }

    #[test]
    fn accepts_well_formed_token() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let payload = sample_payload();
        let token = signed_token(&signing, "kid_1", &payload);
        let keyset = sample_keyset("kid_1", &signing);

        let out = verify(&token, &keyset, &default_params()).unwrap();
        assert_eq!(out.token_id, "tok_1");
    }

    #[test]
    fn rejects_bad_format() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let keyset = sample_keyset("kid_1", &signing);
        let err = verify("not.enough", &keyset, &default_params()).unwrap_err();
        assert!(matches!(err, TokenError::BadFormat));
    }

    #[test]
    fn rejects_signature_from_wrong_key() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let other = SigningKey::from_bytes(&[3u8; 32]);
        let payload = sample_payload();
        let token = signed_token(&other, "kid_1", &payload);
        let keyset = sample_keyset("kid_1", &signing);

        let err = verify(&token, &keyset, &default_params()).unwrap_err();
        assert!(matches!(err, TokenError::InvalidSignature));
    }

    #[test]
    fn rejects_unknown_kid() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let mut payload = sample_payload();
        payload.kid = "kid_missing".to_string();
        let token = signed_token(&signing, "kid_missing", &payload);
        let keyset = sample_keyset("kid_1", &signing);

        let err = verify(&token, &keyset, &default_params()).unwrap_err();
        assert!(matches!(err, TokenError::UnknownKid));
    }

    #[test]
    fn rejects_tampered_payload() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let payload = sample_payload();
        let token = signed_token(&signing, "kid_1", &payload);
        let keyset = sample_keyset("kid_1", &signing);

        // Flip a byte inside the payload segment without re-signing.
        let mid = token.len() / 2;
        let mut bytes = token.into_bytes();
        bytes[mid] = if bytes[mid] == b'A' { b'B' } else { b'A' };
        let token = String::from_utf8(bytes).unwrap();

        let err = verify(&token, &keyset, &default_params()).unwrap_err();
        assert!(matches!(err, TokenError::BadFormat | TokenError::InvalidSignature));
    }

    #[test]
    fn rejects_expired_token() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let payload = sample_payload();
        let token = signed_token(&signing, "kid_1", &payload);
        let keyset = sample_keyset("kid_1", &signing);

        let mut params = default_params();
        params.now = 300;
        let err = verify(&token, &keyset, &params).unwrap_err();
        assert!(matches!(err, TokenError::TokenExpired));
    }

    #[test]
    fn rejects_not_yet_valid_token() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let payload = sample_payload();
        let token = signed_token(&signing, "kid_1", &payload);
        let keyset = sample_keyset("kid_1", &signing);

        let mut params = default_params();
        params.now = 10;
        let err = verify(&token, &keyset, &params).unwrap_err();
        assert!(matches!(err, TokenError::TokenNotYetValid));
    }

    #[test]
    fn accepts_within_clock_skew_window() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let payload = sample_payload();
        let token = signed_token(&signing, "kid_1", &payload);
        let keyset = sample_keyset("kid_1", &signing);

        let mut params = default_params();
        params.now = 220;
        verify(&token, &keyset, &params).unwrap();
    }

    #[test]
    fn rejects_wrong_audience() {
        let signing = SigningKey::from_bytes(&[9u8; 32]);
        let payload = sample_payload();
        let token = signed_token(&signing, "kid_1", &payload);
        let keyset = sample_keyset("kid_1", &signing);

        let mut params = default_params();
        params.audience = "other-audience";
        let err = verify(&token, &keyset, &params).unwrap_err();
        assert!(matches!(err, TokenError::InvalidAudience));
    }
}

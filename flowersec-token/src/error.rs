use flowersec_common::StableReason;

#[derive(thiserror::Error, Debug)]
pub enum TokenError {
    #[error("token does not match the expected `prefix.payload.sig` shape")]
    BadFormat,
    #[error("keyset has no key for the token's `kid`")]
    UnknownKid,
    #[error("Ed25519 signature did not verify")]
    InvalidSignature,
    #[error("token `aud` does not match the expected audience")]
    InvalidAudience,
    #[error("token `iss` does not match the expected issuer")]
    InvalidIssuer,
    #[error("token has expired")]
    TokenExpired,
    #[error("token is not yet valid")]
    TokenNotYetValid,
    #[error("failed to read issuer keyset file: {0}")]
    KeysetIo(#[from] std::io::Error),
    #[error("failed to parse issuer keyset file: {0}")]
    KeysetParse(#[from] serde_json::Error),
    #[error("keyset entry for kid {0:?} is not a valid 32-byte Ed25519 public key")]
    InvalidKeysetEntry(String),
}

impl StableReason for TokenError {
    fn reason(&self) -> &'static str {
        match self {
            Self::BadFormat => "bad_format",
            Self::UnknownKid => "unknown_kid",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidAudience => "invalid_audience",
            Self::InvalidIssuer => "invalid_issuer",
            Self::TokenExpired => "token_expired",
            Self::TokenNotYetValid => "token_not_yet_valid",
            Self::KeysetIo(_) | Self::KeysetParse(_) | Self::InvalidKeysetEntry(_) => {
                "keyset_error"
            }
        }
    }
}

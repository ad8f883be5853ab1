use flowersec_common::StableReason;

#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    #[error("record frame magic does not match FSEC")]
    BadMagic,
    #[error("unsupported record frame version")]
    BadVersion,
    #[error("record ciphertext length out of range")]
    LengthOutOfRange,
    #[error("record sequence number did not match the expected value")]
    SeqMismatch,
    #[error("record AEAD authentication tag did not verify")]
    AuthTagMismatch,
    #[error("direction sequence counter exhausted u64 range")]
    SeqExhausted,
    #[error("plaintext would produce a ciphertext larger than the configured limit")]
    PayloadTooLarge,
}

impl StableReason for RecordError {
    fn reason(&self) -> &'static str {
        match self {
            Self::BadMagic => "bad_magic",
            Self::BadVersion => "bad_version",
            Self::LengthOutOfRange => "length_out_of_range",
            Self::SeqMismatch => "seq_mismatch",
            Self::AuthTagMismatch => "auth_tag_mismatch",
            Self::SeqExhausted => "seq_exhausted",
            Self::PayloadTooLarge => "payload_too_large",
        }
    }
}

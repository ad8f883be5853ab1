use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::RecordError;

pub const MAGIC: &[u8; 4] = b"FSEC";
pub const VERSION: u8 = 1;

/// Length of the authenticated header: magic(4) + version(1) + flags(1)
/// + sequence(8). This is the AEAD associated data; the 4-byte
/// ciphertext-length field that follows it is *not* authenticated as
/// AAD (it is implied by the transport frame length anyway).
pub const HEADER_LEN: usize = 4 + 1 + 1 + 8;
pub const LENGTH_FIELD_LEN: usize = 4;
/// Bytes before the ciphertext: the authenticated header plus the
/// 4-byte ciphertext-length field.
pub const PREFIX_LEN: usize = HEADER_LEN + LENGTH_FIELD_LEN;
const GCM_TAG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordFlags(u8);

impl RecordFlags {
    pub const APP: Self = Self(0b0000_0001);
    pub const PING: Self = Self(0b0000_0010);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

fn build_nonce(nonce_prefix: &[u8; 4], seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(nonce_prefix);
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

fn cipher(key: &[u8; 32]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
}

/// Encrypts `plaintext` into one FSEC frame. Fails with
/// [`RecordError::PayloadTooLarge`] if the resulting ciphertext (which
/// includes the 16-byte GCM tag) would exceed `max_record_bytes`.
pub fn encode(
    key: &[u8; 32],
    nonce_prefix: &[u8; 4],
    flags: RecordFlags,
    seq: u64,
    plaintext: &[u8],
    max_record_bytes: usize,
) -> Result<Vec<u8>, RecordError> {
    let ciphertext_len = plaintext.len() + GCM_TAG_LEN;
    if ciphertext_len == 0 || ciphertext_len > max_record_bytes {
        return Err(RecordError::PayloadTooLarge);
    }

    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(MAGIC);
    header[4] = VERSION;
    header[5] = flags.bits();
    header[6..14].copy_from_slice(&seq.to_be_bytes());

    let nonce = build_nonce(nonce_prefix, seq);
    let ciphertext = cipher(key)
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|_| RecordError::PayloadTooLarge)?;

    let mut frame = Vec::with_capacity(PREFIX_LEN + ciphertext.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Decrypts one FSEC frame, verifying the header against `expected_seq`
/// before even attempting decryption so a mismatched sequence reports
/// `seq_mismatch` rather than `auth_tag_mismatch`.
pub fn decode(
    key: &[u8; 32],
    nonce_prefix: &[u8; 4],
    frame: &[u8],
    expected_seq: u64,
    max_record_bytes: usize,
) -> Result<(RecordFlags, Vec<u8>), RecordError> {
    if frame.len() < PREFIX_LEN {
        return Err(RecordError::LengthOutOfRange);
    }
    if &frame[0..4] != MAGIC {
        return Err(RecordError::BadMagic);
    }
    if frame[4] != VERSION {
        return Err(RecordError::BadVersion);
    }
    let flags = RecordFlags::from_bits(frame[5]);
    let seq = u64::from_be_bytes(frame[6..14].try_into().expect("8 bytes"));

    let declared_len = u32::from_be_bytes(
        frame[HEADER_LEN..PREFIX_LEN]
            .try_into()
            .expect("4 bytes"),
    ) as usize;
    if declared_len == 0 || declared_len > max_record_bytes {
        return Err(RecordError::LengthOutOfRange);
    }
    if frame.len() != PREFIX_LEN + declared_len {
        return Err(RecordError::LengthOutOfRange);
    }

    if seq != expected_seq {
        return Err(RecordError::SeqMismatch);
    }

    let header = &frame[0..HEADER_LEN];
    let ciphertext = &frame[PREFIX_LEN..];
    let nonce = build_nonce(nonce_prefix, seq);
    let plaintext = cipher(key)
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad: header,
            },
        )
        .map_err(|_| RecordError::AuthTagMismatch)?;

    Ok((flags, plaintext))
}

/// Classifies a binary WebSocket message as "probably an FSEC record"
/// without decrypting it, so the tunnel can flip `sawRecord` and route
/// traffic without holding any key material.
pub fn looks_like_record_frame(bytes: &[u8], max_record_bytes: usize) -> bool {
    if bytes.len() < PREFIX_LEN {
        return false;
    }
    if &bytes[0..4] != MAGIC {
        return false;
    }
    if bytes[4] != VERSION {
        return false;
    }
    let declared_len = match u32::from_be_bytes(
        bytes[HEADER_LEN..PREFIX_LEN]
            .try_into()
            .unwrap_or_default(),
    )
    .try_into()
    {
        Ok(len) => len,
        Err(_) => return false,
    };
    let declared_len: usize = declared_len;
    if declared_len == 0 || declared_len > max_record_bytes {
        return false;
    }
    bytes.len() == PREFIX_LEN + declared_len
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];
    const PREFIX: [u8; 4] = [1, 2, 3, 4];

    #[test]
    fn round_trips_app_record() {
        let plaintext = b"hello over the tunnel";
        let frame = encode(&KEY, &PREFIX, RecordFlags::APP, 0, plaintext, 1 << 20).unwrap();
        assert!(looks_like_record_frame(&frame, 1 << 20));
        let (flags, decoded) = decode(&KEY, &PREFIX, &frame, 0, 1 << 20).unwrap();
        assert_eq!(flags, RecordFlags::APP);
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn rejects_seq_mismatch_before_decrypting() {
        let frame = encode(&KEY, &PREFIX, RecordFlags::APP, 5, b"x", 1 << 20).unwrap();
        let err = decode(&KEY, &PREFIX, &frame, 6, 1 << 20).unwrap_err();
        assert!(matches!(err, RecordError::SeqMismatch));
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let mut frame = encode(&KEY, &PREFIX, RecordFlags::APP, 0, b"x", 1 << 20).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        let err = decode(&KEY, &PREFIX, &frame, 0, 1 << 20).unwrap_err();
        assert!(matches!(err, RecordError::AuthTagMismatch));
    }

    #[test]
    fn boundary_exact_max_accepted_one_over_rejected() {
        let max = 64usize;
        let plaintext_exact = vec![0u8; max - 16];
        let frame = encode(&KEY, &PREFIX, RecordFlags::APP, 0, &plaintext_exact, max).unwrap();
        assert!(looks_like_record_frame(&frame, max));

        let plaintext_over = vec![0u8; max - 15];
        let err = encode(&KEY, &PREFIX, RecordFlags::APP, 0, &plaintext_over, max).unwrap_err();
        assert!(matches!(err, RecordError::PayloadTooLarge));
    }

    #[test]
    fn classifies_handshake_frames_as_not_a_record() {
        let mut fseh = Vec::new();
        fseh.extend_from_slice(b"FSEH");
        fseh.extend_from_slice(&[1, 0, 0, 0, 0, 4]);
        assert!(!looks_like_record_frame(&fseh, 1 << 20));
    }
}

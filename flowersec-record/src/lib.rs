//! FSEC: the end-to-end-encrypted record layer that the tunnel forwards
//! verbatim. Every record is AES-256-GCM with a 14-byte authenticated
//! header (magic, version, flags, sequence) and a 4-byte ciphertext
//! length field.

mod error;
mod frame;
mod seq;

pub use error::RecordError;
pub use frame::{
    decode, encode, looks_like_record_frame, RecordFlags, HEADER_LEN, LENGTH_FIELD_LEN, MAGIC,
    PREFIX_LEN, VERSION,
};
pub use seq::SeqCounter;

/// Default cap on a single FSEC frame's ciphertext length.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;

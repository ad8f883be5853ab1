//! Shared scaffolding used by every `flowersec-*` crate: the redacting
//! [`Secret`] wrapper, base64url (de)serialization helpers, a testable
//! [`Clock`], and the stable-string error convention the wire protocol
//! relies on.

mod b64;
mod clock;
mod secret;

pub use b64::{decode_b64u, encode_b64u, serde_b64u};
pub use clock::{Clock, SystemClock, TestClock};
pub use secret::Secret;

/// Implemented by every component error enum so that WebSocket close
/// reasons, RPC envelope errors, and endpoint-stage errors can all
/// surface the same kind of stable, renaming-resistant string.
///
/// The string returned here is part of the external wire contract
/// (clients map it to error codes) and must never change once shipped,
/// even if the `Display` wording of the variant changes.
pub trait StableReason {
    fn reason(&self) -> &'static str;
}

//! FSEC attach tokens: Ed25519-signed, one-shot grants that bind an
//! endpoint to a channel and role. [`verify`] authenticates and
//! time-checks a token; [`ReplayCache`] enforces the one-shot-per-id
//! invariant the tunnel's attach stage depends on.

mod error;
mod keyset;
mod payload;
mod replay;
mod verify;

pub use error::TokenError;
pub use keyset::Keyset;
pub use payload::{Role, TokenPayload};
pub use replay::ReplayCache;
pub use verify::{verify, VerifyParams, TOKEN_PREFIX};

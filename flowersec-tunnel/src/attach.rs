use std::str::FromStr;

use flowersec_token::{verify, Keyset, ReplayCache, Role, TokenPayload, VerifyParams};
use serde::Deserialize;

use crate::TunnelError;

/// The plaintext JSON an endpoint sends as its first WebSocket message
/// to enter a channel. Deliberately permissive field types (`role` as
/// a string) since this is attacker-controlled input parsed before any
/// cryptographic authentication has happened.
#[derive(Debug, Clone, Deserialize)]
pub struct AttachMessage {
    pub v: u32,
    pub channel_id: String,
    pub role: String,
    pub token: String,
    pub endpoint_instance_id: String,
}

/// An attach message that has passed shape validation, with its
/// `endpoint_instance_id` already decoded to raw bytes.
pub struct ParsedAttach {
    pub channel_id: String,
    pub role: Role,
    pub token: String,
    pub endpoint_instance_id: Vec<u8>,
}

pub fn parse_attach(bytes: &[u8], max_attach_bytes: usize) -> Result<ParsedAttach, TunnelError> {
    if bytes.len() > max_attach_bytes {
        return Err(TunnelError::AttachTooLarge);
    }
    let msg: AttachMessage = serde_json::from_slice(bytes).map_err(|_| TunnelError::InvalidAttach)?;

    if msg.v != 1 {
        return Err(TunnelError::InvalidAttach);
    }
    if msg.channel_id.is_empty() || msg.channel_id.len() > 256 {
        return Err(TunnelError::InvalidAttach);
    }
    let role = Role::from_str(&msg.role).map_err(|_| TunnelError::InvalidAttach)?;
    if msg.token.is_empty() || msg.token.len() > 2048 {
        return Err(TunnelError::InvalidAttach);
    }
    let endpoint_instance_id =
        flowersec_common::decode_b64u(&msg.endpoint_instance_id).map_err(|_| TunnelError::InvalidAttach)?;
    if endpoint_instance_id.len() < 16 || endpoint_instance_id.len() > 32 {
        return Err(TunnelError::InvalidAttach);
    }

    Ok(ParsedAttach {
        channel_id: msg.channel_id,
        role,
        token: msg.token,
        endpoint_instance_id,
    })
}

/// Authenticates an already-shape-valid attach: verifies the token
/// against the keyset, checks it agrees with the attach's `channel_id`
/// and `role`, then consumes it via the replay cache. Returns the
/// token's payload so the caller can read `init_exp`/`idle_timeout`.
pub async fn authorize(
    attach: &ParsedAttach,
    keyset: &Keyset,
    replay_cache: &ReplayCache,
    params: &VerifyParams<'_>,
) -> Result<TokenPayload, TunnelError> {
    let payload = verify(&attach.token, keyset, params)?;

    if payload.channel_id != attach.channel_id {
        return Err(TunnelError::ChannelMismatch);
    }
    if payload.role != attach.role {
        return Err(TunnelError::RoleMismatch);
    }

    // Both inputs are whole Unix seconds, so the sum is already a
    // ceiling on when replay tracking for this token can be dropped.
    let used_until = payload.exp + params.clock_skew_secs;
    if !replay_cache.try_use(&payload.token_id, used_until, params.now).await {
        return Err(TunnelError::TokenReplay);
    }

    Ok(payload)
}

use std::collections::HashMap;

use flowersec_common::Clock;
use rand::RngCore;
use tokio::sync::Mutex;

use crate::config::HandshakeConfig;
use crate::payload::{AckPayload, InitPayload, RespPayload};
use crate::secure_channel::SecureChannel;
use crate::suite::Suite;
use crate::transport::FrameTransport;
use crate::wire::{self, FrameType};
use crate::{transcript, HandshakeError};

/// Deduplicates `Init` frames by `(channel_id, client_nonce)` for the
/// lifetime of a channel's init window, so a captured-and-replayed
/// `Init` cannot make the server derive (and thus leak timing on) keys
/// twice. Per-process and in-memory; a durable, cross-process replay
/// store is out of scope here.
#[derive(Default)]
pub struct ServerHandshakeCache {
    seen: Mutex<HashMap<(String, Vec<u8>), i64>>,
}

impl ServerHandshakeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this is the first time `(channel_id,
    /// client_nonce)` has been seen before `expires_at`; records it if
    /// so. Also opportunistically evicts anything already expired.
    pub async fn check_and_insert(
        &self,
        channel_id: &str,
        client_nonce: &[u8],
        now: i64,
        expires_at: i64,
    ) -> bool {
        let mut seen = self.seen.lock().await;
        seen.retain(|_, exp| *exp >= now);
        let key = (channel_id.to_string(), client_nonce.to_vec());
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, expires_at);
        true
    }
}

/// Validates `client_timestamp` against the channel's init window: the
/// server must be convinced the client's clock agrees the handshake is
/// happening before `init_exp`, within the permitted skew.
fn validate_client_timestamp(
    client_timestamp: i64,
    init_exp: i64,
    clock_skew_secs: i64,
) -> Result<(), HandshakeError> {
    if client_timestamp > init_exp {
        return Err(HandshakeError::TimestampAfterInitExp);
    }
    if client_timestamp < init_exp - clock_skew_secs {
        return Err(HandshakeError::TimestampSkew);
    }
    Ok(())
}

/// Runs the server side of one FSEH handshake: `AwaitInit -> Respond ->
/// AwaitAck -> Confirm -> Ready`. `init_exp` and the PSK come from the
/// channel's grant, not from anything the tunnel can see.
pub async fn run_server<T>(
    mut transport: T,
    psk: &[u8; 32],
    channel_id: &str,
    init_exp: i64,
    config: &HandshakeConfig,
    clock: &dyn Clock,
    replay_cache: &ServerHandshakeCache,
) -> Result<SecureChannel<T>, HandshakeError>
where
    T: FrameTransport,
{
    let (frame_type, payload) =
        wire::read_frame(&mut transport, config.max_handshake_payload).await?;
    if frame_type != FrameType::Init {
        return Err(HandshakeError::BadHandshakeFrame("expected Init"));
    }
    let init: InitPayload = serde_json::from_slice(&payload)
        .map_err(|_| HandshakeError::BadHandshakeFrame("malformed Init payload"))?;

    if init.channel_id != channel_id {
        return Err(HandshakeError::HandshakeFailed("channel_id mismatch"));
    }

    let suite = Suite::from_u8(init.suite).ok_or(HandshakeError::SuiteNotPermitted)?;
    if !config.permitted_suites.contains(&suite) {
        return Err(HandshakeError::SuiteNotPermitted);
    }

    validate_client_timestamp(init.client_timestamp, init_exp, config.clock_skew_secs)?;

    let now = clock.now_unix();
    let expires_at = init_exp + config.clock_skew_secs;
    if !replay_cache
        .check_and_insert(channel_id, &init.client_nonce, now, expires_at)
        .await
    {
        return Err(HandshakeError::HandshakeFailed("replayed Init"));
    }

    let expected_client_tag = transcript::client_auth_tag(
        psk,
        channel_id.as_bytes(),
        suite.as_u8(),
        &init.client_nonce,
        &init.client_eph_pub,
        init.client_timestamp,
    );
    if expected_client_tag.as_slice() != init.client_auth_tag.as_slice() {
        return Err(HandshakeError::AuthTagMismatch);
    }

    let keypair = suite.generate();
    let server_eph_pub = keypair.public_bytes();
    let mut server_nonce = vec![0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut server_nonce);

    // Validates the client's ephemeral key is on-curve as a side effect
    // of actually performing the ECDH.
    let shared_secret = keypair.diffie_hellman(&init.client_eph_pub)?;

    let server_auth_tag = transcript::server_auth_tag(
        psk,
        channel_id.as_bytes(),
        &init.client_nonce,
        &server_nonce,
        &server_eph_pub,
    );

    let resp = RespPayload {
        server_nonce: server_nonce.clone(),
        server_eph_pub: server_eph_pub.clone(),
        server_auth_tag: server_auth_tag.to_vec(),
    };
    let resp_json = serde_json::to_vec(&resp)
        .map_err(|_| HandshakeError::HandshakeFailed("failed to encode Resp payload"))?;
    wire::write_frame(&mut transport, FrameType::Resp, &resp_json, config.max_handshake_payload)
        .await?;

    let (frame_type, payload) =
        wire::read_frame(&mut transport, config.max_handshake_payload).await?;
    if frame_type != FrameType::Ack {
        return Err(HandshakeError::BadHandshakeFrame("expected Ack"));
    }
    let ack: AckPayload = serde_json::from_slice(&payload)
        .map_err(|_| HandshakeError::BadHandshakeFrame("malformed Ack payload"))?;

    let expected_confirm_tag = transcript::client_confirm_tag(
        psk,
        channel_id.as_bytes(),
        &init.client_nonce,
        &server_nonce,
    );
    if expected_confirm_tag.as_slice() != ack.client_confirm_tag.as_slice() {
        return Err(HandshakeError::AuthTagMismatch);
    }

    let key_material = transcript::derive_keys(
        &shared_secret,
        psk,
        channel_id.as_bytes(),
        &init.client_nonce,
        &server_nonce,
        &init.client_eph_pub,
        &server_eph_pub,
    );

    let mut channel = SecureChannel::new(
        transport,
        key_material.server_to_client,
        1,
        key_material.client_to_server,
        0,
        config.max_record_bytes,
    );

    // Confirm completion to the client as an empty PING record at
    // sequence 1 — the client's only proof the server derived the same
    // keys before any application data is trusted.
    channel.send_ping().await?;

    tracing::debug!(channel_id = %channel_id, suite = suite.as_u8(), "server handshake complete");

    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_replayed_init() {
        let cache = ServerHandshakeCache::new();
        assert!(cache.check_and_insert("ch1", b"nonce", 100, 200).await);
        assert!(!cache.check_and_insert("ch1", b"nonce", 101, 200).await);
    }

    #[tokio::test]
    async fn evicts_expired_entries() {
        let cache = ServerHandshakeCache::new();
        assert!(cache.check_and_insert("ch1", b"nonce", 100, 150).await);
        assert!(cache.check_and_insert("ch1", b"nonce", 200, 300).await);
    }

    #[test]
    fn timestamp_after_init_exp_is_rejected() {
        let err = validate_client_timestamp(1100, 1000, 30).unwrap_err();
        assert!(matches!(err, HandshakeError::TimestampAfterInitExp));
    }

    #[test]
    fn timestamp_outside_skew_window_is_rejected() {
        let err = validate_client_timestamp(900, 1000, 30).unwrap_err();
        assert!(matches!(err, HandshakeError::TimestampSkew));
    }

    #[test]
    fn timestamp_within_window_is_accepted() {
        validate_client_timestamp(980, 1000, 30).unwrap();
    }
}

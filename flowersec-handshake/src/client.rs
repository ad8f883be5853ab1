use flowersec_common::{encode_b64u, Clock};
use rand::RngCore;

use crate::config::HandshakeConfig;
use crate::payload::{AckPayload, InitPayload, RespPayload};
use crate::secure_channel::SecureChannel;
use crate::transport::FrameTransport;
use crate::wire::{self, FrameType};
use crate::{transcript, HandshakeError};

/// Runs the client side of one FSEH handshake to completion: `Start ->
/// AwaitResp -> AwaitAck (implicit, we send it) -> Ready`. Returns a
/// [`SecureChannel`] only once the server's finished-proof ping has
/// been observed.
pub async fn run_client<T>(
    mut transport: T,
    psk: &[u8; 32],
    channel_id: &str,
    config: &HandshakeConfig,
    clock: &dyn Clock,
) -> Result<SecureChannel<T>, HandshakeError>
where
    T: FrameTransport,
{
    let suite = config.default_suite;
    let keypair = suite.generate();
    let client_eph_pub = keypair.public_bytes();

    let mut client_nonce = vec![0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut client_nonce);

    let client_timestamp = clock.now_unix();

    let client_auth_tag = transcript::client_auth_tag(
        psk,
        channel_id.as_bytes(),
        suite.as_u8(),
        &client_nonce,
        &client_eph_pub,
        client_timestamp,
    );

    let init = InitPayload {
        channel_id: channel_id.to_string(),
        suite: suite.as_u8(),
        client_features: Vec::new(),
        client_nonce: client_nonce.clone(),
        client_eph_pub: client_eph_pub.clone(),
        client_timestamp,
        client_auth_tag: client_auth_tag.to_vec(),
    };
    let init_json = serde_json::to_vec(&init)
        .map_err(|_| HandshakeError::HandshakeFailed("failed to encode Init payload"))?;
    wire::write_frame(&mut transport, FrameType::Init, &init_json, config.max_handshake_payload)
        .await?;

    let (frame_type, payload) =
        wire::read_frame(&mut transport, config.max_handshake_payload).await?;
    if frame_type != FrameType::Resp {
        return Err(HandshakeError::BadHandshakeFrame("expected Resp"));
    }
    let resp: RespPayload = serde_json::from_slice(&payload)
        .map_err(|_| HandshakeError::BadHandshakeFrame("malformed Resp payload"))?;

    let expected_server_tag = transcript::server_auth_tag(
        psk,
        channel_id.as_bytes(),
        &client_nonce,
        &resp.server_nonce,
        &resp.server_eph_pub,
    );
    if expected_server_tag.as_slice() != resp.server_auth_tag.as_slice() {
        return Err(HandshakeError::AuthTagMismatch);
    }

    let shared_secret = keypair.diffie_hellman(&resp.server_eph_pub)?;
    let key_material = transcript::derive_keys(
        &shared_secret,
        psk,
        channel_id.as_bytes(),
        &client_nonce,
        &resp.server_nonce,
        &client_eph_pub,
        &resp.server_eph_pub,
    );

    let client_confirm_tag =
        transcript::client_confirm_tag(psk, channel_id.as_bytes(), &client_nonce, &resp.server_nonce);
    let ack = AckPayload {
        client_confirm_tag: client_confirm_tag.to_vec(),
    };
    let ack_json = serde_json::to_vec(&ack)
        .map_err(|_| HandshakeError::HandshakeFailed("failed to encode Ack payload"))?;
    wire::write_frame(&mut transport, FrameType::Ack, &ack_json, config.max_handshake_payload).await?;

    let mut channel = SecureChannel::new(
        transport,
        key_material.client_to_server,
        0,
        key_material.server_to_client,
        1,
        config.max_record_bytes,
    );

    let (flags, plaintext) = channel.read_raw().await?;
    if !flags.contains(flowersec_record::RecordFlags::PING) || !plaintext.is_empty() {
        return Err(HandshakeError::HandshakeFailed(
            "server finished proof was not an empty PING record",
        ));
    }

    tracing::debug!(
        channel_id = %channel_id,
        suite = suite.as_u8(),
        client_nonce = %encode_b64u(&client_nonce),
        "client handshake complete"
    );

    Ok(channel)
}

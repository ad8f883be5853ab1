use flowersec_handshake::Suite;

use crate::config::{ConnectOptions, ConnectPath};
use crate::error::{EndpointError, Stage};

/// Shared input validation for both the client connect path and the
/// server accept path: tunnel addressing, token presence, PSK shape,
/// and the negotiated cipher suite.
pub(crate) fn validate(
    options: &ConnectOptions,
    path: ConnectPath,
) -> Result<([u8; 32], Suite, Option<Vec<u8>>), EndpointError> {
    let err = |code| EndpointError::new(Stage::Validate, code, path.into());

    if options.ws_url.trim().is_empty() {
        return Err(err("missing_tunnel_url"));
    }
    if options.channel_id.trim().is_empty() {
        return Err(err("missing_channel_id"));
    }
    if path == ConnectPath::Tunnel && options.token.as_deref().unwrap_or("").is_empty() {
        return Err(err("missing_token"));
    }
    if options.channel_init_expire_at_unix_s <= 0 {
        return Err(err("missing_init_exp"));
    }
    let suite = Suite::from_u8(options.default_suite).ok_or_else(|| err("invalid_suite"))?;

    let psk_bytes = flowersec_common::decode_b64u(&options.e2ee_psk_b64u).map_err(|_| err("invalid_psk"))?;
    let psk: [u8; 32] = psk_bytes.try_into().map_err(|_| err("invalid_psk"))?;

    let endpoint_instance_id = match &options.endpoint_instance_id {
        None => None,
        Some(encoded) => {
            let decoded = flowersec_common::decode_b64u(encoded).map_err(|_| err("invalid_endpoint_instance_id"))?;
            if decoded.len() < 16 || decoded.len() > 32 {
                return Err(err("invalid_endpoint_instance_id"));
            }
            Some(decoded)
        }
    };

    Ok((psk, suite, endpoint_instance_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ConnectOptions {
        ConnectOptions {
            ws_url: "ws://example.invalid/ws".to_string(),
            channel_id: "ch_1".to_string(),
            token: Some("tok".to_string()),
            e2ee_psk_b64u: flowersec_common::encode_b64u([0x01u8; 32]),
            channel_init_expire_at_unix_s: 1,
            default_suite: 1,
            endpoint_instance_id: None,
            origin: None,
            idle_timeout_seconds: 0,
        }
    }

    #[test]
    fn rejects_missing_channel_id() {
        let mut options = opts();
        options.channel_id = "".to_string();
        let err = validate(&options, ConnectPath::Tunnel).unwrap_err();
        assert_eq!(err.code, "missing_channel_id");
    }

    #[test]
    fn rejects_missing_token_on_the_tunnel_path() {
        let mut options = opts();
        options.token = None;
        let err = validate(&options, ConnectPath::Tunnel).unwrap_err();
        assert_eq!(err.code, "missing_token");
    }

    #[test]
    fn direct_path_tolerates_a_missing_token() {
        let mut options = opts();
        options.token = None;
        validate(&options, ConnectPath::Direct).unwrap();
    }

    #[test]
    fn rejects_a_psk_that_is_not_32_bytes() {
        let mut options = opts();
        options.e2ee_psk_b64u = flowersec_common::encode_b64u([0x01u8; 16]);
        let err = validate(&options, ConnectPath::Tunnel).unwrap_err();
        assert_eq!(err.code, "invalid_psk");
    }

    #[test]
    fn rejects_an_unsupported_suite() {
        let mut options = opts();
        options.default_suite = 9;
        let err = validate(&options, ConnectPath::Tunnel).unwrap_err();
        assert_eq!(err.code, "invalid_suite");
    }

    #[test]
    fn rejects_an_undersized_endpoint_instance_id() {
        let mut options = opts();
        options.endpoint_instance_id = Some(flowersec_common::encode_b64u([1u8; 8]));
        let err = validate(&options, ConnectPath::Tunnel).unwrap_err();
        assert_eq!(err.code, "invalid_endpoint_instance_id");
    }
}

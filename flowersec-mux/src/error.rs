use flowersec_common::StableReason;

/// Which leg of the connect/serve path a failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Connect,
    Attach,
    Handshake,
    Secure,
    Rpc,
    Yamux,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Connect => "connect",
            Self::Attach => "attach",
            Self::Handshake => "handshake",
            Self::Secure => "secure",
            Self::Rpc => "rpc",
            Self::Yamux => "yamux",
        }
    }
}

/// Whether a failure happened dialing through the tunnel or over a
/// direct (no-tunnel) connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Path {
    Tunnel,
    Direct,
}

impl Path {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tunnel => "tunnel",
            Self::Direct => "direct",
        }
    }
}

/// One endpoint-runtime failure: a stage, a stable code, and which
/// carrier path it happened on. This is the one error type the
/// connect/accept paths return; everything downstream (token, record,
/// handshake, tunnel attach) is folded into a stable `code` string
/// rather than leaking its own error type across this crate's
/// boundary.
#[derive(Debug, thiserror::Error)]
#[error("{}/{} ({})", self.stage.as_str(), self.code, self.path.as_str())]
pub struct EndpointError {
    pub stage: Stage,
    pub code: &'static str,
    pub path: Path,
}

impl EndpointError {
    pub fn new(stage: Stage, code: &'static str, path: Path) -> Self {
        Self { stage, code, path }
    }
}

impl StableReason for EndpointError {
    fn reason(&self) -> &'static str {
        self.code
    }
}

/// Translates a WebSocket close frame observed during or after attach
/// into the tunnel's stable attach codes, surfaced at `stage=attach`.
pub fn attach_code_from_close_reason(reason: &str) -> &'static str {
    match reason {
        "invalid_attach" => "invalid_attach",
        "attach_too_large" => "attach_too_large",
        "expected_attach" => "expected_attach",
        "token_replay" => "token_replay",
        "channel_mismatch" => "channel_mismatch",
        "role_mismatch" => "role_mismatch",
        "init_exp_mismatch" => "init_exp_mismatch",
        "idle_timeout_mismatch" => "idle_timeout_mismatch",
        "too_many_connections" => "too_many_connections",
        "too_many_channels" => "too_many_channels",
        "replace_rate_limited" => "replace_rate_limited",
        "bad_format" | "unknown_kid" | "invalid_signature" | "invalid_audience"
        | "invalid_issuer" | "token_expired" | "token_not_yet_valid" => "invalid_token",
        _ => "invalid_token",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_and_path_round_trip_to_str() {
        assert_eq!(Stage::Handshake.as_str(), "handshake");
        assert_eq!(Path::Tunnel.as_str(), "tunnel");
    }

    #[test]
    fn unrecognized_close_reason_maps_to_invalid_token() {
        assert_eq!(attach_code_from_close_reason("nonsense"), "invalid_token");
    }

    #[test]
    fn known_close_reasons_map_one_to_one() {
        assert_eq!(attach_code_from_close_reason("token_replay"), "token_replay");
        assert_eq!(
            attach_code_from_close_reason("replace_rate_limited"),
            "replace_rate_limited"
        );
    }
}

use crate::Suite;

/// Parameters both sides of a handshake need; one value per channel,
/// supplied by the endpoint runtime (which in turn gets them from the
/// channel-init grant, not from the tunnel).
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub permitted_suites: Vec<Suite>,
    pub default_suite: Suite,
    pub clock_skew_secs: i64,
    pub max_handshake_payload: usize,
    pub max_record_bytes: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            permitted_suites: vec![Suite::X25519, Suite::P256],
            default_suite: Suite::X25519,
            clock_skew_secs: 30,
            max_handshake_payload: crate::wire::DEFAULT_MAX_HANDSHAKE_PAYLOAD,
            max_record_bytes: flowersec_record::DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

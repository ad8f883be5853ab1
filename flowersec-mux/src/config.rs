use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parameters the connect/accept paths need that aren't carried in the
/// per-call connect info, mirroring how `HandshakeConfig` groups the
/// handshake's own limits. One value is shared across every channel a
/// process drives.
#[derive(Debug, Clone)]
pub struct EndpointRuntimeConfig {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_handshake_payload: usize,
    pub max_record_bytes: usize,
    pub max_stream_hello_bytes: usize,
    /// Byte chunk size read off the internal pipe that bridges the
    /// yamux-driven byte stream onto one `SecureChannel` record per
    /// chunk. Kept comfortably under `max_record_bytes` so every chunk
    /// encodes as exactly one valid FSEC frame.
    pub mux_bridge_chunk_bytes: usize,
}

impl Default for EndpointRuntimeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            max_handshake_payload: flowersec_handshake::wire::DEFAULT_MAX_HANDSHAKE_PAYLOAD,
            max_record_bytes: flowersec_record::DEFAULT_MAX_RECORD_BYTES,
            max_stream_hello_bytes: 4 * 1024,
            mux_bridge_chunk_bytes: 32 * 1024,
        }
    }
}

/// The client's connect-path input: a channel's direct connect info
/// and its channel-init grant folded into one struct, since every
/// field the direct path needs is a subset of what the tunnel path
/// needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub ws_url: String,
    pub channel_id: String,
    /// Absent for the direct (no-tunnel) path.
    #[serde(default)]
    pub token: Option<String>,
    pub e2ee_psk_b64u: String,
    pub channel_init_expire_at_unix_s: i64,
    pub default_suite: u8,
    #[serde(default)]
    pub endpoint_instance_id: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub idle_timeout_seconds: i64,
}

/// Which carrier path a connect/accept call used, echoed into
/// [`crate::error::EndpointError`] on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPath {
    Tunnel,
    Direct,
}

impl From<ConnectPath> for crate::error::Path {
    fn from(p: ConnectPath) -> Self {
        match p {
            ConnectPath::Tunnel => crate::error::Path::Tunnel,
            ConnectPath::Direct => crate::error::Path::Direct,
        }
    }
}

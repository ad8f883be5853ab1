use flowersec_common::serde_b64u;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitPayload {
    pub channel_id: String,
    pub suite: u8,
    #[serde(default)]
    pub client_features: Vec<String>,
    #[serde(with = "serde_b64u")]
    pub client_nonce: Vec<u8>,
    #[serde(with = "serde_b64u")]
    pub client_eph_pub: Vec<u8>,
    pub client_timestamp: i64,
    #[serde(with = "serde_b64u")]
    pub client_auth_tag: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespPayload {
    #[serde(with = "serde_b64u")]
    pub server_nonce: Vec<u8>,
    #[serde(with = "serde_b64u")]
    pub server_eph_pub: Vec<u8>,
    #[serde(with = "serde_b64u")]
    pub server_auth_tag: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    #[serde(with = "serde_b64u")]
    pub client_confirm_tag: Vec<u8>,
}

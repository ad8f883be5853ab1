use serde::Serialize;

/// The plaintext JSON attach message a client endpoint sends as its
/// first WebSocket frame when dialing through the tunnel. Mirrors the
/// tunnel's own `AttachMessage` shape field-for-field; kept as a
/// separate outbound-only struct since the tunnel's version only ever
/// needs to deserialize it.
#[derive(Debug, Clone, Serialize)]
pub struct AttachMessage {
    pub v: u32,
    pub channel_id: String,
    pub role: &'static str,
    pub token: String,
    pub endpoint_instance_id: String,
}

impl AttachMessage {
    pub fn new(channel_id: &str, role: &'static str, token: &str, endpoint_instance_id: &[u8]) -> Self {
        Self {
            v: 1,
            channel_id: channel_id.to_string(),
            role,
            token: token.to_string(),
            endpoint_instance_id: flowersec_common::encode_b64u(endpoint_instance_id),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("attach message always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_role_as_the_wire_string() {
        let msg = AttachMessage::new("ch_1", "client", "tok", &[1u8; 16]);
        let json = msg.to_json();
        assert!(json.contains("\"role\":\"client\""));
        assert!(json.contains("\"channel_id\":\"ch_1\""));
    }
}

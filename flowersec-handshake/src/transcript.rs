use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const TAG_CLIENT_INIT: &[u8] = b"flowersec/fseh/client-init/v1";
const TAG_SERVER_RESP: &[u8] = b"flowersec/fseh/server-resp/v1";
const TAG_CLIENT_ACK: &[u8] = b"flowersec/fseh/client-ack/v1";
const TAG_DERIVE: &[u8] = b"flowersec/fseh/derive/v1";

/// Per-direction symmetric material handed to [`crate::SecureChannel`].
#[derive(Clone)]
pub struct DirectionKeys {
    pub key: [u8; 32],
    pub nonce_prefix: [u8; 4],
}

/// Both directions' keys, derived once from a completed handshake.
pub struct KeyMaterial {
    pub client_to_server: DirectionKeys,
    pub server_to_client: DirectionKeys,
}

fn hmac_tag(psk: &[u8; 32], domain: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(psk).expect("hmac accepts any key length");
    mac.update(domain);
    for part in parts {
        mac.update(&(part.len() as u32).to_be_bytes());
        mac.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// `client_auth_tag` carried on `Init`, authenticating the client's
/// offer under the channel PSK.
pub fn client_auth_tag(
    psk: &[u8; 32],
    channel_id: &[u8],
    suite: u8,
    client_nonce: &[u8],
    client_eph_pub: &[u8],
    client_timestamp: i64,
) -> [u8; 32] {
    hmac_tag(
        psk,
        TAG_CLIENT_INIT,
        &[
            channel_id,
            &[suite],
            client_nonce,
            client_eph_pub,
            &client_timestamp.to_be_bytes(),
        ],
    )
}

/// `server_auth_tag` carried on `Resp`.
pub fn server_auth_tag(
    psk: &[u8; 32],
    channel_id: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
    server_eph_pub: &[u8],
) -> [u8; 32] {
    hmac_tag(
        psk,
        TAG_SERVER_RESP,
        &[channel_id, client_nonce, server_nonce, server_eph_pub],
    )
}

/// Client's confirmation tag carried on `Ack`.
pub fn client_confirm_tag(
    psk: &[u8; 32],
    channel_id: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
) -> [u8; 32] {
    hmac_tag(psk, TAG_CLIENT_ACK, &[channel_id, client_nonce, server_nonce])
}

/// Expands the ECDH shared secret into both directions' AEAD key and
/// nonce prefix, salted by the PSK and bound to the full transcript so
/// neither party can be tricked into reusing material across channels.
pub fn derive_keys(
    shared_secret: &[u8; 32],
    psk: &[u8; 32],
    channel_id: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
    client_eph_pub: &[u8],
    server_eph_pub: &[u8],
) -> KeyMaterial {
    let mut salt = Vec::with_capacity(32 + TAG_DERIVE.len());
    salt.extend_from_slice(psk);
    salt.extend_from_slice(TAG_DERIVE);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);

    let mut info = Vec::new();
    for part in [channel_id, client_nonce, server_nonce, client_eph_pub, server_eph_pub] {
        info.extend_from_slice(&(part.len() as u32).to_be_bytes());
        info.extend_from_slice(part);
    }

    let mut okm = [0u8; 72];
    #[allow(clippy::expect_used)]
    hk.expand(&info, &mut okm)
        .expect("72 bytes is within HKDF-SHA256's output range");

    let mut k_c2s = [0u8; 32];
    let mut np_c2s = [0u8; 4];
    let mut k_s2c = [0u8; 32];
    let mut np_s2c = [0u8; 4];
    k_c2s.copy_from_slice(&okm[0..32]);
    np_c2s.copy_from_slice(&okm[32..36]);
    k_s2c.copy_from_slice(&okm[36..68]);
    np_s2c.copy_from_slice(&okm[68..72]);

    KeyMaterial {
        client_to_server: DirectionKeys {
            key: k_c2s,
            nonce_prefix: np_c2s,
        },
        server_to_client: DirectionKeys {
            key: k_s2c,
            nonce_prefix: np_s2c,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_and_directions_differ() {
        let shared = [1u8; 32];
        let psk = [2u8; 32];
        let km1 = derive_keys(&shared, &psk, b"ch1", b"cn", b"sn", b"cep", b"sep");
        let km2 = derive_keys(&shared, &psk, b"ch1", b"cn", b"sn", b"cep", b"sep");
        assert_eq!(km1.client_to_server.key, km2.client_to_server.key);
        assert_ne!(km1.client_to_server.key, km1.server_to_client.key);
        assert_ne!(km1.client_to_server.nonce_prefix, km1.server_to_client.nonce_prefix);
    }

    #[test]
    fn different_channel_ids_yield_different_keys() {
        let shared = [1u8; 32];
        let psk = [2u8; 32];
        let km1 = derive_keys(&shared, &psk, b"ch1", b"cn", b"sn", b"cep", b"sep");
        let km2 = derive_keys(&shared, &psk, b"ch2", b"cn", b"sn", b"cep", b"sep");
        assert_ne!(km1.client_to_server.key, km2.client_to_server.key);
    }
}

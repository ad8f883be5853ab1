use crate::transport::FrameTransport;
use crate::HandshakeError;

pub const MAGIC: &[u8; 4] = b"FSEH";
pub const VERSION: u8 = 1;
pub(crate) const HEADER_LEN: usize = 4 + 1 + 1 + 4;

/// Default cap on a handshake payload.
pub const DEFAULT_MAX_HANDSHAKE_PAYLOAD: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Init,
    Resp,
    Ack,
}

impl FrameType {
    fn to_byte(self) -> u8 {
        match self {
            Self::Init => 1,
            Self::Resp => 2,
            Self::Ack => 3,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Init),
            2 => Some(Self::Resp),
            3 => Some(Self::Ack),
            _ => None,
        }
    }
}

pub fn encode(frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.push(frame_type.to_byte());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Returns true only for bytes that look like a well-formed FSEH
/// header; used by the tunnel to distinguish handshake traffic from
/// FSEC records without parsing either.
pub fn looks_like_handshake_frame(bytes: &[u8], max_payload: usize) -> bool {
    if bytes.len() < HEADER_LEN {
        return false;
    }
    if &bytes[0..4] != MAGIC {
        return false;
    }
    if bytes[4] != VERSION {
        return false;
    }
    if FrameType::from_byte(bytes[5]).is_none() {
        return false;
    }
    let declared_len =
        u32::from_be_bytes(bytes[6..10].try_into().unwrap_or_default()) as usize;
    declared_len <= max_payload && bytes.len() == HEADER_LEN + declared_len
}

pub async fn write_frame(
    transport: &mut impl FrameTransport,
    frame_type: FrameType,
    payload: &[u8],
    max_payload: usize,
) -> Result<(), HandshakeError> {
    if payload.len() > max_payload {
        return Err(HandshakeError::BadHandshakeFrame("payload too large"));
    }
    let frame = encode(frame_type, payload);
    transport.send(frame).await?;
    Ok(())
}

pub async fn read_frame(
    transport: &mut impl FrameTransport,
    max_payload: usize,
) -> Result<(FrameType, Vec<u8>), HandshakeError> {
    let frame = transport
        .recv()
        .await
        .ok_or_else(|| HandshakeError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "handshake carrier closed before frame was received",
        )))??;

    if frame.len() < HEADER_LEN {
        return Err(HandshakeError::BadHandshakeFrame("frame shorter than header"));
    }
    if &frame[0..4] != MAGIC {
        return Err(HandshakeError::BadHandshakeFrame("bad magic"));
    }
    if frame[4] != VERSION {
        return Err(HandshakeError::BadHandshakeFrame("bad version"));
    }
    let frame_type = FrameType::from_byte(frame[5])
        .ok_or(HandshakeError::BadHandshakeFrame("unknown frame type"))?;
    let payload_len = u32::from_be_bytes(frame[6..10].try_into().expect("4 bytes")) as usize;
    if payload_len > max_payload {
        return Err(HandshakeError::BadHandshakeFrame("payload too large"));
    }
    if frame.len() != HEADER_LEN + payload_len {
        return Err(HandshakeError::BadHandshakeFrame("length field does not match frame size"));
    }
    Ok((frame_type, frame[HEADER_LEN..].to_vec()))
}

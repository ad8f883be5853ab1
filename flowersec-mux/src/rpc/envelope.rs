use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One JSON envelope carried on the RPC stream. `request_id == 0` and
/// `response_to == 0` makes it a notification; `request_id != 0` with
/// `response_to == 0` makes it a request; `response_to != 0` makes it
/// a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub type_id: u64,
    #[serde(default)]
    pub request_id: u64,
    #[serde(default)]
    pub response_to: u64,
    #[serde(default = "default_payload")]
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<EnvelopeError>,
}

fn default_payload() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: u32,
    pub message: String,
}

impl Envelope {
    pub fn is_request(&self) -> bool {
        self.request_id != 0 && self.response_to == 0
    }

    pub fn is_response(&self) -> bool {
        self.response_to != 0
    }

    pub fn is_notification(&self) -> bool {
        self.request_id == 0 && self.response_to == 0
    }

    pub fn request(type_id: u64, request_id: u64, payload: Value) -> Self {
        Self { type_id, request_id, response_to: 0, payload, error: None }
    }

    pub fn response(type_id: u64, response_to: u64, payload: Value) -> Self {
        Self { type_id, request_id: 0, response_to, payload, error: None }
    }

    pub fn error_response(type_id: u64, response_to: u64, code: u32, message: impl Into<String>) -> Self {
        Self {
            type_id,
            request_id: 0,
            response_to,
            payload: Value::Null,
            error: Some(EnvelopeError { code, message: message.into() }),
        }
    }

    pub fn notification(type_id: u64, payload: Value) -> Self {
        Self { type_id, request_id: 0, response_to: 0, payload, error: None }
    }
}

pub const HANDLER_NOT_FOUND: u32 = 404;
pub const INTERNAL_ERROR: u32 = 500;

pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(envelope)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_envelope<R>(reader: &mut R, max_bytes: usize) -> std::io::Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > max_bytes {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "rpc envelope exceeds the configured size limit",
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

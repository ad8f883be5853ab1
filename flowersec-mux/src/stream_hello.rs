use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The length-prefixed JSON preamble every multiplexed stream opens
/// with, identifying what the stream is for before either side treats
/// the bytes that follow as anything in particular.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHello {
    pub kind: String,
}

/// The one logical stream an endpoint uses for request/response and
/// notification traffic.
pub const RPC_STREAM_KIND: &str = "rpc";

pub async fn write_stream_hello<W>(writer: &mut W, hello: &StreamHello) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(hello)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_stream_hello<R>(reader: &mut R, max_bytes: usize) -> std::io::Result<StreamHello>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > max_bytes {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "stream hello exceeds the configured size limit",
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_hello() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_stream_hello(&mut a, &StreamHello { kind: RPC_STREAM_KIND.into() })
            .await
            .unwrap();
        let hello = read_stream_hello(&mut b, 4096).await.unwrap();
        assert_eq!(hello.kind, "rpc");
    }

    #[tokio::test]
    async fn rejects_a_hello_over_the_size_limit() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let big_kind = "x".repeat(200);
        write_stream_hello(&mut a, &StreamHello { kind: big_kind }).await.unwrap();
        let err = read_stream_hello(&mut b, 16).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use flowersec_handshake::{FrameReader, FrameTransport, FrameWriter, SplitFrameTransport};

/// A [`FrameTransport`] over a WebSocket: each binary message carries
/// exactly one FSEH/FSEC frame, verbatim. No header parsing is needed
/// on this side — the WebSocket already preserves message boundaries
/// for us.
pub struct WsFrameTransport<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> WsFrameTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self { sink, stream }
    }
}

fn to_io_error(e: tokio_tungstenite::tungstenite::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

async fn ws_recv<S>(stream: &mut SplitStream<WebSocketStream<S>>) -> Option<std::io::Result<Vec<u8>>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        return match stream.next().await? {
            Ok(Message::Binary(data)) => Some(Ok(data)),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            // Carry the close reason through as the error text
            // (prefixed so callers can recognize it) rather than a
            // clean `None`, since a rejected attach closes the
            // socket with a stable reason the caller needs to
            // translate.
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                Some(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    format!("ws closed: {reason}"),
                )))
            }
            Ok(Message::Text(_) | Message::Frame(_)) => Some(Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "expected a binary frame on the secure channel's websocket",
            ))),
            Err(e) => Some(Err(to_io_error(e))),
        };
    }
}

#[async_trait]
impl<S> FrameTransport for WsFrameTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Vec<u8>) -> std::io::Result<()> {
        self.sink
            .send(Message::Binary(frame))
            .await
            .map_err(to_io_error)
    }

    async fn recv(&mut self) -> Option<std::io::Result<Vec<u8>>> {
        ws_recv(&mut self.stream).await
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

/// The read half of a split [`WsFrameTransport`].
pub struct WsFrameReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

/// The write half of a split [`WsFrameTransport`].
pub struct WsFrameWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> FrameReader for WsFrameReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Option<std::io::Result<Vec<u8>>> {
        ws_recv(&mut self.stream).await
    }
}

#[async_trait]
impl<S> FrameWriter for WsFrameWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Vec<u8>) -> std::io::Result<()> {
        self.sink
            .send(Message::Binary(frame))
            .await
            .map_err(to_io_error)
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

impl<S> SplitFrameTransport for WsFrameTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Reader = WsFrameReader<S>;
    type Writer = WsFrameWriter<S>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (WsFrameReader { stream: self.stream }, WsFrameWriter { sink: self.sink })
    }
}

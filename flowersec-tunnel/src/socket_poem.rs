use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use poem::web::websocket::{Message, WebSocketStream};

use crate::socket::{SocketMessage, TunnelSocketRead, TunnelSocketWrite};

/// [`TunnelSocketRead`]/[`TunnelSocketWrite`] over `poem`'s WebSocket,
/// split the same way `pump_websocket` splits its carrier into an
/// independent sink and source so the read and write pumps can each
/// own half without contending on a lock.
pub struct PoemSocketRead(SplitStream<WebSocketStream>);
pub struct PoemSocketWrite(SplitSink<WebSocketStream, Message>);

pub fn split(ws: WebSocketStream) -> (PoemSocketRead, PoemSocketWrite) {
    let (sink, stream) = ws.split();
    (PoemSocketRead(stream), PoemSocketWrite(sink))
}

#[async_trait]
impl TunnelSocketRead for PoemSocketRead {
    async fn recv(&mut self) -> Option<std::io::Result<SocketMessage>> {
        loop {
            let msg = match self.0.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(std::io::Error::new(std::io::ErrorKind::Other, e))),
            };
            return Some(Ok(match msg {
                Message::Text(t) => SocketMessage::Text(t),
                Message::Binary(b) => SocketMessage::Binary(b),
                // Ping/pong are answered by poem internally; a peer-sent
                // close ends the stream on the next `next()` call.
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return None,
            }));
        }
    }
}

#[async_trait]
impl TunnelSocketWrite for PoemSocketWrite {
    async fn send_binary(&mut self, data: Vec<u8>) -> std::io::Result<()> {
        self.0
            .send(Message::Binary(data))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    async fn send_close(&mut self, code: u16, reason: String) {
        let _ = self.0.send(Message::Close(Some((code, reason)))).await;
    }
}

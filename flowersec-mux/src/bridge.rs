use std::sync::Arc;

use async_trait::async_trait;
use flowersec_handshake::{HandshakeError, SecureChannel, SplitFrameTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use yamux::{Config, Connection, ConnectionError, Mode, Stream as YamuxStream};

/// Type-erases a [`SecureChannelReadHalf`](flowersec_handshake::SecureChannelReadHalf)
/// so the bridge's read task doesn't carry the transport's reader type
/// as a parameter.
#[async_trait]
trait ChannelReadOps: Send {
    async fn read(&mut self) -> Result<Option<Vec<u8>>, HandshakeError>;
}

#[async_trait]
impl<R> ChannelReadOps for flowersec_handshake::SecureChannelReadHalf<R>
where
    R: flowersec_handshake::FrameReader,
{
    async fn read(&mut self) -> Result<Option<Vec<u8>>, HandshakeError> {
        Self::read(self).await
    }
}

/// Type-erases a [`SecureChannelWriteHalf`](flowersec_handshake::SecureChannelWriteHalf)
/// so it can be shared behind one `Arc<Mutex<_>>` between the bridge's
/// write task and [`MuxSession::ping`] without pulling in the reader
/// type too — the two halves never contend on the same lock, since
/// writing never blocks on an inbound record the way reading does.
#[async_trait]
trait ChannelWriteOps: Send {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), HandshakeError>;
    async fn send_ping(&mut self) -> Result<(), HandshakeError>;
}

#[async_trait]
impl<W> ChannelWriteOps for flowersec_handshake::SecureChannelWriteHalf<W>
where
    W: flowersec_handshake::FrameWriter,
{
    async fn write(&mut self, bytes: &[u8]) -> Result<(), HandshakeError> {
        Self::write(self, bytes).await
    }

    async fn send_ping(&mut self) -> Result<(), HandshakeError> {
        Self::send_ping(self).await
    }
}

/// Bridges a message-oriented [`SecureChannel`] onto a yamux
/// [`Connection`], so the rest of the endpoint runtime gets ordinary
/// multiplexed byte streams despite the wire carrying one FSEC record
/// per logical write.
///
/// yamux only needs ordered, reliable byte delivery — it doesn't care
/// how its own bytes get chunked on the wire. So an internal
/// `tokio::io::duplex` pipe sits between yamux and the channel: a
/// forwarding task reads fixed-size chunks off one end of the pipe and
/// writes each as exactly one `SecureChannel` record (and the reverse
/// for inbound records), while yamux drives the other end as if it
/// were a plain socket. The pipe never touches wire framing, so this
/// stays safe to run underneath a transport that only delivers whole
/// messages.
///
/// The channel is split into an independent read half and write half
/// before either is handed to a task: the read half is read from in a
/// tight loop that blocks indefinitely on the next inbound record, so
/// it must never share a lock with the write half, or a silent peer
/// would starve every outbound write (including `ping`) of the lock
/// the reader is parked holding.
pub struct MuxSession {
    control: yamux::Control,
    inbound: Mutex<mpsc::Receiver<YamuxStream>>,
    driver: tokio::task::JoinHandle<()>,
    forwarder: tokio::task::JoinHandle<()>,
    writer: Arc<Mutex<dyn ChannelWriteOps>>,
}

impl MuxSession {
    /// Spawns the background tasks that drive `channel` under a yamux
    /// connection in `mode`, and starts accepting inbound streams.
    pub fn new<T>(channel: SecureChannel<T>, mode: Mode, bridge_chunk_bytes: usize) -> Self
    where
        T: SplitFrameTransport + Send + 'static,
    {
        let (yamux_side, bridge_side) = tokio::io::duplex(bridge_chunk_bytes * 4);

        let (read_half, write_half) = channel.split();
        let reader: Box<dyn ChannelReadOps> = Box::new(read_half);
        let writer: Arc<Mutex<dyn ChannelWriteOps>> = Arc::new(Mutex::new(write_half));
        let forwarder = tokio::spawn(forward_channel_to_duplex(
            reader,
            Arc::clone(&writer),
            bridge_side,
            bridge_chunk_bytes,
        ));

        let mut config = Config::default();
        config.set_max_num_streams(usize::MAX);
        let mut connection = Connection::new(yamux_side, config, mode);
        let control = connection.control();

        let (inbound_tx, inbound_rx) = mpsc::channel(32);
        let driver = tokio::spawn(async move {
            loop {
                match connection.next_stream().await {
                    Ok(Some(stream)) => {
                        if inbound_tx.send(stream).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "yamux connection closed");
                        break;
                    }
                }
            }
        });

        Self {
            control,
            inbound: Mutex::new(inbound_rx),
            driver,
            forwarder,
            writer,
        }
    }

    /// Opens a new outbound multiplexed stream.
    pub async fn open_stream(&self) -> Result<YamuxStream, ConnectionError> {
        self.control.clone().open_stream().await
    }

    /// Waits for the next inbound stream the peer opened. Returns
    /// `None` once the underlying connection has closed.
    pub async fn accept_stream(&self) -> Option<YamuxStream> {
        self.inbound.lock().await.recv().await
    }

    /// Sends a keepalive ping directly on the secure channel, bypassing
    /// the yamux bridge. A failing ping means the carrier is gone, so
    /// callers tear the whole session down in response.
    pub async fn ping(&self) -> Result<(), HandshakeError> {
        self.writer.lock().await.send_ping().await
    }

    /// Tears down the bridge and the yamux connection driver.
    pub async fn close(&self) {
        self.driver.abort();
        self.forwarder.abort();
        let _ = self.control.clone().close().await;
    }
}

/// Moves bytes between the channel's two halves and `duplex_side` in
/// both directions until either side closes. Each outbound chunk (up
/// to `chunk_bytes`) becomes exactly one `SecureChannel` record; each
/// inbound record's plaintext is pushed onto the duplex for yamux to
/// read as an ordinary byte stream. `reader` is owned exclusively by
/// the read task below; `writer` is shared with [`MuxSession::ping`],
/// which only ever writes, so the two tasks never contend for the same
/// lock the read task might hold across a blocking `recv()`.
async fn forward_channel_to_duplex(
    mut reader: Box<dyn ChannelReadOps>,
    writer: Arc<Mutex<dyn ChannelWriteOps>>,
    duplex_side: tokio::io::DuplexStream,
    chunk_bytes: usize,
) {
    let (mut duplex_read, mut duplex_write) = tokio::io::split(duplex_side);

    let to_duplex = tokio::spawn(async move {
        loop {
            match reader.read().await {
                Ok(Some(plaintext)) => {
                    if duplex_write.write_all(&plaintext).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "secure channel read failed while bridging to yamux");
                    break;
                }
            }
        }
        let _ = duplex_write.shutdown().await;
    });

    let from_duplex = tokio::spawn(async move {
        let mut buf = vec![0u8; chunk_bytes];
        loop {
            let n = match duplex_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            let mut guard = writer.lock().await;
            if guard.write(&buf[..n]).await.is_err() {
                break;
            }
        }
    });

    let _ = tokio::join!(to_duplex, from_duplex);
}

use flowersec_record::{RecordFlags, SeqCounter};

use crate::transcript::DirectionKeys;
use crate::transport::{FrameReader, FrameTransport, FrameWriter, SplitFrameTransport};
use crate::HandshakeError;

/// One end of the end-to-end-encrypted record stream, wrapping
/// whatever [`FrameTransport`] the handshake ran over (in practice, a
/// WebSocket's binary message stream: one message per record). Reads
/// transparently consume empty `PING` keepalive records; callers only
/// ever see application bytes.
pub struct SecureChannel<T> {
    transport: T,
    write_key: [u8; 32],
    write_nonce_prefix: [u8; 4],
    write_seq: SeqCounter,
    read_key: [u8; 32],
    read_nonce_prefix: [u8; 4],
    read_seq: SeqCounter,
    max_record_bytes: usize,
}

impl<T> SecureChannel<T>
where
    T: FrameTransport,
{
    pub fn new(
        transport: T,
        write: DirectionKeys,
        write_seq_start: u64,
        read: DirectionKeys,
        read_seq_start: u64,
        max_record_bytes: usize,
    ) -> Self {
        Self {
            transport,
            write_key: write.key,
            write_nonce_prefix: write.nonce_prefix,
            write_seq: SeqCounter::starting_at(write_seq_start),
            read_key: read.key,
            read_nonce_prefix: read.nonce_prefix,
            read_seq: SeqCounter::starting_at(read_seq_start),
            max_record_bytes,
        }
    }

    /// Reads one application record, or `Ok(None)` on clean EOF.
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>, HandshakeError> {
        loop {
            let (flags, plaintext) = match self.read_one().await? {
                Some(pair) => pair,
                None => return Ok(None),
            };
            if flags.contains(RecordFlags::PING) && plaintext.is_empty() {
                continue;
            }
            return Ok(Some(plaintext));
        }
    }

    /// Reads exactly one record, including a `PING` keepalive, without
    /// filtering it out. Used by the client handshake to observe the
    /// server's finished-proof ping at sequence 1.
    pub async fn read_raw(&mut self) -> Result<(RecordFlags, Vec<u8>), HandshakeError> {
        self.read_one().await?.ok_or_else(|| {
            HandshakeError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "secure channel closed before a record was received",
            ))
        })
    }

    async fn read_one(&mut self) -> Result<Option<(RecordFlags, Vec<u8>)>, HandshakeError> {
        let frame = match self.transport.recv().await {
            None => return Ok(None),
            Some(result) => result?,
        };
        let expected_seq = self.read_seq.peek()?;
        let decoded = flowersec_record::decode(
            &self.read_key,
            &self.read_nonce_prefix,
            &frame,
            expected_seq,
            self.max_record_bytes,
        )?;
        self.read_seq.advance()?;
        Ok(Some(decoded))
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), HandshakeError> {
        let seq = self.write_seq.advance()?;
        let frame = flowersec_record::encode(
            &self.write_key,
            &self.write_nonce_prefix,
            RecordFlags::APP,
            seq,
            bytes,
            self.max_record_bytes,
        )?;
        self.transport.send(frame).await?;
        Ok(())
    }

    /// Sends a zero-length `PING` record at the next sequence number,
    /// used both as the server's handshake-finished proof and as
    /// ongoing keepalive traffic.
    pub async fn send_ping(&mut self) -> Result<(), HandshakeError> {
        let seq = self.write_seq.advance()?;
        let frame = flowersec_record::encode(
            &self.write_key,
            &self.write_nonce_prefix,
            RecordFlags::PING,
            seq,
            &[],
            self.max_record_bytes,
        )?;
        self.transport.send(frame).await?;
        Ok(())
    }

    pub async fn close(&mut self) {
        self.transport.close().await;
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T> SecureChannel<T>
where
    T: SplitFrameTransport,
{
    /// Partitions this channel into an independent read half and
    /// write half, each owning its own side of the underlying
    /// transport. A reader parked on a blocking `recv()` then never
    /// holds a lock a concurrent writer needs — the two halves share
    /// nothing but the keys and sequence counters they were built
    /// with, which are themselves per-direction and never touched by
    /// the other half.
    pub fn split(self) -> (SecureChannelReadHalf<T::Reader>, SecureChannelWriteHalf<T::Writer>) {
        let (reader, writer) = self.transport.split();
        let read_half = SecureChannelReadHalf {
            reader,
            read_key: self.read_key,
            read_nonce_prefix: self.read_nonce_prefix,
            read_seq: self.read_seq,
            max_record_bytes: self.max_record_bytes,
        };
        let write_half = SecureChannelWriteHalf {
            writer,
            write_key: self.write_key,
            write_nonce_prefix: self.write_nonce_prefix,
            write_seq: self.write_seq,
            max_record_bytes: self.max_record_bytes,
        };
        (read_half, write_half)
    }
}

/// The read half of a [`SecureChannel`] after [`split`](SecureChannel::split).
pub struct SecureChannelReadHalf<R> {
    reader: R,
    read_key: [u8; 32],
    read_nonce_prefix: [u8; 4],
    read_seq: SeqCounter,
    max_record_bytes: usize,
}

impl<R> SecureChannelReadHalf<R>
where
    R: FrameReader,
{
    /// Reads one application record, or `Ok(None)` on clean EOF.
    /// Transparently consumes empty `PING` keepalive records, same as
    /// [`SecureChannel::read`].
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>, HandshakeError> {
        loop {
            let (flags, plaintext) = match self.read_one().await? {
                Some(pair) => pair,
                None => return Ok(None),
            };
            if flags.contains(RecordFlags::PING) && plaintext.is_empty() {
                continue;
            }
            return Ok(Some(plaintext));
        }
    }

    async fn read_one(&mut self) -> Result<Option<(RecordFlags, Vec<u8>)>, HandshakeError> {
        let frame = match self.reader.recv().await {
            None => return Ok(None),
            Some(result) => result?,
        };
        let expected_seq = self.read_seq.peek()?;
        let decoded = flowersec_record::decode(
            &self.read_key,
            &self.read_nonce_prefix,
            &frame,
            expected_seq,
            self.max_record_bytes,
        )?;
        self.read_seq.advance()?;
        Ok(Some(decoded))
    }
}

/// The write half of a [`SecureChannel`] after [`split`](SecureChannel::split).
pub struct SecureChannelWriteHalf<W> {
    writer: W,
    write_key: [u8; 32],
    write_nonce_prefix: [u8; 4],
    write_seq: SeqCounter,
    max_record_bytes: usize,
}

impl<W> SecureChannelWriteHalf<W>
where
    W: FrameWriter,
{
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), HandshakeError> {
        let seq = self.write_seq.advance()?;
        let frame = flowersec_record::encode(
            &self.write_key,
            &self.write_nonce_prefix,
            RecordFlags::APP,
            seq,
            bytes,
            self.max_record_bytes,
        )?;
        self.writer.send(frame).await?;
        Ok(())
    }

    /// Sends a zero-length `PING` record at the next sequence number.
    pub async fn send_ping(&mut self) -> Result<(), HandshakeError> {
        let seq = self.write_seq.advance()?;
        let frame = flowersec_record::encode(
            &self.write_key,
            &self.write_nonce_prefix,
            RecordFlags::PING,
            seq,
            &[],
            self.max_record_bytes,
        )?;
        self.writer.send(frame).await?;
        Ok(())
    }

    pub async fn close(&mut self) {
        self.writer.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ByteStreamFrameTransport;

    fn keys(tag: u8) -> DirectionKeys {
        DirectionKeys {
            key: [tag; 32],
            nonce_prefix: [tag; 4],
        }
    }

    #[tokio::test]
    async fn round_trips_plaintext_over_duplex_stream() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let client_transport = ByteStreamFrameTransport::new(client_io, 1 << 20);
        let server_transport = ByteStreamFrameTransport::new(server_io, 1 << 20);

        let mut client = SecureChannel::new(client_transport, keys(1), 0, keys(2), 1, 1 << 20);
        let mut server = SecureChannel::new(server_transport, keys(2), 1, keys(1), 0, 1 << 20);

        client.write(b"hello").await.unwrap();
        let received = server.read().await.unwrap().unwrap();
        assert_eq!(received, b"hello");

        server.send_ping().await.unwrap();
        server.write(b"world").await.unwrap();
        let received = client.read().await.unwrap().unwrap();
        assert_eq!(received, b"world", "ping keepalive must be transparent to read()");
    }

    #[tokio::test]
    async fn read_raw_surfaces_the_ping_flag() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let client_transport = ByteStreamFrameTransport::new(client_io, 1 << 20);
        let server_transport = ByteStreamFrameTransport::new(server_io, 1 << 20);

        let mut client = SecureChannel::new(client_transport, keys(1), 0, keys(2), 0, 1 << 20);
        let mut server = SecureChannel::new(server_transport, keys(2), 0, keys(1), 0, 1 << 20);

        client.send_ping().await.unwrap();
        let (flags, plaintext) = server.read_raw().await.unwrap();
        assert!(flags.contains(RecordFlags::PING));
        assert!(plaintext.is_empty());
    }
}

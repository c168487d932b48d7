//! Record-separator framing for async byte streams.
//!
//! Every frame is one UTF-8 JSON text terminated by the record separator byte
//! 0x1E. JSON escapes control characters, so the separator can never appear
//! inside a frame and the reader only has to scan for it.
//!
//! This module is generic over the transport type - it works with any type
//! that implements `AsyncRead` / `AsyncWrite`, including TCP sockets, Unix
//! domain sockets and in-memory duplex pipes.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use hubbub_wire::Message;

/// Frame terminator on the wire.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Default bound on a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Consumed-prefix size past which [`FrameReader::reclaim`] starts shifting
/// live bytes to the front of the buffer.
const RECLAIM_CONSUMED_BYTES: usize = 64 * 1024;

/// Reading half of a framed connection.
///
/// Maintains an accumulation buffer so partial frames survive across reads;
/// a frame split over any number of underlying reads reassembles cleanly.
/// Two cursors track the buffer: `consumed` marks the start of the frame in
/// progress, `scanned` how far the separator search has come, so bytes are
/// never scanned twice.
pub struct FrameReader<R> {
    stream: R,
    recv_buf: Vec<u8>,
    /// Offset of the first byte not yet yielded as part of a frame.
    consumed: usize,
    /// Offset the separator scan has reached. Kept at or past `consumed`.
    scanned: usize,
    max_frame_size: usize,
}

impl<R> FrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(stream: R, max_frame_size: usize) -> Self {
        Self {
            stream,
            recv_buf: Vec::new(),
            consumed: 0,
            scanned: 0,
            max_frame_size,
        }
    }

    /// Consume the reader and return the underlying stream.
    pub fn into_inner(self) -> R {
        self.stream
    }

    /// Pop the next complete frame out of the buffer, if one is there.
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.scanned = self.scanned.clamp(self.consumed, self.recv_buf.len());
        match self.recv_buf[self.scanned..]
            .iter()
            .position(|b| *b == RECORD_SEPARATOR)
        {
            None => {
                self.scanned = self.recv_buf.len();
                None
            }
            Some(rel) => {
                let end = self.scanned + rel;
                let frame = self.recv_buf[self.consumed..end].to_vec();
                self.consumed = end + 1;
                self.scanned = self.consumed;
                self.reclaim();
                Some(frame)
            }
        }
    }

    /// Reclaim buffer space: clear a fully consumed buffer, or shift the
    /// live tail down once the consumed prefix is large and dominates.
    fn reclaim(&mut self) {
        if self.consumed == self.recv_buf.len() {
            self.recv_buf.clear();
            self.consumed = 0;
            self.scanned = 0;
        } else if self.consumed >= RECLAIM_CONSUMED_BYTES
            && self.consumed * 2 >= self.recv_buf.len()
        {
            self.recv_buf.drain(..self.consumed);
            self.scanned -= self.consumed;
            self.consumed = 0;
        }
    }
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly at a frame boundary.
    /// EOF in the middle of a frame is `UnexpectedEof`; an unterminated run
    /// longer than the frame size bound is `InvalidData`.
    pub async fn recv_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.next_frame() {
                if frame.len() > self.max_frame_size {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "frame of {} bytes exceeds the {} byte limit",
                            frame.len(),
                            self.max_frame_size
                        ),
                    ));
                }
                return Ok(Some(frame));
            }

            let pending = self.recv_buf.len() - self.consumed;
            if pending > self.max_frame_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "unterminated frame exceeds the {} byte limit",
                        self.max_frame_size
                    ),
                ));
            }

            let mut tmp = [0u8; 4096];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                if pending != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("eof with {pending} trailing bytes and no frame separator"),
                    ));
                }
                return Ok(None);
            }
            self.reclaim();
            self.recv_buf.extend_from_slice(&tmp[..n]);
        }
    }
}

/// Writing half of a framed connection.
///
/// Appends exactly one record separator per frame; a frame is handed to the
/// stream in a single `write_all`, never split by the writer.
pub struct FrameWriter<W> {
    stream: W,
    /// Encode buffer reused across frames to avoid reallocations.
    encode_buf: Vec<u8>,
}

impl<W> FrameWriter<W> {
    pub fn new(stream: W) -> Self {
        Self {
            stream,
            encode_buf: Vec::with_capacity(1024),
        }
    }

    pub fn into_inner(self) -> W {
        self.stream
    }
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Frame and send one protocol message.
    pub async fn send_message(&mut self, msg: &Message) -> io::Result<()> {
        let json = msg
            .to_vec()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.send_raw(&json).await
    }

    /// Frame and send any serializable value. Used for handshake responses,
    /// which share the message framing but not the message schema.
    pub async fn send_json<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        let json = serde_json::to_vec(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.send_raw(&json).await
    }

    async fn send_raw(&mut self, json: &[u8]) -> io::Result<()> {
        self.encode_buf.clear();
        self.encode_buf.extend_from_slice(json);
        self.encode_buf.push(RECORD_SEPARATOR);
        self.stream.write_all(&self.encode_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, duplex};

    #[tokio::test]
    async fn frames_split_across_reads_reassemble() {
        let (mut client, server) = duplex(64);
        let mut reader = FrameReader::new(server);

        client.write_all(b"{\"proto").await.unwrap();
        client.write_all(b"col\":\"json\"}\x1e").await.unwrap();
        client.shutdown().await.unwrap();

        let frame = reader.recv_frame().await.unwrap().unwrap();
        assert_eq!(frame, b"{\"protocol\":\"json\"}".to_vec());
        assert!(reader.recv_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn multiple_frames_in_one_read_come_out_one_by_one() {
        let (mut client, server) = duplex(256);
        let mut reader = FrameReader::new(server);

        client
            .write_all(b"{\"type\":6}\x1e{\"type\":6}\x1e{\"type\":7}\x1e")
            .await
            .unwrap();
        drop(client);

        assert_eq!(
            reader.recv_frame().await.unwrap().unwrap(),
            b"{\"type\":6}".to_vec()
        );
        assert_eq!(
            reader.recv_frame().await.unwrap().unwrap(),
            b"{\"type\":6}".to_vec()
        );
        assert_eq!(
            reader.recv_frame().await.unwrap().unwrap(),
            b"{\"type\":7}".to_vec()
        );
        assert!(reader.recv_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_unexpected_eof() {
        let (mut client, server) = duplex(64);
        let mut reader = FrameReader::new(server);

        client.write_all(b"{\"type\":1").await.unwrap();
        client.shutdown().await.unwrap();

        let err = reader.recv_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(err.to_string().contains("trailing bytes"));
    }

    #[tokio::test]
    async fn empty_frames_are_yielded_as_empty() {
        let (mut client, server) = duplex(64);
        let mut reader = FrameReader::new(server);

        client.write_all(b"\x1e").await.unwrap();
        drop(client);

        assert_eq!(reader.recv_frame().await.unwrap().unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn unterminated_oversize_input_is_invalid_data() {
        let (mut client, server) = duplex(16 * 1024);
        let mut reader = FrameReader::with_max_frame_size(server, 1024);

        let writer = tokio::spawn(async move {
            // No separator anywhere: the reader must give up at the bound
            // rather than buffer forever.
            let chunk = vec![b'a'; 4096];
            let _ = client.write_all(&chunk).await;
            let _ = client.shutdown().await;
        });

        let err = reader.recv_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn oversize_terminated_frame_is_invalid_data() {
        let (mut client, server) = duplex(16 * 1024);
        let mut reader = FrameReader::with_max_frame_size(server, 16);

        client.write_all(b"{\"type\":1,\"target\":\"way too long\"}\x1e").await.unwrap();
        drop(client);

        let err = reader.recv_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn writer_terminates_every_frame_once() {
        let (server, mut client) = duplex(256);
        let mut writer = FrameWriter::new(server);

        writer.send_message(&Message::Ping).await.unwrap();
        writer
            .send_json(&hubbub_wire::HandshakeResponse::ok())
            .await
            .unwrap();
        drop(writer);

        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut received)
            .await
            .unwrap();
        assert_eq!(received, b"{\"type\":6}\x1e{}\x1e".to_vec());
    }

    #[tokio::test]
    async fn writer_and_reader_round_trip() {
        let (server, client) = duplex(256);
        let mut writer = FrameWriter::new(server);
        let mut reader = FrameReader::new(client);

        let msg = Message::Close(hubbub_wire::Close::new(Some("done".into())));
        writer.send_message(&msg).await.unwrap();
        drop(writer);

        let frame = reader.recv_frame().await.unwrap().unwrap();
        assert_eq!(Message::from_slice(&frame).unwrap(), msg);
    }

    #[test]
    fn reclaim_shifts_out_a_large_consumed_prefix() {
        let mut reader = FrameReader::new(());
        reader.recv_buf = vec![0xaa; RECLAIM_CONSUMED_BYTES + 32];
        reader.consumed = RECLAIM_CONSUMED_BYTES;
        reader.scanned = RECLAIM_CONSUMED_BYTES + 7;

        reader.reclaim();

        assert_eq!(reader.consumed, 0);
        assert_eq!(reader.scanned, 7);
        assert_eq!(reader.recv_buf, vec![0xaa; 32]);
    }

    #[test]
    fn reclaim_clears_a_fully_consumed_buffer() {
        let mut reader = FrameReader::new(());
        reader.recv_buf = vec![0xaa; 16];
        reader.consumed = 16;
        reader.scanned = 16;

        reader.reclaim();

        assert!(reader.recv_buf.is_empty());
        assert_eq!(reader.consumed, 0);
        assert_eq!(reader.scanned, 0);
    }

    #[test]
    fn reclaim_leaves_a_small_consumed_prefix_alone() {
        let mut reader = FrameReader::new(());
        reader.recv_buf = vec![0xaa; 64];
        reader.consumed = 32;
        reader.scanned = 48;

        reader.reclaim();

        assert_eq!(reader.consumed, 32);
        assert_eq!(reader.scanned, 48);
        assert_eq!(reader.recv_buf.len(), 64);
    }

    #[test]
    fn next_frame_normalizes_the_scan_cursor() {
        // A scan cursor beyond the buffer clamps to its length.
        let mut reader = FrameReader::new(());
        reader.scanned = 123;
        assert!(reader.next_frame().is_none());
        assert_eq!(reader.scanned, 0);

        // A scan cursor behind `consumed` moves forward before searching.
        let mut reader = FrameReader::new(());
        reader.recv_buf = vec![b'x', RECORD_SEPARATOR];
        reader.consumed = 1;
        reader.scanned = 0;
        let frame = reader.next_frame().unwrap();
        assert!(frame.is_empty());
        assert_eq!(reader.consumed, 0);
    }
}

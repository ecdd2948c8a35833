//! A framed byte stream over tokio I/O: accumulates bytes until a full PDU
//! frame is available, as probed by the framing hints.

use std::io;

use bytes::{Bytes, BytesMut};
use rdpeer_pdu::{Action, PduHint};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

pub struct Framed<S> {
    stream: S,
    buf: BytesMut,
}

impl<S> Framed<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    pub fn into_inner(self) -> (S, BytesMut) {
        (self.stream, self.buf)
    }

    pub fn peek(&self) -> &[u8] {
        &self.buf
    }

    /// Whether buffered bytes are waiting beyond the last consumed frame.
    pub fn has_more_to_read(&self) -> bool {
        !self.buf.is_empty()
    }
}

impl<S> Framed<S>
where
    S: AsyncRead + Unpin,
{
    /// Accumulates at least `length` bytes and returns exactly `length`
    /// bytes, keeping the leftover in the internal buffer.
    pub async fn read_exact(&mut self, length: usize) -> io::Result<BytesMut> {
        loop {
            if self.buf.len() >= length {
                return Ok(self.buf.split_to(length));
            }

            self.buf
                .reserve(length.checked_sub(self.buf.len()).expect("length > buffered"));

            let len = self.read().await?;

            if len == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "not enough bytes"));
            }
        }
    }

    /// Reads one standard RDP frame, slow path or fast path.
    pub async fn read_pdu(&mut self) -> io::Result<(Action, BytesMut)> {
        loop {
            // Try decoding and see if a frame has been received already
            match rdpeer_pdu::find_size(self.peek()) {
                Ok(Some(pdu_info)) => {
                    let frame = self.read_exact(pdu_info.length).await?;

                    return Ok((pdu_info.action, frame));
                }
                Ok(None) => {
                    let len = self.read().await?;

                    if len == 0 {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "not enough bytes"));
                    }
                }
                Err(e) => return Err(io::Error::other(e)),
            };
        }
    }

    /// Reads one frame of the kind the hint describes.
    pub async fn read_by_hint(&mut self, hint: &dyn PduHint) -> io::Result<Bytes> {
        loop {
            match hint.find_size(self.peek()).map_err(io::Error::other)? {
                Some(length) => {
                    return Ok(self.read_exact(length).await?.freeze());
                }
                None => {
                    let len = self.read().await?;

                    if len == 0 {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "not enough bytes"));
                    }
                }
            };
        }
    }

    async fn read(&mut self) -> io::Result<usize> {
        self.stream.read_buf(&mut self.buf).await
    }
}

impl<S> Framed<S>
where
    S: AsyncWrite + Unpin,
{
    /// Writes an entire buffer into the stream.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await?;
        self.stream.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_pdu_reassembles_partial_frames() {
        let (client, server) = tokio::io::duplex(64);
        let mut framed = Framed::new(server);

        let frame = [0x03u8, 0x00, 0x00, 0x08, 0x02, 0xF0, 0x80, 0x21];

        let writer = tokio::spawn(async move {
            let mut client = client;
            // drip the frame in two halves
            client.write_all(&frame[..3]).await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(&frame[3..]).await.unwrap();
            client
        });

        let (action, bytes) = framed.read_pdu().await.unwrap();
        assert_eq!(action, Action::X224);
        assert_eq!(&bytes[..], &frame[..]);

        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn leftover_bytes_are_kept_for_the_next_frame() {
        let (client, server) = tokio::io::duplex(64);
        let mut framed = Framed::new(server);

        let first = [0x03u8, 0x00, 0x00, 0x07, 0x02, 0xF0, 0x80];
        let second = [0x03u8, 0x00, 0x00, 0x07, 0x02, 0xF0, 0x80];

        let mut client = client;
        let mut combined = first.to_vec();
        combined.extend_from_slice(&second);
        client.write_all(&combined).await.unwrap();

        let (_, a) = framed.read_pdu().await.unwrap();
        assert_eq!(&a[..], &first[..]);
        assert!(framed.has_more_to_read());

        let (_, b) = framed.read_pdu().await.unwrap();
        assert_eq!(&b[..], &second[..]);
        assert!(!framed.has_more_to_read());
    }
}

//! Framed connections over arbitrary byte streams.
//!
//! Built-in support for TCP streams and in-memory duplex pipes; anything
//! implementing `AsyncRead`/`AsyncWrite` works. Frames are length-delimited
//! with a little-endian prefix, so a receiver always knows how many bytes to
//! buffer before parsing.

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use super::{Channel, RecvBytes, SendBytes, SplitChannel};

/// Buffer size for in-memory pipes; generous enough that a full protocol
/// round never fills it.
const DUPLEX_BUFFER: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("malformed message")]
    MalformedMessage(#[from] bincode::Error),
    #[error("message has an unexpected count or width")]
    BadMessage,
    #[error("no message to receive")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .length_field_length(4)
        .new_codec()
}

/// A connection to a single peer built from a reader and a writer half.
pub struct Connection<R: AsyncRead, W: AsyncWrite> {
    sender: Sending<W>,
    receiver: Receiving<R>,
}

pub struct Sending<W: AsyncWrite> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
    sent: u64,
}

pub struct Receiving<R: AsyncRead> {
    inner: FramedRead<R, LengthDelimitedCodec>,
    received: u64,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    /// Construct a new connection; messages are framed with a 4-byte
    /// little-endian length prefix.
    pub fn new(reader: R, writer: W) -> Self {
        let sender = Sending {
            inner: FramedWrite::new(writer, codec()),
            sent: 0,
        };
        let receiver = Receiving {
            inner: FramedRead::new(reader, codec()),
            received: 0,
        };
        Connection { sender, receiver }
    }

    /// Destroy the connection, returning the internal reader and writer.
    pub fn destroy(self) -> (R, W) {
        let Self { sender, receiver } = self;
        (receiver.inner.into_inner(), sender.inner.into_inner())
    }

    /// Payload bytes sent and received so far.
    pub fn traffic(&self) -> (u64, u64) {
        (self.sender.sent, self.receiver.received)
    }
}

impl<W: AsyncWrite + Unpin + Send> SendBytes for Sending<W> {
    async fn send_bytes(&mut self, bytes: Bytes) -> Result<(), ConnectionError> {
        self.sent += bytes.len() as u64;
        SinkExt::send(&mut self.inner, bytes)
            .await
            .map_err(ConnectionError::Io)
    }
}

impl<R: AsyncRead + Unpin + Send> RecvBytes for Receiving<R> {
    async fn recv_bytes(&mut self) -> Result<BytesMut, ConnectionError> {
        let frame = self
            .inner
            .next()
            .await
            .ok_or(ConnectionError::Closed)?
            .map_err(ConnectionError::Io)?;
        self.received += frame.len() as u64;
        Ok(frame)
    }
}

impl<R: AsyncRead + Unpin + Send, W: AsyncWrite + Unpin + Send> SendBytes for Connection<R, W> {
    fn send_bytes(
        &mut self,
        bytes: Bytes,
    ) -> impl std::future::Future<Output = Result<(), ConnectionError>> + Send {
        self.sender.send_bytes(bytes)
    }
}

impl<R: AsyncRead + Unpin + Send, W: AsyncWrite + Unpin + Send> RecvBytes for Connection<R, W> {
    fn recv_bytes(
        &mut self,
    ) -> impl std::future::Future<Output = Result<BytesMut, ConnectionError>> + Send {
        self.receiver.recv_bytes()
    }
}

impl<R: AsyncRead + Unpin + Send, W: AsyncWrite + Unpin + Send> Channel for Connection<R, W> {}

impl<R: AsyncRead + Unpin + Send, W: AsyncWrite + Unpin + Send> SplitChannel for Connection<R, W> {
    type Sender = Sending<W>;
    type Receiver = Receiving<R>;

    fn split(&mut self) -> (&mut Self::Sender, &mut Self::Receiver) {
        (&mut self.sender, &mut self.receiver)
    }
}

/// Connection over a TCP stream.
pub type TcpConnection = Connection<OwnedReadHalf, OwnedWriteHalf>;

impl TcpConnection {
    pub fn from_tcp_stream(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    pub async fn shutdown(self) -> Result<(), std::io::Error> {
        let (reader, writer) = self.destroy();
        let mut stream = reader
            .reunite(writer)
            .expect("connection halves originate from one stream");
        stream.shutdown().await
    }
}

/// Connection over an in-memory data stream, always paired with a twin in
/// the same process. This is the `FAKE` transport used by tests.
pub type DuplexConnection = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

impl DuplexConnection {
    /// Construct a connected in-memory pair.
    pub fn in_memory() -> (Self, Self) {
        let (s1, s2) = tokio::io::duplex(DUPLEX_BUFFER);
        let (r1, w1) = tokio::io::split(s1);
        let (r2, w2) = tokio::io::split(s2);
        (Self::new(r1, w1), Self::new(r2, w2))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::algebra::Mersenne61;
    use crate::net::wire;

    #[tokio::test]
    async fn in_memory_messages() {
        let (mut conn1, mut conn2) = DuplexConnection::in_memory();
        let h1 = async move {
            conn1.send(&"Hello").await.unwrap();
            conn1.send(&"Buddy").await.unwrap();
            let msg: Box<str> = conn1.recv().await.unwrap();
            assert_eq!(&*msg, "Greetings friend");
            conn1
        };
        let h2 = async move {
            let msg: Box<str> = conn2.recv().await.unwrap();
            assert_eq!(&*msg, "Hello");
            let msg: Box<str> = conn2.recv().await.unwrap();
            assert_eq!(&*msg, "Buddy");
            conn2.send(&"Greetings friend").await.unwrap();
            conn2
        };

        let (conn1, _) = futures::join!(h1, h2);
        let (sent, received) = conn1.traffic();
        assert!(sent > 0);
        assert!(received > 0);
    }

    #[tokio::test]
    async fn typed_frames() {
        let (mut conn1, mut conn2) = DuplexConnection::in_memory();
        let xs: Vec<Mersenne61> = (0..5u64).map(Mersenne61::from).collect();
        conn1.send_bytes(wire::encode_elements(&xs)).await.unwrap();
        let frame = conn2.recv_bytes().await.unwrap();
        let ys: Vec<Mersenne61> = wire::decode_elements_exact(&frame, 5).unwrap();
        assert_eq!(xs, ys);
    }

    #[tokio::test]
    async fn tcp_messages() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let h1 = async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut conn = Connection::from_tcp_stream(stream);
            conn.send(&"over tcp").await.unwrap();
            let msg: Box<str> = conn.recv().await.unwrap();
            assert_eq!(&*msg, "ack");
        };
        let h2 = async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::from_tcp_stream(stream);
            let msg: Box<str> = conn.recv().await.unwrap();
            assert_eq!(&*msg, "over tcp");
            conn.send(&"ack").await.unwrap();
        };
        futures::join!(h1, h2);
    }
}

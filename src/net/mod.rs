//! Communication between parties: framed byte channels plus the typed wire
//! encoding used by the protocol layers.
//!
//! A [`connection::Connection`] wraps any `AsyncRead`/`AsyncWrite` pair with
//! length-delimited framing; [`network::Network`] holds one connection per
//! peer and exposes per-peer send/receive along with broadcast and symmetric
//! exchange patterns.

pub mod connection;
pub mod network;
pub mod wire;

pub use connection::{Connection, ConnectionError, DuplexConnection, TcpConnection};
pub use network::{InMemoryNetwork, Network, NetworkError, TcpNetwork};

use std::future::Future;

use serde::{de::DeserializeOwned, Serialize};
use tokio_util::bytes::{Bytes, BytesMut};

/// Sending half of a channel. Messages are sent as whole frames; the generic
/// [`SendBytes::send`] serializes with bincode while the protocol layers use
/// the fixed-width encodings from [`wire`].
pub trait SendBytes: Send {
    fn send_bytes(
        &mut self,
        bytes: Bytes,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn send<T: Serialize + Sync>(
        &mut self,
        msg: &T,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send {
        async move {
            let msg = bincode::serialize(msg)?;
            self.send_bytes(msg.into()).await
        }
    }
}

impl<S: SendBytes> SendBytes for &mut S {
    fn send_bytes(
        &mut self,
        bytes: Bytes,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send {
        (**self).send_bytes(bytes)
    }
}

/// Receiving half of a channel.
pub trait RecvBytes: Send {
    fn recv_bytes(&mut self) -> impl Future<Output = Result<BytesMut, ConnectionError>> + Send;

    fn recv<T: DeserializeOwned>(
        &mut self,
    ) -> impl Future<Output = Result<T, ConnectionError>> + Send {
        async move {
            let msg = self.recv_bytes().await?;
            Ok(bincode::deserialize(&msg)?)
        }
    }
}

impl<R: RecvBytes> RecvBytes for &mut R {
    fn recv_bytes(&mut self) -> impl Future<Output = Result<BytesMut, ConnectionError>> + Send {
        (**self).recv_bytes()
    }
}

/// A two-way communication medium between this and one other party.
pub trait Channel: SendBytes + RecvBytes {}
impl<C: Channel> Channel for &mut C {}

/// A [`Channel`] which can be split into an independently usable sender and
/// receiver, allowing sends and receives to run concurrently.
pub trait SplitChannel: Channel + Send {
    type Sender: SendBytes + Send;
    type Receiver: RecvBytes + Send;

    fn split(&mut self) -> (&mut Self::Sender, &mut Self::Receiver);
}

//! Peer-to-peer network: one framed connection per peer, indexed by party id.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use futures::future::{self, TryFutureExt};
use thiserror::Error;
use tokio_util::bytes::Bytes;

use super::connection::{Connection, ConnectionError, DuplexConnection, TcpConnection};
use super::wire;
use super::{RecvBytes, SendBytes, SplitChannel};
use crate::algebra::Field;
use crate::config::SessionConfig;
use crate::crypto::hash::Digest;
use crate::sharing::Share;

/// Delay between connection attempts while a peer's listener is not up yet.
const CONNECT_RETRY: Duration = Duration::from_millis(300);

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("error receiving from {id}: {source}")]
    Incoming { id: u32, source: ConnectionError },
    #[error("error sending to {id}: {source}")]
    Outgoing { id: u32, source: ConnectionError },
}

/// Point-to-point network for a fixed set of parties.
///
/// Connections are sorted by peer id, skipping our own index. All traffic to
/// one peer is FIFO; there is no ordering guarantee across peers.
pub struct Network<C: SplitChannel> {
    connections: Vec<C>,
    index: usize,
    traffic: Vec<Traffic>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Traffic {
    sent: u64,
    received: u64,
}

impl<C: SplitChannel> fmt::Debug for Network<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("connections", &self.connections.len())
            .field("index", &self.index)
            .finish()
    }
}

impl<C: SplitChannel> Network<C> {
    pub fn new(connections: Vec<C>, index: usize) -> Self {
        let traffic = vec![Traffic::default(); connections.len() + 1];
        Self {
            connections,
            index,
            traffic,
        }
    }

    /// This party's id.
    pub fn id(&self) -> usize {
        self.index
    }

    /// Number of parties, ourselves included.
    pub fn size(&self) -> usize {
        self.connections.len() + 1
    }

    fn id_to_index(&self, id: usize) -> usize {
        let n = self.connections.len() + 1;
        if id < self.index {
            id
        } else if id == self.index {
            // You probably didn't mean to do that.
            panic!("trying to reference the connection to ourselves, id = {id}")
        } else if id < n {
            id - 1
        } else {
            panic!("only {n} parties in the network, but referenced id = {id}")
        }
    }

    /// Send a frame of raw bytes to `id`.
    pub async fn send_bytes_to(&mut self, id: usize, bytes: Bytes) -> Result<(), NetworkError> {
        let index = self.id_to_index(id);
        self.traffic[id].sent += bytes.len() as u64;
        self.connections[index]
            .send_bytes(bytes)
            .await
            .map_err(|source| NetworkError::Outgoing {
                id: id as u32,
                source,
            })
    }

    /// Receive one frame of raw bytes from `id`.
    pub async fn recv_bytes_from(&mut self, id: usize) -> Result<Vec<u8>, NetworkError> {
        let index = self.id_to_index(id);
        let frame =
            self.connections[index]
                .recv_bytes()
                .await
                .map_err(|source| NetworkError::Incoming {
                    id: id as u32,
                    source,
                })?;
        self.traffic[id].received += frame.len() as u64;
        Ok(frame.to_vec())
    }

    /// Send a bincode-serialized message to `id`.
    pub async fn send_to<T: serde::Serialize + Sync>(
        &mut self,
        id: usize,
        msg: &T,
    ) -> Result<(), NetworkError> {
        let bytes: Bytes = bincode::serialize(msg)
            .expect("serialization of protocol messages does not fail")
            .into();
        self.send_bytes_to(id, bytes).await
    }

    /// Receive a bincode-serialized message from `id`.
    pub async fn recv_from<T: serde::de::DeserializeOwned>(
        &mut self,
        id: usize,
    ) -> Result<T, NetworkError> {
        let frame = self.recv_bytes_from(id).await?;
        bincode::deserialize(&frame).map_err(|e| NetworkError::Incoming {
            id: id as u32,
            source: ConnectionError::MalformedMessage(e),
        })
    }

    /// Send a vector of field elements to `id` (count-prefixed fixed-width
    /// encoding).
    pub async fn send_elements_to<F: Field>(
        &mut self,
        id: usize,
        elements: &[F],
    ) -> Result<(), NetworkError> {
        self.send_bytes_to(id, wire::encode_elements(elements))
            .await
    }

    /// Receive exactly `count` field elements from `id`.
    pub async fn recv_elements_from<F: Field>(
        &mut self,
        id: usize,
        count: usize,
    ) -> Result<Vec<F>, NetworkError> {
        let frame = self.recv_bytes_from(id).await?;
        wire::decode_elements_exact(&frame, count).map_err(|source| NetworkError::Incoming {
            id: id as u32,
            source,
        })
    }

    /// Send a replicated share to `id`.
    pub async fn send_share_to<F: Field>(
        &mut self,
        id: usize,
        share: &Share<F>,
    ) -> Result<(), NetworkError> {
        self.send_bytes_to(id, wire::encode_share(share)).await
    }

    /// Receive a replicated share of `width` slots from `id`.
    pub async fn recv_share_from<F: Field>(
        &mut self,
        id: usize,
        width: usize,
    ) -> Result<Share<F>, NetworkError> {
        let frame = self.recv_bytes_from(id).await?;
        wire::decode_share(&frame, width).map_err(|source| NetworkError::Incoming {
            id: id as u32,
            source,
        })
    }

    /// Send a vector of digests to `id`.
    pub async fn send_digests_to(
        &mut self,
        id: usize,
        digests: &[Digest],
    ) -> Result<(), NetworkError> {
        self.send_bytes_to(id, wire::encode_digests(digests)).await
    }

    /// Send the same element vector to every listed peer, concurrently.
    pub async fn send_elements_to_each<F: Field>(
        &mut self,
        peers: impl IntoIterator<Item = usize>,
        elements: &[F],
    ) -> Result<(), NetworkError> {
        let packet = wire::encode_elements(elements);
        self.send_bytes_to_each(peers, packet).await
    }

    /// Send the same frame to every listed peer, concurrently.
    pub async fn send_bytes_to_each(
        &mut self,
        peers: impl IntoIterator<Item = usize>,
        packet: Bytes,
    ) -> Result<(), NetworkError> {
        let me = self.index;
        let wanted: Vec<usize> = peers.into_iter().collect();
        for &id in &wanted {
            self.traffic[id].sent += packet.len() as u64;
        }
        let outgoing = self
            .connections
            .iter_mut()
            .enumerate()
            .filter(|(index, _)| {
                let id = if *index < me { *index } else { *index + 1 };
                wanted.contains(&id)
            })
            .map(|(index, conn)| {
                let id = if index < me { index } else { index + 1 } as u32;
                conn.send_bytes(packet.clone())
                    .map_err(move |source| NetworkError::Outgoing { id, source })
            });
        future::try_join_all(outgoing).await?;
        Ok(())
    }

    /// Broadcast a bincode message to all other parties.
    pub async fn broadcast<T: serde::Serialize + Sync>(
        &mut self,
        msg: &T,
    ) -> Result<(), NetworkError> {
        let packet: Bytes = bincode::serialize(msg)
            .expect("serialization of protocol messages does not fail")
            .into();
        let peers: Vec<usize> = (0..self.size()).filter(|&id| id != self.index).collect();
        self.send_bytes_to_each(peers, packet).await
    }

    /// Broadcast a message and collect everyone's, ordered by id with our own
    /// in place. Sends and receives run concurrently.
    pub async fn symmetric_broadcast<T>(&mut self, msg: T) -> Result<Vec<T>, NetworkError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Sync,
    {
        let my_id = self.index;
        let packet: Bytes = bincode::serialize(&msg)
            .expect("serialization of protocol messages does not fail")
            .into();

        let (mut tx, mut rx): (Vec<_>, Vec<_>) = self
            .connections
            .iter_mut()
            .map(SplitChannel::split)
            .unzip();

        let outgoing = tx.iter_mut().enumerate().map(|(i, conn)| {
            let id = if i < my_id { i } else { i + 1 } as u32;
            conn.send_bytes(packet.clone())
                .map_err(move |source| NetworkError::Outgoing { id, source })
        });

        let incoming = rx.iter_mut().enumerate().map(|(i, conn)| {
            let id = if i < my_id { i } else { i + 1 };
            async move {
                let frame = conn
                    .recv_bytes()
                    .await
                    .map_err(|source| NetworkError::Incoming {
                        id: id as u32,
                        source,
                    })?;
                let msg: T =
                    bincode::deserialize(&frame).map_err(|e| NetworkError::Incoming {
                        id: id as u32,
                        source: ConnectionError::MalformedMessage(e),
                    })?;
                Ok::<_, NetworkError>((id, frame.len() as u64, msg))
            }
        });

        let (_, received) = futures::try_join!(
            future::try_join_all(outgoing),
            future::try_join_all(incoming)
        )?;

        let mut messages = Vec::with_capacity(received.len() + 1);
        for (id, frame_len, msg) in received {
            self.traffic[id].sent += packet.len() as u64;
            self.traffic[id].received += frame_len;
            messages.push(msg);
        }
        messages.insert(my_id, msg);
        Ok(messages)
    }

    /// Send message `i` to party `i` (our own entry stays local) and collect
    /// one message from everyone, ordered by id.
    pub async fn symmetric_unicast<T>(&mut self, mut msgs: Vec<T>) -> Result<Vec<T>, NetworkError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Sync,
    {
        let my_id = self.index;
        assert_eq!(msgs.len(), self.size(), "one message per party expected");
        let my_own = msgs.remove(my_id);

        let (mut tx, mut rx): (Vec<_>, Vec<_>) = self
            .connections
            .iter_mut()
            .map(SplitChannel::split)
            .unzip();

        let outgoing = tx
            .iter_mut()
            .zip(msgs.iter())
            .enumerate()
            .map(|(i, (conn, msg))| {
                let id = if i < my_id { i } else { i + 1 };
                let packet: Bytes = bincode::serialize(msg)
                    .expect("serialization of protocol messages does not fail")
                    .into();
                let sent = packet.len() as u64;
                async move {
                    conn.send_bytes(packet)
                        .await
                        .map_err(|source| NetworkError::Outgoing {
                            id: id as u32,
                            source,
                        })?;
                    Ok::<_, NetworkError>((id, sent))
                }
            });

        let incoming = rx.iter_mut().enumerate().map(|(i, conn)| {
            let id = if i < my_id { i } else { i + 1 };
            async move {
                let frame = conn
                    .recv_bytes()
                    .await
                    .map_err(|source| NetworkError::Incoming {
                        id: id as u32,
                        source,
                    })?;
                let msg: T =
                    bincode::deserialize(&frame).map_err(|e| NetworkError::Incoming {
                        id: id as u32,
                        source: ConnectionError::MalformedMessage(e),
                    })?;
                Ok::<_, NetworkError>((id, frame.len() as u64, msg))
            }
        });

        let (sent, received) = futures::try_join!(
            future::try_join_all(outgoing),
            future::try_join_all(incoming)
        )?;

        for (id, bytes) in sent {
            self.traffic[id].sent += bytes;
        }
        let mut messages = Vec::with_capacity(received.len() + 1);
        for (id, frame_len, msg) in received {
            self.traffic[id].received += frame_len;
            messages.push(msg);
        }
        messages.insert(my_id, my_own);
        Ok(messages)
    }

    /// Exchange per-peer frame sequences: send `outgoing[id]` to each peer and
    /// receive the same number of frames everyone sends us. `outgoing` must
    /// hold one (possibly empty) sequence per party; the entry at our own id
    /// is ignored. Returns the frames received, indexed by sender id.
    pub async fn exchange_frames(
        &mut self,
        outgoing: Vec<Vec<Bytes>>,
        frames_expected: usize,
    ) -> Result<Vec<Vec<Vec<u8>>>, NetworkError> {
        let my_id = self.index;
        assert_eq!(outgoing.len(), self.size(), "one frame list per party");

        let (mut tx, mut rx): (Vec<_>, Vec<_>) = self
            .connections
            .iter_mut()
            .map(SplitChannel::split)
            .unzip();

        let sends = tx.iter_mut().enumerate().map(|(i, conn)| {
            let id = if i < my_id { i } else { i + 1 };
            let frames = outgoing[id].clone();
            async move {
                for frame in frames {
                    conn.send_bytes(frame)
                        .await
                        .map_err(|source| NetworkError::Outgoing {
                            id: id as u32,
                            source,
                        })?;
                }
                Ok::<_, NetworkError>(())
            }
        });

        let receives = rx.iter_mut().enumerate().map(|(i, conn)| {
            let id = if i < my_id { i } else { i + 1 };
            async move {
                let mut frames = Vec::with_capacity(frames_expected);
                for _ in 0..frames_expected {
                    let frame =
                        conn.recv_bytes()
                            .await
                            .map_err(|source| NetworkError::Incoming {
                                id: id as u32,
                                source,
                            })?;
                    frames.push(frame.to_vec());
                }
                Ok::<_, NetworkError>((id, frames))
            }
        });

        let (_, received) = futures::try_join!(
            future::try_join_all(sends),
            future::try_join_all(receives)
        )?;

        for (id, frames) in outgoing.iter().enumerate() {
            if id != my_id {
                self.traffic[id].sent += frames.iter().map(|f| f.len() as u64).sum::<u64>();
            }
        }

        let mut by_sender: Vec<Vec<Vec<u8>>> = vec![Vec::new(); self.size()];
        for (id, frames) in received {
            self.traffic[id].received += frames.iter().map(|f| f.len() as u64).sum::<u64>();
            by_sender[id] = frames;
        }
        Ok(by_sender)
    }

    /// Per-peer payload bytes sent and received so far.
    pub fn communication_summary(&self) -> CommunicationSummary {
        CommunicationSummary {
            id: self.index,
            per_peer: self
                .traffic
                .iter()
                .map(|t| (t.sent, t.received))
                .collect(),
        }
    }
}

/// Per-peer traffic totals for observability.
#[derive(Debug, Clone)]
pub struct CommunicationSummary {
    pub id: usize,
    pub per_peer: Vec<(u64, u64)>,
}

impl fmt::Display for CommunicationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "communication summary for {}:", self.id)?;
        for (peer, (sent, received)) in self.per_peer.iter().enumerate() {
            if peer == self.id || (*sent == 0 && *received == 0) {
                continue;
            }
            writeln!(f, "  peer {peer}: sent {sent} / received {received} bytes")?;
        }
        Ok(())
    }
}

/// Network of in-memory duplex connections, used for local testing.
pub type InMemoryNetwork = Network<DuplexConnection>;

impl InMemoryNetwork {
    /// Construct one fully connected network per party.
    pub fn in_memory(player_count: usize) -> Vec<Self> {
        let mut internet = std::collections::BTreeMap::new();
        for i in 0..player_count {
            for j in 0..i {
                let (c1, c2) = Connection::in_memory();
                internet.insert((i, j), c1);
                internet.insert((j, i), c2);
            }
        }

        let mut networks = Vec::new();
        for i in 0..player_count {
            let connections = (0..player_count)
                .filter(|j| *j != i)
                .map(|j| internet.remove(&(i, j)).expect("pair inserted above"))
                .collect();
            networks.push(Network::new(connections, i));
        }
        networks
    }
}

/// Network of TCP connections between the configured parties.
pub type TcpNetwork = Network<TcpConnection>;

impl TcpNetwork {
    /// Connect to all peers using the deterministic port scheme: for each
    /// pair the lower-id party listens on `base_port + low * n + high` and
    /// the higher-id party connects, retrying until the listener is up.
    #[tracing::instrument(skip(config), fields(id = config.id, n = config.parties))]
    pub async fn connect(config: &SessionConfig) -> Result<Self, NetworkError> {
        let n = config.parties;
        let me = config.id;

        let mut tasks = Vec::new();
        for peer in (0..n).filter(|&peer| peer != me) {
            let task = if peer > me {
                // We are the listener for this pair.
                let port = config.pair_port(me, peer);
                let host = config.hosts[me];
                tokio::task::spawn(async move {
                    (peer, accept_one(SocketAddr::new(host, port)).await)
                })
            } else {
                let port = config.pair_port(peer, me);
                let addr = SocketAddr::new(config.hosts[peer], port);
                tokio::task::spawn(async move { (peer, connect_with_retry(addr).await) })
            };
            tasks.push(task);
        }

        let mut streams: Vec<(usize, TcpStream)> = Vec::with_capacity(n - 1);
        for task in tasks {
            let (peer, result) = task.await.expect("connect task does not panic");
            let stream = result.map_err(|e| NetworkError::Outgoing {
                id: peer as u32,
                source: ConnectionError::Io(e),
            })?;
            streams.push((peer, stream));
        }
        streams.sort_by_key(|(peer, _)| *peer);

        let connections = streams
            .into_iter()
            .map(|(_, stream)| Connection::from_tcp_stream(stream))
            .collect();

        tracing::info!("connected to all {} peers", n - 1);
        Ok(Network::new(connections, me))
    }

    pub async fn shutdown(self) -> Result<(), std::io::Error> {
        let results =
            future::join_all(self.connections.into_iter().map(|conn| conn.shutdown())).await;
        results.into_iter().collect()
    }
}

use tokio::net::{TcpSocket, TcpStream};

async fn accept_one(addr: SocketAddr) -> Result<TcpStream, std::io::Error> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(1)?;
    let (stream, _) = listener.accept().await?;
    Ok(stream)
}

async fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream, std::io::Error> {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(_) => tokio::time::sleep(CONNECT_RETRY).await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn broadcast_and_receive() {
        let players = Network::in_memory(4);
        let mut tasks = Vec::new();
        for mut network in players {
            tasks.push(tokio::spawn(async move {
                let posts = network.symmetric_broadcast(network.id()).await.unwrap();
                assert_eq!(posts, vec![0, 1, 2, 3]);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn unicasting() {
        const N: usize = 4;
        let players = Network::in_memory(N);
        let mut tasks = Vec::new();
        for mut network in players {
            tasks.push(tokio::spawn(async move {
                // Send each party its own id; expect our id back from all.
                let msgs: Vec<usize> = (0..N).collect();
                let posts = network.symmetric_unicast(msgs).await.unwrap();
                assert_eq!(posts, vec![network.id(); N]);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn typed_element_traffic() {
        use crate::algebra::Mersenne61;

        let mut players = Network::in_memory(2);
        let mut p1 = players.remove(1);
        let mut p0 = players.remove(0);

        let h0 = tokio::spawn(async move {
            let xs: Vec<Mersenne61> = (0..7u64).map(Mersenne61::from).collect();
            p0.send_elements_to(1, &xs).await.unwrap();
            let summary = p0.communication_summary();
            assert_eq!(summary.per_peer[1].0, 4 + 7 * 8);
        });
        let h1 = tokio::spawn(async move {
            let xs: Vec<Mersenne61> = p1.recv_elements_from(0, 7).await.unwrap();
            assert_eq!(xs[3], Mersenne61::from(3u64));
        });
        h0.await.unwrap();
        h1.await.unwrap();
    }
}

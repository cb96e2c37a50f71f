//! Tools for exercising the protocols with an in-process set of parties.

use std::future::Future;

use tokio::task::JoinError;

use crate::net::InMemoryNetwork;

/// A fully-connected set of in-memory parties.
///
/// Every party runs the provided program concurrently on its own network;
/// outputs come back ordered by party id.
pub struct Cluster {
    players: Vec<InMemoryNetwork>,
}

impl Cluster {
    pub fn new(size: usize) -> Self {
        Self {
            players: InMemoryNetwork::in_memory(size),
        }
    }

    pub async fn run<T, P, F>(self, program: P) -> Result<Vec<T>, JoinError>
    where
        T: Send + 'static,
        P: Fn(InMemoryNetwork) -> F,
        F: Future<Output = T> + Send + 'static,
    {
        let tasks: Vec<_> = self
            .players
            .into_iter()
            .map(|network| tokio::spawn(program(network)))
            .collect();
        futures::future::join_all(tasks).await.into_iter().collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn everyone_hears_everyone() {
        let outputs = Cluster::new(5)
            .run(|mut network| async move {
                let posts = network.symmetric_broadcast(network.id()).await.unwrap();
                posts.into_iter().sum::<usize>()
            })
            .await
            .unwrap();
        assert_eq!(outputs, vec![10; 5]);
    }
}

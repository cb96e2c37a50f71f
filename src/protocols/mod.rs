//! The interactive protocols of a session: secret injection, one-round
//! multiplication through the designated reconstructor, and the batched
//! transcript check run once at the end of a circuit.

pub mod check;
pub mod coin;
pub mod input;
pub mod mult;

use thiserror::Error;

use crate::net::NetworkError;
use crate::sharing::SharingError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Sharing(#[from] SharingError),
    #[error("nothing was prepared for this run")]
    NothingPrepared,
    #[error("peer {peer} sent {got} values where {expected} were expected")]
    UnexpectedCount {
        peer: usize,
        expected: usize,
        got: usize,
    },
    #[error("transcript verification failed: {0}")]
    Verification(&'static str),
}

//! Session parameters shared by every party. All configuration is explicit;
//! nothing is read from global state.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use thiserror::Error;

pub const DEFAULT_BASE_PORT: u16 = 9876;
pub const MIN_PARTIES: usize = 4;
pub const MAX_PARTIES: usize = 16;

/// Ports below this are reserved.
const MIN_PORT: u16 = 1025;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("number of parties must be between {MIN_PARTIES} and {MAX_PARTIES}, got {0}")]
    PartyCount(usize),
    #[error("party id {id} out of range for {n} parties")]
    IdOutOfRange { id: usize, n: usize },
    #[error("base port {0} outside the allowed range")]
    InvalidPort(u16),
    #[error("could not read connection file: {0}")]
    ConnectionFile(#[from] std::io::Error),
    #[error("invalid host entry in connection file: {0}")]
    InvalidHost(String),
    #[error("connection file lists {got} hosts, expected {expected}")]
    HostCount { expected: usize, got: usize },
}

/// Parameters of one MPC session.
///
/// The privacy threshold is always derived as `t = (n - 1) / 3`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub parties: usize,
    pub id: usize,
    pub base_port: u16,
    pub hosts: Vec<IpAddr>,
}

impl SessionConfig {
    pub fn new(
        parties: usize,
        id: usize,
        base_port: u16,
        hosts: Vec<IpAddr>,
    ) -> Result<Self, ConfigError> {
        if !(MIN_PARTIES..=MAX_PARTIES).contains(&parties) {
            return Err(ConfigError::PartyCount(parties));
        }
        if id >= parties {
            return Err(ConfigError::IdOutOfRange { id, n: parties });
        }
        if base_port < MIN_PORT || u32::from(base_port) + (parties * parties) as u32 > 65535 {
            return Err(ConfigError::InvalidPort(base_port));
        }
        if hosts.len() != parties {
            return Err(ConfigError::HostCount {
                expected: parties,
                got: hosts.len(),
            });
        }
        Ok(Self {
            parties,
            id,
            base_port,
            hosts,
        })
    }

    /// All parties on loopback; used by tests and local benchmarks.
    pub fn all_local(parties: usize, id: usize, base_port: u16) -> Result<Self, ConfigError> {
        let hosts = vec![IpAddr::V4(Ipv4Addr::LOCALHOST); parties];
        Self::new(parties, id, base_port, hosts)
    }

    /// Read peer hosts from a file with one address per line.
    pub fn from_connection_file(
        path: impl AsRef<Path>,
        id: usize,
        base_port: u16,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let hosts: Vec<IpAddr> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse()
                    .map_err(|_| ConfigError::InvalidHost(line.to_string()))
            })
            .collect::<Result<_, _>>()?;
        let parties = hosts.len();
        Self::new(parties, id, base_port, hosts)
    }

    /// Privacy threshold tolerated by the session.
    pub fn threshold(&self) -> usize {
        (self.parties - 1) / 3
    }

    /// Port the lower-id party of a pair listens on for the higher-id party.
    pub fn pair_port(&self, listener: usize, dialer: usize) -> u16 {
        debug_assert!(listener < dialer);
        self.base_port + (listener * self.parties + dialer) as u16
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn derives_the_threshold() {
        for (n, t) in [(4, 1), (7, 2), (10, 3), (13, 4), (16, 5)] {
            let config = SessionConfig::all_local(n, 0, DEFAULT_BASE_PORT).unwrap();
            assert_eq!(config.threshold(), t);
        }
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SessionConfig::all_local(3, 0, DEFAULT_BASE_PORT).is_err());
        assert!(SessionConfig::all_local(17, 0, DEFAULT_BASE_PORT).is_err());
        assert!(SessionConfig::all_local(4, 4, DEFAULT_BASE_PORT).is_err());
        assert!(SessionConfig::all_local(4, 0, 80).is_err());
        assert!(SessionConfig::all_local(16, 0, 65500).is_err());
    }

    #[test]
    fn reads_a_connection_file() {
        let path = std::env::temp_dir().join("repshare-connection-file-test");
        std::fs::write(&path, "127.0.0.1\n127.0.0.1\n10.0.0.7\n127.0.0.1\n").unwrap();
        let config = SessionConfig::from_connection_file(&path, 2, DEFAULT_BASE_PORT).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.parties, 4);
        assert_eq!(config.hosts[2], "10.0.0.7".parse::<std::net::IpAddr>().unwrap());
    }

    #[test]
    fn pair_ports_are_unique() {
        let config = SessionConfig::all_local(7, 0, DEFAULT_BASE_PORT).unwrap();
        let mut seen = std::collections::BTreeSet::new();
        for low in 0..7 {
            for high in low + 1..7 {
                assert!(seen.insert(config.pair_port(low, high)));
            }
        }
    }
}

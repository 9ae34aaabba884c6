//! Static configuration of a party: peer addresses, the PRF key, transport tuning and the
//! network shape.
use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{fcnn::NetworkShape, prf::SessionKey, share::PartyId};

/// The first port of the default address table.
pub const DEFAULT_BASE_PORT: u16 = 5551;

/// The first port used by [`Config::with_process_ports`].
pub const PROCESS_BASE_PORT: u16 = 5556;

/// An invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Two parties were given the same address.
    #[error("parties {0} and {1} share the address {2}")]
    DuplicateAddress(PartyId, PartyId, SocketAddr),
    /// Batches must hold at least one message.
    #[error("batch size must be positive")]
    ZeroBatchSize,
    /// The worker pool needs at least one worker.
    #[error("parallelism must be positive")]
    ZeroParallelism,
    /// A layer of the network has no neurons.
    #[error("all layer dimensions must be positive")]
    EmptyLayer,
}

/// The configuration shared by all five parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The listening address of every party, in party order.
    pub parties: [SocketAddr; 5],
    /// The pre-shared PRF key.
    pub prf_key: SessionKey,
    /// Maximum number of messages coalesced into one frame.
    pub batch_size: usize,
    /// How long a sender waits for more messages before flushing a partial batch.
    pub batch_linger_ms: u64,
    /// Delay between two connection attempts to a peer.
    pub connect_retry_ms: u64,
    /// Number of connection attempts before a peer is considered unreachable.
    pub connect_attempts: u32,
    /// Number of neuron tasks of one image running concurrently. Every image evaluated at the
    /// same time gets its own pool of this size.
    pub parallelism: usize,
    /// The dimensions of the evaluated network.
    pub shape: NetworkShape,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parties: addresses(DEFAULT_BASE_PORT),
            prf_key: SessionKey::default(),
            batch_size: 50,
            batch_linger_ms: 0,
            connect_retry_ms: 100,
            connect_attempts: 300,
            parallelism: 8,
            shape: NetworkShape::default(),
        }
    }
}

fn addresses(base_port: u16) -> [SocketAddr; 5] {
    std::array::from_fn(|i| SocketAddr::from((Ipv4Addr::LOCALHOST, base_port + i as u16)))
}

impl Config {
    /// Replaces the address table by five consecutive localhost ports.
    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.parties = addresses(base_port);
        self
    }

    /// Moves the parties to the port block of the `process`-th group on one host.
    ///
    /// Each group uses its own block of five ports, so several groups can run side by side.
    pub fn with_process_ports(self, process: u16) -> Self {
        self.with_base_port(PROCESS_BASE_PORT + 5 * process)
    }

    /// The address of `party`.
    pub fn address(&self, party: PartyId) -> SocketAddr {
        self.parties[party.index()]
    }

    /// The linger time of partial batches.
    pub fn batch_linger(&self) -> Duration {
        Duration::from_millis(self.batch_linger_ms)
    }

    /// The delay between connection attempts.
    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for a in PartyId::ALL {
            for b in PartyId::ALL.into_iter().filter(|b| *b > a) {
                if self.address(a) == self.address(b) {
                    return Err(ConfigError::DuplicateAddress(a, b, self.address(a)));
                }
            }
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.parallelism == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        if self.shape.dimensions().contains(&0) {
            return Err(ConfigError::EmptyLayer);
        }
        Ok(())
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// RPC protocol dialect a request is issued with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// The ledger's own RPC namespace (`hmy`).
    #[default]
    #[serde(rename = "hmy", alias = "native")]
    Native,
    /// Ethereum-compatible namespace (`eth`).
    #[serde(rename = "eth")]
    Eth,
}

impl Dialect {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Native => "hmy",
            Self::Eth => "eth",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Named chain identifier used when signing transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChainId {
    pub name: &'static str,
    pub value: u64,
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.value)
    }
}

/// Chain identifier for native-dialect signing on `network`.
///
/// Unknown networks fall back to mainnet.
#[must_use]
pub fn native_chain_id(network: &str) -> ChainId {
    let (name, value) = match normalize(network).as_str() {
        "testnet" | "localnet" => ("testnet", 2),
        "pangaea" => ("pangaea", 3),
        "partner" | "devnet" => ("partner", 4),
        "stressnet" => ("stressnet", 5),
        _ => ("mainnet", 1),
    };
    ChainId { name, value }
}

/// Ethereum-compatible chain identifier for `shard` on `network`.
///
/// The identifier is the network's base value plus the shard number. Unknown
/// networks, and `dryrun`, use the mainnet base.
#[must_use]
pub fn eth_chain_id(network: &str, shard: u32) -> ChainId {
    let (name, base) = match normalize(network).as_str() {
        "testnet" | "localnet" => ("eth_testnet", 1_666_700_000),
        "pangaea" => ("eth_pangaea", 1_666_800_000),
        "partner" | "devnet" => ("eth_partner", 1_666_900_000),
        "stressnet" => ("eth_stressnet", 1_661_000_000),
        _ => ("eth_mainnet", 1_666_600_000),
    };
    ChainId {
        name,
        value: base + u64::from(shard),
    }
}

fn normalize(network: &str) -> String {
    network.trim().to_ascii_lowercase()
}

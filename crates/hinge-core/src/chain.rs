use serde::{Deserialize, Serialize};
use std::fmt;

/// Blockchain family. Determines the provider shape an adapter exposes and
/// whether the provider can move between networks on request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainFamily {
    /// Account-based EVM chains (`eip155:<n>`).
    Evm,
    /// Solana clusters (`solana:<cluster>`).
    Solana,
    /// Privacy-oriented chain with a single network per wallet.
    Privacy,
}

impl ChainFamily {
    /// Whether a connected provider can be asked to change network in place.
    pub fn supports_switching(self) -> bool {
        matches!(self, Self::Evm | Self::Solana)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Solana => "solana",
            Self::Privacy => "privacy",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CAIP-2 style chain identifier, e.g. `eip155:1` or `solana:mainnet`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric reference of an `eip155:<n>` id.
    pub fn evm_number(&self) -> Option<u64> {
        self.0.strip_prefix("eip155:")?.parse().ok()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chain {
    pub id: ChainId,
    pub family: ChainFamily,
    pub name: String,
}

impl Chain {
    pub fn new(id: impl Into<String>, family: ChainFamily, name: impl Into<String>) -> Self {
        Self {
            id: ChainId::new(id),
            family,
            name: name.into(),
        }
    }

    pub fn evm(chain_number: u64, name: impl Into<String>) -> Self {
        Self::new(format!("eip155:{chain_number}"), ChainFamily::Evm, name)
    }

    pub fn solana(cluster: &str, name: impl Into<String>) -> Self {
        Self::new(format!("solana:{cluster}"), ChainFamily::Solana, name)
    }

    pub fn privacy(network: &str, name: impl Into<String>) -> Self {
        Self::new(format!("privacy:{network}"), ChainFamily::Privacy, name)
    }

    /// `0x`-prefixed hex chain id used by EVM switch/add requests.
    pub fn evm_hex_id(&self) -> Option<String> {
        if self.family != ChainFamily::Evm {
            return None;
        }
        self.id.evm_number().map(|n| format!("{n:#x}"))
    }
}

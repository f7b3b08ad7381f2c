use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Derivation of keys from the node's BIP-32 root
pub mod derive;

pub use derive::{
    base_key, derive_key_from_base, derive_key_lnd, derive_path, node_identity_key, parse_path,
    ExtendedKey,
};

/// The families of keys an lnd node derives, the third (hardened) element of its key path.
///
/// NOTE - the discriminants are lnd's on-disk identifiers and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum KeyFamily {
    /// Channel funding (2-of-2 multisig) keys
    MultiSig = 0,
    /// Revocation basepoints
    RevocationBase = 1,
    /// HTLC basepoints
    HtlcBase = 2,
    /// Payment basepoints
    PaymentBase = 3,
    /// Delayed payment basepoints
    DelayBase = 4,
    /// Roots of the per-channel revocation chains
    RevocationRoot = 5,
    /// The node identity key
    NodeKey = 6,
    /// Static channel backup encryption keys
    StaticBackup = 7,
    /// Watchtower session keys
    TowerSession = 8,
    /// Watchtower identity keys
    TowerId = 9,
}

impl KeyFamily {
    /// All families, in discriminant order
    pub const ALL: [KeyFamily; 10] = [
        KeyFamily::MultiSig,
        KeyFamily::RevocationBase,
        KeyFamily::HtlcBase,
        KeyFamily::PaymentBase,
        KeyFamily::DelayBase,
        KeyFamily::RevocationRoot,
        KeyFamily::NodeKey,
        KeyFamily::StaticBackup,
        KeyFamily::TowerSession,
        KeyFamily::TowerId,
    ];
}

impl TryFrom<u32> for KeyFamily {
    type Error = String;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        KeyFamily::ALL
            .iter()
            .find(|f| **f as u32 == v)
            .copied()
            .ok_or_else(|| format!("unknown key family {}", v))
    }
}

impl From<KeyFamily> for u32 {
    fn from(f: KeyFamily) -> u32 {
        f as u32
    }
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(match *self {
            KeyFamily::MultiSig => "multisig",
            KeyFamily::RevocationBase => "revocation-base",
            KeyFamily::HtlcBase => "htlc-base",
            KeyFamily::PaymentBase => "payment-base",
            KeyFamily::DelayBase => "delay-base",
            KeyFamily::RevocationRoot => "revocation-root",
            KeyFamily::NodeKey => "node-key",
            KeyFamily::StaticBackup => "static-backup",
            KeyFamily::TowerSession => "tower-session",
            KeyFamily::TowerId => "tower-id",
        })
    }
}

impl FromStr for KeyFamily {
    type Err = String;
    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(v) = s.parse::<u32>() {
            return KeyFamily::try_from(v);
        }
        KeyFamily::ALL
            .iter()
            .find(|f| f.to_string() == s)
            .copied()
            .ok_or_else(|| format!("unknown key family {}", s))
    }
}

/// Identifies a key by family and index under the node's base key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyLocator {
    /// The key family
    #[serde(rename = "key_family")]
    pub family: KeyFamily,
    /// The index within the family
    #[serde(rename = "key_index")]
    pub index: u32,
}

impl KeyLocator {
    /// Create a locator
    pub fn new(family: KeyFamily, index: u32) -> Self {
        Self { family, index }
    }
}

impl fmt::Display for KeyLocator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.index)
    }
}

use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Network, NetworkKind};

/// Network parameters and the secp256k1 context.
///
/// Every core operation takes this explicitly, so that independent recoveries
/// on different networks can run side by side (e.g. in tests).
#[derive(Clone, Debug)]
pub struct RecoveryContext {
    /// The network the keys and addresses belong to
    pub network: Network,
    /// Signing and verification context
    pub secp_ctx: Secp256k1<All>,
}

impl RecoveryContext {
    /// Create a context for a network
    pub fn new(network: Network) -> Self {
        Self { network, secp_ctx: Secp256k1::new() }
    }

    /// The BIP-44 coin type used in the second level of the node's key path
    pub fn coin_type(&self) -> u32 {
        match NetworkKind::from(self.network) {
            NetworkKind::Main => 0,
            NetworkKind::Test => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_type_test() {
        assert_eq!(RecoveryContext::new(Network::Bitcoin).coin_type(), 0);
        assert_eq!(RecoveryContext::new(Network::Testnet).coin_type(), 1);
        assert_eq!(RecoveryContext::new(Network::Signet).coin_type(), 1);
        assert_eq!(RecoveryContext::new(Network::Regtest).coin_type(), 1);
    }
}

use lightning_rescue::bitcoin::Network;
use std::str::FromStr;

/// Network names
pub const NETWORK_NAMES: [&'static str; 4] = ["bitcoin", "testnet", "signet", "regtest"];

/// Name of the binary, used in log lines
pub const APP_NAME: &str = "lnrescue";

/// Parse one of [`NETWORK_NAMES`]
pub fn parse_network(name: &str) -> Result<Network, String> {
    if !NETWORK_NAMES.contains(&name) {
        let expected = NETWORK_NAMES.join(", ");
        return Err(format!("unknown network {}, expected one of {}", name, expected));
    }
    Network::from_str(name).map_err(|e| format!("network {}: {}", name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_network_test() {
        assert_eq!(parse_network("bitcoin").unwrap(), Network::Bitcoin);
        assert_eq!(parse_network("regtest").unwrap(), Network::Regtest);
        assert!(parse_network("mainnet").is_err());
        for name in NETWORK_NAMES {
            assert!(parse_network(name).is_ok());
        }
    }
}

#![crate_name = "explorer_client"]

//! Block explorer access for the recovery tools: resolve the outputs to
//! sweep, fetch transactions and publish the sweep.

#![forbid(unsafe_code)]
#![allow(bare_trait_objects)]
#![warn(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

/// Esplora REST client
pub mod esplora_client;

pub use self::esplora_client::{default_api_url, EsploraClient};

use async_trait::async_trait;
use core::fmt;
use lightning_rescue::bitcoin::{Address, Amount, OutPoint, Transaction, Txid};
use std::fmt::{Display, Formatter};

/// Explorer errors
#[derive(Debug)]
pub enum Error {
    /// Transport error
    Http(reqwest::Error),
    /// The explorer rejected the request
    Esplora(String),
    /// JSON Error
    Json(serde_json::Error),
    /// A response could not be decoded
    Decode(String),
    /// The requested object does not exist
    NotFound(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "http: {}", e),
            Error::Esplora(s) => write!(f, "explorer: {}", s),
            Error::Json(e) => write!(f, "json: {}", e),
            Error::Decode(s) => write!(f, "decode: {}", s),
            Error::NotFound(s) => write!(f, "not found: {}", s),
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Error {
        Error::Http(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Json(e)
    }
}

/// An unspent output of an address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Utxo {
    /// The output
    pub outpoint: OutPoint,
    /// Its value
    pub value: Amount,
    /// Whether its transaction is confirmed
    pub confirmed: bool,
}

/// The chain data the recovery procedures consume.
///
/// Errors are returned to the operator as-is, nothing is retried.
#[async_trait]
pub trait Explorer: Send + Sync {
    /// All unspent outputs of an address
    async fn utxos(&self, address: &Address) -> Result<Vec<Utxo>, Error>;

    /// The single unspent output of an address
    async fn resolve_outpoint(&self, address: &Address) -> Result<Utxo, Error> {
        single_utxo(address, self.utxos(address).await?)
    }

    /// A transaction by id
    async fn fetch_transaction(&self, txid: &Txid) -> Result<Transaction, Error>;

    /// Whether an output has been spent
    async fn output_spent(&self, outpoint: &OutPoint) -> Result<bool, Error>;

    /// Publish a raw transaction, returning its id
    async fn publish(&self, tx_hex: &str) -> Result<Txid, Error>;
}

/// Pick the only output of an address, failing when there is none or the
/// choice would be ambiguous
pub fn single_utxo(address: &Address, utxos: Vec<Utxo>) -> Result<Utxo, Error> {
    match utxos.as_slice() {
        [] => Err(Error::NotFound(format!("no unspent output for {}", address))),
        [utxo] => Ok(*utxo),
        _ => Err(Error::Esplora(format!(
            "{} has {} unspent outputs: {}",
            address,
            utxos.len(),
            utxos.iter().map(|u| u.outpoint.to_string()).collect::<Vec<_>>().join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightning_rescue::bitcoin::hashes::Hash;
    use lightning_rescue::bitcoin::Network;
    use std::str::FromStr;

    fn address() -> Address {
        Address::from_str("bcrt1qf9zv4qtxh27c954rhlzg4tx58xh0vgssuu0csrlep0jdnvlx9xesmcl5qx")
            .unwrap()
            .require_network(Network::Regtest)
            .unwrap()
    }

    fn utxo(n: u8) -> Utxo {
        Utxo {
            outpoint: OutPoint { txid: Txid::from_byte_array([n; 32]), vout: n as u32 },
            value: Amount::from_sat(1000 * n as u64),
            confirmed: true,
        }
    }

    #[test]
    fn single_utxo_test() {
        assert_eq!(single_utxo(&address(), vec![utxo(1)]).unwrap(), utxo(1));
        assert!(matches!(single_utxo(&address(), vec![]), Err(Error::NotFound(_))));
        let err = single_utxo(&address(), vec![utxo(1), utxo(2)]).unwrap_err();
        assert!(err.to_string().contains("2 unspent outputs"));
    }
}

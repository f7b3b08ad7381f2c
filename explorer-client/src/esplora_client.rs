use crate::{Error, Explorer, Utxo};
use async_trait::async_trait;
use lightning_rescue::bitcoin::consensus::encode::deserialize_hex;
use lightning_rescue::bitcoin::{Address, Amount, Network, OutPoint, Transaction, Txid};
use log::{debug, info};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use url::Url;

/// The API used when none is configured
pub fn default_api_url(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "https://blockstream.info/api",
        Network::Testnet => "https://blockstream.info/testnet/api",
        Network::Signet => "https://mempool.space/signet/api",
        Network::Regtest => "http://127.0.0.1:3002",
        _ => "https://mempool.space/testnet4/api",
    }
}

/// Async client for the Esplora REST API
#[derive(Clone, Debug)]
pub struct EsploraClient {
    client: Client,
    url: Url,
}

impl EsploraClient {
    /// Create a new EsploraClient
    pub fn new(url: Url) -> Result<Self, Error> {
        let client = Client::builder().build()?;
        Ok(Self { client, url })
    }

    /// The API base URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url.as_str().trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn check(res: Response) -> Result<Response, Error> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let url = res.url().to_string();
        let body = res.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("{}: {}", url, body.trim())));
        }
        Err(Error::Esplora(format!("server error: {} {}", status, body.trim())))
    }

    /// GET a JSON resource
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.endpoint(path);
        debug!("GET {}", url);
        let res = Self::check(self.client.get(&url).send().await?).await?;
        let text = res.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn get_text(&self, path: &str) -> Result<String, Error> {
        let url = self.endpoint(path);
        debug!("GET {}", url);
        let res = Self::check(self.client.get(&url).send().await?).await?;
        Ok(res.text().await?)
    }

    async fn post_returning_body(&self, path: &str, body: String) -> Result<String, Error> {
        let url = self.endpoint(path);
        debug!("POST {}", url);
        let res = Self::check(self.client.post(&url).body(body).send().await?).await?;
        Ok(res.text().await?)
    }
}

#[derive(serde::Deserialize, Debug, Clone)]
struct StatusResponse {
    confirmed: bool,
}

#[derive(serde::Deserialize, Debug, Clone)]
struct UtxoResponse {
    txid: Txid,
    vout: u32,
    value: u64,
    status: StatusResponse,
}

impl From<UtxoResponse> for Utxo {
    fn from(res: UtxoResponse) -> Self {
        Utxo {
            outpoint: OutPoint { txid: res.txid, vout: res.vout },
            value: Amount::from_sat(res.value),
            confirmed: res.status.confirmed,
        }
    }
}

#[derive(serde::Deserialize, Debug)]
struct OutspendResponse {
    spent: bool,
}

fn decode_transaction(txid: &Txid, hex: &str) -> Result<Transaction, Error> {
    let tx: Transaction =
        deserialize_hex(hex.trim()).map_err(|e| Error::Decode(format!("tx {}: {}", txid, e)))?;
    if tx.compute_txid() != *txid {
        return Err(Error::Decode(format!("explorer returned {} for {}", tx.compute_txid(), txid)));
    }
    Ok(tx)
}

#[async_trait]
impl Explorer for EsploraClient {
    async fn utxos(&self, address: &Address) -> Result<Vec<Utxo>, Error> {
        let utxos: Vec<UtxoResponse> = self.get(&format!("address/{}/utxo", address)).await?;
        Ok(utxos.into_iter().map(Utxo::from).collect())
    }

    async fn fetch_transaction(&self, txid: &Txid) -> Result<Transaction, Error> {
        let hex = self.get_text(&format!("tx/{}/hex", txid)).await?;
        decode_transaction(txid, &hex)
    }

    async fn output_spent(&self, outpoint: &OutPoint) -> Result<bool, Error> {
        let res: OutspendResponse =
            self.get(&format!("tx/{}/outspend/{}", outpoint.txid, outpoint.vout)).await?;
        Ok(res.spent)
    }

    async fn publish(&self, tx_hex: &str) -> Result<Txid, Error> {
        let body = self.post_returning_body("tx", tx_hex.trim().to_string()).await?;
        let txid = Txid::from_str(body.trim())
            .map_err(|e| Error::Decode(format!("broadcast response {}: {}", body.trim(), e)))?;
        info!("broadcasted txid: {}", txid);
        Ok(txid)
    }
}

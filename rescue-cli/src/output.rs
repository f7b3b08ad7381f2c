use anyhow::{Context, Result};
use lightning_rescue::bitcoin::consensus::encode::serialize_hex;
use lightning_rescue::matcher::SpendPath;
use lightning_rescue::recovery::Sweep;
use lightning_rescue::util::transaction_utils::weight_to_vsize;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// How results are rendered
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain lines, raw transaction hex for sweeps
    Text,
    /// A JSON object
    Json,
}

/// One swept input
#[derive(Serialize, Debug)]
pub struct InputReport {
    pub outpoint: String,
    pub value_sat: u64,
    pub key_family: u32,
    pub key_index: u32,
    pub commitment_point: String,
    pub csv: u16,
    pub spend: String,
}

/// A target left out of the sweep
#[derive(Serialize, Debug)]
pub struct SkippedReport {
    pub outpoint: String,
    pub reason: String,
}

/// Result of the sweep commands
#[derive(Serialize, Debug)]
pub struct SweepReport {
    pub txid: String,
    pub tx_hex: String,
    pub fee_sat: u64,
    pub vsize: u64,
    pub inputs: Vec<InputReport>,
    pub skipped: Vec<SkippedReport>,
    pub published: bool,
}

impl SweepReport {
    pub fn new(sweep: &Sweep, published: bool) -> Self {
        let inputs = sweep
            .inputs
            .iter()
            .map(|input| InputReport {
                outpoint: input.outpoint.to_string(),
                value_sat: input.value.to_sat(),
                key_family: input.key_locator.family.into(),
                key_index: input.key_locator.index,
                commitment_point: input.commitment_point.to_string(),
                csv: input.script_match.csv,
                spend: match &input.script_match.spend {
                    SpendPath::Wsh { .. } => "p2wsh".to_string(),
                    SpendPath::TapScript { strategy, .. } => format!("tapscript {}", strategy),
                },
            })
            .collect();
        let skipped = sweep
            .skipped
            .iter()
            .map(|(outpoint, e)| SkippedReport {
                outpoint: outpoint.to_string(),
                reason: e.to_string(),
            })
            .collect();
        SweepReport {
            txid: sweep.sweep.tx.compute_txid().to_string(),
            tx_hex: serialize_hex(&sweep.sweep.tx),
            fee_sat: sweep.sweep.fee.to_sat(),
            vsize: weight_to_vsize(sweep.sweep.weight),
            inputs,
            skipped,
            published,
        }
    }
}

/// Result of `derive-key`
#[derive(Serialize, Debug)]
pub struct DeriveKeyReport {
    pub path: String,
    pub extended_key: String,
    pub public_key: String,
    pub private_key: Option<String>,
}

/// Result of `show-root-key`
#[derive(Serialize, Debug)]
pub struct RootKeyReport {
    pub root_key: String,
    pub node_id: String,
}

/// Result of `vanity-gen`
#[derive(Serialize, Debug)]
pub struct VanityReport {
    pub seed: String,
    pub node_id: String,
    pub attempts: u64,
}

/// A command's result
#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum Report {
    Sweep(SweepReport),
    DeriveKey(DeriveKeyReport),
    RootKey(RootKeyReport),
    Vanity(VanityReport),
}

impl Report {
    /// Render in the given format
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Text => Ok(self.to_text()),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Report::Sweep(r) => r.tx_hex.clone(),
            Report::DeriveKey(r) => {
                let mut lines = vec![
                    format!("path: {}", r.path),
                    format!("extended key: {}", r.extended_key),
                    format!("public key: {}", r.public_key),
                ];
                if let Some(private_key) = &r.private_key {
                    lines.push(format!("private key: {}", private_key));
                }
                lines.join("\n")
            }
            Report::RootKey(r) => format!("root key: {}\nnode id: {}", r.root_key, r.node_id),
            Report::Vanity(r) => format!(
                "seed: {}\nnode id: {}\nattempts: {}",
                r.seed, r.node_id, r.attempts
            ),
        }
    }

    /// Print to stdout, and to `results_file` if given
    pub fn emit(&self, format: OutputFormat, results_file: Option<&Path>) -> Result<()> {
        let rendered = self.render(format)?;
        println!("{}", rendered);
        if let Some(path) = results_file {
            fs::write(path, format!("{}\n", rendered))
                .with_context(|| format!("writing results to {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_key_report() -> Report {
        let root_key = "tprv8Z".to_string();
        Report::RootKey(RootKeyReport { root_key, node_id: "02ab".to_string() })
    }

    #[test]
    fn render_test() {
        let report = root_key_report();
        assert_eq!(report.render(OutputFormat::Text).unwrap(), "root key: tprv8Z\nnode id: 02ab");
        let json: serde_json::Value =
            serde_json::from_str(&report.render(OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["node_id"], "02ab");

        let report = Report::DeriveKey(DeriveKeyReport {
            path: "m/1017'/1'".to_string(),
            extended_key: "tpub".to_string(),
            public_key: "03cd".to_string(),
            private_key: None,
        });
        let text = report.render(OutputFormat::Text).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(!text.contains("private"));
    }

    #[test]
    fn results_file_test() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        root_key_report().emit(OutputFormat::Json, Some(&path)).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"root_key\": \"tprv8Z\""));

        let missing = dir.path().join("no/such/dir/results.txt");
        assert!(root_key_report().emit(OutputFormat::Text, Some(&missing)).is_err());
    }
}

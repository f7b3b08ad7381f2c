use clap::{error::ErrorKind, Args, Parser, Subcommand};
use lightning_rescue::bitcoin::Network;
use lightning_rescue::search::{DEFAULT_MAX_CHANNELS, DEFAULT_MAX_CHAN_UPDATES, DEFAULT_MAX_CSV};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::exit;
use std::sync::{Arc, Mutex, MutexGuard};
use std::{env, fs};
use toml::value::{Table, Value};
use url::Url;

use crate::output::OutputFormat;
pub use rescue_util::config::{parse_network, APP_NAME, NETWORK_NAMES};

/// Default fee rate in sat/vbyte
pub const DEFAULT_FEE_RATE: u64 = 30;

// note that value_parser gives us clap 4 forward compatibility
#[derive(Parser, Debug)]
#[clap(about, long_about = None, args_override_self = true)]
pub struct Cli {
    #[clap(
        short = 'f',
        long,
        global = true,
        help = "configuration file, spliced into the arguments where it appears",
        value_name = "FILE"
    )]
    config: Option<String>,

    #[clap(long, help = "print git desc version and exit")]
    pub git_desc: bool,

    #[clap(
        long,
        global = true,
        help = "set the logging level",
        value_name = "LEVEL",
        default_value = "info",
        value_parser = ["off", "error", "warn", "info", "debug", "trace"],
    )]
    pub log_level: String,

    #[clap(long, global = true, help = "also log to this file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[clap(
        short,
        long,
        global = true,
        value_name = "NETWORK",
        default_value = NETWORK_NAMES[0],
        value_parser = parse_network,
    )]
    pub network: Network,

    #[clap(
        long,
        global = true,
        help = "Esplora API base URL, defaults to a public explorer for the network",
        value_name = "URL"
    )]
    pub api: Option<Url>,

    #[clap(
        long,
        global = true,
        value_enum,
        help = "result format",
        default_value = "text",
        value_name = "FORMAT"
    )]
    pub format: OutputFormat,

    #[clap(long, global = true, help = "also write the result to this file", value_name = "FILE")]
    pub results_file: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

/// The recovery procedures
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sweep the time-locked outputs of force-closed channels described by a
    /// channel summary file
    #[clap(name = "sweep-time-lock", args_override_self = true)]
    SweepTimeLock(SweepTimeLockArgs),
    /// Sweep a single time-locked output by brute forcing its parameters
    #[clap(name = "sweep-time-lock-manual", args_override_self = true)]
    SweepTimeLockManual(SweepTimeLockManualArgs),
    /// Derive a key from the root key
    #[clap(name = "derive-key", args_override_self = true)]
    DeriveKey(DeriveKeyArgs),
    /// Show the root key and node identity
    #[clap(name = "show-root-key", args_override_self = true)]
    ShowRootKey(RootKeyArgs),
    /// Generate a seed whose node identity key has a given prefix
    #[clap(name = "vanity-gen", args_override_self = true)]
    VanityGen(VanityGenArgs),
}

/// Where the root key comes from
#[derive(Args, Debug, Clone, Default)]
pub struct RootKeyArgs {
    #[clap(
        long,
        help = "BIP-32 root key (xprv/tprv), read from LNRESCUE_ROOTKEY if absent",
        value_name = "KEY",
        conflicts_with = "seed"
    )]
    pub rootkey: Option<String>,

    #[clap(long, help = "hex encoded BIP-32 master seed", value_name = "HEX")]
    pub seed: Option<String>,
}

/// Bounds of the brute-force search
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[clap(long, help = "lowest relative timeout to try", default_value_t = 0)]
    pub min_csv_limit: u16,

    #[clap(long, help = "highest relative timeout to try", default_value_t = DEFAULT_MAX_CSV)]
    pub max_csv_limit: u16,

    #[clap(long, help = "first channel key index to try", default_value_t = 0)]
    pub start_num_channels: u32,

    #[clap(
        long,
        help = "number of channel key indices to try",
        default_value_t = DEFAULT_MAX_CHANNELS
    )]
    pub max_num_channels_total: u32,

    #[clap(
        long,
        help = "number of channel states to try per revocation chain",
        default_value_t = DEFAULT_MAX_CHAN_UPDATES
    )]
    pub max_num_chan_updates: u64,

    #[clap(long, help = "search threads, 0 for one per core", default_value_t = 0)]
    pub threads: usize,
}

/// Where the funds go and at what cost
#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    #[clap(long, help = "address to sweep the funds to", value_name = "ADDRESS")]
    pub sweep_addr: String,

    #[clap(
        long,
        help = "fee rate in sat/vbyte",
        default_value_t = DEFAULT_FEE_RATE,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub fee_rate: u64,

    #[clap(long, help = "publish the sweep instead of only printing it")]
    pub publish: bool,
}

/// Arguments of `sweep-time-lock`
#[derive(Args, Debug, Clone)]
pub struct SweepTimeLockArgs {
    #[clap(long, help = "JSON file listing the outputs to sweep", value_name = "FILE")]
    pub from_summary: PathBuf,

    #[clap(flatten)]
    pub root_key: RootKeyArgs,

    #[clap(flatten)]
    pub search: SearchArgs,

    #[clap(flatten)]
    pub sweep: SweepArgs,
}

/// Arguments of `sweep-time-lock-manual`
#[derive(Args, Debug, Clone)]
pub struct SweepTimeLockManualArgs {
    #[clap(long, help = "address of the time-locked output", value_name = "ADDRESS")]
    pub timelock_addr: String,

    #[clap(long, help = "the counterparty's revocation basepoint", value_name = "PUBKEY")]
    pub remote_revocation_basepoint: String,

    #[clap(
        long,
        help = "also try revocation chains built with this multisig key",
        value_name = "PUBKEY"
    )]
    pub multisig_pubkey: Option<String>,

    #[clap(
        long,
        help = "hash of the auxiliary leaf of a taproot overlay channel",
        value_name = "HEX"
    )]
    pub taproot_aux_leaf: Option<String>,

    #[clap(flatten)]
    pub root_key: RootKeyArgs,

    #[clap(flatten)]
    pub search: SearchArgs,

    #[clap(flatten)]
    pub sweep: SweepArgs,
}

/// Arguments of `derive-key`
#[derive(Args, Debug, Clone)]
pub struct DeriveKeyArgs {
    #[clap(
        long,
        help = "derivation path, e.g. m/1017'/0'/4'/0/7",
        value_name = "PATH",
        conflicts_with_all = ["family", "index"]
    )]
    pub path: Option<String>,

    #[clap(long, help = "key family name or number", value_name = "FAMILY", requires = "index")]
    pub family: Option<String>,

    #[clap(long, help = "key index within the family", value_name = "INDEX", requires = "family")]
    pub index: Option<u32>,

    #[clap(long, help = "only show public information")]
    pub neuter: bool,

    #[clap(flatten)]
    pub root_key: RootKeyArgs,
}

/// Arguments of `vanity-gen`
#[derive(Args, Debug, Clone)]
pub struct VanityGenArgs {
    #[clap(long, help = "hex prefix of the node key, starting with 02 or 03", value_name = "HEX")]
    pub prefix: String,

    #[clap(long, help = "worker threads, 0 for one per core", default_value_t = 0)]
    pub threads: usize,
}

/// Parse the process arguments, exiting on error
pub fn parse_args_and_config() -> Cli {
    let env_args = env::args().collect::<Vec<_>>();
    parse_args_and_config_from(&env_args).unwrap_or_else(|e| match e.kind() {
        ErrorKind::DisplayVersion => exit(0), // exit directly because no Command
        _ => e.exit(),
    })
}

#[derive(Clone)]
struct ConfigIterator {
    args_stack: Arc<Mutex<Vec<Vec<String>>>>,
    error: Arc<Mutex<Option<String>>>,
}

impl ConfigIterator {
    fn new(args: &[String]) -> Self {
        ConfigIterator {
            args_stack: Arc::new(Mutex::new(vec![args.to_vec()])),
            error: Arc::new(Mutex::new(None)),
        }
    }

    fn do_next(args_stack: &mut MutexGuard<Vec<Vec<String>>>) -> Option<String> {
        loop {
            if args_stack.is_empty() {
                return None;
            }
            let args = &mut args_stack[0];
            if !args.is_empty() {
                let arg = args.remove(0);
                return Some(arg);
            }
            args_stack.remove(0);
        }
    }

    fn splice(&self, args_stack: &mut MutexGuard<Vec<Vec<String>>>, path: &str) -> Option<String> {
        match toml_to_configs(path.as_ref()) {
            Ok(configs) => {
                args_stack.insert(0, configs);
                Self::do_next(args_stack)
            }
            Err(e) => {
                self.error.lock().unwrap_or_else(|e| e.into_inner()).get_or_insert(e);
                // stop feeding clap, the error is reported instead
                args_stack.clear();
                None
            }
        }
    }

    fn take_error(&self) -> Option<String> {
        self.error.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl Iterator for ConfigIterator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let stack = self.args_stack.clone();
        let mut args_stack = stack.lock().unwrap_or_else(|e| e.into_inner());
        let arg = Self::do_next(&mut args_stack)?;
        if let Some(path) = arg.strip_prefix("--config=") {
            return self.splice(&mut args_stack, path);
        } else if arg == "--config" || arg == "-f" {
            if let Some(path) = Self::do_next(&mut args_stack) {
                return self.splice(&mut args_stack, &path);
            }
            // let clap handle the error
        }
        Some(arg)
    }
}

/// Parse arguments, splicing in config files
pub fn parse_args_and_config_from(env_args: &[String]) -> Result<Cli, clap::Error> {
    let args_iter = ConfigIterator::new(env_args);
    let parsed = Cli::try_parse_from(args_iter.clone());
    if let Some(e) = args_iter.take_error() {
        return Err(clap::Error::raw(ErrorKind::Io, format!("config file: {}\n", e)));
    }
    let args = parsed?;

    // short-circuit if we're just printing the git desc
    if args.git_desc {
        println!("{} git_desc={}", APP_NAME, rescue_util::GIT_DESC);
        // Don't exit here because this is called by unit tests
        return Err(clap::Error::raw(ErrorKind::DisplayVersion, ""));
    }
    if args.command.is_none() {
        return Err(clap::Error::raw(ErrorKind::MissingSubcommand, "a subcommand is required\n"));
    }

    Ok(args)
}

fn toml_to_configs(path: &OsStr) -> Result<Vec<String>, String> {
    let contents =
        fs::read_to_string(path).map_err(|e| format!("{}: {}", path.to_string_lossy(), e))?;
    let config: Table = toml::from_str(contents.as_str())
        .map_err(|e| format!("{}: {}", path.to_string_lossy(), e))?;
    let configs = config
        .into_iter()
        .flat_map(|(k, value)| convert_toml_value(k, value))
        .map(|(k, v)| if v.is_empty() { format!("--{}", k) } else { format!("--{}={}", k, v) })
        .collect();
    Ok(configs)
}

// Booleans become bare flags, false ones are dropped
fn convert_toml_value(key: String, value: Value) -> Vec<(String, String)> {
    match value {
        Value::String(s) => vec![(key, s)],
        Value::Integer(v) => vec![(key, v.to_string())],
        Value::Float(v) => vec![(key, v.to_string())],
        Value::Boolean(true) => vec![(key, String::new())],
        Value::Boolean(false) => vec![],
        Value::Datetime(v) => vec![(key, v.to_string())],
        Value::Array(a) =>
            a.into_iter().flat_map(|v| convert_toml_value(key.clone(), v)).collect::<Vec<_>>(),
        Value::Table(_) => vec![],
    }
}

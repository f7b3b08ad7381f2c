use anyhow::{anyhow, bail, Context, Result};
use explorer_client::{default_api_url, EsploraClient, Explorer};
use lightning_rescue::bitcoin::bip32::Xpriv;
use lightning_rescue::bitcoin::consensus::encode::serialize_hex;
use lightning_rescue::bitcoin::taproot::TapNodeHash;
use lightning_rescue::bitcoin::{Network, PrivateKey};
use lightning_rescue::keys::derive::{check_network, BIP43_PURPOSE};
use lightning_rescue::keys::{
    base_key, derive_path, node_identity_key, parse_path, ExtendedKey, KeyFamily,
};
use lightning_rescue::matcher::{parse_address, TargetOutput};
use lightning_rescue::recovery::{sweep_time_lock, sweep_time_lock_manual, ManualTarget, Sweep};
use lightning_rescue::search::{SearchBounds, SearchStrategy};
use lightning_rescue::shachain::RevocationScheme;
use lightning_rescue::tx::script::TaprootStrategy;
use lightning_rescue::tx::sweep::SweepTarget;
use lightning_rescue::util::crypto_utils::public_key_from_hex;
use lightning_rescue::vanity;
use lightning_rescue::RecoveryContext;
use log::*;
use rescue_util::{root_key_from_env, ROOTKEY_ENV};
use std::fs;
use std::str::FromStr;
use url::Url;

use crate::config::{
    Cli, Command, DeriveKeyArgs, RootKeyArgs, SearchArgs, SweepArgs, SweepTimeLockArgs,
    SweepTimeLockManualArgs, VanityGenArgs,
};
use crate::output::{DeriveKeyReport, Report, RootKeyReport, SweepReport, VanityReport};

/// Run the selected command and emit its result
pub async fn run(cli: Cli) -> Result<()> {
    let command = cli.command.as_ref().ok_or_else(|| anyhow!("a subcommand is required"))?;
    let report = match command {
        Command::SweepTimeLock(args) => sweep_time_lock_command(&cli, args).await?,
        Command::SweepTimeLockManual(args) => sweep_time_lock_manual_command(&cli, args).await?,
        Command::DeriveKey(args) => derive_key_command(cli.network, args)?,
        Command::ShowRootKey(args) => show_root_key_command(cli.network, args)?,
        Command::VanityGen(args) => vanity_gen_command(cli.network, args).await?,
    };
    report.emit(cli.format, cli.results_file.as_deref())
}

/// The root key as given, possibly public-only
pub fn root_extended_key(network: Network, args: &RootKeyArgs) -> Result<ExtendedKey> {
    let ctx = RecoveryContext::new(network);
    let key = if let Some(seed) = &args.seed {
        let seed = hex::decode(seed.trim()).context("--seed is not hex")?;
        ExtendedKey::Private(Xpriv::new_master(network, &seed).context("--seed")?)
    } else {
        let key = args.rootkey.clone().or_else(root_key_from_env).ok_or_else(|| {
            anyhow!("no root key: pass --rootkey or --seed, or set {}", ROOTKEY_ENV)
        })?;
        ExtendedKey::from_str(&key)?
    };
    if let ExtendedKey::Private(xprv) = &key {
        check_network(&ctx, xprv)?;
    }
    Ok(key)
}

/// The private root key
pub fn root_key(network: Network, args: &RootKeyArgs) -> Result<Xpriv> {
    match root_extended_key(network, args)? {
        ExtendedKey::Private(xprv) => Ok(xprv),
        ExtendedKey::Public(_) => bail!("a private root key is required"),
    }
}

fn search_bounds(args: &SearchArgs) -> Result<SearchBounds> {
    if args.min_csv_limit > args.max_csv_limit {
        bail!(
            "--min-csv-limit {} above --max-csv-limit {}",
            args.min_csv_limit,
            args.max_csv_limit
        );
    }
    let end = args
        .start_num_channels
        .checked_add(args.max_num_channels_total)
        .ok_or_else(|| anyhow!("--start-num-channels + --max-num-channels-total overflows"))?;
    Ok(SearchBounds {
        key_indices: args.start_num_channels..end,
        max_chain_updates: args.max_num_chan_updates,
        min_csv: args.min_csv_limit,
        max_csv: args.max_csv_limit,
    })
}

fn search_strategy(threads: usize) -> SearchStrategy {
    SearchStrategy::with_threads(worker_threads(threads))
}

fn worker_threads(threads: usize) -> usize {
    if threads > 0 {
        return threads;
    }
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn explorer(cli: &Cli) -> Result<EsploraClient> {
    let url = match &cli.api {
        Some(url) => url.clone(),
        None => Url::parse(default_api_url(cli.network))?,
    };
    info!("using explorer {}", url);
    Ok(EsploraClient::new(url)?)
}

// Refuse to publish over spent outputs, then publish
async fn publish(explorer: &EsploraClient, sweep: &Sweep) -> Result<()> {
    for input in &sweep.inputs {
        if explorer.output_spent(&input.outpoint).await? {
            bail!("{} is already spent", input.outpoint);
        }
    }
    let txid = explorer.publish(&serialize_hex(&sweep.sweep.tx)).await?;
    info!("published sweep {}", txid);
    Ok(())
}

async fn finish_sweep(cli: &Cli, sweep_args: &SweepArgs, sweep: Sweep) -> Result<Report> {
    for (outpoint, e) in &sweep.skipped {
        warn!("not swept: {}: {}", outpoint, e);
    }
    info!(
        "sweep {} pays {} sat in fees for {} inputs",
        sweep.sweep.tx.compute_txid(),
        sweep.sweep.fee.to_sat(),
        sweep.inputs.len()
    );
    if sweep_args.publish {
        publish(&explorer(cli)?, &sweep).await?;
    }
    Ok(Report::Sweep(SweepReport::new(&sweep, sweep_args.publish)))
}

async fn sweep_time_lock_command(cli: &Cli, args: &SweepTimeLockArgs) -> Result<Report> {
    let network = cli.network;
    let ctx = RecoveryContext::new(network);
    let summary = fs::read_to_string(&args.from_summary)
        .with_context(|| format!("reading {}", args.from_summary.display()))?;
    let targets: Vec<SweepTarget> = serde_json::from_str(&summary)
        .with_context(|| format!("parsing {}", args.from_summary.display()))?;
    if targets.is_empty() {
        bail!("{} lists no outputs", args.from_summary.display());
    }
    let base = base_key(&ctx, &root_key(network, &args.root_key)?)?;
    let destination = parse_address(&ctx, &args.sweep.sweep_addr)?.script_pubkey();
    let bounds = search_bounds(&args.search)?;
    let fee_rate = args.sweep.fee_rate;
    info!("matching {} outputs from {}", targets.len(), args.from_summary.display());

    let sweep = tokio::task::spawn_blocking(move || {
        sweep_time_lock(
            &ctx,
            &base,
            &targets,
            &bounds,
            &RevocationScheme::DEFAULT_CANDIDATES,
            destination,
            fee_rate,
        )
    })
    .await??;
    finish_sweep(cli, &args.sweep, sweep).await
}

async fn sweep_time_lock_manual_command(
    cli: &Cli,
    args: &SweepTimeLockManualArgs,
) -> Result<Report> {
    let network = cli.network;
    let ctx = RecoveryContext::new(network);
    let address = parse_address(&ctx, &args.timelock_addr)?;
    let target = TargetOutput::from_script_pubkey(&address.script_pubkey())?;
    let remote_revocation_basepoint = public_key_from_hex(&args.remote_revocation_basepoint)?;

    let mut manual = ManualTarget::new(target, remote_revocation_basepoint);
    manual.bounds = search_bounds(&args.search)?;
    if let Some(multisig) = &args.multisig_pubkey {
        manual.schemes.push(RevocationScheme::EcdhWith(public_key_from_hex(multisig)?));
    }
    if let Some(aux) = &args.taproot_aux_leaf {
        let aux = TapNodeHash::from_str(aux.trim()).context("--taproot-aux-leaf")?;
        manual.taproot_strategies = TaprootStrategy::candidates(Some(aux));
    }
    let base = base_key(&ctx, &root_key(network, &args.root_key)?)?;
    let destination = parse_address(&ctx, &args.sweep.sweep_addr)?.script_pubkey();
    let strategy = search_strategy(args.search.threads);
    let fee_rate = args.sweep.fee_rate;

    let utxo = explorer(cli)?.resolve_outpoint(&address).await?;
    info!("{} holds {} at {}", address, utxo.value, utxo.outpoint);
    if !utxo.confirmed {
        warn!("{} is unconfirmed, its timeout has not started", utxo.outpoint);
    }

    let sweep = tokio::task::spawn_blocking(move || {
        sweep_time_lock_manual(
            &ctx,
            &base,
            &manual,
            strategy,
            utxo.outpoint,
            utxo.value,
            destination,
            fee_rate,
        )
    })
    .await??;
    finish_sweep(cli, &args.sweep, sweep).await
}

/// The lnd path of a family key
pub fn family_key_path(ctx: &RecoveryContext, family: KeyFamily, index: u32) -> String {
    format!("m/{}'/{}'/{}'/0/{}", BIP43_PURPOSE, ctx.coin_type(), u32::from(family), index)
}

fn derive_key_command(network: Network, args: &DeriveKeyArgs) -> Result<Report> {
    let ctx = RecoveryContext::new(network);
    let path = match (&args.path, &args.family, args.index) {
        (Some(path), _, _) => path.clone(),
        (None, Some(family), Some(index)) => {
            let family = KeyFamily::from_str(family).map_err(|e| anyhow!(e))?;
            family_key_path(&ctx, family, index)
        }
        _ => bail!("pass --path, or --family and --index"),
    };
    let root = root_extended_key(network, &args.root_key)?;
    let key = derive_path(&ctx, &root, &parse_path(&path)?)?;
    let (extended_key, private_key) = if args.neuter {
        (key.neuter(&ctx).to_string(), None)
    } else {
        (key.to_string(), key.private_key().map(|sk| PrivateKey::new(sk, network).to_wif()))
    };
    Ok(Report::DeriveKey(DeriveKeyReport {
        path,
        extended_key,
        public_key: key.public_key(&ctx).to_string(),
        private_key,
    }))
}

fn show_root_key_command(network: Network, args: &RootKeyArgs) -> Result<Report> {
    let ctx = RecoveryContext::new(network);
    let root = root_key(network, args)?;
    let (node_id, _) = node_identity_key(&ctx, &root)?;
    Ok(Report::RootKey(RootKeyReport { root_key: root.to_string(), node_id: node_id.to_string() }))
}

async fn vanity_gen_command(network: Network, args: &VanityGenArgs) -> Result<Report> {
    let prefix = args.prefix.clone();
    let threads = worker_threads(args.threads);
    let result = tokio::task::spawn_blocking(move || {
        vanity::generate(&RecoveryContext::new(network), &prefix, threads)
    })
    .await??;
    Ok(Report::Vanity(VanityReport {
        seed: hex::encode(result.seed),
        node_id: result.node_pubkey.to_string(),
        attempts: result.attempts,
    }))
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bitcoin::bip32::Xpriv;
use bitcoin::secp256k1::PublicKey;
use tracing::*;

use crate::keys::node_identity_key;
use crate::util::crypto_utils::generate_seed;
use crate::util::error::{invalid_argument_error, RecoveryError};
use crate::RecoveryContext;

/// Length of the generated wallet seed
pub const SEED_LEN: usize = 16;

/// Longest prefix accepted after the parity byte, in hex characters
pub const MAX_PREFIX_CHARS: usize = 8;

const PROGRESS_INTERVAL: u64 = 1 << 20;

/// A seed whose node identity key has the requested prefix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VanityResult {
    /// The wallet seed, usable as a BIP-32 master seed
    pub seed: [u8; SEED_LEN],
    /// The node identity key derived from it
    pub node_pubkey: PublicKey,
    /// Number of seeds tried by all workers
    pub attempts: u64,
}

fn check_prefix(prefix: &str) -> Result<String, RecoveryError> {
    let prefix = prefix.trim().to_ascii_lowercase();
    if !prefix.starts_with("02") && !prefix.starts_with("03") {
        invalid_argument_err!("prefix {} must start with 02 or 03", prefix);
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
        invalid_argument_err!("prefix {} is not hex", prefix);
    }
    if prefix.len() - 2 > MAX_PREFIX_CHARS {
        invalid_argument_err!(
            "prefix {} is unreasonably long, at most {} characters after the parity byte",
            prefix,
            MAX_PREFIX_CHARS
        );
    }
    Ok(prefix)
}

/// Generate random seeds until one yields a node identity key whose hex
/// encoding starts with `prefix`.
///
/// `threads` workers sample independently; the first match cancels the rest.
pub fn generate(
    ctx: &RecoveryContext,
    prefix: &str,
    threads: usize,
) -> Result<VanityResult, RecoveryError> {
    let prefix = check_prefix(prefix)?;
    let threads = threads.max(1);
    let expected = 1u64 << (4 * (prefix.len() - 2));
    info!(
        "searching node key prefix {} with {} workers, ~{} attempts expected",
        prefix, threads, expected
    );

    let (trigger, listener) = triggered::trigger();
    let attempts = AtomicU64::new(0);
    let result: Mutex<Option<([u8; SEED_LEN], PublicKey)>> = Mutex::new(None);
    let error: Mutex<Option<RecoveryError>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for worker in 0..threads {
            let (trigger, listener) = (trigger.clone(), listener.clone());
            let (attempts, result, error, prefix) = (&attempts, &result, &error, &prefix);
            scope.spawn(move || {
                while !listener.is_triggered() {
                    let seed = generate_seed::<SEED_LEN>();
                    let tried = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    if tried % PROGRESS_INTERVAL == 0 {
                        info!("tried {} seeds", tried);
                    }
                    match seed_node_key(ctx, &seed) {
                        Ok(pubkey) => {
                            if hex::encode(pubkey.serialize()).starts_with(prefix.as_str()) {
                                let mut found = result.lock().unwrap_or_else(|e| e.into_inner());
                                if found.is_none() {
                                    debug!("worker {} found {}", worker, pubkey);
                                    *found = Some((seed, pubkey));
                                }
                                trigger.trigger();
                            }
                        }
                        Err(e) => {
                            let mut first = error.lock().unwrap_or_else(|p| p.into_inner());
                            first.get_or_insert(e);
                            drop(first);
                            trigger.trigger();
                        }
                    }
                }
            });
        }
    });

    let attempts = attempts.into_inner();
    if let Some((seed, node_pubkey)) = result.into_inner().unwrap_or_else(|e| e.into_inner()) {
        info!("found {} after {} attempts", node_pubkey, attempts);
        return Ok(VanityResult { seed, node_pubkey, attempts });
    }
    match error.into_inner().unwrap_or_else(|e| e.into_inner()) {
        Some(e) => Err(e),
        None => invalid_argument_err!("search for {} stopped without a result", prefix),
    }
}

/// The node identity key of a wallet seed
pub fn seed_node_key(ctx: &RecoveryContext, seed: &[u8]) -> Result<PublicKey, RecoveryError> {
    let master = Xpriv::new_master(ctx.network, seed)
        .map_err(|e| invalid_argument_error(format!("seed: {}", e)))?;
    node_identity_key(ctx, &master).map(|(pubkey, _)| pubkey)
}

use core::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use bitcoin::bip32::Xpriv;
use bitcoin::secp256k1::PublicKey;
use tracing::*;

use crate::keys::{derive_key_from_base, KeyFamily, KeyLocator};
use crate::matcher::{match_timeout, ScriptMatch, TargetOutput};
use crate::shachain::{build_chain, RevocationProducer, RevocationScheme};
use crate::tx::script::{CommitmentKeys, TaprootStrategy};
use crate::util::error::{invalid_argument_error, not_found_error, RecoveryError};
use crate::RecoveryContext;

/// Default number of channel key indices searched
pub const DEFAULT_MAX_CHANNELS: u32 = 500;
/// Default number of channel states searched per chain
pub const DEFAULT_MAX_CHAN_UPDATES: u64 = 500;
/// Default highest relative timeout searched
pub const DEFAULT_MAX_CSV: u16 = 2016;

/// The bounds of the outer search
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchBounds {
    /// Delay base key indices to try
    pub key_indices: Range<u32>,
    /// Number of revocation chain indices to try per chain
    pub max_chain_updates: u64,
    /// Lowest relative timeout
    pub min_csv: u16,
    /// Highest relative timeout, inclusive
    pub max_csv: u16,
}

impl Default for SearchBounds {
    fn default() -> Self {
        Self {
            key_indices: 0..DEFAULT_MAX_CHANNELS,
            max_chain_updates: DEFAULT_MAX_CHAN_UPDATES,
            min_csv: 0,
            max_csv: DEFAULT_MAX_CSV,
        }
    }
}

/// One point of the outer search space.  The timeout is scanned by the matcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// Delay base (and revocation root) key index
    pub key_index: u32,
    /// Revocation chain construction
    pub scheme: RevocationScheme,
    /// Index in the revocation chain
    pub chain_index: u64,
}

/// The candidates of a search, produced lazily in lexicographic order of
/// (key index, scheme, chain index)
pub struct SearchSpace<'a> {
    key_indices: Range<u32>,
    schemes: &'a [RevocationScheme],
    max_chain_updates: u64,
}

impl<'a> SearchSpace<'a> {
    /// The space spanned by the bounds and schemes
    pub fn new(bounds: &SearchBounds, schemes: &'a [RevocationScheme]) -> Self {
        Self {
            key_indices: bounds.key_indices.clone(),
            schemes,
            max_chain_updates: bounds.max_chain_updates,
        }
    }

    /// All candidates
    pub fn candidates(&self) -> impl Iterator<Item = Candidate> + 'a {
        let schemes = self.schemes;
        let max_chain_updates = self.max_chain_updates;
        self.key_indices
            .clone()
            .flat_map(move |key_index| candidates_for_key(schemes, max_chain_updates, key_index))
    }

    /// The candidates of one key index
    pub fn for_key(&self, key_index: u32) -> impl Iterator<Item = Candidate> + 'a {
        candidates_for_key(self.schemes, self.max_chain_updates, key_index)
    }

    /// Number of candidates
    pub fn len(&self) -> u64 {
        self.key_indices.len() as u64 * self.schemes.len() as u64 * self.max_chain_updates
    }

    /// Whether there is nothing to search
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn candidates_for_key<'a>(
    schemes: &'a [RevocationScheme],
    max_chain_updates: u64,
    key_index: u32,
) -> impl Iterator<Item = Candidate> + 'a {
    schemes.iter().flat_map(move |scheme| {
        (0..max_chain_updates).map(move |chain_index| Candidate {
            key_index,
            scheme: *scheme,
            chain_index,
        })
    })
}

/// The parameters that reproduce a target output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Found {
    /// Locator of our delay base key
    pub key_locator: KeyLocator,
    /// Our delay basepoint
    pub delay_basepoint: PublicKey,
    /// The revocation chain construction
    pub scheme: RevocationScheme,
    /// The state of the channel
    pub chain_index: u64,
    /// The commitment point of that state
    pub commitment_point: PublicKey,
    /// The timeout and spend material
    pub script_match: ScriptMatch,
}

struct KeyMaterial {
    key_index: u32,
    delay_basepoint: PublicKey,
    producers: Vec<(RevocationScheme, RevocationProducer)>,
}

impl KeyMaterial {
    fn producer(
        &mut self,
        ctx: &RecoveryContext,
        base: &Xpriv,
        scheme: &RevocationScheme,
    ) -> Result<&RevocationProducer, RecoveryError> {
        if let Some(pos) = self.producers.iter().position(|(s, _)| s == scheme) {
            return Ok(&self.producers[pos].1);
        }
        let producer = build_chain(ctx, base, scheme, self.key_index)?;
        self.producers.push((*scheme, producer));
        Ok(&self.producers[self.producers.len() - 1].1)
    }
}

/// Evaluates candidates against one target, caching the key material of the
/// current key index
pub struct Evaluator<'a> {
    ctx: &'a RecoveryContext,
    base: &'a Xpriv,
    revocation_basepoint: PublicKey,
    target: &'a TargetOutput,
    min_csv: u16,
    max_csv: u16,
    strategies: &'a [TaprootStrategy],
    current: Option<KeyMaterial>,
}

impl<'a> Evaluator<'a> {
    /// An evaluator for a target
    pub fn new(
        ctx: &'a RecoveryContext,
        base: &'a Xpriv,
        revocation_basepoint: PublicKey,
        target: &'a TargetOutput,
        bounds: &SearchBounds,
        strategies: &'a [TaprootStrategy],
    ) -> Self {
        Self {
            ctx,
            base,
            revocation_basepoint,
            target,
            min_csv: bounds.min_csv,
            max_csv: bounds.max_csv,
            strategies,
            current: None,
        }
    }

    fn material(&mut self, key_index: u32) -> Result<&mut KeyMaterial, RecoveryError> {
        let stale = self.current.as_ref().map_or(true, |m| m.key_index != key_index);
        if stale {
            trace_stage!("derive key material", key_index);
            let locator = KeyLocator::new(KeyFamily::DelayBase, key_index);
            let (delay_basepoint, _) = derive_key_from_base(self.ctx, self.base, &locator)?;
            self.current = Some(KeyMaterial { key_index, delay_basepoint, producers: Vec::new() });
        }
        self.current
            .as_mut()
            .ok_or_else(|| invalid_argument_error(format!("no key material for {}", key_index)))
    }

    /// Evaluate one candidate, scanning all timeouts
    pub fn evaluate(&mut self, candidate: &Candidate) -> Result<Option<Found>, RecoveryError> {
        let ctx = self.ctx;
        let base = self.base;
        let revocation_basepoint = self.revocation_basepoint;
        let target = self.target;
        let (min_csv, max_csv, strategies) = (self.min_csv, self.max_csv, self.strategies);

        let material = self.material(candidate.key_index)?;
        let delay_basepoint = material.delay_basepoint;
        let producer = material.producer(ctx, base, &candidate.scheme)?;
        let commitment_point = producer.commitment_point(ctx, candidate.chain_index)?;
        let keys =
            CommitmentKeys::derive(ctx, &revocation_basepoint, &delay_basepoint, &commitment_point);
        match match_timeout(ctx, &keys, target, min_csv, max_csv, strategies) {
            Ok(script_match) => Ok(Some(Found {
                key_locator: KeyLocator::new(KeyFamily::DelayBase, candidate.key_index),
                delay_basepoint,
                scheme: candidate.scheme,
                chain_index: candidate.chain_index,
                commitment_point,
                script_match,
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// How the search space is traversed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchStrategy {
    /// One thread, in candidate order
    Exhaustive,
    /// Key indices interleaved across worker threads.
    /// Returns the same result as the exhaustive traversal.
    Parallel {
        /// Number of workers
        threads: usize,
    },
}

impl SearchStrategy {
    /// Exhaustive for one thread, parallel otherwise
    pub fn with_threads(threads: usize) -> Self {
        if threads <= 1 {
            SearchStrategy::Exhaustive
        } else {
            SearchStrategy::Parallel { threads }
        }
    }
}

/// Search for the key index, revocation chain, state and timeout that
/// reproduce `target`.
///
/// `base` is the node's base key, see [`crate::keys::base_key`].  The first
/// match in candidate order wins.
pub fn search_time_lock(
    ctx: &RecoveryContext,
    base: &Xpriv,
    revocation_basepoint: &PublicKey,
    target: &TargetOutput,
    bounds: &SearchBounds,
    schemes: &[RevocationScheme],
    strategies: &[TaprootStrategy],
    search_strategy: SearchStrategy,
) -> Result<Found, RecoveryError> {
    if schemes.is_empty() {
        invalid_argument_err!("no revocation schemes to try");
    }
    if bounds.min_csv > bounds.max_csv {
        invalid_argument_err!("empty timeout range [{}, {}]", bounds.min_csv, bounds.max_csv);
    }
    let space = SearchSpace::new(bounds, schemes);
    info!(
        "searching {} key indices x {} schemes x {} states x csv [{}, {}]",
        bounds.key_indices.len(),
        schemes.len(),
        bounds.max_chain_updates,
        bounds.min_csv,
        bounds.max_csv
    );

    let found = match search_strategy {
        SearchStrategy::Exhaustive => {
            let mut evaluator =
                Evaluator::new(ctx, base, *revocation_basepoint, target, bounds, strategies);
            search_keys(&mut evaluator, &space, bounds.key_indices.clone(), &|_| false)?
        }
        SearchStrategy::Parallel { threads } => search_parallel(
            ctx,
            base,
            revocation_basepoint,
            target,
            bounds,
            &space,
            strategies,
            threads,
        )?,
    };

    match found {
        Some(found) => {
            info!(
                "found match: key index {}, scheme {}, chain index {}, csv {}",
                found.key_locator.index, found.scheme, found.chain_index, found.script_match.csv
            );
            Ok(found)
        }
        None => Err(not_found_error(format!(
            "no match in key indices {:?}, {} states, csv [{}, {}]; try widening the bounds",
            bounds.key_indices, bounds.max_chain_updates, bounds.min_csv, bounds.max_csv
        ))),
    }
}

// Walk key indices in order, stopping at the first match or when `skip` says
// the remaining indices can't win.
fn search_keys<I: Iterator<Item = u32>>(
    evaluator: &mut Evaluator,
    space: &SearchSpace,
    key_indices: I,
    skip: &dyn Fn(u32) -> bool,
) -> Result<Option<Found>, RecoveryError> {
    let total = space.key_indices.len();
    for key_index in key_indices {
        if skip(key_index) {
            break;
        }
        for candidate in space.for_key(key_index) {
            if let Some(found) = evaluator.evaluate(&candidate)? {
                return Ok(Some(found));
            }
        }
        info!("tried key index {} ({} keys in range)", key_index, total);
    }
    Ok(None)
}

fn search_parallel(
    ctx: &RecoveryContext,
    base: &Xpriv,
    revocation_basepoint: &PublicKey,
    target: &TargetOutput,
    bounds: &SearchBounds,
    space: &SearchSpace,
    strategies: &[TaprootStrategy],
    threads: usize,
) -> Result<Option<Found>, RecoveryError> {
    let threads = threads.max(1);
    let best = AtomicU32::new(u32::MAX);
    let results: Mutex<Vec<Found>> = Mutex::new(Vec::new());
    let errors: Mutex<Vec<RecoveryError>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for worker in 0..threads {
            let best = &best;
            let results = &results;
            let errors = &errors;
            scope.spawn(move || {
                let mut evaluator =
                    Evaluator::new(ctx, base, *revocation_basepoint, target, bounds, strategies);
                let indices = bounds.key_indices.clone().skip(worker).step_by(threads);
                let skip = |key_index: u32| key_index > best.load(Ordering::Acquire);
                match search_keys(&mut evaluator, space, indices, &skip) {
                    Ok(Some(found)) => {
                        best.fetch_min(found.key_locator.index, Ordering::AcqRel);
                        results.lock().unwrap_or_else(|e| e.into_inner()).push(found);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("search worker {} failed: {}", worker, e);
                        errors.lock().unwrap_or_else(|e| e.into_inner()).push(e);
                    }
                }
            });
        }
    });

    let mut results = results.into_inner().unwrap_or_else(|e| e.into_inner());
    results.sort_by_key(|f| f.key_locator.index);
    if let Some(found) = results.into_iter().next() {
        return Ok(Some(found));
    }
    let errors = errors.into_inner().unwrap_or_else(|e| e.into_inner());
    match errors.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::base_key;
    use crate::shachain::build_chain;
    use crate::tx::script::to_local_script;
    use crate::util::crypto_utils::public_key_from_hex;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::SecretKey;
    use bitcoin::{Network, ScriptBuf, WScriptHash};
    use core::str::FromStr;

    const SCENARIO_BASE_KEY: &str = "tprv8dgoXnQWBN4CGGceRYMW495kWcrUZKZVFwMmbzpduFp1D4pi3B2t37zTG5Fx66XWPDQYi3Q5vqDgmmZ5ffrqZ9H4s2EhJu9WaJjY3SKaWDK";

    fn scenario_search(key_index: u32, address: &str, remote_rev: &str) -> Found {
        let ctx = RecoveryContext::new(Network::Regtest);
        let base = Xpriv::from_str(SCENARIO_BASE_KEY).unwrap();
        let target = TargetOutput::from_address(&ctx, address).unwrap();
        let revocation_basepoint = public_key_from_hex(remote_rev).unwrap();
        let bounds = SearchBounds { key_indices: key_index..key_index + 1, ..Default::default() };
        search_time_lock(
            &ctx,
            &base,
            &revocation_basepoint,
            &target,
            &bounds,
            &RevocationScheme::DEFAULT_CANDIDATES,
            &TaprootStrategy::candidates(None),
            SearchStrategy::Exhaustive,
        )
        .unwrap()
    }

    #[test_log::test]
    fn scenario_ecdh_chain_test() {
        let found = scenario_search(
            7,
            "bcrt1qf9zv4qtxh27c954rhlzg4tx58xh0vgssuu0csrlep0jdnvlx9xesmcl5qx",
            "03235261ed5aaaf9fec0e91d5e1a4d17f1a2c7442f1c43806d32c9bd34abd002a3",
        );
        assert_eq!(found.key_locator, KeyLocator::new(KeyFamily::DelayBase, 7));
        assert!(matches!(found.scheme, RevocationScheme::Ecdh { .. }));
        assert!(found.chain_index < DEFAULT_MAX_CHAN_UPDATES);
    }

    #[test_log::test]
    fn scenario_legacy_chain_test() {
        let found = scenario_search(
            6,
            "bcrt1qa5rrlswxefc870k7rsza5hhqd37uytczldjk5t0vzd95u9hs8xlsfdc3zf",
            "03e82cdf164ce5aba253890e066129f134ca8d7e072ce5ad55c721b9a13545ee04",
        );
        assert_eq!(found.key_locator.index, 6);
        assert_eq!(found.scheme, RevocationScheme::LegacyPrivKey);
    }

    struct Synthetic {
        ctx: RecoveryContext,
        base: Xpriv,
        revocation_basepoint: PublicKey,
        target: TargetOutput,
    }

    // A P2WSH target for a known key index, scheme, state and timeout
    fn synthetic(
        key_index: u32,
        scheme: RevocationScheme,
        chain_index: u64,
        csv: u16,
    ) -> Synthetic {
        let ctx = RecoveryContext::new(Network::Regtest);
        let master = Xpriv::new_master(ctx.network, &[0x09; 32]).unwrap();
        let base = base_key(&ctx, &master).unwrap();
        let revocation_basepoint =
            PublicKey::from_secret_key(&ctx.secp_ctx, &SecretKey::from_slice(&[0x44; 32]).unwrap());
        let (delay_basepoint, _) = derive_key_from_base(
            &ctx,
            &base,
            &KeyLocator::new(KeyFamily::DelayBase, key_index),
        )
        .unwrap();
        let producer = build_chain(&ctx, &base, &scheme, key_index).unwrap();
        let commitment_point = producer.commitment_point(&ctx, chain_index).unwrap();
        let keys = CommitmentKeys::derive(
            &ctx,
            &revocation_basepoint,
            &delay_basepoint,
            &commitment_point,
        );
        let script = to_local_script(&keys, csv);
        let target = TargetOutput::from_script_pubkey(&ScriptBuf::new_p2wsh(&WScriptHash::hash(
            script.as_bytes(),
        )))
        .unwrap();
        Synthetic { ctx, base, revocation_basepoint, target }
    }

    fn small_bounds() -> SearchBounds {
        SearchBounds { key_indices: 0..4, max_chain_updates: 6, min_csv: 0, max_csv: 150 }
    }

    fn run(
        s: &Synthetic,
        bounds: &SearchBounds,
        strategy: SearchStrategy,
    ) -> Result<Found, RecoveryError> {
        search_time_lock(
            &s.ctx,
            &s.base,
            &s.revocation_basepoint,
            &s.target,
            bounds,
            &RevocationScheme::DEFAULT_CANDIDATES,
            &[],
            strategy,
        )
    }

    #[test_log::test]
    fn synthetic_search_test() {
        let scheme = RevocationScheme::Ecdh { root_offset: 0, multisig_offset: 1 };
        let s = synthetic(2, scheme, 4, 144);
        let found = run(&s, &small_bounds(), SearchStrategy::Exhaustive).unwrap();
        assert_eq!(found.key_locator.index, 2);
        assert_eq!(found.scheme, scheme);
        assert_eq!(found.chain_index, 4);
        assert_eq!(found.script_match.csv, 144);
        assert_eq!(found.script_match.script_pubkey, s.target.script_pubkey);

        let parallel = run(&s, &small_bounds(), SearchStrategy::Parallel { threads: 3 }).unwrap();
        assert_eq!(parallel, found);
    }

    #[test]
    fn exhausted_bounds_test() {
        let s = synthetic(1, RevocationScheme::LegacyPrivKey, 5, 144);
        let mut bounds = small_bounds();
        bounds.max_chain_updates = 5;
        assert!(run(&s, &bounds, SearchStrategy::Exhaustive).unwrap_err().is_not_found());
        let mut bounds = small_bounds();
        bounds.max_csv = 143;
        assert!(run(&s, &bounds, SearchStrategy::Parallel { threads: 2 })
            .unwrap_err()
            .is_not_found());
        let mut bounds = small_bounds();
        bounds.key_indices = 2..4;
        assert!(run(&s, &bounds, SearchStrategy::Exhaustive).unwrap_err().is_not_found());
    }

    #[test]
    fn search_space_order_test() {
        let bounds =
            SearchBounds { key_indices: 3..5, max_chain_updates: 2, min_csv: 0, max_csv: 0 };
        let schemes = [
            RevocationScheme::LegacyPrivKey,
            RevocationScheme::Ecdh { root_offset: 0, multisig_offset: 0 },
        ];
        let space = SearchSpace::new(&bounds, &schemes);
        let position = |scheme: &RevocationScheme| schemes.iter().position(|s| s == scheme);
        let candidates: Vec<(u32, usize, u64)> = space
            .candidates()
            .map(|c| (c.key_index, position(&c.scheme).unwrap(), c.chain_index))
            .collect();
        assert_eq!(
            candidates,
            vec![
                (3, 0, 0),
                (3, 0, 1),
                (3, 1, 0),
                (3, 1, 1),
                (4, 0, 0),
                (4, 0, 1),
                (4, 1, 0),
                (4, 1, 1)
            ]
        );
        assert_eq!(space.len(), 8);
        assert!(!space.is_empty());
    }

    #[test]
    fn strategy_test() {
        assert_eq!(SearchStrategy::with_threads(0), SearchStrategy::Exhaustive);
        assert_eq!(SearchStrategy::with_threads(1), SearchStrategy::Exhaustive);
        assert_eq!(SearchStrategy::with_threads(4), SearchStrategy::Parallel { threads: 4 });
    }
}

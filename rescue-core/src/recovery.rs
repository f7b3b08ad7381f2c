use bitcoin::bip32::Xpriv;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Amount, OutPoint, ScriptBuf};
use std::collections::BTreeSet;
use tracing::*;

use crate::keys::{derive_key_from_base, KeyFamily};
use crate::matcher::{match_timeout, TargetOutput};
use crate::search::{search_time_lock, Found, SearchBounds, SearchStrategy};
use crate::shachain::RevocationScheme;
use crate::tx::script::{CommitmentKeys, TaprootStrategy};
use crate::tx::sweep::{build_sweep, MatchedInput, SweepTarget, SweepTransaction};
use crate::util::error::{invalid_argument_error, not_found_error, RecoveryError};
use crate::RecoveryContext;

/// A single output to recover without a channel backup.  Everything but the
/// counterparty's revocation basepoint is brute forced.
#[derive(Clone, Debug)]
pub struct ManualTarget {
    /// The on-chain output
    pub target: TargetOutput,
    /// The counterparty's revocation basepoint
    pub remote_revocation_basepoint: PublicKey,
    /// Search bounds
    pub bounds: SearchBounds,
    /// Revocation chain constructions to try
    pub schemes: Vec<RevocationScheme>,
    /// Taproot layouts to try
    pub taproot_strategies: Vec<TaprootStrategy>,
}

impl ManualTarget {
    /// A target searched with the default bounds and candidate lists
    pub fn new(target: TargetOutput, remote_revocation_basepoint: PublicKey) -> Self {
        Self {
            target,
            remote_revocation_basepoint,
            bounds: SearchBounds::default(),
            schemes: RevocationScheme::DEFAULT_CANDIDATES.to_vec(),
            taproot_strategies: TaprootStrategy::candidates(None),
        }
    }
}

/// The outcome of a sweep over one or more targets
#[derive(Debug)]
pub struct Sweep {
    /// The inputs of the sweep, in target order
    pub inputs: Vec<MatchedInput>,
    /// Targets that could not be matched, with the reason
    pub skipped: Vec<(OutPoint, RecoveryError)>,
    /// The signed transaction
    pub sweep: SweepTransaction,
}

/// Find the parameters of a single output
pub fn find_time_lock_manual(
    ctx: &RecoveryContext,
    base: &Xpriv,
    manual: &ManualTarget,
    search_strategy: SearchStrategy,
) -> Result<Found, RecoveryError> {
    search_time_lock(
        ctx,
        base,
        &manual.remote_revocation_basepoint,
        &manual.target,
        &manual.bounds,
        &manual.schemes,
        &manual.taproot_strategies,
        search_strategy,
    )
}

/// Find the parameters of a single output and sweep it.
///
/// `outpoint` and `value` locate the output on chain, usually resolved from
/// its address by the chain gateway.
pub fn sweep_time_lock_manual(
    ctx: &RecoveryContext,
    base: &Xpriv,
    manual: &ManualTarget,
    search_strategy: SearchStrategy,
    outpoint: OutPoint,
    value: Amount,
    destination: ScriptBuf,
    fee_rate_sat_per_vbyte: u64,
) -> Result<Sweep, RecoveryError> {
    let found = find_time_lock_manual(ctx, base, manual, search_strategy)?;
    let inputs = vec![MatchedInput::from_found(found, outpoint, value)];
    let sweep = build_sweep(ctx, base, &inputs, destination, fee_rate_sat_per_vbyte)?;
    Ok(Sweep { inputs, skipped: Vec::new(), sweep })
}

/// Reconstruct the spend parameters of one summarized output.
///
/// A known commitment point leaves only the timeout to scan.  Otherwise the
/// revocation chains of the locator's key index are searched.
pub fn match_target(
    ctx: &RecoveryContext,
    base: &Xpriv,
    target: &SweepTarget,
    bounds: &SearchBounds,
    schemes: &[RevocationScheme],
) -> Result<MatchedInput, RecoveryError> {
    let locator = &target.delay_basepoint_locator;
    if locator.family != KeyFamily::DelayBase {
        invalid_argument_err!("{} is not a delay base key", locator);
    }
    let output = TargetOutput::from_script_pubkey(&target.lock_script)?;
    let strategies = TaprootStrategy::candidates(target.taproot_aux_leaf);
    let value = Amount::from_sat(target.value_sat);

    match target.commitment_point {
        Some(commitment_point) => {
            let (delay_basepoint, _) = derive_key_from_base(ctx, base, locator)?;
            let keys = CommitmentKeys::derive(
                ctx,
                &target.remote_revocation_basepoint,
                &delay_basepoint,
                &commitment_point,
            );
            let script_match =
                match_timeout(ctx, &keys, &output, bounds.min_csv, bounds.max_csv, &strategies)?;
            Ok(MatchedInput {
                outpoint: target.commitment_outpoint,
                value,
                key_locator: *locator,
                commitment_point,
                script_match,
            })
        }
        None => {
            let end = match locator.index.checked_add(1) {
                Some(end) => end,
                None => invalid_argument_err!("key index {} out of range", locator.index),
            };
            let key_bounds = SearchBounds { key_indices: locator.index..end, ..bounds.clone() };
            let found = search_time_lock(
                ctx,
                base,
                &target.remote_revocation_basepoint,
                &output,
                &key_bounds,
                schemes,
                &strategies,
                SearchStrategy::Exhaustive,
            )?;
            Ok(MatchedInput::from_found(found, target.commitment_outpoint, value))
        }
    }
}

/// Match every target, skipping those that fail and repeats of an outpoint
/// already matched.  Fails with `NotFound` only when none matched.
pub fn match_targets(
    ctx: &RecoveryContext,
    base: &Xpriv,
    targets: &[SweepTarget],
    bounds: &SearchBounds,
    schemes: &[RevocationScheme],
) -> Result<(Vec<MatchedInput>, Vec<(OutPoint, RecoveryError)>), RecoveryError> {
    let mut matched = Vec::new();
    let mut skipped = Vec::new();
    let mut seen = BTreeSet::new();
    for target in targets {
        if seen.contains(&target.commitment_outpoint) {
            warn!("skipping duplicate target {}", target.commitment_outpoint);
            let e = invalid_argument_error(format!(
                "{} is listed more than once",
                target.commitment_outpoint
            ));
            skipped.push((target.commitment_outpoint, e));
            continue;
        }
        match match_target(ctx, base, target, bounds, schemes) {
            Ok(input) => {
                info!(
                    "matched {} of channel {} with csv {}",
                    target.commitment_outpoint, target.channel_point, input.script_match.csv
                );
                seen.insert(target.commitment_outpoint);
                matched.push(input);
            }
            Err(e) => {
                warn!(
                    "skipping {} of channel {}: {}",
                    target.commitment_outpoint, target.channel_point, e
                );
                skipped.push((target.commitment_outpoint, e));
            }
        }
    }
    if matched.is_empty() {
        return Err(not_found_error(format!(
            "none of {} targets matched; try widening the bounds",
            targets.len()
        )));
    }
    Ok((matched, skipped))
}

/// Sweep all summarized outputs that can be matched in one transaction
pub fn sweep_time_lock(
    ctx: &RecoveryContext,
    base: &Xpriv,
    targets: &[SweepTarget],
    bounds: &SearchBounds,
    schemes: &[RevocationScheme],
    destination: ScriptBuf,
    fee_rate_sat_per_vbyte: u64,
) -> Result<Sweep, RecoveryError> {
    let (inputs, skipped) = match_targets(ctx, base, targets, bounds, schemes)?;
    let sweep = build_sweep(ctx, base, &inputs, destination, fee_rate_sat_per_vbyte)?;
    Ok(Sweep { inputs, skipped, sweep })
}

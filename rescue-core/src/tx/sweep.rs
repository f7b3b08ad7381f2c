use bitcoin::absolute::LockTime;
use bitcoin::bip32::Xpriv;
use bitcoin::hashes::Hash;
use bitcoin::key::XOnlyPublicKey;
use bitcoin::secp256k1::{schnorr, Message, PublicKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{ControlBlock, LeafVersion, TapLeafHash, TapNodeHash};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use lightning::ln::chan_utils::derive_private_key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::*;

use crate::keys::{derive_key_from_base, KeyLocator};
use crate::matcher::{ScriptMatch, SpendPath};
use crate::search::Found;
use crate::util::crypto_utils::{
    ecdsa_sign, schnorr_signature_to_bitcoin_vec, signature_to_bitcoin_vec, tapscript_sign,
};
use crate::util::debug_utils::DebugWitness;
use crate::util::error::{
    fee_distribution_error, insufficient_value_error, invalid_witness_error, RecoveryError,
};
use crate::util::transaction_utils::{
    expected_sweep_weight, fee_for_weight, weight_to_vsize, MAX_VALUE_SAT,
};
use crate::RecoveryContext;

/// A time-locked output described by a channel summary, whose timeout and
/// (possibly) state are unknown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepTarget {
    /// The funding outpoint of the channel
    pub channel_point: OutPoint,
    /// The to_local output of the broadcast commitment
    pub commitment_outpoint: OutPoint,
    /// Its output script as seen on chain
    pub lock_script: ScriptBuf,
    /// Its value
    pub value_sat: u64,
    /// The counterparty's revocation basepoint
    pub remote_revocation_basepoint: PublicKey,
    /// The commitment point of the broadcast state, if known
    #[serde(default)]
    pub commitment_point: Option<PublicKey>,
    /// Locator of our delay base key
    pub delay_basepoint_locator: KeyLocator,
    /// Hash of the auxiliary leaf of an overlay channel
    #[serde(default)]
    pub taproot_aux_leaf: Option<TapNodeHash>,
}

/// A matched output ready to be swept
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchedInput {
    /// The output being spent
    pub outpoint: OutPoint,
    /// Its value
    pub value: Amount,
    /// Locator of the delay base key
    pub key_locator: KeyLocator,
    /// The commitment point of the broadcast state
    pub commitment_point: PublicKey,
    /// The reconstructed script parameters
    pub script_match: ScriptMatch,
}

impl MatchedInput {
    /// The input for a search result
    pub fn from_found(found: Found, outpoint: OutPoint, value: Amount) -> Self {
        Self {
            outpoint,
            value,
            key_locator: found.key_locator,
            commitment_point: found.commitment_point,
            script_match: found.script_match,
        }
    }

    fn prevout(&self) -> TxOut {
        TxOut { value: self.value, script_pubkey: self.script_match.script_pubkey.clone() }
    }
}

/// A signed sweep
#[derive(Clone, Debug)]
pub struct SweepTransaction {
    /// The transaction
    pub tx: Transaction,
    /// The fee paid
    pub fee: Amount,
    /// The estimated weight the fee was computed from
    pub weight: u64,
}

/// Build and sign a transaction spending all `inputs` through their delayed
/// path to `destination`.
///
/// The fee is `fee_rate_sat_per_vbyte` times the estimated virtual size.
pub fn build_sweep(
    ctx: &RecoveryContext,
    base: &Xpriv,
    inputs: &[MatchedInput],
    destination: ScriptBuf,
    fee_rate_sat_per_vbyte: u64,
) -> Result<SweepTransaction, RecoveryError> {
    if inputs.is_empty() {
        invalid_argument_err!("nothing to sweep");
    }
    let mut seen = BTreeSet::new();
    for input in inputs {
        if !seen.insert(input.outpoint) {
            invalid_argument_err!("{} is spent twice", input.outpoint);
        }
    }
    let total = inputs
        .iter()
        .try_fold(0u64, |acc, input| acc.checked_add(input.value.to_sat()))
        .filter(|total| *total <= MAX_VALUE_SAT);
    let total = match total {
        Some(total) => total,
        None => invalid_argument_err!("input value exceeds the money supply"),
    };

    let dust_limit = destination.minimal_non_dust().to_sat();
    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|input| TxIn {
                previous_output: input.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::from_height(input.script_match.csv),
                witness: Witness::default(),
            })
            .collect(),
        output: vec![TxOut { value: Amount::ZERO, script_pubkey: destination }],
    };

    let witness_sizes = inputs.iter().map(|input| input.script_match.spend.witness_size());
    let weight = expected_sweep_weight(&tx, witness_sizes);
    let fee = match fee_for_weight(fee_rate_sat_per_vbyte, weight) {
        Some(fee) => fee,
        None => invalid_argument_err!("fee rate {} overflows", fee_rate_sat_per_vbyte),
    };
    if fee >= total {
        return Err(insufficient_value_error("fee exceeds the swept value", total, fee));
    }
    let value = total - fee;
    if value < dust_limit {
        return Err(insufficient_value_error(
            format!("sweep output of {} sat is below the dust limit {}", value, dust_limit),
            total,
            fee,
        ));
    }
    tx.output[0].value = Amount::from_sat(value);
    info!(
        "sweeping {} sat from {} inputs, fee {} sat for {} vbytes",
        total,
        inputs.len(),
        fee,
        weight_to_vsize(weight)
    );

    let prevouts: Vec<TxOut> = inputs.iter().map(MatchedInput::prevout).collect();
    let witnesses = {
        let mut cache = SighashCache::new(&tx);
        let mut witnesses = Vec::with_capacity(inputs.len());
        for (idx, input) in inputs.iter().enumerate() {
            let witness = sign_input(ctx, base, &mut cache, &prevouts, idx, input)
                .map_err(|e| e.prepend_msg(format!("input {}: ", input.outpoint)))?;
            witnesses.push(witness);
        }
        witnesses
    };
    for (idx, witness) in witnesses.into_iter().enumerate() {
        debug!("witness for input {}: {:?}", idx, DebugWitness(&witness));
        tx.input[idx].witness = witness;
    }

    for (idx, input) in inputs.iter().enumerate() {
        if let SpendPath::TapScript { .. } = input.script_match.spend {
            verify_taproot_input(ctx, &tx, idx, &prevouts)?;
        }
    }

    Ok(SweepTransaction { tx, fee: Amount::from_sat(fee), weight })
}

fn sign_input(
    ctx: &RecoveryContext,
    base: &Xpriv,
    cache: &mut SighashCache<&Transaction>,
    prevouts: &[TxOut],
    idx: usize,
    input: &MatchedInput,
) -> Result<Witness, RecoveryError> {
    let (_, base_secret) = derive_key_from_base(ctx, base, &input.key_locator)?;
    let privkey = derive_private_key(&ctx.secp_ctx, &input.commitment_point, &base_secret);
    let pubkey = PublicKey::from_secret_key(&ctx.secp_ctx, &privkey);
    if pubkey != input.script_match.keys.delayed_key.to_public_key() {
        invalid_witness_err!(
            "key {} tweaked by {} doesn't match the delayed key of the output",
            input.key_locator,
            input.commitment_point
        );
    }

    match &input.script_match.spend {
        SpendPath::Wsh { witness_script } => {
            let sighash = cache
                .p2wsh_signature_hash(idx, witness_script, input.value, EcdsaSighashType::All)
                .map_err(|e| invalid_witness_error(format!("sighash: {}", e)))?;
            let sig = ecdsa_sign(&ctx.secp_ctx, &privkey, &sighash);
            // the empty element selects the delayed branch
            Ok(Witness::from_slice(&[
                signature_to_bitcoin_vec(sig),
                vec![],
                witness_script.to_bytes(),
            ]))
        }
        SpendPath::TapScript { leaf_script, control_block, .. } => {
            let leaf_hash = TapLeafHash::from_script(leaf_script, LeafVersion::TapScript);
            let sighash = cache
                .taproot_script_spend_signature_hash(
                    idx,
                    &Prevouts::All(prevouts),
                    leaf_hash,
                    TapSighashType::Default,
                )
                .map_err(|e| invalid_witness_error(format!("sighash: {}", e)))?;
            let sig = tapscript_sign(&ctx.secp_ctx, &privkey, &sighash);
            Ok(Witness::from_slice(&[
                schnorr_signature_to_bitcoin_vec(sig),
                leaf_script.to_bytes(),
                control_block.serialize(),
            ]))
        }
    }
}

/// Check a tapscript spend of `tx`'s input `idx`: the control block commits
/// the leaf to the spent output key, and the signature verifies against the
/// key at the start of the leaf.
pub fn verify_taproot_input(
    ctx: &RecoveryContext,
    tx: &Transaction,
    idx: usize,
    prevouts: &[TxOut],
) -> Result<(), RecoveryError> {
    let prevout = match prevouts.get(idx) {
        Some(prevout) => prevout,
        None => invalid_witness_err!("no prevout for input {}", idx),
    };
    if !prevout.script_pubkey.is_p2tr() {
        invalid_witness_err!("input {} doesn't spend a taproot output", idx);
    }
    let witness = match tx.input.get(idx) {
        Some(input) => &input.witness,
        None => invalid_witness_err!("no input {} in a {} input tx", idx, tx.input.len()),
    };
    if witness.len() != 3 {
        invalid_witness_err!("expected 3 witness elements, got {}", witness.len());
    }
    let (sig, leaf, cb) = match (witness.nth(0), witness.nth(1), witness.nth(2)) {
        (Some(sig), Some(leaf), Some(cb)) => (sig, Script::from_bytes(leaf), cb),
        _ => invalid_witness_err!("missing witness elements"),
    };
    let parse_err = |e: String| invalid_witness_error(format!("input {}: {}", idx, e));

    let output_key = XOnlyPublicKey::from_slice(&prevout.script_pubkey.as_bytes()[2..34])
        .map_err(|e| parse_err(e.to_string()))?;
    let control_block = ControlBlock::decode(cb).map_err(|e| parse_err(e.to_string()))?;
    if !control_block.verify_taproot_commitment(&ctx.secp_ctx, output_key, leaf) {
        invalid_witness_err!("control block doesn't commit to the output key");
    }

    let leaf_bytes = leaf.as_bytes();
    if leaf_bytes.len() < 33 || leaf_bytes[0] != 0x20 {
        invalid_witness_err!("leaf doesn't start with a key push");
    }
    let signing_key =
        XOnlyPublicKey::from_slice(&leaf_bytes[1..33]).map_err(|e| parse_err(e.to_string()))?;
    let sig = schnorr::Signature::from_slice(sig).map_err(|e| parse_err(e.to_string()))?;
    let leaf_hash = TapLeafHash::from_script(leaf, control_block.leaf_version);
    let sighash = SighashCache::new(tx)
        .taproot_script_spend_signature_hash(
            idx,
            &Prevouts::All(prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(|e| parse_err(e.to_string()))?;
    let msg = Message::from_digest(sighash.to_byte_array());
    ctx.secp_ctx
        .verify_schnorr(&sig, &msg, &signing_key)
        .map_err(|e| parse_err(format!("signature: {}", e)))
}

/// Split a shared fee between two outputs.
///
/// Both pay half (ours the odd satoshi) when both stay at or above
/// `dust_limit`, otherwise the one output that can pays all of it.
/// Returns the new output values.
pub fn apportion_fee(
    fee: u64,
    ours: u64,
    theirs: u64,
    dust_limit: u64,
) -> Result<(u64, u64), RecoveryError> {
    let theirs_share = fee / 2;
    let ours_share = fee - theirs_share;
    let can_pay = |value: u64, share: u64| {
        share.checked_add(dust_limit).map_or(false, |needed| value >= needed)
    };

    if can_pay(ours, ours_share) && can_pay(theirs, theirs_share) {
        Ok((ours - ours_share, theirs - theirs_share))
    } else if can_pay(ours, fee) {
        Ok((ours - fee, theirs))
    } else if can_pay(theirs, fee) {
        Ok((ours, theirs - fee))
    } else {
        Err(fee_distribution_error(format!(
            "neither {} nor {} sat can pay a fee of {} sat above the dust limit {}",
            ours, theirs, fee, dust_limit
        )))
    }
}

use bitcoin::{Transaction, VarInt};

/// The maximum value of an input or output in satoshi
pub const MAX_VALUE_SAT: u64 = 21_000_000_0000_0000;

/// Size of the to_local script as budgeted by lnd's weight estimator
pub const TO_LOCAL_SCRIPT_SIZE: usize = 79;

/// Witness size of a to_local spend through the delayed (timeout) branch
pub const TO_LOCAL_TIMEOUT_WITNESS_SIZE: usize = //
    1 + // number of witness elements
    1 + 73 + // <delayed_sig> with its length
    1 + // empty vector selecting the OP_ELSE branch
    1 + TO_LOCAL_SCRIPT_SIZE; // witness script with its length

/// Witness size of a tapscript spend with a single schnorr signature.
///
/// `tree_depth` is the number of hashes in the control block's merkle path.
pub fn tapscript_witness_size(leaf_script_len: usize, tree_depth: usize) -> usize {
    let control_block_len = 33 + 32 * tree_depth;
    1 + // number of witness elements
        1 + 64 + // <sig> with SIGHASH_DEFAULT
        VarInt(leaf_script_len as u64).size() + leaf_script_len +
        VarInt(control_block_len as u64).size() + control_block_len
}

/// The expected weight of a sweep, given the unsigned transaction and the
/// witness size of each input.
/// Assumes all inputs are segwit.
pub fn expected_sweep_weight<I: IntoIterator<Item = usize>>(
    unsigned_tx: &Transaction,
    witness_sizes: I,
) -> u64 {
    // When calculating weight, add two for the flag bytes
    unsigned_tx.weight().to_wu() + 2 + witness_sizes.into_iter().sum::<usize>() as u64
}

/// Virtual size, rounded up
pub fn weight_to_vsize(weight: u64) -> u64 {
    (weight + 3) / 4
}

/// The fee for a weight at a rate in sat/vbyte
pub fn fee_for_weight(fee_rate_sat_per_vbyte: u64, weight: u64) -> Option<u64> {
    fee_rate_sat_per_vbyte.checked_mul(weight_to_vsize(weight))
}

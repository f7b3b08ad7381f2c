use core::str::FromStr;

use bitcoin::hashes::Hash;
use bitcoin::key::{TapTweak, XOnlyPublicKey};
use bitcoin::taproot::{ControlBlock, LeafVersion};
use bitcoin::{Address, Script, ScriptBuf, WScriptHash};
use tracing::*;

use crate::tx::script::{
    taproot_delay_leaf, taproot_revoke_leaf, tapscript_leaf_hash, to_local_script,
    CommitmentKeys, TaprootStrategy, ToLocalTemplate,
};
use crate::util::error::{
    invalid_argument_error, invalid_witness_error, not_found_error, RecoveryError,
};
use crate::util::transaction_utils::{tapscript_witness_size, TO_LOCAL_TIMEOUT_WITNESS_SIZE};
use crate::RecoveryContext;

/// Number of leading bytes compared before a full comparison
pub const MATCH_PREFIX_LEN: usize = 8;

/// The witness program of an output being recovered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    /// SHA-256 of the witness script
    P2wsh([u8; 32]),
    /// The x-only output key
    P2tr([u8; 32]),
}

/// An on-chain output whose spending parameters are to be reconstructed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetOutput {
    /// The output script as seen on chain
    pub script_pubkey: ScriptBuf,
    /// Its witness program
    pub kind: TargetKind,
}

impl TargetOutput {
    /// Classify an output script.  Only P2WSH and P2TR outputs can be commitment to_local outputs.
    pub fn from_script_pubkey(script_pubkey: &Script) -> Result<Self, RecoveryError> {
        let bytes = script_pubkey.as_bytes();
        let mut program = [0u8; 32];
        let kind = if script_pubkey.is_p2wsh() {
            program.copy_from_slice(&bytes[2..34]);
            TargetKind::P2wsh(program)
        } else if script_pubkey.is_p2tr() {
            program.copy_from_slice(&bytes[2..34]);
            TargetKind::P2tr(program)
        } else {
            invalid_argument_err!(
                "{} is neither a P2WSH nor a P2TR output",
                script_pubkey.to_hex_string()
            );
        };
        Ok(Self { script_pubkey: script_pubkey.to_owned(), kind })
    }

    /// Parse an address on the context's network
    pub fn from_address(ctx: &RecoveryContext, address: &str) -> Result<Self, RecoveryError> {
        let address = parse_address(ctx, address)?;
        Self::from_script_pubkey(&address.script_pubkey())
    }

    /// Whether this is a taproot output
    pub fn is_taproot(&self) -> bool {
        matches!(self.kind, TargetKind::P2tr(_))
    }
}

/// Parse an address and check it belongs to the context's network
pub fn parse_address(ctx: &RecoveryContext, address: &str) -> Result<Address, RecoveryError> {
    Address::from_str(address.trim())
        .map_err(|e| invalid_argument_error(format!("address {}: {}", address, e)))?
        .require_network(ctx.network)
        .map_err(|e| invalid_argument_error(format!("address {}: {}", address, e)))
}

/// How a matched output is spent through its delayed path
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpendPath {
    /// Segwit v0, revealing the witness script
    Wsh {
        /// The to_local witness script
        witness_script: ScriptBuf,
    },
    /// Tapscript, revealing the delay leaf
    TapScript {
        /// The tree layout that matched
        strategy: TaprootStrategy,
        /// The delay leaf
        leaf_script: ScriptBuf,
        /// Proof of the leaf's inclusion in the output key
        control_block: ControlBlock,
    },
}

impl SpendPath {
    /// The size of the witness spending through this path
    pub fn witness_size(&self) -> usize {
        match self {
            SpendPath::Wsh { .. } => TO_LOCAL_TIMEOUT_WITNESS_SIZE,
            SpendPath::TapScript { strategy, leaf_script, .. } => {
                tapscript_witness_size(leaf_script.len(), strategy.tree_depth())
            }
        }
    }
}

/// The reconstructed parameters of a to_local output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptMatch {
    /// The relative timeout
    pub csv: u16,
    /// The per-state keys
    pub keys: CommitmentKeys,
    /// The output script, equal to the target's
    pub script_pubkey: ScriptBuf,
    /// The spend path material
    pub spend: SpendPath,
}

/// Find the smallest relative timeout in `[min_csv, max_csv]` for which the
/// keys reproduce the target output.
///
/// Taproot targets try each of `strategies` per timeout, in order.
pub fn match_timeout(
    ctx: &RecoveryContext,
    keys: &CommitmentKeys,
    target: &TargetOutput,
    min_csv: u16,
    max_csv: u16,
    strategies: &[TaprootStrategy],
) -> Result<ScriptMatch, RecoveryError> {
    if min_csv > max_csv {
        invalid_argument_err!("empty timeout range [{}, {}]", min_csv, max_csv);
    }
    let found = match &target.kind {
        TargetKind::P2wsh(program) => match_p2wsh(keys, target, program, min_csv, max_csv)?,
        TargetKind::P2tr(output_key) => {
            if strategies.is_empty() {
                invalid_argument_err!("no taproot strategies to try");
            }
            match_p2tr(ctx, keys, target, output_key, min_csv, max_csv, strategies)?
        }
    };
    found.ok_or_else(|| {
        not_found_error(format!(
            "no timeout in [{}, {}] reproduces {}",
            min_csv,
            max_csv,
            target.script_pubkey.to_hex_string()
        ))
    })
}

fn match_p2wsh(
    keys: &CommitmentKeys,
    target: &TargetOutput,
    program: &[u8; 32],
    min_csv: u16,
    max_csv: u16,
) -> Result<Option<ScriptMatch>, RecoveryError> {
    let template = ToLocalTemplate::new(keys);
    for csv in min_csv..=max_csv {
        let hash = template.script_hash(csv);
        if hash[..MATCH_PREFIX_LEN] != program[..MATCH_PREFIX_LEN] || hash != *program {
            continue;
        }
        let witness_script = to_local_script(keys, csv);
        let script_pubkey = ScriptBuf::new_p2wsh(&WScriptHash::hash(witness_script.as_bytes()));
        if script_pubkey != target.script_pubkey {
            return Err(invalid_witness_error(format!(
                "to_local script for csv {} doesn't hash to the matched program",
                csv
            )));
        }
        debug!("matched P2WSH program {:?} with csv {}", log_bytes!(program[..]), csv);
        return Ok(Some(ScriptMatch {
            csv,
            keys: *keys,
            script_pubkey,
            spend: SpendPath::Wsh { witness_script },
        }));
    }
    Ok(None)
}

fn match_p2tr(
    ctx: &RecoveryContext,
    keys: &CommitmentKeys,
    target: &TargetOutput,
    output_key: &[u8; 32],
    min_csv: u16,
    max_csv: u16,
    strategies: &[TaprootStrategy],
) -> Result<Option<ScriptMatch>, RecoveryError> {
    let revoke_leaf = tapscript_leaf_hash(&taproot_revoke_leaf(keys));
    let internal_keys: Vec<(TaprootStrategy, XOnlyPublicKey)> =
        strategies.iter().map(|s| (*s, s.internal_key(keys))).collect();
    for csv in min_csv..=max_csv {
        let delay_leaf = tapscript_leaf_hash(&taproot_delay_leaf(keys, csv));
        for (strategy, internal_key) in &internal_keys {
            let root = strategy.merkle_root(delay_leaf, revoke_leaf);
            let (tweaked, _parity) = internal_key.tap_tweak(&ctx.secp_ctx, Some(root));
            let candidate = tweaked.to_x_only_public_key().serialize();
            if candidate[..MATCH_PREFIX_LEN] != output_key[..MATCH_PREFIX_LEN]
                || candidate != *output_key
            {
                continue;
            }
            return accept_p2tr(ctx, keys, target, csv, strategy).map(Some);
        }
    }
    Ok(None)
}

fn accept_p2tr(
    ctx: &RecoveryContext,
    keys: &CommitmentKeys,
    target: &TargetOutput,
    csv: u16,
    strategy: &TaprootStrategy,
) -> Result<ScriptMatch, RecoveryError> {
    let spend_info = strategy.spend_info(ctx, keys, csv)?;
    let script_pubkey = ScriptBuf::new_p2tr_tweaked(spend_info.output_key());
    if script_pubkey != target.script_pubkey {
        return Err(invalid_witness_error(format!(
            "taproot tree {} with csv {} doesn't commit to the matched key",
            strategy, csv
        )));
    }
    let leaf_script = taproot_delay_leaf(keys, csv);
    let control_block = spend_info
        .control_block(&(leaf_script.clone(), LeafVersion::TapScript))
        .ok_or_else(|| invalid_witness_error(format!("no control block for csv {}", csv)))?;
    debug!("matched P2TR output with csv {} and layout {}", csv, strategy);
    Ok(ScriptMatch {
        csv,
        keys: *keys,
        script_pubkey,
        spend: SpendPath::TapScript { strategy: *strategy, leaf_script, control_block },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecoveryErrorKind;
    use bitcoin::secp256k1::{PublicKey, SecretKey};
    use bitcoin::taproot::TapNodeHash;
    use bitcoin::Network;

    fn keys(ctx: &RecoveryContext, seed: u8) -> CommitmentKeys {
        let pubkey = |b: u8| {
            PublicKey::from_secret_key(&ctx.secp_ctx, &SecretKey::from_slice(&[b; 32]).unwrap())
        };
        CommitmentKeys::derive(ctx, &pubkey(seed), &pubkey(seed + 1), &pubkey(seed + 2))
    }

    fn p2wsh_target(keys: &CommitmentKeys, csv: u16) -> TargetOutput {
        let script = to_local_script(keys, csv);
        TargetOutput::from_script_pubkey(&ScriptBuf::new_p2wsh(&WScriptHash::hash(
            script.as_bytes(),
        )))
        .unwrap()
    }

    fn p2tr_target(
        ctx: &RecoveryContext,
        keys: &CommitmentKeys,
        csv: u16,
        strategy: TaprootStrategy,
    ) -> TargetOutput {
        let info = strategy.spend_info(ctx, keys, csv).unwrap();
        TargetOutput::from_script_pubkey(&ScriptBuf::new_p2tr_tweaked(info.output_key())).unwrap()
    }

    #[test_log::test]
    fn p2wsh_match_test() {
        let ctx = RecoveryContext::new(Network::Regtest);
        let keys = keys(&ctx, 0x10);
        for csv in [0u16, 1, 16, 144, 2016] {
            let target = p2wsh_target(&keys, csv);
            let found = match_timeout(&ctx, &keys, &target, 0, 2016, &[]).unwrap();
            assert_eq!(found.csv, csv);
            assert_eq!(found.script_pubkey, target.script_pubkey);
            assert_eq!(found.spend, SpendPath::Wsh { witness_script: to_local_script(&keys, csv) });
        }
    }

    #[test]
    fn boundary_test() {
        let ctx = RecoveryContext::new(Network::Regtest);
        let keys = keys(&ctx, 0x20);
        let target = p2wsh_target(&keys, 300);
        assert_eq!(match_timeout(&ctx, &keys, &target, 0, 300, &[]).unwrap().csv, 300);
        assert_eq!(match_timeout(&ctx, &keys, &target, 300, 300, &[]).unwrap().csv, 300);
        let err = match_timeout(&ctx, &keys, &target, 0, 299, &[]).unwrap_err();
        assert!(err.is_not_found());
        let err = match_timeout(&ctx, &keys, &target, 301, 2016, &[]).unwrap_err();
        assert!(err.is_not_found());

        let target = p2wsh_target(&keys, u16::MAX);
        let found = match_timeout(&ctx, &keys, &target, u16::MAX - 3, u16::MAX, &[]).unwrap();
        assert_eq!(found.csv, u16::MAX);
    }

    #[test]
    fn wrong_keys_test() {
        let ctx = RecoveryContext::new(Network::Regtest);
        let target = p2wsh_target(&keys(&ctx, 0x30), 144);
        let err = match_timeout(&ctx, &keys(&ctx, 0x40), &target, 0, 2016, &[]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test_log::test]
    fn p2tr_match_test() {
        let ctx = RecoveryContext::new(Network::Regtest);
        let keys = keys(&ctx, 0x50);
        let aux = TapNodeHash::from_byte_array([0x77; 32]);
        let strategies = TaprootStrategy::all(Some(aux));
        for strategy in strategies.iter() {
            let target = p2tr_target(&ctx, &keys, 144, *strategy);
            let found = match_timeout(&ctx, &keys, &target, 0, 2016, &strategies).unwrap();
            assert_eq!(found.csv, 144);
            let SpendPath::TapScript { strategy: matched, leaf_script, control_block } =
                found.spend
            else {
                panic!("expected a tapscript spend");
            };
            assert_eq!(matched, *strategy);
            assert_eq!(leaf_script, taproot_delay_leaf(&keys, 144));
            let TargetKind::P2tr(output_key) = target.kind else { panic!() };
            assert!(control_block.verify_taproot_commitment(
                &ctx.secp_ctx,
                XOnlyPublicKey::from_slice(&output_key).unwrap(),
                &leaf_script,
            ));
        }

        // the overlay layout can't be found without its aux leaf
        let target = p2tr_target(&ctx, &keys, 144, TaprootStrategy::NumsWithAuxLeaf(aux));
        let err = match_timeout(&ctx, &keys, &target, 0, 2016, &TaprootStrategy::candidates(None))
            .unwrap_err();
        assert!(err.is_not_found());

        // nor the opt-in layout by default
        let target = p2tr_target(&ctx, &keys, 144, TaprootStrategy::RevocationInternalKey);
        let err = match_timeout(&ctx, &keys, &target, 0, 2016, &TaprootStrategy::candidates(None))
            .unwrap_err();
        assert!(err.is_not_found());

        let err = match_timeout(&ctx, &keys, &target, 0, 2016, &[]).unwrap_err();
        assert!(matches!(err.kind, RecoveryErrorKind::InvalidArgument(_)));
    }

    #[test]
    fn witness_size_test() {
        let ctx = RecoveryContext::new(Network::Regtest);
        let keys = keys(&ctx, 0x60);
        let found = match_timeout(&ctx, &keys, &p2wsh_target(&keys, 144), 0, 2016, &[]).unwrap();
        assert_eq!(found.spend.witness_size(), 156);

        let strategies = TaprootStrategy::candidates(None);
        let target = p2tr_target(&ctx, &keys, 144, TaprootStrategy::NumsTwoLeaf);
        let found = match_timeout(&ctx, &keys, &target, 0, 2016, &strategies).unwrap();
        // 39 byte leaf, one hash in the control block
        assert_eq!(found.spend.witness_size(), 1 + 65 + 40 + 1 + 65);
    }

    #[test]
    fn classify_test() {
        let ctx = RecoveryContext::new(Network::Regtest);
        let target = TargetOutput::from_address(
            &ctx,
            "bcrt1qf9zv4qtxh27c954rhlzg4tx58xh0vgssuu0csrlep0jdnvlx9xesmcl5qx",
        )
        .unwrap();
        assert!(matches!(target.kind, TargetKind::P2wsh(_)));
        assert!(!target.is_taproot());

        let wrong_network = TargetOutput::from_address(
            &RecoveryContext::new(Network::Bitcoin),
            "bcrt1qf9zv4qtxh27c954rhlzg4tx58xh0vgssuu0csrlep0jdnvlx9xesmcl5qx",
        );
        assert!(wrong_network.is_err());

        let p2wpkh = ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::all_zeros());
        let err = TargetOutput::from_script_pubkey(&p2wpkh).unwrap_err();
        assert!(matches!(err.kind, RecoveryErrorKind::InvalidArgument(_)));

        let err = match_timeout(&ctx, &keys(&ctx, 1), &target, 10, 9, &[]).unwrap_err();
        assert!(matches!(err.kind, RecoveryErrorKind::InvalidArgument(_)));
    }
}

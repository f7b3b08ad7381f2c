use core::fmt;

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::key::{TapTweak, XOnlyPublicKey};
use bitcoin::opcodes::all::*;
use bitcoin::script::Builder;
use bitcoin::secp256k1::PublicKey;
use bitcoin::taproot::{LeafVersion, TapLeafHash, TapNodeHash, TaprootBuilder, TaprootSpendInfo};
use bitcoin::ScriptBuf;
use lightning::ln::chan_utils::get_revokeable_redeemscript;
use lightning::ln::channel_keys::{
    DelayedPaymentBasepoint, DelayedPaymentKey, RevocationBasepoint, RevocationKey,
};

use crate::util::error::{invalid_witness_error, RecoveryError};
use crate::RecoveryContext;

/// The internal key of lnd's simple taproot channel outputs, a point with no
/// known discrete log
pub const TAPROOT_NUMS_KEY: &str =
    "02dca094751109d0bd055d03565874e8276dd53e926b44e3bd1bb6bf4bc130a279";

/// The NUMS internal key as an x-only key
pub fn nums_internal_key() -> XOnlyPublicKey {
    let key: PublicKey = TAPROOT_NUMS_KEY.parse().expect("valid NUMS key");
    key.x_only_public_key().0
}

/// The per-state keys embedded in a to_local output
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitmentKeys {
    /// Key spending the output immediately, given the revocation secret
    pub revocation_key: RevocationKey,
    /// Our key spending the output after the relative timeout
    pub delayed_key: DelayedPaymentKey,
}

impl CommitmentKeys {
    /// Tweak the remote revocation basepoint and our delay basepoint by a
    /// commitment point
    pub fn derive(
        ctx: &RecoveryContext,
        remote_revocation_basepoint: &PublicKey,
        delay_basepoint: &PublicKey,
        commitment_point: &PublicKey,
    ) -> Self {
        let revocation_key = RevocationKey::from_basepoint(
            &ctx.secp_ctx,
            &RevocationBasepoint::from(*remote_revocation_basepoint),
            commitment_point,
        );
        let delayed_key = DelayedPaymentKey::from_basepoint(
            &ctx.secp_ctx,
            &DelayedPaymentBasepoint::from(*delay_basepoint),
            commitment_point,
        );
        Self { revocation_key, delayed_key }
    }

    fn delayed_xonly(&self) -> XOnlyPublicKey {
        XOnlyPublicKey::from(self.delayed_key.to_public_key())
    }

    fn revocation_xonly(&self) -> XOnlyPublicKey {
        XOnlyPublicKey::from(self.revocation_key.to_public_key())
    }
}

/// The BOLT-3 to_local witness script
pub fn to_local_script(keys: &CommitmentKeys, csv: u16) -> ScriptBuf {
    get_revokeable_redeemscript(&keys.revocation_key, csv, &keys.delayed_key)
}

/// The delayed spend leaf of a taproot to_local output:
/// `<delayed_key> OP_CHECKSIG <csv> OP_CSV OP_DROP`
pub fn taproot_delay_leaf(keys: &CommitmentKeys, csv: u16) -> ScriptBuf {
    Builder::new()
        .push_x_only_key(&keys.delayed_xonly())
        .push_opcode(OP_CHECKSIG)
        .push_int(csv as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .into_script()
}

/// The revocation leaf of a taproot to_local output:
/// `<delayed_key> OP_DROP <revocation_key> OP_CHECKSIG`
pub fn taproot_revoke_leaf(keys: &CommitmentKeys) -> ScriptBuf {
    Builder::new()
        .push_x_only_key(&keys.delayed_xonly())
        .push_opcode(OP_DROP)
        .push_x_only_key(&keys.revocation_xonly())
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

fn csv_push(csv: u16) -> ScriptBuf {
    Builder::new().push_int(csv as i64).into_script()
}

/// The to_local script split around its CSV push, so a scan over timeouts
/// can hash candidates without building scripts.
pub struct ToLocalTemplate {
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl ToLocalTemplate {
    /// Template for a set of keys
    pub fn new(keys: &CommitmentKeys) -> Self {
        let prefix = Builder::new()
            .push_opcode(OP_IF)
            .push_slice(&keys.revocation_key.to_public_key().serialize())
            .push_opcode(OP_ELSE)
            .into_bytes();
        let suffix = Builder::new()
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_slice(&keys.delayed_key.to_public_key().serialize())
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_CHECKSIG)
            .into_bytes();
        Self { prefix, suffix }
    }

    /// SHA-256 of the script for a timeout, i.e. the P2WSH program
    pub fn script_hash(&self, csv: u16) -> [u8; 32] {
        let mut engine = sha256::Hash::engine();
        engine.input(&self.prefix);
        engine.input(csv_push(csv).as_bytes());
        engine.input(&self.suffix);
        sha256::Hash::from_engine(engine).to_byte_array()
    }

    /// The full script for a timeout
    pub fn script(&self, csv: u16) -> ScriptBuf {
        let mut bytes = self.prefix.clone();
        bytes.extend_from_slice(csv_push(csv).as_bytes());
        bytes.extend_from_slice(&self.suffix);
        ScriptBuf::from_bytes(bytes)
    }
}

/// A way of assembling a taproot to_local output from its leaves.
///
/// The layouts seen in the wild were found empirically, so this list is
/// not known to be complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaprootStrategy {
    /// lnd simple taproot channels: the NUMS point as internal key, the
    /// delay and revocation leaves as siblings
    NumsTwoLeaf,
    /// Taproot overlay (asset) channels: the two-leaf branch paired with an
    /// auxiliary leaf committed by the overlay protocol
    NumsWithAuxLeaf(TapNodeHash),
    /// The revocation key as internal key and the delay leaf as the only
    /// leaf.  Not seen on chain, so only tried when asked for.
    RevocationInternalKey,
}

impl TaprootStrategy {
    /// The strategies to try by default, in order.  The overlay layout needs
    /// its aux leaf.
    pub fn candidates(aux_leaf: Option<TapNodeHash>) -> Vec<TaprootStrategy> {
        let mut strategies = vec![TaprootStrategy::NumsTwoLeaf];
        if let Some(aux) = aux_leaf {
            strategies.push(TaprootStrategy::NumsWithAuxLeaf(aux));
        }
        strategies
    }

    /// Every known layout, including the opt-in ones
    pub fn all(aux_leaf: Option<TapNodeHash>) -> Vec<TaprootStrategy> {
        let mut strategies = Self::candidates(aux_leaf);
        strategies.push(TaprootStrategy::RevocationInternalKey);
        strategies
    }

    /// The internal key of the output
    pub fn internal_key(&self, keys: &CommitmentKeys) -> XOnlyPublicKey {
        match self {
            TaprootStrategy::NumsTwoLeaf | TaprootStrategy::NumsWithAuxLeaf(_) => {
                nums_internal_key()
            }
            TaprootStrategy::RevocationInternalKey => keys.revocation_xonly(),
        }
    }

    /// Depth of the delay leaf, i.e. the number of hashes in its control block
    pub fn tree_depth(&self) -> usize {
        match self {
            TaprootStrategy::NumsTwoLeaf => 1,
            TaprootStrategy::NumsWithAuxLeaf(_) => 2,
            TaprootStrategy::RevocationInternalKey => 0,
        }
    }

    /// The merkle root, from the leaf hashes
    pub fn merkle_root(&self, delay_leaf: TapLeafHash, revoke_leaf: TapLeafHash) -> TapNodeHash {
        let two_leaf = || {
            TapNodeHash::from_node_hashes(
                TapNodeHash::from(delay_leaf),
                TapNodeHash::from(revoke_leaf),
            )
        };
        match self {
            TaprootStrategy::NumsTwoLeaf => two_leaf(),
            TaprootStrategy::NumsWithAuxLeaf(aux) => {
                TapNodeHash::from_node_hashes(two_leaf(), *aux)
            }
            TaprootStrategy::RevocationInternalKey => TapNodeHash::from(delay_leaf),
        }
    }

    /// The output key, from the leaf hashes
    pub fn output_key(
        &self,
        ctx: &RecoveryContext,
        keys: &CommitmentKeys,
        delay_leaf: TapLeafHash,
        revoke_leaf: TapLeafHash,
    ) -> XOnlyPublicKey {
        let root = self.merkle_root(delay_leaf, revoke_leaf);
        let (tweaked, _parity) = self.internal_key(keys).tap_tweak(&ctx.secp_ctx, Some(root));
        tweaked.to_x_only_public_key()
    }

    /// The full spend info for a timeout, as needed for signing
    pub fn spend_info(
        &self,
        ctx: &RecoveryContext,
        keys: &CommitmentKeys,
        csv: u16,
    ) -> Result<TaprootSpendInfo, RecoveryError> {
        let delay_leaf = taproot_delay_leaf(keys, csv);
        let builder = match self {
            TaprootStrategy::NumsTwoLeaf => TaprootBuilder::new()
                .add_leaf(1, delay_leaf)
                .and_then(|b| b.add_leaf(1, taproot_revoke_leaf(keys))),
            TaprootStrategy::NumsWithAuxLeaf(aux) => TaprootBuilder::new()
                .add_leaf(2, delay_leaf)
                .and_then(|b| b.add_leaf(2, taproot_revoke_leaf(keys)))
                .and_then(|b| b.add_hidden_node(1, *aux)),
            TaprootStrategy::RevocationInternalKey => TaprootBuilder::new().add_leaf(0, delay_leaf),
        }
        .map_err(|e| invalid_witness_error(format!("taproot tree for {}: {}", self, e)))?;
        builder
            .finalize(&ctx.secp_ctx, self.internal_key(keys))
            .map_err(|_| invalid_witness_error(format!("can't finalize taproot tree for {}", self)))
    }
}

impl fmt::Display for TaprootStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaprootStrategy::NumsTwoLeaf => write!(f, "nums-two-leaf"),
            TaprootStrategy::NumsWithAuxLeaf(aux) => write!(f, "nums-aux-leaf({})", aux),
            TaprootStrategy::RevocationInternalKey => write!(f, "revocation-internal-key"),
        }
    }
}

/// The leaf hash of a tapscript
pub fn tapscript_leaf_hash(script: &ScriptBuf) -> TapLeafHash {
    TapLeafHash::from_script(script, LeafVersion::TapScript)
}

use core::fmt;

use bitcoin::bip32::Xpriv;
use bitcoin::secp256k1::ecdh::SharedSecret;
use bitcoin::secp256k1::{PublicKey, SecretKey};
use lightning::ln::chan_utils::build_commitment_secret;
use tracing::*;

use crate::keys::{derive_key_from_base, KeyFamily, KeyLocator};
use crate::util::error::{exhausted_chain_error, invalid_argument_error, RecoveryError};
use crate::RecoveryContext;

/// The highest index a revocation chain can produce
pub const MAX_CHAIN_INDEX: u64 = (1 << 48) - 1;

/// A seeded generator of per-state revocation secrets.
///
/// Index 0 is the first state of the channel.  This maps onto the BOLT-3
/// generator, which counts down from `2^48 - 1`.
#[derive(Clone)]
pub struct RevocationProducer {
    root: [u8; 32],
}

impl RevocationProducer {
    /// A producer from its root secret
    pub fn new(root: [u8; 32]) -> Self {
        Self { root }
    }

    /// A producer seeded directly with a private key
    pub fn from_private_key(key: &SecretKey) -> Self {
        Self::new(key.secret_bytes())
    }

    /// A producer seeded with the ECDH shared secret of a private key and a
    /// public key, i.e. SHA-256 of the compressed shared point
    pub fn from_ecdh(key: &SecretKey, pubkey: &PublicKey) -> Self {
        Self::new(SharedSecret::new(pubkey, key).secret_bytes())
    }

    /// The revocation secret for a state
    pub fn at_index(&self, index: u64) -> Result<[u8; 32], RecoveryError> {
        if index > MAX_CHAIN_INDEX {
            return Err(exhausted_chain_error(index));
        }
        Ok(build_commitment_secret(&self.root, MAX_CHAIN_INDEX - index))
    }

    /// The commitment point for a state
    pub fn commitment_point(
        &self,
        ctx: &RecoveryContext,
        index: u64,
    ) -> Result<PublicKey, RecoveryError> {
        commitment_point(ctx, &self.at_index(index)?)
    }
}

// The root is secret material.
impl fmt::Debug for RevocationProducer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RevocationProducer").finish_non_exhaustive()
    }
}

/// The public point of a revocation secret
pub fn commitment_point(
    ctx: &RecoveryContext,
    secret: &[u8; 32],
) -> Result<PublicKey, RecoveryError> {
    let key = SecretKey::from_slice(secret)
        .map_err(|e| invalid_argument_error(format!("revocation secret: {}", e)))?;
    Ok(PublicKey::from_secret_key(&ctx.secp_ctx, &key))
}

/// How the root of a channel's revocation chain was constructed.
///
/// Which one a channel used is not recorded anywhere but in its backup, so
/// recovery tries [`RevocationScheme::DEFAULT_CANDIDATES`] in turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RevocationScheme {
    /// Root is the private key at the revocation root path
    LegacyPrivKey,
    /// Root is the ECDH secret of the revocation root key at
    /// `index + root_offset` and our own multisig key at
    /// `index + multisig_offset`.
    ///
    /// Different node versions assigned the two indices one apart, in both
    /// directions.
    Ecdh {
        /// Offset applied to the revocation root key index
        root_offset: u32,
        /// Offset applied to the multisig key index
        multisig_offset: u32,
    },
    /// Root is the ECDH secret of the revocation root key and an explicitly
    /// supplied multisig key
    EcdhWith(PublicKey),
}

impl RevocationScheme {
    /// The schemes tried by default, in order
    pub const DEFAULT_CANDIDATES: [RevocationScheme; 4] = [
        RevocationScheme::LegacyPrivKey,
        RevocationScheme::Ecdh { root_offset: 0, multisig_offset: 0 },
        RevocationScheme::Ecdh { root_offset: 1, multisig_offset: 0 },
        RevocationScheme::Ecdh { root_offset: 0, multisig_offset: 1 },
    ];
}

impl fmt::Display for RevocationScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RevocationScheme::LegacyPrivKey => write!(f, "legacy"),
            RevocationScheme::Ecdh { root_offset, multisig_offset } => {
                write!(f, "ecdh(root+{}, multisig+{})", root_offset, multisig_offset)
            }
            RevocationScheme::EcdhWith(pubkey) => write!(f, "ecdh({})", pubkey),
        }
    }
}

fn offset_index(index: u32, offset: u32) -> Result<u32, RecoveryError> {
    index
        .checked_add(offset)
        .ok_or_else(|| invalid_argument_error(format!("key index {} + {} overflow", index, offset)))
}

/// Build the revocation chain of the channel with key index `index`.
///
/// `base` is the node's base key, see [`crate::keys::base_key`].
pub fn build_chain(
    ctx: &RecoveryContext,
    base: &Xpriv,
    scheme: &RevocationScheme,
    index: u32,
) -> Result<RevocationProducer, RecoveryError> {
    let root_locator = |offset| -> Result<KeyLocator, RecoveryError> {
        Ok(KeyLocator::new(KeyFamily::RevocationRoot, offset_index(index, offset)?))
    };
    let producer = match scheme {
        RevocationScheme::LegacyPrivKey => {
            let (_, root_key) = derive_key_from_base(ctx, base, &root_locator(0)?)?;
            RevocationProducer::from_private_key(&root_key)
        }
        RevocationScheme::Ecdh { root_offset, multisig_offset } => {
            let (_, root_key) = derive_key_from_base(ctx, base, &root_locator(*root_offset)?)?;
            let multisig_locator =
                KeyLocator::new(KeyFamily::MultiSig, offset_index(index, *multisig_offset)?);
            let (multisig_pub, _) = derive_key_from_base(ctx, base, &multisig_locator)?;
            RevocationProducer::from_ecdh(&root_key, &multisig_pub)
        }
        RevocationScheme::EcdhWith(multisig_pub) => {
            let (_, root_key) = derive_key_from_base(ctx, base, &root_locator(0)?)?;
            RevocationProducer::from_ecdh(&root_key, multisig_pub)
        }
    };
    trace!("built revocation chain for key index {} with scheme {}", index, scheme);
    Ok(producer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{base_key, derive_key_lnd};
    use bitcoin::hashes::{sha256, Hash};
    use bitcoin::Network;

    // BOLT-3 appendix D generation tests, which count down from 2^48 - 1
    #[test]
    fn bolt3_vectors_test() {
        let producer = RevocationProducer::new([0xff; 32]);
        assert_eq!(
            hex::encode(producer.at_index(0).unwrap()),
            "7cc854b54e3e0dcdb010d7a3fee464a9687be6e8db3be6854c475621e007a5dc"
        );
        let producer = RevocationProducer::new([0x00; 32]);
        assert_eq!(
            hex::encode(producer.at_index(0).unwrap()),
            "02a40c85b6f28da08dfdbe0926c53fab2de6d28c10301f8f7c4073d5e42e3148"
        );
    }

    #[test]
    fn at_index_bounds_test() {
        let producer = RevocationProducer::new([0x42; 32]);
        // the last index derives the root itself
        assert_eq!(producer.at_index(MAX_CHAIN_INDEX).unwrap(), [0x42; 32]);
        let err = producer.at_index(MAX_CHAIN_INDEX + 1).unwrap_err();
        assert_eq!(err.kind, crate::RecoveryErrorKind::ExhaustedChain(MAX_CHAIN_INDEX + 1));
        assert_ne!(producer.at_index(1).unwrap(), producer.at_index(2).unwrap());
    }

    #[test]
    fn commitment_point_test() {
        let ctx = RecoveryContext::new(Network::Regtest);
        let producer = RevocationProducer::new([0x42; 32]);
        let secret = producer.at_index(5).unwrap();
        let expected =
            PublicKey::from_secret_key(&ctx.secp_ctx, &SecretKey::from_slice(&secret).unwrap());
        assert_eq!(producer.commitment_point(&ctx, 5).unwrap(), expected);
        assert!(commitment_point(&ctx, &[0u8; 32]).is_err());
    }

    #[test]
    fn ecdh_root_test() {
        let ctx = RecoveryContext::new(Network::Regtest);
        let key = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let other = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let other_pub = PublicKey::from_secret_key(&ctx.secp_ctx, &other);
        let producer = RevocationProducer::from_ecdh(&key, &other_pub);

        // sha256 of the compressed shared point
        let mut shared = other_pub;
        shared = shared.mul_tweak(&ctx.secp_ctx, &key.into()).unwrap();
        let expected = sha256::Hash::hash(&shared.serialize()).to_byte_array();
        assert_eq!(producer.root, expected);

        // symmetric
        let key_pub = PublicKey::from_secret_key(&ctx.secp_ctx, &key);
        assert_eq!(RevocationProducer::from_ecdh(&other, &key_pub).root, producer.root);
    }

    #[test_log::test]
    fn build_chain_schemes_test() {
        let ctx = RecoveryContext::new(Network::Regtest);
        let master = Xpriv::new_master(ctx.network, &[0x07; 32]).unwrap();
        let base = base_key(&ctx, &master).unwrap();

        let legacy = build_chain(&ctx, &base, &RevocationScheme::LegacyPrivKey, 3).unwrap();
        let (_, root_key) = derive_key_lnd(&ctx, &master, KeyFamily::RevocationRoot, 3).unwrap();
        assert_eq!(legacy.root, root_key.secret_bytes());

        let (multisig_pub, _) = derive_key_lnd(&ctx, &master, KeyFamily::MultiSig, 3).unwrap();
        let ecdh = build_chain(
            &ctx,
            &base,
            &RevocationScheme::Ecdh { root_offset: 0, multisig_offset: 0 },
            3,
        )
        .unwrap();
        let explicit =
            build_chain(&ctx, &base, &RevocationScheme::EcdhWith(multisig_pub), 3).unwrap();
        assert_eq!(ecdh.root, explicit.root);
        assert_ne!(ecdh.root, legacy.root);

        let (_, next_root) = derive_key_lnd(&ctx, &master, KeyFamily::RevocationRoot, 4).unwrap();
        let shifted = build_chain(
            &ctx,
            &base,
            &RevocationScheme::Ecdh { root_offset: 1, multisig_offset: 0 },
            3,
        )
        .unwrap();
        assert_eq!(shifted.root, RevocationProducer::from_ecdh(&next_root, &multisig_pub).root);

        let overflow = build_chain(
            &ctx,
            &base,
            &RevocationScheme::Ecdh { root_offset: 1, multisig_offset: 0 },
            u32::MAX,
        );
        assert!(overflow.is_err());
    }

    #[test]
    fn scheme_display_test() {
        let names: Vec<String> =
            RevocationScheme::DEFAULT_CANDIDATES.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "legacy",
                "ecdh(root+0, multisig+0)",
                "ecdh(root+1, multisig+0)",
                "ecdh(root+0, multisig+1)"
            ]
        );
    }
}

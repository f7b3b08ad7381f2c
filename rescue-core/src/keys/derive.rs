use core::fmt;
use core::str::FromStr;

use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{PublicKey, SecretKey};
use tracing::*;

use super::{KeyFamily, KeyLocator};
use crate::util::error::{invalid_argument_error, invalid_path_error, RecoveryError};
use crate::RecoveryContext;

/// The BIP-43 purpose of lnd's key tree
pub const BIP43_PURPOSE: u32 = 1017;

/// The branch all lnd family keys live under
const KEY_BRANCH: u32 = 0;

/// A node of a BIP-32 key tree, with or without its private half
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtendedKey {
    /// A private node
    Private(Xpriv),
    /// A public-only node
    Public(Xpub),
}

impl ExtendedKey {
    /// The public key of this node
    pub fn public_key(&self, ctx: &RecoveryContext) -> PublicKey {
        match self {
            ExtendedKey::Private(xprv) => xprv.private_key.public_key(&ctx.secp_ctx),
            ExtendedKey::Public(xpub) => xpub.public_key,
        }
    }

    /// The private key of this node, if any
    pub fn private_key(&self) -> Option<SecretKey> {
        match self {
            ExtendedKey::Private(xprv) => Some(xprv.private_key),
            ExtendedKey::Public(_) => None,
        }
    }

    /// The public-only version of this node
    pub fn neuter(&self, ctx: &RecoveryContext) -> Xpub {
        match self {
            ExtendedKey::Private(xprv) => Xpub::from_priv(&ctx.secp_ctx, xprv),
            ExtendedKey::Public(xpub) => *xpub,
        }
    }
}

impl fmt::Display for ExtendedKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExtendedKey::Private(xprv) => write!(f, "{}", xprv),
            ExtendedKey::Public(xpub) => write!(f, "{}", xpub),
        }
    }
}

impl FromStr for ExtendedKey {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(xprv) = Xpriv::from_str(s) {
            return Ok(ExtendedKey::Private(xprv));
        }
        Xpub::from_str(s)
            .map(ExtendedKey::Public)
            .map_err(|e| invalid_argument_error(format!("extended key: {}", e)))
    }
}

/// Parse a derivation path such as `m/1017'/1'/4'/0/7`.
///
/// Hardened elements are marked with `'` or `h`, the leading `m/` is optional.
pub fn parse_path(path: &str) -> Result<Vec<ChildNumber>, RecoveryError> {
    let trimmed = path.trim();
    let rest = match trimmed {
        "m" | "" => return Ok(Vec::new()),
        _ => trimmed.strip_prefix("m/").unwrap_or(trimmed),
    };
    rest.split('/')
        .map(|el| {
            ChildNumber::from_str(el)
                .map_err(|e| invalid_path_error(format!("{}: element '{}': {}", path, el, e)))
        })
        .collect()
}

/// Derive a descendant of `root` along `path`.
///
/// Fails with `InvalidPath` on a hardened step below a public-only node.
pub fn derive_path(
    ctx: &RecoveryContext,
    root: &ExtendedKey,
    path: &[ChildNumber],
) -> Result<ExtendedKey, RecoveryError> {
    match root {
        ExtendedKey::Private(xprv) => xprv
            .derive_priv(&ctx.secp_ctx, &path)
            .map(ExtendedKey::Private)
            .map_err(|e| invalid_path_error(format!("{:?}: {}", path, e))),
        ExtendedKey::Public(xpub) => {
            if let Some(el) = path.iter().find(|el| el.is_hardened()) {
                return Err(invalid_path_error(format!(
                    "hardened element {} can't be derived from a public key",
                    el
                )));
            }
            xpub.derive_pub(&ctx.secp_ctx, &path)
                .map(ExtendedKey::Public)
                .map_err(|e| invalid_path_error(format!("{:?}: {}", path, e)))
        }
    }
}

fn hardened(index: u32) -> Result<ChildNumber, RecoveryError> {
    ChildNumber::from_hardened_idx(index)
        .map_err(|e| invalid_path_error(format!("hardened index {}: {}", index, e)))
}

fn normal(index: u32) -> Result<ChildNumber, RecoveryError> {
    ChildNumber::from_normal_idx(index)
        .map_err(|e| invalid_path_error(format!("index {}: {}", index, e)))
}

/// The node's base key `m/1017'/<coin type>'`, the static prefix of all its
/// family keys.
pub fn base_key(ctx: &RecoveryContext, root: &Xpriv) -> Result<Xpriv, RecoveryError> {
    let path = [hardened(BIP43_PURPOSE)?, hardened(ctx.coin_type())?];
    root.derive_priv(&ctx.secp_ctx, &path)
        .map_err(|e| invalid_path_error(format!("base key: {}", e)))
}

/// Derive the key at `<base>/<family>'/0/<index>`.
///
/// `base` must already be the node's base key, see [`base_key`].
pub fn derive_key_from_base(
    ctx: &RecoveryContext,
    base: &Xpriv,
    locator: &KeyLocator,
) -> Result<(PublicKey, SecretKey), RecoveryError> {
    let path = [hardened(locator.family as u32)?, normal(KEY_BRANCH)?, normal(locator.index)?];
    let ext_prv = base
        .derive_priv(&ctx.secp_ctx, &path)
        .map_err(|e| invalid_path_error(format!("{}: {}", locator, e)))?;
    let ext_pub = Xpub::from_priv(&ctx.secp_ctx, &ext_prv);
    Ok((ext_pub.public_key, ext_prv.private_key))
}

/// Derive a family key from the root key
pub fn derive_key_lnd(
    ctx: &RecoveryContext,
    master: &Xpriv,
    family: KeyFamily,
    index: u32,
) -> Result<(PublicKey, SecretKey), RecoveryError> {
    let base = base_key(ctx, master)?;
    derive_key_from_base(ctx, &base, &KeyLocator::new(family, index))
}

/// The private key of a family key, derived from the root key
pub fn derive_private_key_at(
    ctx: &RecoveryContext,
    master: &Xpriv,
    family: KeyFamily,
    index: u32,
) -> Result<SecretKey, RecoveryError> {
    derive_key_lnd(ctx, master, family, index).map(|(_, secret)| secret)
}

/// The node identity key
pub fn node_identity_key(
    ctx: &RecoveryContext,
    master: &Xpriv,
) -> Result<(PublicKey, SecretKey), RecoveryError> {
    let key = derive_key_lnd(ctx, master, KeyFamily::NodeKey, 0)?;
    trace!("node identity key {}", key.0);
    Ok(key)
}

/// Check that a root key belongs to the context's network
pub fn check_network(ctx: &RecoveryContext, root: &Xpriv) -> Result<(), RecoveryError> {
    let expected = bitcoin::NetworkKind::from(ctx.network);
    if root.network != expected {
        return Err(invalid_argument_error(format!(
            "root key is for {:?} but the network is {}",
            root.network, ctx.network
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;

    struct ExpectedValues {
        master_key: &'static str,
        node_secret_key: &'static str,
        node_id: &'static str,
        funding_key: &'static str,
    }

    #[test_log::test]
    fn test_derivation() {
        let ctx = RecoveryContext::new(Network::Testnet);
        let expected = ExpectedValues {
            master_key: "tprv8ZgxMBicQKsPdDdJFAqvG3mt4VqsVV125X4vsor5NxK366upt6qvovLQqaCi5SJiCE1aLkt3HtxsnTpzeGu27kPC5RUCr4h3oPBPYnAvhdE",
            node_secret_key: "a0794f0889ab261bd7ebdd8f33bfcea8497a0c429c58bde6e60ef157923fa787",
            node_id: "02be197c34dccb4c23a6312404b78f8570519105f79dea0bdc947200354b6d1d34",
            funding_key: "78575e487b25b2cb527a0a67596841e4663e3b37c1da8015f290d1b951d701c2",
        };

        let seed = [0x01; 32];
        let master_key = Xpriv::new_master(ctx.network, &seed).unwrap();
        assert_eq!(master_key.to_string(), expected.master_key);

        let (node_id, node_secret_key) = node_identity_key(&ctx, &master_key).unwrap();
        assert_eq!(hex::encode(node_secret_key.secret_bytes()), expected.node_secret_key);
        assert_eq!(node_id.to_string(), expected.node_id);

        let funding_key = derive_private_key_at(&ctx, &master_key, KeyFamily::MultiSig, 0).unwrap();
        assert_eq!(hex::encode(funding_key.secret_bytes()), expected.funding_key);
    }

    #[test]
    fn test_generic_path_matches_family_path() {
        let ctx = RecoveryContext::new(Network::Regtest);
        let master = Xpriv::new_master(ctx.network, &[0x02; 32]).unwrap();
        let path = parse_path("m/1017'/1'/4'/0/7").unwrap();
        let child = derive_path(&ctx, &ExtendedKey::Private(master), &path).unwrap();
        let (pubkey, secret) = derive_key_lnd(&ctx, &master, KeyFamily::DelayBase, 7).unwrap();
        assert_eq!(child.private_key(), Some(secret));
        assert_eq!(child.public_key(&ctx), pubkey);

        // deterministic
        let again = derive_path(&ctx, &ExtendedKey::Private(master), &path).unwrap();
        assert_eq!(child, again);
    }

    #[test]
    fn test_parse_path() {
        let path = parse_path("m/1017h/0'/6'/0/0").unwrap();
        assert_eq!(
            path,
            vec![
                ChildNumber::from_hardened_idx(1017).unwrap(),
                ChildNumber::from_hardened_idx(0).unwrap(),
                ChildNumber::from_hardened_idx(6).unwrap(),
                ChildNumber::from_normal_idx(0).unwrap(),
                ChildNumber::from_normal_idx(0).unwrap(),
            ]
        );
        assert_eq!(parse_path("m").unwrap(), vec![]);
        assert_eq!(parse_path("1/2").unwrap().len(), 2);
        for bad in ["m/x", "m/1//2", "m/2147483648", "m/1'/"] {
            let err = parse_path(bad).unwrap_err();
            assert!(matches!(err.kind, crate::RecoveryErrorKind::InvalidPath(_)), "{}", bad);
        }
    }

    #[test]
    fn test_public_derivation() {
        let ctx = RecoveryContext::new(Network::Regtest);
        let master = Xpriv::new_master(ctx.network, &[0x03; 32]).unwrap();
        let private = ExtendedKey::Private(master);
        let public = ExtendedKey::Public(private.neuter(&ctx));

        let path = parse_path("m/0/5").unwrap();
        let from_private = derive_path(&ctx, &private, &path).unwrap();
        let from_public = derive_path(&ctx, &public, &path).unwrap();
        assert_eq!(from_private.public_key(&ctx), from_public.public_key(&ctx));
        assert_eq!(from_public.private_key(), None);

        let err = derive_path(&ctx, &public, &parse_path("m/0/5'").unwrap()).unwrap_err();
        assert!(matches!(err.kind, crate::RecoveryErrorKind::InvalidPath(_)));
    }

    #[test]
    fn test_extended_key_from_str() {
        let ctx = RecoveryContext::new(Network::Testnet);
        let master = Xpriv::new_master(ctx.network, &[0x01; 32]).unwrap();
        let parsed = ExtendedKey::from_str(&master.to_string()).unwrap();
        assert_eq!(parsed, ExtendedKey::Private(master));
        let xpub = parsed.neuter(&ctx);
        assert_eq!(ExtendedKey::from_str(&xpub.to_string()).unwrap(), ExtendedKey::Public(xpub));
        assert!(ExtendedKey::from_str("tprvnotakey").is_err());
    }

    #[test]
    fn test_check_network() {
        let master = Xpriv::new_master(Network::Testnet, &[0x01; 32]).unwrap();
        assert!(check_network(&RecoveryContext::new(Network::Regtest), &master).is_ok());
        assert!(check_network(&RecoveryContext::new(Network::Bitcoin), &master).is_err());
    }
}

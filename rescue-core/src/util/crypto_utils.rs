use bitcoin::hashes::Hash;
use bitcoin::secp256k1::constants::SCHNORR_SIGNATURE_SIZE;
use bitcoin::secp256k1::{self, ecdsa::Signature, schnorr, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SegwitV0Sighash, TapSighash};

use crate::util::error::{invalid_argument_error, RecoveryError};

/// Convert a [Signature] to Bitcoin signature bytes, with SIGHASH_ALL
pub fn signature_to_bitcoin_vec(sig: Signature) -> Vec<u8> {
    let mut sigvec = sig.serialize_der().to_vec();
    sigvec.push(EcdsaSighashType::All as u8);
    sigvec
}

/// Convert a schnorr signature to Bitcoin signature bytes, with SIGHASH_DEFAULT
pub fn schnorr_signature_to_bitcoin_vec(sig: schnorr::Signature) -> Vec<u8> {
    // taproot sighash type defaults to ALL
    let mut sigvec = Vec::with_capacity(SCHNORR_SIGNATURE_SIZE);
    sigvec.extend_from_slice(&sig[..]);
    sigvec
}

pub(crate) fn ecdsa_sign(
    secp_ctx: &Secp256k1<secp256k1::All>,
    privkey: &SecretKey,
    sighash: &SegwitV0Sighash,
) -> Signature {
    let message = Message::from_digest(sighash.to_byte_array());
    secp_ctx.sign_ecdsa(&message, privkey)
}

/// Sign a tapscript spend.  The key is used as-is, script path spends are not tweaked.
pub(crate) fn tapscript_sign(
    secp_ctx: &Secp256k1<secp256k1::All>,
    privkey: &SecretKey,
    sighash: &TapSighash,
) -> schnorr::Signature {
    let message = Message::from_digest(sighash.to_byte_array());
    let keypair = secp256k1::Keypair::from_secret_key(secp_ctx, privkey);
    secp_ctx.sign_schnorr_no_aux_rand(&message, &keypair)
}

/// Parse a compressed public key from hex
pub fn public_key_from_hex(s: &str) -> Result<PublicKey, RecoveryError> {
    let bytes = hex::decode(s.trim())
        .map_err(|e| invalid_argument_error(format!("public key {}: {}", s, e)))?;
    PublicKey::from_slice(&bytes)
        .map_err(|e| invalid_argument_error(format!("public key {}: {}", s, e)))
}

/// Generate a random seed
pub fn generate_seed<const N: usize>() -> [u8; N] {
    use secp256k1::rand::RngCore;
    let mut seed = [0; N];
    let mut rng = secp256k1::rand::rngs::OsRng;
    rng.fill_bytes(&mut seed);
    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::key::XOnlyPublicKey;

    #[test]
    fn test_schnorr_signature_to_bitcoin_vec() {
        let test_signature_bytes: Vec<u8> = vec![0; 64];

        let test_signature = schnorr::Signature::from_slice(&test_signature_bytes).unwrap();

        let result = schnorr_signature_to_bitcoin_vec(test_signature);

        assert_eq!(test_signature_bytes, result);
    }

    #[test]
    fn test_signature_to_bitcoin_vec() {
        let secp_ctx = Secp256k1::new();
        let key = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let sighash = SegwitV0Sighash::from_byte_array([0x22; 32]);
        let sig = ecdsa_sign(&secp_ctx, &key, &sighash);
        let vec = signature_to_bitcoin_vec(sig);
        assert_eq!(*vec.last().unwrap(), 0x01);
        assert_eq!(Signature::from_der(&vec[..vec.len() - 1]).unwrap(), sig);
    }

    #[test]
    fn test_tapscript_sign_verifies() {
        let secp_ctx = Secp256k1::new();
        // odd y to exercise the implicit negation
        for b in 1u8..4 {
            let key = SecretKey::from_slice(&[b; 32]).unwrap();
            let sighash = TapSighash::from_byte_array([0x33; 32]);
            let sig = tapscript_sign(&secp_ctx, &key, &sighash);
            let (xonly, _) = XOnlyPublicKey::from_keypair(&secp256k1::Keypair::from_secret_key(
                &secp_ctx, &key,
            ));
            let msg = Message::from_digest(sighash.to_byte_array());
            secp_ctx.verify_schnorr(&sig, &msg, &xonly).unwrap();
        }
    }

    #[test]
    fn test_public_key_from_hex() {
        let pk = public_key_from_hex(
            "03235261ed5aaaf9fec0e91d5e1a4d17f1a2c7442f1c43806d32c9bd34abd002a3",
        )
        .unwrap();
        assert_eq!(pk.serialize()[0], 0x03);
        assert!(public_key_from_hex("0323").is_err());
        assert!(public_key_from_hex("zz").is_err());
    }

    #[test]
    fn test_generate_seed() {
        let a: [u8; 16] = generate_seed();
        let b: [u8; 16] = generate_seed();
        assert_ne!(a, b);
    }
}

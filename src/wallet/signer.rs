// Bitcoin Dev Kit
// Written in 2020 by Alekos Filini <alekos.filini@gmail.com>
//
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Generalized signers
//!
//! Signatures for funding templates are produced outside of the coordinator: a [`Signer`] looks at
//! a template's PSBT and returns an [`InputSignature`] for every input it controls. The
//! coordinator verifies each signature before adding it to the template, so a signer can be a
//! remote device or a co-signer the node doesn't trust.
//!
//! ```
//! # use bitcoin::secp256k1::{Secp256k1, All};
//! # use bitcoin::Psbt;
//! # use lnfund::wallet::signer::*;
//! # #[derive(Debug)]
//! # struct CustomHSM;
//! # impl CustomHSM {
//! #     fn sign_input(&self, _psbt: &Psbt, _input: usize) -> Result<Option<InputSignature>, SignerError> {
//! #         Ok(None)
//! #     }
//! #     fn connect() -> Self {
//! #         CustomHSM
//! #     }
//! # }
//! #[derive(Debug)]
//! struct CustomSigner {
//!     device: CustomHSM,
//! }
//!
//! impl CustomSigner {
//!     fn connect() -> Self {
//!         CustomSigner { device: CustomHSM::connect() }
//!     }
//! }
//!
//! impl Signer for CustomSigner {
//!     fn sign_input(
//!         &self,
//!         psbt: &Psbt,
//!         input_index: usize,
//!         _secp: &Secp256k1<All>,
//!     ) -> Result<Option<InputSignature>, SignerError> {
//!         if input_index >= psbt.inputs.len() {
//!             return Err(SignerError::InputIndexOutOfRange);
//!         }
//!
//!         self.device.sign_input(psbt, input_index)
//!     }
//! }
//!
//! let custom_signer = CustomSigner::connect();
//! ```

use std::convert::TryFrom;
use std::fmt;

use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::psbt::{self, Psbt};
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{CompressedPublicKey, PublicKey, Script, ScriptBuf};

/// Secp256k1 context used for signing and verification
pub type SecpCtx = Secp256k1<All>;

/// Signing error
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SignerError {
    /// The private key is missing for the required public key
    MissingKey,
    /// The private key in use has the right fingerprint but derives differently than expected
    InvalidKey,
    /// Input index is out of range
    InputIndexOutOfRange,
    /// The `witness_utxo` field of the transaction is required to sign this input
    MissingWitnessUtxo,
    /// The `redeem_script` field of the transaction is required to sign this nested input
    MissingRedeemScript,
    /// The fingerprint and derivation path are missing from the psbt input
    MissingHDKeypath,
    /// The input doesn't pay to a segwit v0 key-hash, natively or nested
    UnsupportedScript,
    /// The input requests a sighash type other than a standard ECDSA one
    NonStandardSighash,
    /// Error computing the sighash
    Sighash(bitcoin::sighash::P2wpkhError),
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for SignerError {}

impl_error!(bitcoin::sighash::P2wpkhError, Sighash, SignerError);

/// A signature for one input of a template, along with the key that made it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSignature {
    /// Index of the signed input
    pub input_index: usize,
    /// Key the signature verifies against, its hash must match the input's script
    pub public_key: PublicKey,
    /// ECDSA signature and sighash flag
    pub signature: ecdsa::Signature,
}

/// Trait for signers
///
/// This trait can be implemented to provide customized signers to the coordinator. For an example
/// see [`this module`](crate::wallet::signer)'s documentation.
pub trait Signer: fmt::Debug + Send + Sync {
    /// Sign one input of a PSBT
    ///
    /// Returns `Ok(None)` if the input isn't controlled by this signer, so that several signers
    /// can take turns on the same template.
    fn sign_input(
        &self,
        psbt: &Psbt,
        input_index: usize,
        secp: &SecpCtx,
    ) -> Result<Option<InputSignature>, SignerError>;
}

/// Signer holding a single private key
///
/// It only signs inputs that pay to its key: if an input lists derivation info, its public key
/// must be there, otherwise the input's P2WPKH program must be the hash of its key.
pub struct SingleKeySigner {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl fmt::Debug for SingleKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleKeySigner")
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl SingleKeySigner {
    /// Create a signer for `secret_key`
    pub fn new(secret_key: SecretKey, secp: &SecpCtx) -> Self {
        SingleKeySigner {
            secret_key,
            public_key: PublicKey::new(secret_key.public_key(secp)),
        }
    }

    /// The compressed public key of the signer
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    fn controls(&self, input: &psbt::Input, program: &Script) -> bool {
        if input.bip32_derivation.is_empty() {
            key_pays_to(&self.public_key, program)
        } else {
            input.bip32_derivation.contains_key(&self.public_key.inner)
        }
    }
}

impl Signer for SingleKeySigner {
    fn sign_input(
        &self,
        psbt: &Psbt,
        input_index: usize,
        secp: &SecpCtx,
    ) -> Result<Option<InputSignature>, SignerError> {
        let input = psbt
            .inputs
            .get(input_index)
            .ok_or(SignerError::InputIndexOutOfRange)?;
        if input.partial_sigs.contains_key(&self.public_key) {
            return Ok(None);
        }

        let program = witness_program(input)?;
        if !self.controls(input, &program) {
            return Ok(None);
        }
        if !key_pays_to(&self.public_key, &program) {
            return Err(SignerError::InvalidKey);
        }

        let (message, sighash_type) = p2wpkh_sighash(psbt, input_index)?;
        let signature = secp.sign_ecdsa(&message, &self.secret_key);

        Ok(Some(InputSignature {
            input_index,
            public_key: self.public_key,
            signature: ecdsa::Signature {
                signature,
                sighash_type,
            },
        }))
    }
}

/// The P2WPKH program an input spends: its output script, or the redeem script of a nested input
pub(crate) fn witness_program(input: &psbt::Input) -> Result<ScriptBuf, SignerError> {
    let witness_utxo = input
        .witness_utxo
        .as_ref()
        .ok_or(SignerError::MissingWitnessUtxo)?;
    let script_pubkey = &witness_utxo.script_pubkey;

    if script_pubkey.is_p2wpkh() {
        Ok(script_pubkey.clone())
    } else if script_pubkey.is_p2sh() {
        match &input.redeem_script {
            Some(redeem)
                if redeem.is_p2wpkh() && ScriptBuf::new_p2sh(&redeem.script_hash()) == *script_pubkey =>
            {
                Ok(redeem.clone())
            }
            _ => Err(SignerError::MissingRedeemScript),
        }
    } else {
        Err(SignerError::UnsupportedScript)
    }
}

/// Whether `program` is the P2WPKH program of `public_key`
pub(crate) fn key_pays_to(public_key: &PublicKey, program: &Script) -> bool {
    CompressedPublicKey::try_from(*public_key)
        .map(|pk| ScriptBuf::new_p2wpkh(&pk.wpubkey_hash()) == *program)
        .unwrap_or(false)
}

/// BIP143 sighash of a P2WPKH input (native or nested) and the sighash type it commits to
pub(crate) fn p2wpkh_sighash(
    psbt: &Psbt,
    input_index: usize,
) -> Result<(Message, EcdsaSighashType), SignerError> {
    if input_index >= psbt.inputs.len() || input_index >= psbt.unsigned_tx.input.len() {
        return Err(SignerError::InputIndexOutOfRange);
    }

    let input = &psbt.inputs[input_index];
    let sighash_type = input
        .sighash_type
        .map(|t| t.ecdsa_hash_ty())
        .transpose()
        .map_err(|_| SignerError::NonStandardSighash)?
        .unwrap_or(EcdsaSighashType::All);
    let program = witness_program(input)?;
    let value = input
        .witness_utxo
        .as_ref()
        .map(|utxo| utxo.value)
        .ok_or(SignerError::MissingWitnessUtxo)?;

    let sighash = SighashCache::new(&psbt.unsigned_tx).p2wpkh_signature_hash(
        input_index,
        &program,
        value,
        sighash_type,
    )?;

    Ok((Message::from_digest(sighash.to_byte_array()), sighash_type))
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use bitcoin::absolute::LockTime;
    use bitcoin::bip32::{DerivationPath, Fingerprint};
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Transaction, TxIn, TxOut, WScriptHash};

    use super::*;

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    fn p2wpkh(public_key: &PublicKey) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&CompressedPublicKey::try_from(*public_key).unwrap().wpubkey_hash())
    }

    fn get_test_psbt(script_pubkey: ScriptBuf) -> Psbt {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::from_str(
                    "0f60fdd185542f2c6ea19030b0796051e7772b6026dd5ddccd7a2f93b73e6fc2:0",
                )
                .unwrap(),
                ..Default::default()
            }],
            output: vec![TxOut {
                value: Amount::from_sat(90_000),
                script_pubkey: ScriptBuf::new_p2wsh(&WScriptHash::all_zeros()),
            }],
        };

        let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
        psbt.inputs[0].witness_utxo = Some(TxOut {
            value: Amount::from_sat(100_000),
            script_pubkey,
        });

        psbt
    }

    #[test]
    fn test_sign_p2wpkh_input() {
        let secp = Secp256k1::new();
        let signer = SingleKeySigner::new(key(1), &secp);
        let psbt = get_test_psbt(p2wpkh(&signer.public_key()));

        let sig = signer.sign_input(&psbt, 0, &secp).unwrap().unwrap();
        assert_eq!(sig.input_index, 0);
        assert_eq!(sig.public_key, signer.public_key());
        assert_eq!(sig.signature.sighash_type, EcdsaSighashType::All);

        let (message, _) = p2wpkh_sighash(&psbt, 0).unwrap();
        secp.verify_ecdsa(&message, &sig.signature.signature, &sig.public_key.inner)
            .unwrap();
    }

    #[test]
    fn test_sign_nested_input() {
        let secp = Secp256k1::new();
        let signer = SingleKeySigner::new(key(1), &secp);
        let redeem = p2wpkh(&signer.public_key());
        let mut psbt = get_test_psbt(ScriptBuf::new_p2sh(&redeem.script_hash()));

        assert_eq!(
            signer.sign_input(&psbt, 0, &secp),
            Err(SignerError::MissingRedeemScript)
        );

        psbt.inputs[0].redeem_script = Some(redeem);
        assert!(signer.sign_input(&psbt, 0, &secp).unwrap().is_some());
    }

    #[test]
    fn test_refuse_other_key() {
        let secp = Secp256k1::new();
        let signer = SingleKeySigner::new(key(1), &secp);
        let other = SingleKeySigner::new(key(2), &secp);
        let mut psbt = get_test_psbt(p2wpkh(&other.public_key()));

        assert_eq!(signer.sign_input(&psbt, 0, &secp), Ok(None));

        // derivation info for another key: not ours either
        let mut derivation = BTreeMap::new();
        derivation.insert(
            other.public_key().inner,
            (
                Fingerprint::from([0u8; 4]),
                DerivationPath::from_str("m/84'/1'/0'/0/0").unwrap(),
            ),
        );
        psbt.inputs[0].bip32_derivation = derivation;
        assert_eq!(signer.sign_input(&psbt, 0, &secp), Ok(None));
    }

    #[test]
    fn test_derivation_for_key_that_doesnt_pay() {
        let secp = Secp256k1::new();
        let signer = SingleKeySigner::new(key(1), &secp);
        let other = SingleKeySigner::new(key(2), &secp);
        let mut psbt = get_test_psbt(p2wpkh(&other.public_key()));

        psbt.inputs[0].bip32_derivation.insert(
            signer.public_key().inner,
            (
                Fingerprint::from([0u8; 4]),
                DerivationPath::from_str("m/84'/1'/0'/0/0").unwrap(),
            ),
        );
        assert_eq!(
            signer.sign_input(&psbt, 0, &secp),
            Err(SignerError::InvalidKey)
        );
    }

    #[test]
    fn test_missing_material() {
        let secp = Secp256k1::new();
        let signer = SingleKeySigner::new(key(1), &secp);
        let mut psbt = get_test_psbt(p2wpkh(&signer.public_key()));
        psbt.inputs[0].witness_utxo = None;

        assert_eq!(
            signer.sign_input(&psbt, 0, &secp),
            Err(SignerError::MissingWitnessUtxo)
        );
        assert_eq!(
            signer.sign_input(&psbt, 1, &secp),
            Err(SignerError::InputIndexOutOfRange)
        );
    }

    #[test]
    fn test_unsupported_script() {
        let secp = Secp256k1::new();
        let signer = SingleKeySigner::new(key(1), &secp);
        let psbt = get_test_psbt(ScriptBuf::new_p2wsh(&WScriptHash::all_zeros()));

        assert_eq!(
            signer.sign_input(&psbt, 0, &secp),
            Err(SignerError::UnsupportedScript)
        );
    }

    #[test]
    fn test_already_signed_input_is_skipped() {
        let secp = Secp256k1::new();
        let signer = SingleKeySigner::new(key(1), &secp);
        let mut psbt = get_test_psbt(p2wpkh(&signer.public_key()));

        let sig = signer.sign_input(&psbt, 0, &secp).unwrap().unwrap();
        psbt.inputs[0]
            .partial_sigs
            .insert(sig.public_key, sig.signature);

        assert_eq!(signer.sign_input(&psbt, 0, &secp), Ok(None));
    }
}

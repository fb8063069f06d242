#![allow(unused)]
use std::convert::TryFrom;
use std::str::FromStr;
use std::sync::Arc;

use bitcoin::bip32::{DerivationPath, Fingerprint};
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::sighash::SighashCache;
use bitcoin::{
    Amount, CompressedPublicKey, OutPoint, ScriptBuf, Transaction, TxOut, WPubkeyHash,
    WScriptHash,
};

use lnfund::database::{BatchDatabase, MemoryDatabase};
use lnfund::logger::GlobalLogger;
use lnfund::signer::SingleKeySigner;
use lnfund::wallet::source::{MemoryUtxoSource, StaticFeeEstimator};
use lnfund::wallet::time::ManualClock;
use lnfund::{Coin, FundingConfig, FundingCoordinator, FundingRequest, KeyOrigin, FEE_PER_KW_FLOOR};

pub const START_TIME: u64 = 1_600_000_000;

pub fn init_logger() {
    let _ = env_logger::try_init();
}

pub fn signer(byte: u8) -> SingleKeySigner {
    SingleKeySigner::new(SecretKey::from_slice(&[byte; 32]).unwrap(), &Secp256k1::new())
}

pub fn outpoint(vout: u32) -> OutPoint {
    OutPoint::from_str(&format!(
        "9a3e5c7b1d2f4e6a8c0b1d3f5e7a9c2b4d6f8e0a1c3b5d7f9e2a4c6b8d0f1e3a:{}",
        vout
    ))
    .unwrap()
}

pub fn channel_script() -> ScriptBuf {
    ScriptBuf::new_p2wsh(&WScriptHash::all_zeros())
}

pub fn change_script() -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros())
}

pub fn p2wpkh(signer: &SingleKeySigner) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(
        &CompressedPublicKey::try_from(signer.public_key())
            .unwrap()
            .wpubkey_hash(),
    )
}

/// A confirmed P2WPKH coin paying to `signer`, with its derivation info
pub fn wallet_coin(signer: &SingleKeySigner, vout: u32, value: u64) -> Coin {
    Coin::new(
        outpoint(vout),
        TxOut {
            value: Amount::from_sat(value),
            script_pubkey: p2wpkh(signer),
        },
    )
    .with_key_origin(KeyOrigin {
        public_key: signer.public_key().inner,
        source: (
            Fingerprint::from([0xde, 0xad, 0xbe, 0xef]),
            DerivationPath::from_str(&format!("m/84'/1'/0'/0/{}", vout)).unwrap(),
        ),
    })
}

/// Same as [`wallet_coin`], nested in P2SH
pub fn nested_coin(signer: &SingleKeySigner, vout: u32, value: u64) -> Coin {
    let mut coin = wallet_coin(signer, vout, value);
    coin.txout.script_pubkey = ScriptBuf::new_p2sh(&p2wpkh(signer).script_hash());
    coin
}

pub fn get_coordinator<D: BatchDatabase>(
    coins: Vec<Coin>,
    store: D,
) -> (FundingCoordinator<MemoryUtxoSource, D>, Arc<ManualClock>) {
    init_logger();

    let source = MemoryUtxoSource::new(change_script());
    for coin in coins {
        source.add_coin(coin).unwrap();
    }

    let clock = Arc::new(ManualClock::new(START_TIME));
    let coordinator = FundingCoordinator::new(
        source,
        StaticFeeEstimator(FEE_PER_KW_FLOOR),
        store,
        clock.clone(),
        FundingConfig::default(),
        GlobalLogger::handle(),
    );

    (coordinator, clock)
}

pub fn get_memory_coordinator(
    coins: Vec<Coin>,
) -> (
    FundingCoordinator<MemoryUtxoSource, MemoryDatabase>,
    Arc<ManualClock>,
) {
    get_coordinator(coins, MemoryDatabase::new())
}

pub fn pay_to_channel(amount: u64) -> FundingRequest {
    FundingRequest::with_recipients(vec![(channel_script(), Amount::from_sat(amount))])
}

/// Check that input `index` of `tx` carries a valid P2WPKH signature for `prevout`
pub fn verify_input(tx: &Transaction, index: usize, prevout: &TxOut) {
    let secp = Secp256k1::verification_only();
    let witness = &tx.input[index].witness;
    assert_eq!(witness.len(), 2, "input {} isn't a key-hash spend", index);

    let signature = ecdsa::Signature::from_slice(&witness[0]).unwrap();
    let public_key = CompressedPublicKey::from_slice(&witness[1]).unwrap();
    let program = ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash());

    if prevout.script_pubkey.is_p2sh() {
        assert_eq!(
            prevout.script_pubkey,
            ScriptBuf::new_p2sh(&program.script_hash())
        );
    } else {
        assert_eq!(prevout.script_pubkey, program);
    }

    let sighash = SighashCache::new(tx)
        .p2wpkh_signature_hash(index, &program, prevout.value, signature.sighash_type)
        .unwrap();
    let message = Message::from_digest(sighash.to_byte_array());
    secp.verify_ecdsa(&message, &signature.signature, &public_key.0)
        .unwrap();
}

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

use std::convert::TryInto;
use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::KeySource;
use bitcoin::hex::{DisplayHex, FromHex};
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Amount, OutPoint, TxOut};

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Fee rate
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
// Internally stored as satoshi/kw (1000 weight units)
pub struct FeeRate(u64);

/// The lowest fee rate a relaying node will accept, 1 sat/vbyte rounded up to the nearest kw
pub const FEE_PER_KW_FLOOR: FeeRate = FeeRate(253);

impl FeeRate {
    /// Create a new instance of [`FeeRate`] given a fee rate in satoshi/kw
    pub const fn from_sat_per_kwu(sat_per_kwu: u64) -> Self {
        FeeRate(sat_per_kwu)
    }

    /// Create a new instance of [`FeeRate`] given a fee rate in satoshi/vbyte
    pub const fn from_sat_per_vb(sat_per_vb: u64) -> Self {
        FeeRate(sat_per_vb * 250)
    }

    /// Create a new [`FeeRate`] with the default min relay fee value
    pub const fn default_min_relay_fee() -> Self {
        FEE_PER_KW_FLOOR
    }

    /// Return the value as satoshi/kw
    pub fn as_sat_per_kwu(&self) -> u64 {
        self.0
    }

    /// Return the value as satoshi/vbyte, rounded down
    pub fn as_sat_per_vb(&self) -> u64 {
        self.0 / 250
    }

    /// Fee to pay for a transaction of `weight` weight units at this rate
    pub fn fee_for_weight(&self, weight: u64) -> Amount {
        Amount::from_sat(self.0.saturating_mul(weight) / 1000)
    }
}

impl std::default::Default for FeeRate {
    fn default() -> Self {
        FeeRate::default_min_relay_fee()
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat/kw", self.0)
    }
}

/// Derivation info of the key that controls a [`Coin`]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyOrigin {
    /// Public key the output pays to
    pub public_key: PublicKey,
    /// Master fingerprint and derivation path of `public_key`
    pub source: KeySource,
}

/// An unspent output that can be used to fund a transaction.
///
/// This doesn't need to be owned by the internal wallet: it may also come from a watch-only source.
/// Selection only looks at the outpoint and the output, `confirmations` and `key_origin` are used
/// to order candidates and to prepare the inputs for signing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    /// Reference to a transaction output
    pub outpoint: OutPoint,
    /// Transaction output
    pub txout: TxOut,
    /// Number of confirmations, `0` if unconfirmed
    pub confirmations: u32,
    /// Derivation info required to sign a spend of this coin
    pub key_origin: Option<KeyOrigin>,
}

impl Coin {
    /// Create a confirmed [`Coin`] without derivation info
    pub fn new(outpoint: OutPoint, txout: TxOut) -> Self {
        Coin {
            outpoint,
            txout,
            confirmations: 1,
            key_origin: None,
        }
    }

    /// Set the number of confirmations
    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Attach the derivation info of the key controlling the output
    pub fn with_key_origin(mut self, key_origin: KeyOrigin) -> Self {
        self.key_origin = Some(key_origin);
        self
    }

    /// Value of the output
    pub fn value(&self) -> Amount {
        self.txout.value
    }
}

/// Opaque 32-byte identifier of a lease, shared by every output leased by one funding attempt
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeaseId(pub [u8; 32]);

impl LeaseId {
    /// Generate a fresh random id
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        LeaseId(bytes)
    }

    /// Return the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..].to_lower_hex_string())
    }
}

impl FromStr for LeaseId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = Vec::<u8>::from_hex(s)
            .map_err(|e| Error::Generic(format!("invalid lease id `{}`: {}", s, e)))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Generic(format!("lease id `{}` is not 32 bytes", s)))?;

        Ok(LeaseId(array))
    }
}

impl Serialize for LeaseId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LeaseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        LeaseId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A time-bounded exclusive reservation on an output
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Lease holding the output
    pub id: LeaseId,
    /// The leased output
    pub outpoint: OutPoint,
    /// Unix timestamp (seconds) at which the lease stops being live
    pub expires_at: u64,
}

impl Lease {
    /// Whether the lease is still live at unix time `now`
    pub fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_store_feerate_in_const() {
        const _MY_RATE: FeeRate = FeeRate::from_sat_per_vb(10);
        const _MIN_RELAY: FeeRate = FeeRate::default_min_relay_fee();
    }

    #[test]
    fn test_fee_from_sats_vbyte() {
        let fee = FeeRate::from_sat_per_vb(4);
        assert_eq!(fee.as_sat_per_kwu(), 1000);
        assert_eq!(fee.as_sat_per_vb(), 4);
    }

    #[test]
    fn test_fee_for_weight_rounds_down() {
        let fee = FeeRate::from_sat_per_kwu(253);
        assert_eq!(fee.fee_for_weight(1000), Amount::from_sat(253));
        assert_eq!(fee.fee_for_weight(999), Amount::from_sat(252));
        assert_eq!(fee.fee_for_weight(0), Amount::ZERO);
    }

    #[test]
    fn test_lease_id_hex() {
        let id = LeaseId([0xab; 32]);
        let s = id.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.starts_with("abab"));
        assert_eq!(LeaseId::from_str(&s).unwrap(), id);

        assert!(LeaseId::from_str("abab").is_err());
        assert!(LeaseId::from_str("zz").is_err());
    }

    #[test]
    fn test_lease_id_json() {
        let id = LeaseId::random();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        assert_eq!(serde_json::from_str::<LeaseId>(&json).unwrap(), id);
    }

    #[test]
    fn test_lease_liveness() {
        let lease = Lease {
            id: LeaseId([1; 32]),
            outpoint: OutPoint::null(),
            expires_at: 100,
        };
        assert!(lease.is_live(99));
        assert!(!lease.is_live(100));
    }
}

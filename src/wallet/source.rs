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

//! Wallet collaborators
//!
//! The coordinator doesn't own a wallet: it reads spendable outputs from a [`UtxoSource`] and fee
//! rates from a [`FeeEstimator`]. Both are plain synchronous traits, an implementation backed by an
//! asynchronous service is expected to block on it.

use std::sync::RwLock;

use bitcoin::ScriptBuf;

use crate::error::Error;
use crate::types::{Coin, FeeRate};

/// Name of the account coins belong to when none is given
pub const DEFAULT_ACCOUNT: &str = "default";

/// Source of the wallet's unspent outputs
pub trait UtxoSource: Send + Sync {
    /// Unspent outputs with at least `min_confs` and at most `max_confs` confirmations, optionally
    /// restricted to one account
    fn list_unspent(
        &self,
        min_confs: u32,
        max_confs: u32,
        account: Option<&str>,
    ) -> Result<Vec<Coin>, Error>;

    /// A fresh script to send change to
    fn change_script(&self, account: Option<&str>) -> Result<ScriptBuf, Error>;
}

/// Source of fee rates
pub trait FeeEstimator: Send + Sync {
    /// Fee rate for a transaction to confirm within `target_conf` blocks
    fn estimate_fee_rate(&self, target_conf: u32) -> Result<FeeRate, Error>;
}

/// [`FeeEstimator`] returning the same rate for every target
#[derive(Debug, Clone, Copy)]
pub struct StaticFeeEstimator(pub FeeRate);

impl FeeEstimator for StaticFeeEstimator {
    fn estimate_fee_rate(&self, _target_conf: u32) -> Result<FeeRate, Error> {
        Ok(self.0)
    }
}

/// In-memory [`UtxoSource`]
///
/// This can be used by tests, or to fund templates from a set of outputs that's known upfront.
#[derive(Debug)]
pub struct MemoryUtxoSource {
    coins: RwLock<Vec<(String, Coin)>>,
    change_script: ScriptBuf,
}

impl MemoryUtxoSource {
    /// Create an empty source, sending change to `change_script`
    pub fn new(change_script: ScriptBuf) -> Self {
        MemoryUtxoSource {
            coins: RwLock::new(vec![]),
            change_script,
        }
    }

    /// Add a coin to the default account
    pub fn add_coin(&self, coin: Coin) -> Result<(), Error> {
        self.add_coin_to(DEFAULT_ACCOUNT, coin)
    }

    /// Add a coin to `account`
    pub fn add_coin_to(&self, account: &str, coin: Coin) -> Result<(), Error> {
        self.coins.write()?.push((account.to_string(), coin));
        Ok(())
    }

    /// Remove the coin spending `outpoint`, returning it
    pub fn remove_coin(&self, outpoint: &bitcoin::OutPoint) -> Result<Option<Coin>, Error> {
        let mut coins = self.coins.write()?;
        let position = coins.iter().position(|(_, c)| c.outpoint == *outpoint);

        Ok(position.map(|i| coins.remove(i).1))
    }
}

impl UtxoSource for MemoryUtxoSource {
    fn list_unspent(
        &self,
        min_confs: u32,
        max_confs: u32,
        account: Option<&str>,
    ) -> Result<Vec<Coin>, Error> {
        Ok(self
            .coins
            .read()?
            .iter()
            .filter(|(a, _)| account.map(|account| account == a).unwrap_or(true))
            .filter(|(_, c)| c.confirmations >= min_confs && c.confirmations <= max_confs)
            .map(|(_, c)| c.clone())
            .collect())
    }

    fn change_script(&self, _account: Option<&str>) -> Result<ScriptBuf, Error> {
        Ok(self.change_script.clone())
    }
}

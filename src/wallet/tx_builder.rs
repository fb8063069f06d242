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

//! Funding request builder
//!
//! This module contains the [`FundingRequest`] builder, describing what a funding template should
//! pay and how it may be funded.
//!
//! ```
//! # use std::str::FromStr;
//! # use std::time::Duration;
//! # use bitcoin::*;
//! # use bitcoin::hashes::Hash;
//! # use lnfund::wallet::tx_builder::*;
//! # use lnfund::FeeRate;
//! # let to_channel = ScriptBuf::new_p2wsh(&WScriptHash::all_zeros());
//! // Pay 1M sats to a channel funding script, at 10 sat/vbyte, keeping the inputs for 5 minutes
//! let request = FundingRequest::with_recipients(vec![(to_channel, Amount::from_sat(1_000_000))])
//!     .fee_rate(FeeRate::from_sat_per_vb(10))
//!     .lease_ttl(Duration::from_secs(300))
//!     .ordering(TxOrdering::Bip69Lexicographic);
//!
//! // Spend one specific output instead of letting coin selection pick
//! let outpoint = OutPoint::from_str("5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456:1")?;
//! let request = request.add_utxo(outpoint);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::time::Duration;

use bitcoin::{Amount, OutPoint, Psbt, ScriptBuf, Transaction, TxOut};

use super::coin_selection::{
    CoinSelectionAlgorithm, DefaultCoinSelectionAlgorithm, SubtractFeesCoinSelection,
};
use crate::types::{Coin, FeeRate};

/// How the fee of a template is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSpec {
    /// Ask the fee estimator for a rate confirming within this many blocks
    TargetConf(u32),
    /// Use this exact rate
    Rate(FeeRate),
}

/// A funding request, built with chained calls
///
/// The type parameter is the coin selection algorithm used when the request doesn't name its
/// inputs explicitly.
#[derive(Debug, Clone)]
pub struct FundingRequest<Cs: CoinSelectionAlgorithm = DefaultCoinSelectionAlgorithm> {
    pub(crate) recipients: Vec<TxOut>,
    pub(crate) utxos: Vec<OutPoint>,
    pub(crate) psbt: Option<Psbt>,
    pub(crate) fee: Option<FeeSpec>,
    pub(crate) account: Option<String>,
    pub(crate) min_confs: Option<u32>,
    pub(crate) allow_unconfirmed: bool,
    pub(crate) change_script: Option<ScriptBuf>,
    pub(crate) lease_ttl: Duration,
    pub(crate) coin_ordering: CoinOrdering,
    pub(crate) ordering: TxOrdering,
    pub(crate) coin_selection: Cs,
}

impl Default for FundingRequest<DefaultCoinSelectionAlgorithm> {
    fn default() -> Self {
        FundingRequest {
            recipients: vec![],
            utxos: vec![],
            psbt: None,
            fee: None,
            account: None,
            min_confs: None,
            allow_unconfirmed: false,
            change_script: None,
            lease_ttl: Duration::from_secs(0),
            coin_ordering: CoinOrdering::default(),
            ordering: TxOrdering::default(),
            coin_selection: DefaultCoinSelectionAlgorithm::default(),
        }
    }
}

impl FundingRequest<DefaultCoinSelectionAlgorithm> {
    /// Create an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a request paying `amount` to each `script`
    pub fn with_recipients(recipients: Vec<(ScriptBuf, Amount)>) -> Self {
        Self::default().set_recipients(recipients)
    }

    /// Fund an existing template
    ///
    /// The outputs of `psbt` become the recipients. Its inputs, if any, are spent as they are
    /// instead of selecting coins: they're looked up in the wallet, or taken from the PSBT's own
    /// `witness_utxo` when the wallet doesn't know them.
    pub fn from_psbt(psbt: Psbt) -> Self {
        let mut request = Self::default();
        request.recipients = psbt.unsigned_tx.output.clone();
        request.utxos = psbt
            .unsigned_tx
            .input
            .iter()
            .map(|txin| txin.previous_output)
            .collect();
        request.psbt = Some(psbt);

        request
    }
}

impl<Cs: CoinSelectionAlgorithm> FundingRequest<Cs> {
    /// Replace the recipients with the ones in `recipients`
    pub fn set_recipients(mut self, recipients: Vec<(ScriptBuf, Amount)>) -> Self {
        self.recipients = recipients
            .into_iter()
            .map(|(script_pubkey, value)| TxOut {
                value,
                script_pubkey,
            })
            .collect();
        self
    }

    /// Add a recipient
    pub fn add_recipient(mut self, script_pubkey: ScriptBuf, value: Amount) -> Self {
        self.recipients.push(TxOut {
            value,
            script_pubkey,
        });
        self
    }

    /// Spend exactly these outputs, skipping coin selection
    pub fn utxos(mut self, utxos: Vec<OutPoint>) -> Self {
        self.utxos = utxos;
        self
    }

    /// Add an output to spend, skipping coin selection
    pub fn add_utxo(mut self, utxo: OutPoint) -> Self {
        self.utxos.push(utxo);
        self
    }

    /// Set an explicit fee rate
    pub fn fee_rate(mut self, fee_rate: FeeRate) -> Self {
        self.fee = Some(FeeSpec::Rate(fee_rate));
        self
    }

    /// Estimate the fee rate for confirmation within `blocks`
    pub fn target_conf(mut self, blocks: u32) -> Self {
        self.fee = Some(FeeSpec::TargetConf(blocks));
        self
    }

    /// Only fund from (and send change to) this account
    pub fn account(mut self, account: &str) -> Self {
        self.account = Some(account.to_string());
        self
    }

    /// Minimum confirmations of the selected coins
    ///
    /// Zero is only accepted together with [`allow_unconfirmed`](Self::allow_unconfirmed).
    pub fn min_confs(mut self, min_confs: u32) -> Self {
        self.min_confs = Some(min_confs);
        self
    }

    /// Allow spending unconfirmed coins. This overrides [`min_confs`](Self::min_confs)
    pub fn allow_unconfirmed(mut self, allow_unconfirmed: bool) -> Self {
        self.allow_unconfirmed = allow_unconfirmed;
        self
    }

    /// Send change to `script` instead of asking the wallet for a change script
    pub fn change_script(mut self, script: ScriptBuf) -> Self {
        self.change_script = Some(script);
        self
    }

    /// How long the selected inputs stay leased. Zero means the configured default
    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Set the order in which candidate coins are offered to coin selection
    pub fn coin_ordering(mut self, coin_ordering: CoinOrdering) -> Self {
        self.coin_ordering = coin_ordering;
        self
    }

    /// Choose the ordering for inputs and outputs of the transaction
    pub fn ordering(mut self, ordering: TxOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Pay the fee out of the (single) recipient instead of adding inputs to cover it
    pub fn subtract_fees(self) -> FundingRequest<SubtractFeesCoinSelection> {
        self.coin_selection(SubtractFeesCoinSelection)
    }

    /// Choose the coin selection algorithm
    ///
    /// Overrides the [`DefaultCoinSelectionAlgorithm`](super::coin_selection::DefaultCoinSelectionAlgorithm).
    pub fn coin_selection<P: CoinSelectionAlgorithm>(self, coin_selection: P) -> FundingRequest<P> {
        FundingRequest {
            recipients: self.recipients,
            utxos: self.utxos,
            psbt: self.psbt,
            fee: self.fee,
            account: self.account,
            min_confs: self.min_confs,
            allow_unconfirmed: self.allow_unconfirmed,
            change_script: self.change_script,
            lease_ttl: self.lease_ttl,
            coin_ordering: self.coin_ordering,
            ordering: self.ordering,
            coin_selection,
        }
    }

    /// Total value of the recipients
    pub fn recipients_amount(&self) -> Amount {
        self.recipients.iter().map(|txout| txout.value).sum()
    }
}

/// Order in which candidate coins are offered to coin selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinOrdering {
    /// Confirmed coins first, then by decreasing value
    LargestFirst,
    /// Keep the order the UTXO source listed them in
    AsListed,
}

impl Default for CoinOrdering {
    fn default() -> Self {
        CoinOrdering::LargestFirst
    }
}

impl CoinOrdering {
    /// Sort the candidates in place
    pub fn sort_coins(&self, coins: &mut [Coin]) {
        match self {
            CoinOrdering::AsListed => {}
            CoinOrdering::LargestFirst => coins.sort_by(|a, b| {
                (b.confirmations > 0)
                    .cmp(&(a.confirmations > 0))
                    .then(b.value().cmp(&a.value()))
            }),
        }
    }
}

/// Ordering of the transaction's inputs and outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOrdering {
    /// Randomized
    Shuffle,
    /// Unchanged: recipients in the order they were given, change last
    Untouched,
    /// BIP69 / Lexicographic
    Bip69Lexicographic,
}

impl Default for TxOrdering {
    fn default() -> Self {
        TxOrdering::Untouched
    }
}

impl TxOrdering {
    /// Sort the transaction's inputs and outputs
    pub fn modify_tx(&self, tx: &mut Transaction) {
        self.modify_tx_tracking(tx, None);
    }

    /// Sort the transaction's inputs and outputs, returning the new index of the output that was
    /// at `tracked`
    ///
    /// Outputs are followed by position, so two identical outputs are never confused.
    pub fn modify_tx_tracking(&self, tx: &mut Transaction, tracked: Option<usize>) -> Option<usize> {
        let mut outputs = tx.output.drain(..).enumerate().collect::<Vec<_>>();

        match self {
            TxOrdering::Untouched => {}
            TxOrdering::Shuffle => {
                use rand::seq::SliceRandom;
                #[cfg(test)]
                use rand::SeedableRng;

                #[cfg(not(test))]
                let mut rng = rand::thread_rng();
                #[cfg(test)]
                let mut rng = rand::rngs::StdRng::seed_from_u64(0);

                outputs.shuffle(&mut rng);
            }
            TxOrdering::Bip69Lexicographic => {
                tx.input.sort_unstable_by_key(|txin| {
                    (txin.previous_output.txid, txin.previous_output.vout)
                });
                outputs.sort_by(|(_, a), (_, b)| {
                    (a.value, &a.script_pubkey).cmp(&(b.value, &b.script_pubkey))
                });
            }
        }

        let position = tracked.and_then(|tracked| outputs.iter().position(|(i, _)| *i == tracked));
        tx.output = outputs.into_iter().map(|(_, txout)| txout).collect();

        position
    }
}

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

//! Coin selection
//!
//! This module provides the trait [`CoinSelectionAlgorithm`] that can be implemented to
//! define custom coin selection algorithms, and the two algorithms used to fund templates:
//!
//! - [`LinearCoinSelection`] grows the input set until the target amount *plus* fees is covered,
//!   returning the excess as change when it's worth an output.
//! - [`SubtractFeesCoinSelection`] selects once for the target amount and takes the fee out of the
//!   output, so the total spent never grows past the inputs selected for the target.
//!
//! Both take the candidates in the order they're given: selection never re-sorts, callers decide
//! which coins are preferred by how they order them.
//!
//! ## Example
//!
//! ```
//! # use std::str::FromStr;
//! # use bitcoin::hashes::Hash;
//! # use bitcoin::*;
//! # use lnfund::wallet::coin_selection::*;
//! # use lnfund::wallet::weight::TxWeightEstimator;
//! # use lnfund::{Coin, FeeRate};
//! let coin = Coin::new(
//!     OutPoint::from_str("ebd9813ecebc57ff8f30797de7c205e3c7498ca950ea4341ee51a685ff2fa30a:0")?,
//!     TxOut {
//!         value: Amount::from_sat(100_000),
//!         script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros()),
//!     },
//! );
//!
//! // a channel funding transaction pays to a single P2WSH output
//! let mut base = TxWeightEstimator::new();
//! base.add_p2wsh_output();
//!
//! let result = LinearCoinSelection.coin_select(
//!     &[],
//!     &[coin],
//!     &base,
//!     FeeRate::from_sat_per_kwu(253),
//!     Amount::from_sat(50_000),
//!     Amount::from_sat(546),
//! )?;
//! assert_eq!(result.selected.len(), 1);
//! assert_eq!(result.change_amount, Amount::from_sat(49_846));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use bitcoin::Amount;

use crate::error::Error;
use crate::types::{Coin, FeeRate};
use crate::wallet::weight::TxWeightEstimator;

/// Default coin selection algorithm used by [`FundingRequest`](super::tx_builder::FundingRequest)
/// if not overridden
pub type DefaultCoinSelectionAlgorithm = LinearCoinSelection;

/// Result of a successful coin selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelectionResult {
    /// Selected coins, a prefix of the candidates
    pub selected: Vec<Coin>,
    /// Sum of the selected coins' value
    pub selected_amount: Amount,
    /// Value of the primary output(s). Equal to the requested amount unless fees were subtracted
    pub output_amount: Amount,
    /// Value of the change output, zero when no change output should be created
    pub change_amount: Amount,
    /// Fee actually paid: `selected_amount - output_amount - change_amount`
    pub fee_amount: Amount,
}

impl CoinSelectionResult {
    /// Whether a change output should be added
    pub fn has_change(&self) -> bool {
        self.change_amount > Amount::ZERO
    }
}

/// Trait for generalized coin selection algorithms
///
/// This trait can be implemented to make the
/// [`FundingCoordinator`](super::funding::FundingCoordinator) use a customized coin selection
/// algorithm when it funds templates.
pub trait CoinSelectionAlgorithm: std::fmt::Debug {
    /// Perform the coin selection
    ///
    /// - `required`: coins that must be spent, whatever the amount
    /// - `candidates`: the coins that may be spent, in order of preference
    /// - `base_weight`: an estimator that already contains every output of the transaction except
    ///                  the change output
    /// - `fee_rate`: fee rate to use
    /// - `amount`: the amount in satoshi to fund
    /// - `dust_limit`: change below this value is given to the fee instead
    fn coin_select(
        &self,
        required: &[Coin],
        candidates: &[Coin],
        base_weight: &TxWeightEstimator,
        fee_rate: FeeRate,
        amount: Amount,
        dust_limit: Amount,
    ) -> Result<CoinSelectionResult, Error>;
}

/// Selects coins in the given order, raising its target by the fee until inputs cover both
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearCoinSelection;

impl CoinSelectionAlgorithm for LinearCoinSelection {
    fn coin_select(
        &self,
        required: &[Coin],
        candidates: &[Coin],
        base_weight: &TxWeightEstimator,
        fee_rate: FeeRate,
        amount: Amount,
        dust_limit: Amount,
    ) -> Result<CoinSelectionResult, Error> {
        log::debug!(
            "amount = `{}`, fee_rate = `{}`, dust_limit = `{}`, required = `{}`, candidates = `{}`",
            amount,
            fee_rate,
            dust_limit,
            required.len(),
            candidates.len()
        );

        // every round that doesn't return selects strictly more coins than the one before
        let max_rounds = candidates.len() + 1;
        let mut amount_needed = amount;
        for _ in 0..max_rounds {
            let (selected_amount, selected) = select_inputs(amount_needed, required, candidates)?;
            let (fee_no_change, fee_with_change) =
                calculate_fees(&selected, base_weight, fee_rate)?;

            let change_amount = match allocate_change(
                selected_amount,
                amount,
                fee_no_change,
                fee_with_change,
                dust_limit,
            ) {
                Some(change_amount) => change_amount,
                None => {
                    amount_needed = amount + fee_no_change;
                    log::debug!(
                        "{} selected doesn't cover the fee, retrying for {}",
                        selected_amount,
                        amount_needed
                    );
                    continue;
                }
            };

            let total_out = amount + change_amount;
            let fee_amount = selected_amount - total_out;
            check_fee_sanity(total_out, fee_amount)?;

            return Ok(CoinSelectionResult {
                selected,
                selected_amount,
                output_amount: amount,
                change_amount,
                fee_amount,
            });
        }

        Err(Error::SelectionNotConverged(max_rounds))
    }
}

/// Selects coins for the amount once, then pays the fee out of the output
#[derive(Debug, Default, Clone, Copy)]
pub struct SubtractFeesCoinSelection;

impl CoinSelectionAlgorithm for SubtractFeesCoinSelection {
    fn coin_select(
        &self,
        required: &[Coin],
        candidates: &[Coin],
        base_weight: &TxWeightEstimator,
        fee_rate: FeeRate,
        amount: Amount,
        dust_limit: Amount,
    ) -> Result<CoinSelectionResult, Error> {
        let (selected_amount, selected) = select_inputs(amount, required, candidates)?;
        let (fee_no_change, fee_with_change) = calculate_fees(&selected, base_weight, fee_rate)?;

        // Without change everything left after the fee goes to the output
        let mut output_amount = selected_amount
            .checked_sub(fee_no_change)
            .unwrap_or(Amount::ZERO);
        let mut change_amount = Amount::ZERO;
        if output_amount < dust_limit {
            return Err(Error::OutputBelowDustLimit {
                amount: output_amount,
                dust_limit,
            });
        }

        // With change, the output pays the (larger) fee and the change keeps what wasn't asked
        // for. Only worth it if neither ends up as dust, otherwise we keep the no-change split.
        let new_change = selected_amount - amount;
        if let Some(new_output) = amount.checked_sub(fee_with_change) {
            if new_change >= dust_limit && new_output >= dust_limit {
                output_amount = new_output;
                change_amount = new_change;
            }
        }

        let total_out = output_amount + change_amount;
        let fee_amount = selected_amount - total_out;
        check_fee_sanity(total_out, fee_amount)?;

        log::debug!(
            "subtracted fee {} from output, output = `{}`, change = `{}`",
            fee_amount,
            output_amount,
            change_amount
        );

        Ok(CoinSelectionResult {
            selected,
            selected_amount,
            output_amount,
            change_amount,
            fee_amount,
        })
    }
}

/// Take every required coin, then optional ones in order until their value reaches `amount`
pub(crate) fn select_inputs(
    amount: Amount,
    required: &[Coin],
    optional: &[Coin],
) -> Result<(Amount, Vec<Coin>), Error> {
    let mut selected = required.to_vec();
    let mut selected_amount: Amount = required.iter().map(|c| c.value()).sum();

    let mut optional = optional.iter();
    while selected_amount < amount {
        match optional.next() {
            Some(coin) => {
                selected_amount += coin.value();
                selected.push(coin.clone());
            }
            None => {
                return Err(Error::InsufficientFunds {
                    needed: amount,
                    available: selected_amount,
                })
            }
        }
    }

    Ok((selected_amount, selected))
}

/// Fees for spending `coins` on top of `base_weight`, without and with a P2WPKH change output
pub(crate) fn calculate_fees(
    coins: &[Coin],
    base_weight: &TxWeightEstimator,
    fee_rate: FeeRate,
) -> Result<(Amount, Amount), Error> {
    let mut estimator = base_weight.clone();
    for coin in coins {
        estimator.add_input_for_script(&coin.txout.script_pubkey)?;
    }
    let fee_no_change = fee_rate.fee_for_weight(estimator.weight());

    estimator.add_p2wkh_output();
    let fee_with_change = fee_rate.fee_for_weight(estimator.weight());

    Ok((fee_no_change, fee_with_change))
}

/// Split what the inputs bring in above `amount` between change and fee.
///
/// Returns `None` if the excess doesn't even pay for a transaction without change. Change below
/// `dust_limit` is dropped and ends up in the fee.
pub(crate) fn allocate_change(
    selected_amount: Amount,
    amount: Amount,
    fee_no_change: Amount,
    fee_with_change: Amount,
    dust_limit: Amount,
) -> Option<Amount> {
    let overshoot = selected_amount.checked_sub(amount)?;
    let change_amount = if overshoot < fee_no_change {
        return None;
    } else if overshoot > fee_with_change {
        overshoot - fee_with_change
    } else {
        Amount::ZERO
    };

    if change_amount < dust_limit {
        Some(Amount::ZERO)
    } else {
        Some(change_amount)
    }
}

/// Fail if the fee is zero or more than 20% of the total output value
pub(crate) fn check_fee_sanity(total_out: Amount, fee: Amount) -> Result<(), Error> {
    if fee == Amount::ZERO || fee.to_sat() > total_out.to_sat() / 5 {
        return Err(Error::FeeSanity { fee, total_out });
    }

    Ok(())
}

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

//! Additional functions on the `rust-bitcoin` `Psbt` structure.

use bitcoin::{Amount, Psbt, TxOut};

use crate::types::FeeRate;

/// Trait to add functions to extract utxos and calculate fees.
pub trait PsbtUtils {
    /// Get the `TxOut` for the specified input index, if it doesn't exist in the PSBT `None` is returned.
    fn get_utxo_for(&self, input_index: usize) -> Option<TxOut>;

    /// The total transaction fee amount, sum of input amounts minus sum of output amounts.
    /// If the PSBT is missing a TxOut for an input, or spends more than its inputs, returns None.
    fn fee_amount(&self) -> Option<Amount>;

    /// The transaction's fee rate. This value will only be accurate if calculated AFTER the
    /// `Psbt` is finalized and all witness/signature data is added to the transaction.
    /// If the PSBT is missing a TxOut for an input returns None.
    fn fee_rate(&self) -> Option<FeeRate>;

    /// Indexes of the inputs that carry neither a final witness nor a partial signature
    fn unsigned_inputs(&self) -> Vec<usize>;
}

impl PsbtUtils for Psbt {
    fn get_utxo_for(&self, input_index: usize) -> Option<TxOut> {
        let tx = &self.unsigned_tx;
        let txin = tx.input.get(input_index)?;
        let input = self.inputs.get(input_index)?;

        if let Some(wit_utxo) = &input.witness_utxo {
            Some(wit_utxo.clone())
        } else if let Some(in_tx) = &input.non_witness_utxo {
            in_tx.output.get(txin.previous_output.vout as usize).cloned()
        } else {
            None
        }
    }

    fn fee_amount(&self) -> Option<Amount> {
        let tx = &self.unsigned_tx;
        let utxos: Option<Vec<TxOut>> = (0..tx.input.len()).map(|i| self.get_utxo_for(i)).collect();

        utxos.and_then(|inputs| {
            let input_amount: Amount = inputs.iter().map(|i| i.value).sum();
            let output_amount: Amount = tx.output.iter().map(|o| o.value).sum();
            input_amount.checked_sub(output_amount)
        })
    }

    fn fee_rate(&self) -> Option<FeeRate> {
        let fee_amount = self.fee_amount()?;
        let weight = self
            .clone()
            .extract_tx_unchecked_fee_rate()
            .weight()
            .to_wu();
        if weight == 0 {
            return None;
        }

        Some(FeeRate::from_sat_per_kwu(
            fee_amount.to_sat() * 1000 / weight,
        ))
    }

    fn unsigned_inputs(&self) -> Vec<usize> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| {
                input.final_script_witness.is_none()
                    && input.final_script_sig.is_none()
                    && input.partial_sigs.is_empty()
            })
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{OutPoint, ScriptBuf, Transaction, TxIn, WPubkeyHash, Witness};

    use super::*;

    fn get_test_psbt() -> Psbt {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![
                TxIn {
                    previous_output: OutPoint::from_str(
                        "0f60fdd185542f2c6ea19030b0796051e7772b6026dd5ddccd7a2f93b73e6fc2:0",
                    )
                    .unwrap(),
                    ..Default::default()
                },
                TxIn {
                    previous_output: OutPoint::from_str(
                        "0f60fdd185542f2c6ea19030b0796051e7772b6026dd5ddccd7a2f93b73e6fc2:1",
                    )
                    .unwrap(),
                    ..Default::default()
                },
            ],
            output: vec![TxOut {
                value: Amount::from_sat(140_000),
                script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros()),
            }],
        };

        let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
        for (input, value) in psbt.inputs.iter_mut().zip(&[100_000, 50_000]) {
            input.witness_utxo = Some(TxOut {
                value: Amount::from_sat(*value),
                script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros()),
            });
        }

        psbt
    }

    #[test]
    fn test_psbt_fee_amount() {
        let psbt = get_test_psbt();
        assert_eq!(psbt.fee_amount(), Some(Amount::from_sat(10_000)));
    }

    #[test]
    fn test_psbt_utxo_out_of_range() {
        let psbt = get_test_psbt();
        assert!(psbt.get_utxo_for(1).is_some());
        assert!(psbt.get_utxo_for(2).is_none());
    }

    #[test]
    fn test_psbt_fee_rate_with_missing_txout() {
        let mut psbt = get_test_psbt();
        psbt.inputs[0].witness_utxo = None;

        assert!(psbt.fee_amount().is_none());
        assert!(psbt.fee_rate().is_none());
    }

    #[test]
    fn test_psbt_fee_rate_grows_smaller_when_finalized() {
        let mut psbt = get_test_psbt();
        let unfinalized = psbt.fee_rate().unwrap();

        for input in psbt.inputs.iter_mut() {
            input.final_script_witness = Some(Witness::from_slice(&[vec![0u8; 72], vec![2u8; 33]]));
        }
        let finalized = psbt.fee_rate().unwrap();

        assert!(finalized < unfinalized);
    }

    #[test]
    fn test_psbt_unsigned_inputs() {
        let mut psbt = get_test_psbt();
        assert_eq!(psbt.unsigned_inputs(), vec![0, 1]);

        psbt.inputs[1].final_script_witness = Some(Witness::from_slice(&[vec![1u8; 72]]));
        assert_eq!(psbt.unsigned_inputs(), vec![0]);
    }
}

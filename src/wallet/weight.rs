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

//! Transaction weight estimation
//!
//! [`TxWeightEstimator`] computes an upper bound of the weight of a transaction from the kinds
//! of its inputs and the scripts of its outputs, before any of them are signed.

use bitcoin::blockdata::constants::WITNESS_SCALE_FACTOR;
use bitcoin::consensus::encode::VarInt;
use bitcoin::Script;

use crate::error::Error;

/// Version and locktime
pub const BASE_TX_SIZE: u64 = 4 + 4;
/// Outpoint, empty `scriptSig` length and sequence
pub const INPUT_SIZE: u64 = 32 + 4 + 1 + 4;
/// `scriptSig` pushing a P2WPKH redeem script: `OP_PUSH22 <0 <20-byte-hash>>`
pub const NESTED_P2WPKH_SCRIPT_SIG_SIZE: u64 = 1 + 22;
/// Item count, then length-prefixed 73-byte signature and 33-byte compressed public key
pub const P2WPKH_WITNESS_SIZE: u64 = 1 + 1 + 73 + 1 + 33;
/// Segwit marker and flag
pub const WITNESS_HEADER_SIZE: u64 = 2;
/// Value, script length and `OP_0 <20-byte-hash>`
pub const P2WPKH_OUTPUT_SIZE: u64 = 8 + 1 + 22;
/// Value, script length and `OP_0 <32-byte-hash>`
pub const P2WSH_OUTPUT_SIZE: u64 = 8 + 1 + 34;
/// Value, script length and `OP_1 <32-byte-key>`
pub const P2TR_OUTPUT_SIZE: u64 = 8 + 1 + 34;

/// Kinds of inputs whose satisfaction weight is known in advance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    /// Native segwit v0 key-hash
    P2wpkh,
    /// Segwit v0 key-hash nested in a P2SH output
    NestedP2wpkh,
}

impl InputKind {
    /// Classify the script of the output being spent
    pub fn from_script(script: &Script) -> Result<Self, Error> {
        if script.is_p2wpkh() {
            Ok(InputKind::P2wpkh)
        } else if script.is_p2sh() {
            Ok(InputKind::NestedP2wpkh)
        } else {
            Err(Error::UnsupportedInput(script.to_owned()))
        }
    }

    /// Non-witness bytes of the input
    pub fn size(&self) -> u64 {
        match self {
            InputKind::P2wpkh => INPUT_SIZE,
            InputKind::NestedP2wpkh => INPUT_SIZE + NESTED_P2WPKH_SCRIPT_SIG_SIZE,
        }
    }

    /// Witness bytes of the input
    pub fn witness_size(&self) -> u64 {
        match self {
            InputKind::P2wpkh | InputKind::NestedP2wpkh => P2WPKH_WITNESS_SIZE,
        }
    }
}

/// Accumulates inputs and outputs and estimates the final weight of the transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxWeightEstimator {
    has_witness: bool,
    input_count: u64,
    output_count: u64,
    input_size: u64,
    input_witness_size: u64,
    output_size: u64,
}

impl TxWeightEstimator {
    /// Create an empty estimator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input of the given kind
    pub fn add_input(&mut self, kind: InputKind) -> &mut Self {
        self.input_size += kind.size();
        self.input_witness_size += kind.witness_size();
        self.input_count += 1;
        self.has_witness = true;

        self
    }

    /// Add an input spending `script`, failing if it can't be estimated
    pub fn add_input_for_script(&mut self, script: &Script) -> Result<InputKind, Error> {
        let kind = InputKind::from_script(script)?;
        self.add_input(kind);

        Ok(kind)
    }

    /// Add a native P2WPKH input
    pub fn add_p2wkh_input(&mut self) -> &mut Self {
        self.add_input(InputKind::P2wpkh)
    }

    /// Add a P2WPKH input nested in P2SH
    pub fn add_nested_p2wkh_input(&mut self) -> &mut Self {
        self.add_input(InputKind::NestedP2wpkh)
    }

    /// Add an output paying to an arbitrary script
    pub fn add_output(&mut self, script: &Script) -> &mut Self {
        let len = script.len() as u64;
        self.add_output_size(8 + VarInt(len).size() as u64 + len)
    }

    /// Add a P2WPKH output
    pub fn add_p2wkh_output(&mut self) -> &mut Self {
        self.add_output_size(P2WPKH_OUTPUT_SIZE)
    }

    /// Add a P2WSH output
    pub fn add_p2wsh_output(&mut self) -> &mut Self {
        self.add_output_size(P2WSH_OUTPUT_SIZE)
    }

    /// Add a P2TR output
    pub fn add_p2tr_output(&mut self) -> &mut Self {
        self.add_output_size(P2TR_OUTPUT_SIZE)
    }

    fn add_output_size(&mut self, size: u64) -> &mut Self {
        self.output_size += size;
        self.output_count += 1;

        self
    }

    /// Number of inputs added so far
    pub fn input_count(&self) -> u64 {
        self.input_count
    }

    /// Number of outputs added so far
    pub fn output_count(&self) -> u64 {
        self.output_count
    }

    /// Estimated weight of the transaction, in weight units
    pub fn weight(&self) -> u64 {
        let stripped_size = BASE_TX_SIZE
            + VarInt(self.input_count).size() as u64
            + self.input_size
            + VarInt(self.output_count).size() as u64
            + self.output_size;
        let mut weight = stripped_size * WITNESS_SCALE_FACTOR as u64;
        if self.has_witness {
            weight += WITNESS_HEADER_SIZE + self.input_witness_size;
        }

        weight
    }

    /// Estimated virtual size of the transaction, in vbytes
    pub fn vsize(&self) -> u64 {
        (self.weight() + WITNESS_SCALE_FACTOR as u64 - 1) / WITNESS_SCALE_FACTOR as u64
    }
}

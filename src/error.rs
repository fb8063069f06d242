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

use std::fmt;

use bitcoin::{Amount, OutPoint, ScriptBuf};

use crate::types::LeaseId;
use crate::wallet::signer::SignerError;

/// Errors that can be returned by the funding core
#[derive(Debug)]
pub enum Error {
    /// Generic error
    Generic(String),
    /// The candidate set cannot cover the amount needed (target, plus fees from later rounds)
    InsufficientFunds {
        /// Sats needed for the funding attempt
        needed: Amount,
        /// Sats available in the candidate set
        available: Amount,
    },
    /// A selected input spends a script whose weight can't be estimated
    UnsupportedInput(ScriptBuf),
    /// The fee would exceed the hard cap of 20% of the total output value, or would be zero
    FeeSanity {
        /// Fee that would have been paid
        fee: Amount,
        /// Total value of the outputs the fee was checked against
        total_out: Amount,
    },
    /// The single output left after subtracting fees is below the dust limit
    OutputBelowDustLimit {
        /// Output amount after subtracting fees
        amount: Amount,
        /// Dust limit in use
        dust_limit: Amount,
    },
    /// Coin selection kept raising its target without converging
    SelectionNotConverged(usize),
    /// Another live lease holds this outpoint
    LeaseConflict {
        /// The contested output
        outpoint: OutPoint,
        /// The lease currently holding it
        holder: LeaseId,
    },
    /// No live lease is held on the outpoint by the requesting lease id
    LeaseNotFound(OutPoint),
    /// A funding attempt lost the lease on one of its inputs
    LeaseExpired {
        /// The input that's no longer leased
        outpoint: OutPoint,
        /// The funding attempt that held it
        id: LeaseId,
    },
    /// Finalize was called while some inputs were still unsigned
    IncompleteSigning(Vec<usize>),
    /// Cannot fund a template without outputs
    NoRecipients,
    /// `min_confs` is zero but unconfirmed outputs were not allowed
    InvalidMinConfs,
    /// The output is not part of the wallet's UTXO set
    UnknownUtxo(OutPoint),
    /// The same outpoint was referenced twice by one template
    DuplicateInput(OutPoint),
    /// The funding attempt is unknown to this coordinator
    TemplateNotFound(LeaseId),
    /// The funding attempt was abandoned and its leases released
    TemplateAbandoned(LeaseId),
    /// The funding attempt was already finalized
    TemplateFinalized(LeaseId),
    /// The template's unsigned transaction differs from the one originally funded
    TemplateMismatch(LeaseId),
    /// A signature doesn't verify for the input it was supplied for
    InvalidSignature(usize),
    /// Signing error
    Signer(SignerError),

    /// Encoding error
    Encode(bitcoin::consensus::encode::Error),
    /// Error serializing or deserializing JSON data
    Json(serde_json::Error),
    /// Partially signed bitcoin transaction error
    Psbt(bitcoin::psbt::Error),
    #[cfg(feature = "key-value-db")]
    /// Sled database error
    Sled(sled::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic(err) => write!(f, "Generic error: {}", err),
            Self::InsufficientFunds { needed, available } => write!(
                f,
                "Insufficient funds: {} available of {} needed",
                available, needed
            ),
            Self::UnsupportedInput(script) => {
                write!(f, "Unsupported input script type: {:x}", script.as_script())
            }
            Self::FeeSanity { fee, total_out } => write!(
                f,
                "Fee sanity check failed: fee {} on total output value {}",
                fee, total_out
            ),
            Self::OutputBelowDustLimit { amount, dust_limit } => write!(
                f,
                "Output amount {} after subtracting fees is below the dust limit {}",
                amount, dust_limit
            ),
            Self::SelectionNotConverged(rounds) => {
                write!(f, "Coin selection did not converge after {} rounds", rounds)
            }
            Self::LeaseConflict { outpoint, holder } => {
                write!(f, "Output {} is already leased by {}", outpoint, holder)
            }
            Self::LeaseNotFound(outpoint) => write!(f, "No matching lease on {}", outpoint),
            Self::LeaseExpired { outpoint, id } => {
                write!(f, "Funding attempt {} no longer holds {}", id, outpoint)
            }
            Self::IncompleteSigning(missing) => {
                write!(f, "Inputs still missing signatures: {:?}", missing)
            }
            Self::NoRecipients => write!(f, "Cannot fund a template without outputs"),
            Self::InvalidMinConfs => write!(
                f,
                "min_confs of zero requires unconfirmed outputs to be allowed"
            ),
            Self::UnknownUtxo(outpoint) => write!(f, "UTXO {} not found in the wallet", outpoint),
            Self::DuplicateInput(outpoint) => write!(f, "Input {} used twice", outpoint),
            Self::TemplateNotFound(id) => write!(f, "No funding attempt with lease id {}", id),
            Self::TemplateAbandoned(id) => write!(f, "Funding attempt {} was abandoned", id),
            Self::TemplateFinalized(id) => write!(f, "Funding attempt {} is already final", id),
            Self::TemplateMismatch(id) => write!(
                f,
                "Transaction of funding attempt {} was modified after funding",
                id
            ),
            Self::InvalidSignature(index) => write!(f, "Invalid signature for input {}", index),
            Self::Signer(err) => write!(f, "Signer error: {}", err),
            Self::Encode(err) => write!(f, "Encoding error: {}", err),
            Self::Json(err) => write!(f, "Serialize/Deserialize JSON error: {}", err),
            Self::Psbt(err) => write!(f, "PSBT error: {}", err),
            #[cfg(feature = "key-value-db")]
            Self::Sled(err) => write!(f, "Sled database error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

macro_rules! impl_error {
    ( $from:ty, $to:ident ) => {
        impl_error!($from, $to, Error);
    };
    ( $from:ty, $to:ident, $impl_for:ty ) => {
        impl std::convert::From<$from> for $impl_for {
            fn from(err: $from) -> Self {
                <$impl_for>::$to(err)
            }
        }
    };
}

impl_error!(SignerError, Signer);
impl_error!(bitcoin::consensus::encode::Error, Encode);
impl_error!(serde_json::Error, Json);
impl_error!(bitcoin::psbt::Error, Psbt);

#[cfg(feature = "key-value-db")]
impl_error!(sled::Error, Sled);

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Generic("lock poisoned".to_string())
    }
}

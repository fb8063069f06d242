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

//! Wallet funding
//!
//! This module defines the [`FundingCoordinator`] and the components it's built from.

pub mod coin_selection;
pub mod funding;
pub mod lease;
pub mod signer;
pub mod source;
pub mod time;
pub mod tx_builder;
pub mod weight;

pub use funding::{FinalizedTransaction, FundingCoordinator, FundingTemplate, SigningState};
pub use source::{FeeEstimator, UtxoSource};

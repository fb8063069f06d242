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

// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Transaction funding for a Lightning node's on-chain wallet
//!
//! This crate turns a desired spend into a funded, fee-correct transaction and carries it through
//! a partial-signature workflow:
//!
//! - [`wallet::weight`] estimates the weight of a transaction from the kinds of its inputs and
//!   outputs
//! - [`wallet::coin_selection`] picks inputs in the order they're given and decides whether a
//!   change output is worth creating
//! - [`wallet::lease`] reserves outputs so that concurrent funding attempts never spend the same
//!   one, persisting the reservations in a [`database`]
//! - [`wallet::funding`] ties it together: it funds a [`FundingRequest`], leases the inputs and
//!   collects verified signatures until the transaction can be finalized
//!
//! ## Example
//!
//! ```
//! # use std::str::FromStr;
//! # use std::sync::Arc;
//! # use bitcoin::hashes::Hash;
//! # use bitcoin::*;
//! use lnfund::database::MemoryDatabase;
//! use lnfund::logger::GlobalLogger;
//! use lnfund::wallet::funding::FundingCoordinator;
//! use lnfund::wallet::source::{MemoryUtxoSource, StaticFeeEstimator};
//! use lnfund::wallet::time::SystemClock;
//! use lnfund::{Coin, FeeRate, FundingConfig, FundingRequest};
//!
//! let source = MemoryUtxoSource::new(ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros()));
//! source.add_coin(Coin::new(
//!     OutPoint::from_str("5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456:0")?,
//!     TxOut {
//!         value: Amount::from_sat(100_000),
//!         script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::all_zeros()),
//!     },
//! ))?;
//!
//! let coordinator = FundingCoordinator::new(
//!     source,
//!     StaticFeeEstimator(FeeRate::from_sat_per_vb(1)),
//!     MemoryDatabase::new(),
//!     Arc::new(SystemClock),
//!     FundingConfig::default(),
//!     GlobalLogger::handle(),
//! );
//!
//! let to_channel = ScriptBuf::new_p2wsh(&WScriptHash::all_zeros());
//! let template = coordinator.fund_template(FundingRequest::with_recipients(vec![(
//!     to_channel,
//!     Amount::from_sat(50_000),
//! )]))?;
//!
//! assert_eq!(template.leases.len(), 1);
//! assert_eq!(template.change_index, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub extern crate bitcoin;
extern crate log;
extern crate serde;
extern crate serde_json;

#[cfg(feature = "key-value-db")]
pub extern crate sled;

#[macro_use]
pub(crate) mod error;
#[macro_use]
pub mod logger;
pub mod config;
pub mod database;
pub mod psbt;
pub(crate) mod types;
pub mod wallet;

pub use config::FundingConfig;
pub use error::Error;
pub use types::*;
pub use wallet::funding::{FinalizedTransaction, FundingCoordinator, FundingTemplate, SigningState};
pub use wallet::signer;
pub use wallet::tx_builder::FundingRequest;

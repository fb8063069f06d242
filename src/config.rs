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

//! Funding configuration
//!
//! Defaults that apply to every funding attempt unless the [`FundingRequest`] overrides them.
//! The configuration can be deserialized from JSON:
//!
//! ```
//! # use lnfund::FundingConfig;
//! let config = FundingConfig::from_json_str(r#"{ "default_lease_ttl_secs": 120 }"#)?;
//! assert_eq!(config.default_lease_ttl_secs, 120);
//! assert_eq!(config.dust_limit_sat, 546);
//! # Ok::<(), lnfund::Error>(())
//! ```
//!
//! [`FundingRequest`]: crate::wallet::tx_builder::FundingRequest

use std::io::Read;
use std::time::Duration;

use bitcoin::Amount;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default lifetime of a lease, ten minutes
pub const DEFAULT_LEASE_TTL_SECS: u64 = 10 * 60;

// De-facto standard "dust limit" (even though it should change based on the output type)
const DUST_LIMIT_SATOSHI: u64 = 546;

/// Settings of a [`FundingCoordinator`](crate::wallet::funding::FundingCoordinator)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FundingConfig {
    /// Lifetime given to leases when the caller asks for a TTL of `0`
    pub default_lease_ttl_secs: u64,
    /// Outputs below this value are never created, the value goes to fees instead
    pub dust_limit_sat: u64,
    /// Confirmation target used when a request specifies neither a fee rate nor a target
    pub default_target_conf: u32,
    /// Minimum confirmations a coin needs to be selected, unless the request says otherwise
    pub default_min_confs: u32,
    /// Maximum confirmations of a candidate coin
    pub max_confs: u32,
}

impl Default for FundingConfig {
    fn default() -> Self {
        FundingConfig {
            default_lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
            dust_limit_sat: DUST_LIMIT_SATOSHI,
            default_target_conf: 6,
            default_min_confs: 1,
            max_confs: 9_999_999,
        }
    }
}

impl FundingConfig {
    /// Parse a JSON document, missing fields take their default value
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a JSON document from a reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, Error> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// The dust limit as an [`Amount`]
    pub fn dust_limit(&self) -> Amount {
        Amount::from_sat(self.dust_limit_sat)
    }

    /// The default lease TTL as a [`Duration`]
    pub fn default_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.default_lease_ttl_secs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FundingConfig::default();
        assert_eq!(config.default_lease_ttl(), Duration::from_secs(600));
        assert_eq!(config.dust_limit(), Amount::from_sat(546));
        assert_eq!(config.default_min_confs, 1);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            FundingConfig::from_json_str(r#"{ "dust_limit_sat": 330, "max_confs": 100 }"#).unwrap();
        assert_eq!(config.dust_limit_sat, 330);
        assert_eq!(config.max_confs, 100);
        assert_eq!(config.default_lease_ttl_secs, DEFAULT_LEASE_TTL_SECS);
    }

    #[test]
    fn test_from_reader() {
        let json = br#"{ "default_target_conf": 2 }"#;
        let config = FundingConfig::from_reader(&json[..]).unwrap();
        assert_eq!(config.default_target_conf, 2);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            FundingConfig::from_json_str("{ \"dust_limit_sat\": \"lots\" }"),
            Err(Error::Json(_))
        ));
    }
}

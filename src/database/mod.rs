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

//! Lease storage
//!
//! This module defines the traits a storage backend must implement to persist the leases held by
//! a [`LeaseManager`](crate::wallet::lease::LeaseManager). Leases survive a restart only if the
//! backend does: [`MemoryDatabase`] forgets everything when dropped, while `sled::Tree` (with the
//! `key-value-db` feature, enabled by default) keeps them on disk.
//!
//! Stored leases may be expired: the store keeps whatever it's given and liveness is always
//! decided by the caller against its clock.

use bitcoin::OutPoint;

use crate::error::Error;
use crate::types::Lease;

#[cfg(feature = "key-value-db")]
pub(crate) mod keyvalue;

pub mod memory;
pub use memory::MemoryDatabase;

/// Trait for operations that can be batched
///
/// This trait defines the list of operations that must be implemented on the [`Database`] type and
/// the [`BatchDatabase::Batch`] type.
pub trait BatchOperations {
    /// Store a lease, replacing the one on the same outpoint if present
    fn set_lease(&mut self, lease: &Lease) -> Result<(), Error>;

    /// Delete the lease on `outpoint`, returning it if it was present
    fn del_lease(&mut self, outpoint: &OutPoint) -> Result<Option<Lease>, Error>;
}

/// Trait for reading data from a database
///
/// This traits defines the operations that can be used to read data out of a database
pub trait Database: BatchOperations {
    /// Fetch the lease stored for `outpoint`, live or not
    fn get_lease(&self, outpoint: &OutPoint) -> Result<Option<Lease>, Error>;

    /// Return every stored lease, ordered by outpoint
    fn iter_leases(&self) -> Result<Vec<Lease>, Error>;
}

/// Trait for a database that supports batch operations
///
/// Everything in a batch is applied atomically when it's committed.
pub trait BatchDatabase: Database {
    /// Container for the operations
    type Batch: BatchOperations;

    /// Create a new batch container
    fn begin_batch(&self) -> Self::Batch;

    /// Consume and apply a batch of operations
    fn commit_batch(&mut self, batch: Self::Batch) -> Result<(), Error>;
}

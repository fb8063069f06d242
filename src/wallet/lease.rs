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

//! Output leases
//!
//! A [`LeaseManager`] keeps track of which outputs are reserved, by which [`LeaseId`] and until
//! when. An outpoint is held by at most one live lease at a time: every operation runs under a
//! single mutex wrapping the store, so two concurrent [`lock`](LeaseManager::lock) calls on the
//! same outpoint never both succeed.
//!
//! Expiry is evaluated lazily against the manager's [`Clock`]: an expired lease is treated as
//! absent by every lookup even if it's still in the store, until
//! [`sweep_expired`](LeaseManager::sweep_expired) deletes it.
//!
//! ```
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use bitcoin::OutPoint;
//! # use lnfund::database::MemoryDatabase;
//! # use lnfund::logger::GlobalLogger;
//! # use lnfund::wallet::lease::LeaseManager;
//! # use lnfund::wallet::time::ManualClock;
//! # use lnfund::{Error, LeaseId};
//! let clock = Arc::new(ManualClock::new(1_000));
//! let leases = LeaseManager::new(
//!     MemoryDatabase::new(),
//!     clock.clone(),
//!     GlobalLogger::handle(),
//!     Duration::from_secs(600),
//! );
//!
//! let (alice, bob) = (LeaseId::random(), LeaseId::random());
//! let outpoint = OutPoint::null();
//!
//! assert_eq!(leases.lock(alice, outpoint, Duration::from_secs(60))?, 1_060);
//! assert!(matches!(
//!     leases.lock(bob, outpoint, Duration::from_secs(60)),
//!     Err(Error::LeaseConflict { .. })
//! ));
//!
//! clock.advance(Duration::from_secs(61));
//! assert_eq!(leases.lock(bob, outpoint, Duration::from_secs(60))?, 1_121);
//! # Ok::<(), Error>(())
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitcoin::OutPoint;

use crate::database::{BatchDatabase, BatchOperations, Database};
use crate::error::Error;
use crate::logger::LoggerHandle;
use crate::types::{Lease, LeaseId};
use crate::wallet::time::Clock;

/// Tracks leases on outputs and persists them in a [`BatchDatabase`]
pub struct LeaseManager<D> {
    store: Mutex<D>,
    clock: Arc<dyn Clock>,
    logger: LoggerHandle,
    default_ttl: Duration,
}

impl<D: fmt::Debug> fmt::Debug for LeaseManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseManager")
            .field("store", &self.store)
            .field("clock", &self.clock)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl<D> LeaseManager<D>
where
    D: BatchDatabase,
{
    /// Create a new manager on top of `store`
    ///
    /// Leases already present in the store are picked up as they are: the live ones keep holding
    /// their outpoints, the expired ones are ignored.
    pub fn new(
        store: D,
        clock: Arc<dyn Clock>,
        logger: LoggerHandle,
        default_ttl: Duration,
    ) -> Self {
        LeaseManager {
            store: Mutex::new(store),
            clock,
            logger,
            default_ttl,
        }
    }

    /// Current time according to the manager's clock
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    fn expiry(&self, now: u64, ttl: Duration) -> u64 {
        let ttl = if ttl.as_secs() == 0 {
            self.default_ttl
        } else {
            ttl
        };

        now.saturating_add(ttl.as_secs())
    }

    /// Lease `outpoint` to `id` for `ttl` (the default TTL if zero), returning the expiry time
    ///
    /// Locking an outpoint already leased to `id` extends the lease to `now + ttl`. An expired
    /// lease held by someone else is taken over.
    pub fn lock(&self, id: LeaseId, outpoint: OutPoint, ttl: Duration) -> Result<u64, Error> {
        let mut store = self.store.lock()?;
        let now = self.clock.now();

        check_holder(&*store, id, &outpoint, now)?;

        let lease = Lease {
            id,
            outpoint,
            expires_at: self.expiry(now, ttl),
        };
        store.set_lease(&lease)?;

        log_debug!(
            self.logger,
            "leased {} to {} until {}",
            outpoint,
            id,
            lease.expires_at
        );

        Ok(lease.expires_at)
    }

    /// Lease every outpoint in `outpoints` to `id`, or none of them
    ///
    /// All the outpoints are checked before anything is written, and the leases are committed in
    /// a single batch.
    pub fn lock_all(
        &self,
        id: LeaseId,
        outpoints: &[OutPoint],
        ttl: Duration,
    ) -> Result<Vec<Lease>, Error> {
        let mut store = self.store.lock()?;
        let now = self.clock.now();
        let expires_at = self.expiry(now, ttl);

        let mut seen = HashSet::with_capacity(outpoints.len());
        for outpoint in outpoints {
            if !seen.insert(outpoint) {
                return Err(Error::DuplicateInput(*outpoint));
            }
            check_holder(&*store, id, outpoint, now)?;
        }

        let leases = outpoints
            .iter()
            .map(|outpoint| Lease {
                id,
                outpoint: *outpoint,
                expires_at,
            })
            .collect::<Vec<_>>();

        let mut batch = store.begin_batch();
        for lease in &leases {
            batch.set_lease(lease)?;
        }
        store.commit_batch(batch)?;

        log_debug!(
            self.logger,
            "leased {} outputs to {} until {}",
            leases.len(),
            id,
            expires_at
        );

        Ok(leases)
    }

    /// Release the lease `id` holds on `outpoint`
    ///
    /// Fails with [`Error::LeaseNotFound`] if there's no live lease on the outpoint, or if it's
    /// held by a different id.
    pub fn release(&self, id: LeaseId, outpoint: &OutPoint) -> Result<(), Error> {
        let mut store = self.store.lock()?;
        let now = self.clock.now();

        match store.get_lease(outpoint)? {
            Some(lease) if lease.id == id && lease.is_live(now) => {
                store.del_lease(outpoint)?;
                log_debug!(self.logger, "released {} from {}", outpoint, id);

                Ok(())
            }
            _ => Err(Error::LeaseNotFound(*outpoint)),
        }
    }

    /// Release every lease held by `id`, returning the outpoints that were freed
    pub fn release_all(&self, id: LeaseId) -> Result<Vec<OutPoint>, Error> {
        let mut store = self.store.lock()?;

        let outpoints = store
            .iter_leases()?
            .into_iter()
            .filter(|lease| lease.id == id)
            .map(|lease| lease.outpoint)
            .collect::<Vec<_>>();

        let mut batch = store.begin_batch();
        for outpoint in &outpoints {
            batch.del_lease(outpoint)?;
        }
        store.commit_batch(batch)?;

        if !outpoints.is_empty() {
            log_debug!(
                self.logger,
                "released {} outputs from {}",
                outpoints.len(),
                id
            );
        }

        Ok(outpoints)
    }

    /// All the live leases
    pub fn list_leases(&self) -> Result<Vec<Lease>, Error> {
        let store = self.store.lock()?;
        let now = self.clock.now();

        Ok(store
            .iter_leases()?
            .into_iter()
            .filter(|lease| lease.is_live(now))
            .collect())
    }

    /// The live lease on `outpoint`, if any
    pub fn lease_for(&self, outpoint: &OutPoint) -> Result<Option<Lease>, Error> {
        let store = self.store.lock()?;
        let now = self.clock.now();

        Ok(store.get_lease(outpoint)?.filter(|lease| lease.is_live(now)))
    }

    /// Whether `outpoint` is held by a live lease
    pub fn is_leased(&self, outpoint: &OutPoint) -> Result<bool, Error> {
        Ok(self.lease_for(outpoint)?.is_some())
    }

    /// Delete expired leases from the store, returning how many were removed
    pub fn sweep_expired(&self) -> Result<usize, Error> {
        let mut store = self.store.lock()?;
        let now = self.clock.now();

        let expired = store
            .iter_leases()?
            .into_iter()
            .filter(|lease| !lease.is_live(now))
            .collect::<Vec<_>>();

        let mut batch = store.begin_batch();
        for lease in &expired {
            batch.del_lease(&lease.outpoint)?;
        }
        store.commit_batch(batch)?;

        log_trace!(self.logger, "swept {} expired leases", expired.len());

        Ok(expired.len())
    }
}

fn check_holder<D: Database>(
    store: &D,
    id: LeaseId,
    outpoint: &OutPoint,
    now: u64,
) -> Result<(), Error> {
    match store.get_lease(outpoint)? {
        Some(lease) if lease.id != id && lease.is_live(now) => Err(Error::LeaseConflict {
            outpoint: *outpoint,
            holder: lease.id,
        }),
        _ => Ok(()),
    }
}

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

//! In-memory ephemeral database
//!
//! This module defines an in-memory database type called [`MemoryDatabase`] that is based on a
//! [`BTreeMap`].

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included};

use bitcoin::consensus::encode::serialize;
use bitcoin::OutPoint;

use crate::database::{BatchDatabase, BatchOperations, Database};
use crate::error::Error;
use crate::types::Lease;

// lease                l<outpoint> -> lease

pub(crate) enum MapKey<'a> {
    Lease(Option<&'a OutPoint>),
}

impl MapKey<'_> {
    fn as_prefix(&self) -> Vec<u8> {
        match self {
            MapKey::Lease(_) => b"l".to_vec(),
        }
    }

    fn serialize_content(&self) -> Vec<u8> {
        match self {
            MapKey::Lease(Some(outpoint)) => serialize(*outpoint),
            _ => vec![],
        }
    }

    pub fn as_map_key(&self) -> Vec<u8> {
        let mut v = self.as_prefix();
        v.extend_from_slice(&self.serialize_content());

        v
    }
}

fn after(key: &[u8]) -> Vec<u8> {
    let mut key = key.to_owned();
    let mut idx = key.len();
    while idx > 0 {
        if key[idx - 1] == 0xFF {
            idx -= 1;
            continue;
        } else {
            key[idx - 1] += 1;
            break;
        }
    }

    key
}

/// In-memory ephemeral database
///
/// This database can be used as a temporary storage for leases that don't need to survive a
/// restart. It's also the batch type of itself: operations on a batch are recorded and replayed
/// on commit.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    map: BTreeMap<Vec<u8>, Lease>,
    deleted_keys: Vec<Vec<u8>>,
}

impl MemoryDatabase {
    /// Create a new empty database
    pub fn new() -> Self {
        MemoryDatabase {
            map: BTreeMap::new(),
            deleted_keys: Vec::new(),
        }
    }
}

impl BatchOperations for MemoryDatabase {
    fn set_lease(&mut self, lease: &Lease) -> Result<(), Error> {
        let key = MapKey::Lease(Some(&lease.outpoint)).as_map_key();
        self.deleted_keys.retain(|k| k != &key);
        self.map.insert(key, lease.clone());

        Ok(())
    }

    fn del_lease(&mut self, outpoint: &OutPoint) -> Result<Option<Lease>, Error> {
        let key = MapKey::Lease(Some(outpoint)).as_map_key();
        let res = self.map.remove(&key);
        self.deleted_keys.push(key);

        Ok(res)
    }
}

impl Database for MemoryDatabase {
    fn get_lease(&self, outpoint: &OutPoint) -> Result<Option<Lease>, Error> {
        let key = MapKey::Lease(Some(outpoint)).as_map_key();
        Ok(self.map.get(&key).cloned())
    }

    fn iter_leases(&self) -> Result<Vec<Lease>, Error> {
        let key = MapKey::Lease(None).as_map_key();
        Ok(self
            .map
            .range::<Vec<u8>, _>((Included(&key), Excluded(&after(&key))))
            .map(|(_, v)| v.clone())
            .collect())
    }
}

impl BatchDatabase for MemoryDatabase {
    type Batch = Self;

    fn begin_batch(&self) -> Self::Batch {
        MemoryDatabase::new()
    }

    fn commit_batch(&mut self, mut batch: Self::Batch) -> Result<(), Error> {
        for key in batch.deleted_keys {
            self.map.remove(&key);
        }

        self.map.append(&mut batch.map);
        Ok(())
    }
}

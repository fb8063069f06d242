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

use serde_json::json;
use sled::{Batch, Tree};

use bitcoin::consensus::encode::deserialize;
use bitcoin::OutPoint;

use crate::database::memory::MapKey;
use crate::database::{BatchDatabase, BatchOperations, Database};
use crate::error::Error;
use crate::types::Lease;

fn lease_from_value(outpoint: OutPoint, bytes: &[u8]) -> Result<Lease, Error> {
    let mut val: serde_json::Value = serde_json::from_slice(bytes)?;
    let id = serde_json::from_value(val["i"].take())?;
    let expires_at = serde_json::from_value(val["e"].take())?;

    Ok(Lease {
        id,
        outpoint,
        expires_at,
    })
}

macro_rules! impl_batch_operations {
    ( { $($after_insert:tt)* }, $process_delete:ident ) => {
        fn set_lease(&mut self, lease: &Lease) -> Result<(), Error> {
            let key = MapKey::Lease(Some(&lease.outpoint)).as_map_key();
            let value = json!({
                "i": lease.id,
                "e": lease.expires_at,
            });
            self.insert(key, serde_json::to_vec(&value)?)$($after_insert)*;

            Ok(())
        }

        fn del_lease(&mut self, outpoint: &OutPoint) -> Result<Option<Lease>, Error> {
            let key = MapKey::Lease(Some(outpoint)).as_map_key();
            let res = self.remove(key);
            let res = $process_delete!(res);

            res.map(|b| lease_from_value(*outpoint, &b)).transpose()
        }
    }
}

macro_rules! process_delete_tree {
    ($res:expr) => {
        $res?
    };
}
impl BatchOperations for Tree {
    impl_batch_operations!({?}, process_delete_tree);
}

macro_rules! process_delete_batch {
    ($res:expr) => {
        None as Option<sled::IVec>
    };
}
#[allow(unused_variables)]
impl BatchOperations for Batch {
    impl_batch_operations!({}, process_delete_batch);
}

impl Database for Tree {
    fn get_lease(&self, outpoint: &OutPoint) -> Result<Option<Lease>, Error> {
        let key = MapKey::Lease(Some(outpoint)).as_map_key();
        self.get(key)?
            .map(|b| lease_from_value(*outpoint, &b))
            .transpose()
    }

    fn iter_leases(&self) -> Result<Vec<Lease>, Error> {
        let key = MapKey::Lease(None).as_map_key();
        self.scan_prefix(key)
            .map(|x| -> Result<_, Error> {
                let (k, v) = x?;
                let outpoint = deserialize(&k[1..])?;
                lease_from_value(outpoint, &v)
            })
            .collect()
    }
}

impl BatchDatabase for Tree {
    type Batch = sled::Batch;

    fn begin_batch(&self) -> Self::Batch {
        sled::Batch::default()
    }

    fn commit_batch(&mut self, batch: Self::Batch) -> Result<(), Error> {
        Ok(self.apply_batch(batch)?)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;
    use std::sync::{Arc, Condvar, Mutex, Once};
    use std::time::{SystemTime, UNIX_EPOCH};

    use lazy_static::lazy_static;
    use sled::{Db, Tree};

    use super::*;
    use crate::types::LeaseId;

    static mut COUNT: usize = 0;

    lazy_static! {
        static ref DB: Arc<(Mutex<Option<Db>>, Condvar)> =
            Arc::new((Mutex::new(None), Condvar::new()));
        static ref INIT: Once = Once::new();
    }

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let time = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let mut dir = std::env::temp_dir();
        dir.push(format!("{}_{}", prefix, time.as_nanos()));
        dir
    }

    fn get_tree() -> Tree {
        unsafe {
            let cloned = DB.clone();
            let (mutex, cvar) = &*cloned;

            INIT.call_once(|| {
                let mut db = mutex.lock().unwrap();
                *db = Some(sled::open(temp_dir("lnfund")).unwrap());
                cvar.notify_all();
            });

            let mut db = mutex.lock().unwrap();
            while !db.is_some() {
                db = cvar.wait(db).unwrap();
            }

            COUNT += 1;

            db.as_ref()
                .unwrap()
                .open_tree(format!("tree_{}", COUNT))
                .unwrap()
        }
    }

    #[test]
    fn test_lease() {
        crate::database::test::test_lease(get_tree());
    }

    #[test]
    fn test_replace_lease() {
        crate::database::test::test_replace_lease(get_tree());
    }

    #[test]
    fn test_batch_lease() {
        crate::database::test::test_batch_lease(get_tree());
    }

    #[test]
    fn test_batch_del_lease() {
        crate::database::test::test_batch_del_lease(get_tree());
    }

    #[test]
    fn test_del_lease() {
        crate::database::test::test_del_lease(get_tree());
    }

    #[test]
    fn test_iter_leases() {
        crate::database::test::test_iter_leases(get_tree());
    }

    #[test]
    fn test_leases_survive_reopen() {
        let dir = temp_dir("lnfund_reopen");
        let lease = Lease {
            id: LeaseId([7; 32]),
            outpoint: OutPoint::from_str(
                "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456:1",
            )
            .unwrap(),
            expires_at: 4_000_000_000,
        };

        {
            let db = sled::open(&dir).unwrap();
            let mut tree = db.open_tree("leases").unwrap();
            tree.set_lease(&lease).unwrap();
            db.flush().unwrap();
        }

        let db = sled::open(&dir).unwrap();
        let tree = db.open_tree("leases").unwrap();
        assert_eq!(tree.iter_leases().unwrap(), vec![lease]);
    }

    #[test]
    fn test_stored_value_is_json() {
        let mut tree = get_tree();
        let lease = Lease {
            id: LeaseId([1; 32]),
            outpoint: OutPoint::null(),
            expires_at: 42,
        };
        tree.set_lease(&lease).unwrap();

        let key = MapKey::Lease(Some(&lease.outpoint)).as_map_key();
        let raw = tree.get(key).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["e"], 42);
        assert_eq!(value["i"], lease.id.to_string());
    }
}

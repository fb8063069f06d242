mod common;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use bitcoin::Amount;
use rand::Rng;

use lnfund::wallet::tx_builder::TxOrdering;
use lnfund::{Error, LeaseId, SigningState};

use common::*;

#[test]
fn test_round_trip_with_two_signers() {
    let alice = signer(1);
    let bob = signer(2);
    let (coordinator, _) = get_memory_coordinator(vec![
        wallet_coin(&alice, 0, 70_000),
        nested_coin(&bob, 1, 60_000),
    ]);

    let mut template = coordinator
        .fund_template(pay_to_channel(100_000).ordering(TxOrdering::Bip69Lexicographic))
        .unwrap();
    let unsigned = template.psbt.unsigned_tx.clone();
    assert_eq!(template.missing_signatures().len(), 2);

    // each signer only touches its own input
    coordinator.sign_template(&mut template, &alice).unwrap();
    assert_eq!(template.missing_signatures().len(), 1);
    match coordinator.finalize(&mut template) {
        Err(Error::IncompleteSigning(missing)) => assert_eq!(missing.len(), 1),
        other => panic!("unexpected {:?}", other),
    }

    let state = coordinator.sign_template(&mut template, &bob).unwrap();
    assert_eq!(state, SigningState::PartiallySigned);

    let finalized = coordinator.finalize(&mut template).unwrap();
    assert_eq!(template.state, SigningState::FullySigned);
    assert_eq!(
        coordinator.template_state(template.lease_id).unwrap(),
        SigningState::FullySigned
    );

    let prevouts = unsigned
        .input
        .iter()
        .map(|txin| txin.previous_output)
        .collect::<Vec<_>>();
    let spent = finalized
        .tx
        .input
        .iter()
        .map(|txin| txin.previous_output)
        .collect::<Vec<_>>();
    assert_eq!(prevouts, spent);
    assert_eq!(finalized.tx.output, unsigned.output);

    for index in 0..finalized.tx.input.len() {
        let prevout = template.psbt.inputs[index].witness_utxo.clone().unwrap();
        verify_input(&finalized.tx, index, &prevout);
    }

    let decoded: bitcoin::Transaction =
        bitcoin::consensus::encode::deserialize(&finalized.raw).unwrap();
    assert_eq!(decoded, finalized.tx);
}

#[test]
fn test_lease_conflict_until_expiry() {
    let alice = signer(1);
    let (coordinator, clock) = get_memory_coordinator(vec![wallet_coin(&alice, 0, 100_000)]);
    let (a, b) = (LeaseId::random(), LeaseId::random());

    let expires_at = coordinator
        .lease_output(a, outpoint(0), Duration::from_secs(60))
        .unwrap();
    assert_eq!(expires_at, START_TIME + 60);

    match coordinator.lease_output(b, outpoint(0), Duration::from_secs(60)) {
        Err(Error::LeaseConflict { outpoint: o, holder }) => {
            assert_eq!(o, outpoint(0));
            assert_eq!(holder, a);
        }
        other => panic!("unexpected {:?}", other),
    }

    clock.advance(Duration::from_secs(61));
    coordinator
        .lease_output(b, outpoint(0), Duration::from_secs(60))
        .unwrap();

    let leases = coordinator.list_leases().unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].id, b);
}

#[test]
fn test_relocking_extends_the_lease() {
    let alice = signer(1);
    let (coordinator, clock) = get_memory_coordinator(vec![wallet_coin(&alice, 0, 100_000)]);
    let id = LeaseId::random();

    coordinator
        .lease_output(id, outpoint(0), Duration::from_secs(60))
        .unwrap();
    clock.advance(Duration::from_secs(30));
    let expires_at = coordinator
        .lease_output(id, outpoint(0), Duration::from_secs(60))
        .unwrap();

    assert_eq!(expires_at, START_TIME + 90);
    assert_eq!(coordinator.list_leases().unwrap().len(), 1);
}

#[test]
fn test_dust_change_is_not_created() {
    let alice = signer(1);
    let (coordinator, _) = get_memory_coordinator(vec![wallet_coin(&alice, 0, 100_000)]);

    // 154 sat of fee with a change output, leaving 300 sat of change
    let template = coordinator
        .fund_template(pay_to_channel(100_000 - 154 - 300))
        .unwrap();

    assert_eq!(template.change_index, -1);
    assert!(template.change_output().is_none());
    assert_eq!(template.fee(), Some(Amount::from_sat(454)));
}

#[test]
fn test_abandon_racing_signatures() {
    let alice = signer(1);
    let coins = (0..20).map(|vout| wallet_coin(&alice, vout, 50_000)).collect();
    let (coordinator, _) = get_memory_coordinator(coins);
    let coordinator = Arc::new(coordinator);
    let alice = Arc::new(alice);

    for _ in 0..20 {
        let template = coordinator.fund_template(pay_to_channel(40_000)).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let signing = {
            let coordinator = Arc::clone(&coordinator);
            let alice = Arc::clone(&alice);
            let barrier = Arc::clone(&barrier);
            let mut template = template.clone();
            thread::spawn(move || {
                barrier.wait();
                coordinator.sign_template(&mut template, alice.as_ref())
            })
        };
        let abandoning = {
            let coordinator = Arc::clone(&coordinator);
            let barrier = Arc::clone(&barrier);
            let id = template.lease_id;
            thread::spawn(move || {
                barrier.wait();
                coordinator.abandon(id)
            })
        };

        match signing.join().unwrap() {
            Ok(SigningState::PartiallySigned) | Err(Error::TemplateAbandoned(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        abandoning.join().unwrap().unwrap();

        assert_eq!(
            coordinator.template_state(template.lease_id).unwrap(),
            SigningState::Abandoned
        );
        assert!(coordinator.list_leases().unwrap().is_empty());
    }
}

#[test]
fn test_randomized_concurrent_leases_are_exclusive() {
    let alice = signer(1);
    let coins = (0..8).map(|vout| wallet_coin(&alice, vout, 50_000)).collect();
    let (coordinator, clock) = get_memory_coordinator(coins);
    let coordinator = Arc::new(coordinator);
    let mut rng = rand::thread_rng();

    for _ in 0..10 {
        let contenders = rng.gen_range(2..8);
        let target = outpoint(rng.gen_range(0..8));
        let barrier = Arc::new(Barrier::new(contenders));

        let handles = (0..contenders)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let id = LeaseId::random();
                    barrier.wait();
                    coordinator
                        .lease_output(id, target, Duration::from_secs(60))
                        .map(|_| id)
                })
            })
            .collect::<Vec<_>>();

        let mut winners = HashSet::new();
        for handle in handles {
            match handle.join().unwrap() {
                Ok(id) => {
                    winners.insert(id);
                }
                Err(Error::LeaseConflict { .. }) => {}
                Err(e) => panic!("unexpected {:?}", e),
            }
        }
        assert_eq!(winners.len(), 1);

        // let this round's lease expire before the next one
        clock.advance(Duration::from_secs(61));
        assert!(coordinator.list_leases().unwrap().is_empty());
    }
}

#[cfg(feature = "key-value-db")]
#[test]
fn test_leases_survive_restart() {
    let alice = signer(1);
    let coins = vec![wallet_coin(&alice, 0, 100_000), wallet_coin(&alice, 1, 50_000)];

    let path = std::env::temp_dir().join(format!(
        "lnfund-leases-{}",
        rand::thread_rng().gen::<u64>()
    ));

    let (template, expires_at) = {
        let db = sled::open(&path).unwrap();
        let tree = db.open_tree("leases").unwrap();
        let (coordinator, _) = get_coordinator(coins.clone(), tree.clone());

        let template = coordinator.fund_template(pay_to_channel(120_000)).unwrap();
        tree.flush().unwrap();

        let expires_at = template.leases[0].expires_at;
        (template, expires_at)
    };

    {
        let db = sled::open(&path).unwrap();
        let tree = db.open_tree("leases").unwrap();
        let (coordinator, clock) = get_coordinator(coins, tree);

        let leases = coordinator.list_leases().unwrap();
        assert_eq!(leases.len(), 2);
        assert!(leases.iter().all(|lease| lease.id == template.lease_id));
        assert!(coordinator
            .list_unspent(1, 9_999_999, None)
            .unwrap()
            .is_empty());

        // the funding session itself isn't persisted, only its leases
        assert!(matches!(
            coordinator.template_state(template.lease_id),
            Err(Error::TemplateNotFound(_))
        ));

        clock.set(expires_at);
        assert!(coordinator.list_leases().unwrap().is_empty());
        assert_eq!(coordinator.leases().sweep_expired().unwrap(), 2);
    }

    std::fs::remove_dir_all(&path).unwrap();
}

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

//! Funding coordinator
//!
//! The [`FundingCoordinator`] carries a funding attempt from a [`FundingRequest`] to a signed
//! transaction:
//!
//! 1. [`fund_template`](FundingCoordinator::fund_template) selects the inputs (or takes the ones
//!    the request names), leases them under a fresh [`LeaseId`] and returns an unsigned
//!    [`FundingTemplate`].
//! 2. [`apply_partial_signatures`](FundingCoordinator::apply_partial_signatures) (or
//!    [`sign_template`](FundingCoordinator::sign_template) with a local [`Signer`]) adds verified
//!    signatures, possibly over several calls from different signers.
//! 3. [`finalize`](FundingCoordinator::finalize) builds the witnesses and returns the final
//!    transaction.
//!
//! At any point before finalization [`abandon`](FundingCoordinator::abandon) releases the leases
//! and discards the attempt. Broadcasting the final transaction, and releasing its leases once it
//! confirms or fails, is up to the caller.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryFrom;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize;
use bitcoin::script::PushBytesBuf;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, CompressedPublicKey, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness,
};

use super::coin_selection::CoinSelectionAlgorithm;
use super::lease::LeaseManager;
use super::signer::{
    key_pays_to, p2wpkh_sighash, witness_program, InputSignature, SecpCtx, Signer, SignerError,
};
use super::source::{FeeEstimator, UtxoSource};
use super::time::Clock;
use super::tx_builder::{FeeSpec, FundingRequest};
use super::weight::TxWeightEstimator;
use crate::config::FundingConfig;
use crate::database::BatchDatabase;
use crate::error::Error;
use crate::logger::LoggerHandle;
use crate::psbt::PsbtUtils;
use crate::types::{Coin, FeeRate, Lease, LeaseId, FEE_PER_KW_FLOOR};

/// Signing progress of a funding attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningState {
    /// Inputs and outputs are still being chosen
    Building,
    /// Funded and leased, no signature yet. The transaction can't change from here on
    Unsigned,
    /// At least one signature was applied
    PartiallySigned,
    /// Finalized, every input carries its final witness
    FullySigned,
    /// Discarded, the leases were released
    Abandoned,
}

impl SigningState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SigningState::FullySigned | SigningState::Abandoned)
    }
}

/// A funded, unsigned or partially signed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct FundingTemplate {
    /// Id of the funding attempt, every lease it acquired is held under this id
    pub lease_id: LeaseId,
    /// The transaction and the metadata needed to sign each input
    pub psbt: Psbt,
    /// Index of the change output, `-1` if there's none
    pub change_index: i32,
    /// Leases acquired for the inputs
    pub leases: Vec<Lease>,
    /// For each input, whether it's held by one of [`leases`](Self::leases). Inputs that aren't
    /// are foreign inputs supplied by the caller
    pub lease_backed: Vec<bool>,
    /// Signing state when the template was last returned by the coordinator
    pub state: SigningState,
}

impl FundingTemplate {
    /// Txid of the unsigned transaction
    pub fn txid(&self) -> Txid {
        self.psbt.unsigned_tx.compute_txid()
    }

    /// The change output, if any
    pub fn change_output(&self) -> Option<&TxOut> {
        usize::try_from(self.change_index)
            .ok()
            .and_then(|index| self.psbt.unsigned_tx.output.get(index))
    }

    /// Fee paid by the transaction
    pub fn fee(&self) -> Option<Amount> {
        self.psbt.fee_amount()
    }

    /// Indexes of the inputs that are still missing a signature
    pub fn missing_signatures(&self) -> Vec<usize> {
        self.psbt.unsigned_inputs()
    }
}

/// A finalized transaction, ready to be broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedTransaction {
    /// The signed transaction
    pub tx: Transaction,
    /// Its consensus serialization
    pub raw: Vec<u8>,
}

impl FinalizedTransaction {
    /// Txid of the transaction
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }
}

/// What the coordinator remembers of a funding attempt
///
/// The caller holds the template, so anything it could tamper with is checked against this.
#[derive(Debug)]
struct Session {
    state: SigningState,
    txid: Txid,
    prevouts: Vec<TxOut>,
    lease_backed: Vec<bool>,
    /// Verified signatures, by input index
    signatures: BTreeMap<usize, InputSignature>,
    /// Until when the session is kept without a live lease
    expires_at: u64,
}

impl Session {
    fn settle(&mut self, state: SigningState, now: u64, ttl: Duration) {
        self.state = state;
        self.signatures.clear();
        self.expires_at = now.saturating_add(ttl.as_secs());
    }
}

/// Funds, leases and signs transactions from a wallet's UTXO set
pub struct FundingCoordinator<S, D> {
    source: S,
    fee_estimator: Box<dyn FeeEstimator>,
    leases: LeaseManager<D>,
    registry: Mutex<HashMap<LeaseId, Session>>,
    config: FundingConfig,
    logger: LoggerHandle,
    secp: SecpCtx,
}

impl<S, D> FundingCoordinator<S, D>
where
    S: UtxoSource,
    D: BatchDatabase,
{
    /// Create a new coordinator
    ///
    /// Leases are stored in `store` and expire according to `clock`. Leases already in the store
    /// keep holding their outputs.
    pub fn new<E: FeeEstimator + 'static>(
        source: S,
        fee_estimator: E,
        store: D,
        clock: Arc<dyn Clock>,
        config: FundingConfig,
        logger: LoggerHandle,
    ) -> Self {
        let leases = LeaseManager::new(
            store,
            clock,
            Arc::clone(&logger),
            config.default_lease_ttl(),
        );

        FundingCoordinator {
            source,
            fee_estimator: Box::new(fee_estimator),
            leases,
            registry: Mutex::new(HashMap::new()),
            config,
            logger,
            secp: SecpCtx::new(),
        }
    }

    /// Return a reference to the UTXO source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Return a reference to the lease manager
    pub fn leases(&self) -> &LeaseManager<D> {
        &self.leases
    }

    /// Return a reference to the configuration
    pub fn config(&self) -> &FundingConfig {
        &self.config
    }

    /// Return a reference to the internal secp256k1 context
    pub fn secp_ctx(&self) -> &SecpCtx {
        &self.secp
    }

    /// Unspent outputs of the wallet that aren't held by a live lease
    pub fn list_unspent(
        &self,
        min_confs: u32,
        max_confs: u32,
        account: Option<&str>,
    ) -> Result<Vec<Coin>, Error> {
        let leased = self
            .leases
            .list_leases()?
            .into_iter()
            .map(|lease| lease.outpoint)
            .collect::<HashSet<_>>();

        let mut coins = self.source.list_unspent(min_confs, max_confs, account)?;
        coins.retain(|coin| !leased.contains(&coin.outpoint));

        Ok(coins)
    }

    /// Lease one of the wallet's outputs to `id`, returning the expiry time
    ///
    /// A `ttl` of zero uses the configured default.
    pub fn lease_output(&self, id: LeaseId, outpoint: OutPoint, ttl: Duration) -> Result<u64, Error> {
        let known = self
            .source
            .list_unspent(0, self.config.max_confs, None)?
            .iter()
            .any(|coin| coin.outpoint == outpoint);
        if !known {
            return Err(Error::UnknownUtxo(outpoint));
        }

        self.leases.lock(id, outpoint, ttl)
    }

    /// Release the lease `id` holds on `outpoint`
    pub fn release_output(&self, id: LeaseId, outpoint: &OutPoint) -> Result<(), Error> {
        self.leases.release(id, outpoint)
    }

    /// All the live leases
    pub fn list_leases(&self) -> Result<Vec<Lease>, Error> {
        self.leases.list_leases()
    }

    /// Signing state of the funding attempt `id`
    pub fn template_state(&self, id: LeaseId) -> Result<SigningState, Error> {
        let registry = self.registry.lock()?;
        registry
            .get(&id)
            .map(|session| session.state)
            .ok_or(Error::TemplateNotFound(id))
    }

    /// Fund a request, leasing its inputs
    ///
    /// Without explicit inputs coins are selected from the wallet's unleased outputs. With them no
    /// selection happens: they must cover the outputs and the fee on their own. Every input the
    /// wallet knows is leased under the template's new [`LeaseId`], in a single all-or-nothing
    /// step. Inputs only found in the request's PSBT are foreign: they're checked to be unleased
    /// but not leased.
    pub fn fund_template<Cs: CoinSelectionAlgorithm>(
        &self,
        request: FundingRequest<Cs>,
    ) -> Result<FundingTemplate, Error> {
        if request.recipients.is_empty() {
            return Err(Error::NoRecipients);
        }

        let dust_limit = self.config.dust_limit();
        if let Some(txout) = request.recipients.iter().find(|o| o.value < dust_limit) {
            return Err(Error::OutputBelowDustLimit {
                amount: txout.value,
                dust_limit,
            });
        }

        let min_confs = match (request.allow_unconfirmed, request.min_confs) {
            (true, _) => 0,
            (false, Some(0)) => return Err(Error::InvalidMinConfs),
            (false, Some(min_confs)) => min_confs,
            (false, None) => self.config.default_min_confs,
        };
        let fee_rate = self.fee_rate(request.fee)?;
        let account = request.account.as_deref();

        let mut base_weight = TxWeightEstimator::new();
        for txout in &request.recipients {
            base_weight.add_output(&txout.script_pubkey);
        }
        let amount = request.recipients_amount();

        let (required, candidates, foreign) = if request.utxos.is_empty() {
            let mut candidates = self.list_unspent(min_confs, self.config.max_confs, account)?;
            request.coin_ordering.sort_coins(&mut candidates);

            (vec![], candidates, HashSet::new())
        } else {
            let (required, foreign) = self.resolve_utxos(&request.utxos, request.psbt.as_ref())?;

            (required, vec![], foreign)
        };

        let coin_selection = request.coin_selection.coin_select(
            &required,
            &candidates,
            &base_weight,
            fee_rate,
            amount,
            dust_limit,
        )?;

        let mut outputs = request.recipients.clone();
        if coin_selection.output_amount != amount {
            match outputs.as_mut_slice() {
                [recipient] => recipient.value = coin_selection.output_amount,
                _ => {
                    return Err(Error::Generic(
                        "Fees can only be subtracted from a single recipient".into(),
                    ))
                }
            }
        }

        let change = if coin_selection.has_change() {
            let script_pubkey = match &request.change_script {
                Some(script) => script.clone(),
                None => self.source.change_script(account)?,
            };

            Some(TxOut {
                value: coin_selection.change_amount,
                script_pubkey,
            })
        } else {
            None
        };

        let template_psbt = request.psbt.as_ref();
        let (version, lock_time) = template_psbt
            .map(|psbt| (psbt.unsigned_tx.version, psbt.unsigned_tx.lock_time))
            .unwrap_or((Version::TWO, LockTime::ZERO));

        let mut tx = Transaction {
            version,
            lock_time,
            input: coin_selection
                .selected
                .iter()
                .map(|coin| TxIn {
                    previous_output: coin.outpoint,
                    sequence: template_input(template_psbt, &coin.outpoint)
                        .map(|(txin, _)| txin.sequence)
                        .unwrap_or(Sequence::MAX),
                    ..Default::default()
                })
                .collect(),
            output: outputs.into_iter().chain(change).collect(),
        };

        let change_position = if coin_selection.has_change() {
            Some(tx.output.len() - 1)
        } else {
            None
        };
        let change_index = request
            .ordering
            .modify_tx_tracking(&mut tx, change_position)
            .map(|index| index as i32)
            .unwrap_or(-1);

        let mut psbt = Psbt::from_unsigned_tx(tx)?;
        let coins = coin_selection
            .selected
            .iter()
            .map(|coin| (coin.outpoint, coin))
            .collect::<HashMap<_, _>>();
        for (txin, input) in psbt.unsigned_tx.input.iter().zip(psbt.inputs.iter_mut()) {
            let coin = match coins.get(&txin.previous_output) {
                Some(coin) => coin,
                None => continue,
            };

            if let Some((_, carried)) = template_input(template_psbt, &coin.outpoint) {
                *input = carried.clone();
            }
            input.witness_utxo = Some(coin.txout.clone());

            if let Some(origin) = &coin.key_origin {
                input
                    .bip32_derivation
                    .insert(origin.public_key, origin.source.clone());

                let program =
                    ScriptBuf::new_p2wpkh(&CompressedPublicKey(origin.public_key).wpubkey_hash());
                if coin.txout.script_pubkey == ScriptBuf::new_p2sh(&program.script_hash()) {
                    input.redeem_script = Some(program);
                }
            }
        }

        let lease_backed = psbt
            .unsigned_tx
            .input
            .iter()
            .map(|txin| !foreign.contains(&txin.previous_output))
            .collect::<Vec<_>>();
        let to_lease = psbt
            .unsigned_tx
            .input
            .iter()
            .map(|txin| txin.previous_output)
            .filter(|outpoint| !foreign.contains(outpoint))
            .collect::<Vec<_>>();
        let txid = psbt.unsigned_tx.compute_txid();
        let prevouts = psbt
            .unsigned_tx
            .input
            .iter()
            .filter_map(|txin| coins.get(&txin.previous_output))
            .map(|coin| coin.txout.clone())
            .collect::<Vec<_>>();

        let mut template = FundingTemplate {
            lease_id: LeaseId::random(),
            psbt,
            change_index,
            leases: vec![],
            lease_backed,
            state: SigningState::Building,
        };

        let mut registry = self.registry.lock()?;
        self.prune_sessions(&mut registry)?;

        template.leases = self
            .leases
            .lock_all(template.lease_id, &to_lease, request.lease_ttl)?;
        template.state = SigningState::Unsigned;
        registry.insert(
            template.lease_id,
            Session {
                state: template.state,
                txid,
                prevouts,
                lease_backed: template.lease_backed.clone(),
                signatures: BTreeMap::new(),
                expires_at: self
                    .leases
                    .now()
                    .saturating_add(self.ttl(request.lease_ttl).as_secs())
                    .saturating_add(self.config.default_lease_ttl().as_secs()),
            },
        );

        log_info!(
            self.logger,
            "funded template {} spending {} inputs at {}, fee {}, change index {}",
            template.lease_id,
            template.psbt.inputs.len(),
            fee_rate,
            coin_selection.fee_amount,
            template.change_index
        );

        Ok(template)
    }

    /// Ask `signer` to sign every input of `template` that's still unsigned
    ///
    /// Inputs the signer doesn't control, or lacks the material for, are left alone. The
    /// signatures go through [`apply_partial_signatures`](Self::apply_partial_signatures).
    pub fn sign_template<Sg: Signer + ?Sized>(
        &self,
        template: &mut FundingTemplate,
        signer: &Sg,
    ) -> Result<SigningState, Error> {
        let mut signatures = vec![];
        for index in template.psbt.unsigned_inputs() {
            match signer.sign_input(&template.psbt, index, &self.secp) {
                Ok(Some(signature)) => signatures.push(signature),
                Ok(None) => {}
                Err(SignerError::MissingWitnessUtxo)
                | Err(SignerError::MissingRedeemScript)
                | Err(SignerError::MissingHDKeypath)
                | Err(SignerError::UnsupportedScript) => {
                    log_debug!(self.logger, "input {} can't be signed locally", index)
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.apply_partial_signatures(template, signatures)
    }

    /// Add signatures to a template
    ///
    /// Every signature is verified against the BIP143 sighash of its input before anything is
    /// applied: a single invalid one fails the whole call with [`Error::InvalidSignature`].
    /// Signatures for inputs that are already final, or that lack the previous output needed to
    /// check them, are skipped.
    ///
    /// The signing key only has to match the input's script. Derivation info is carried for
    /// signers that need it, but a verified signature is accepted without it.
    ///
    /// Fails with [`Error::LeaseExpired`] or [`Error::LeaseConflict`] once the attempt stopped
    /// holding the lease of any of its inputs.
    pub fn apply_partial_signatures(
        &self,
        template: &mut FundingTemplate,
        signatures: Vec<InputSignature>,
    ) -> Result<SigningState, Error> {
        let mut registry = self.registry.lock()?;
        let session = self.open_session(&mut registry, template)?;

        let mut accepted = Vec::with_capacity(signatures.len());
        for signature in signatures {
            if self.verify_signature(&template.psbt, &signature)? {
                accepted.push(signature);
            } else {
                log_debug!(
                    self.logger,
                    "skipping signature for input {} of {}",
                    signature.input_index,
                    template.lease_id
                );
            }
        }

        for signature in accepted.iter() {
            template.psbt.inputs[signature.input_index]
                .partial_sigs
                .insert(signature.public_key, signature.signature);
        }
        session.signatures.extend(
            accepted
                .iter()
                .map(|signature| (signature.input_index, signature.clone())),
        );
        if !accepted.is_empty() {
            session.state = SigningState::PartiallySigned;
        }
        template.state = session.state;

        log_debug!(
            self.logger,
            "applied {} signatures to {}, {} inputs left",
            accepted.len(),
            template.lease_id,
            template.psbt.unsigned_inputs().len()
        );

        Ok(session.state)
    }

    /// Build the final witnesses and extract the transaction
    ///
    /// Only signatures that went through
    /// [`apply_partial_signatures`](Self::apply_partial_signatures) are used, and each one is
    /// checked again against the template as it is now. A final witness already in the template
    /// is kept on foreign inputs, but is rejected with [`Error::InvalidSignature`] on an input the
    /// attempt leased.
    ///
    /// Fails with [`Error::IncompleteSigning`] if any input is missing its signature, in which
    /// case the template is left as it was. Like signing, finalizing requires the attempt to still
    /// hold the leases of its inputs.
    pub fn finalize(&self, template: &mut FundingTemplate) -> Result<FinalizedTransaction, Error> {
        let mut registry = self.registry.lock()?;
        let session = self.open_session(&mut registry, template)?;

        let mut psbt = template.psbt.clone();
        let mut missing = vec![];
        for (index, input) in psbt.inputs.iter_mut().enumerate() {
            if input.final_script_witness.is_some() {
                if session.lease_backed[index] {
                    return Err(Error::InvalidSignature(index));
                }
                continue;
            }

            let signature = match session.signatures.get(&index) {
                Some(signature) => signature,
                None => {
                    missing.push(index);
                    continue;
                }
            };
            // the template may have changed since the signature was applied
            if !self.verify_signature(&template.psbt, signature)? {
                missing.push(index);
                continue;
            }

            input.final_script_sig = match input.redeem_script.take() {
                Some(redeem_script) => {
                    let push = PushBytesBuf::try_from(redeem_script.into_bytes())
                        .map_err(|_| Error::Generic("Redeem script too large".into()))?;
                    Some(ScriptBuf::builder().push_slice(push).into_script())
                }
                None => None,
            };
            input.final_script_witness = Some(Witness::from_slice(&[
                signature.signature.to_vec(),
                signature.public_key.to_bytes(),
            ]));

            input.partial_sigs.clear();
            input.sighash_type = None;
            input.witness_script = None;
            input.bip32_derivation.clear();
        }

        if !missing.is_empty() {
            return Err(Error::IncompleteSigning(missing));
        }

        let tx = psbt.clone().extract_tx_unchecked_fee_rate();
        let raw = serialize(&tx);

        template.psbt = psbt;
        session.settle(
            SigningState::FullySigned,
            self.leases.now(),
            self.config.default_lease_ttl(),
        );
        template.state = session.state;

        log_info!(
            self.logger,
            "finalized {} for {}",
            tx.compute_txid(),
            template.lease_id
        );

        Ok(FinalizedTransaction { tx, raw })
    }

    /// Discard the funding attempt `id` and release its leases, returning the freed outputs
    ///
    /// Abandoning twice is a no-op. A finalized attempt can't be abandoned: its leases are
    /// released with [`release_output`](Self::release_output) once the transaction is settled.
    /// The coordinator keeps answering for a discarded attempt for one default lease TTL, then
    /// forgets it.
    pub fn abandon(&self, id: LeaseId) -> Result<Vec<OutPoint>, Error> {
        let mut registry = self.registry.lock()?;
        let session = registry.get_mut(&id).ok_or(Error::TemplateNotFound(id))?;

        match session.state {
            SigningState::Abandoned => return Ok(vec![]),
            SigningState::FullySigned => return Err(Error::TemplateFinalized(id)),
            _ => {}
        }

        let released = match self.leases.release_all(id) {
            Ok(released) => released,
            Err(e) => {
                log_error!(self.logger, "can't release the leases of {}: {}", id, e);
                return Err(e);
            }
        };
        session.settle(
            SigningState::Abandoned,
            self.leases.now(),
            self.config.default_lease_ttl(),
        );

        log_info!(
            self.logger,
            "abandoned {}, released {} outputs",
            id,
            released.len()
        );

        Ok(released)
    }

    /// Delete expired leases and forget the funding attempts that can't make progress anymore,
    /// returning how many attempts were forgotten
    ///
    /// An attempt is forgotten one default lease TTL after it was finalized or abandoned. An open
    /// attempt is kept while it holds a live lease, and for one default lease TTL past its own
    /// TTL otherwise. The same pruning happens each time a template is funded.
    pub fn sweep_expired(&self) -> Result<usize, Error> {
        let mut registry = self.registry.lock()?;
        self.leases.sweep_expired()?;

        self.prune_sessions(&mut registry)
    }

    fn prune_sessions(&self, registry: &mut HashMap<LeaseId, Session>) -> Result<usize, Error> {
        let now = self.leases.now();
        let holders = self
            .leases
            .list_leases()?
            .into_iter()
            .map(|lease| lease.id)
            .collect::<HashSet<_>>();

        let before = registry.len();
        registry.retain(|id, session| {
            (!session.state.is_terminal() && holders.contains(id)) || now < session.expires_at
        });

        let pruned = before - registry.len();
        if pruned > 0 {
            log_debug!(self.logger, "forgot {} funding attempts", pruned);
        }

        Ok(pruned)
    }

    fn ttl(&self, ttl: Duration) -> Duration {
        if ttl.as_secs() == 0 {
            self.config.default_lease_ttl()
        } else {
            ttl
        }
    }

    /// The session of a template that can still be signed
    ///
    /// The template must spend the same outputs with the same transaction it was funded with,
    /// and the attempt must still hold the lease of every input it leased.
    fn open_session<'a>(
        &self,
        registry: &'a mut HashMap<LeaseId, Session>,
        template: &FundingTemplate,
    ) -> Result<&'a mut Session, Error> {
        let id = template.lease_id;
        let session = registry.get_mut(&id).ok_or(Error::TemplateNotFound(id))?;

        match session.state {
            SigningState::Abandoned => return Err(Error::TemplateAbandoned(id)),
            SigningState::FullySigned => return Err(Error::TemplateFinalized(id)),
            _ => {}
        }
        if template.psbt.unsigned_tx.compute_txid() != session.txid {
            return Err(Error::TemplateMismatch(id));
        }

        let same_prevouts = template.psbt.inputs.len() == session.prevouts.len()
            && template
                .psbt
                .inputs
                .iter()
                .zip(session.prevouts.iter())
                .all(|(input, prevout)| {
                    input
                        .witness_utxo
                        .as_ref()
                        .map(|txout| txout == prevout)
                        .unwrap_or(true)
                });
        if !same_prevouts {
            return Err(Error::TemplateMismatch(id));
        }

        let leased = template
            .psbt
            .unsigned_tx
            .input
            .iter()
            .zip(session.lease_backed.iter())
            .filter(|(_, lease_backed)| **lease_backed);
        for (txin, _) in leased {
            let outpoint = txin.previous_output;
            match self.leases.lease_for(&outpoint)? {
                Some(lease) if lease.id == id => {}
                Some(lease) => {
                    return Err(Error::LeaseConflict {
                        outpoint,
                        holder: lease.id,
                    })
                }
                None => return Err(Error::LeaseExpired { outpoint, id }),
            }
        }

        Ok(session)
    }

    fn fee_rate(&self, fee: Option<FeeSpec>) -> Result<FeeRate, Error> {
        let fee_rate = match fee {
            Some(FeeSpec::Rate(rate)) => rate,
            Some(FeeSpec::TargetConf(target)) => self.fee_estimator.estimate_fee_rate(target)?,
            None => self
                .fee_estimator
                .estimate_fee_rate(self.config.default_target_conf)?,
        };

        if fee_rate < FEE_PER_KW_FLOOR {
            log_debug!(
                self.logger,
                "fee rate {} below the floor, using {}",
                fee_rate,
                FEE_PER_KW_FLOOR
            );
            return Ok(FEE_PER_KW_FLOOR);
        }

        Ok(fee_rate)
    }

    /// Look up the explicit inputs of a request, returning them along with the foreign ones
    fn resolve_utxos(
        &self,
        utxos: &[OutPoint],
        template_psbt: Option<&Psbt>,
    ) -> Result<(Vec<Coin>, HashSet<OutPoint>), Error> {
        let wallet = self.source.list_unspent(0, self.config.max_confs, None)?;

        let mut coins: Vec<Coin> = Vec::with_capacity(utxos.len());
        let mut foreign = HashSet::new();
        for outpoint in utxos {
            if coins.iter().any(|coin| coin.outpoint == *outpoint) {
                return Err(Error::DuplicateInput(*outpoint));
            }

            if let Some(coin) = wallet.iter().find(|coin| coin.outpoint == *outpoint) {
                coins.push(coin.clone());
                continue;
            }

            let txout = template_psbt
                .and_then(|psbt| {
                    let index = psbt
                        .unsigned_tx
                        .input
                        .iter()
                        .position(|txin| txin.previous_output == *outpoint)?;
                    psbt.get_utxo_for(index)
                })
                .ok_or(Error::UnknownUtxo(*outpoint))?;
            if let Some(lease) = self.leases.lease_for(outpoint)? {
                return Err(Error::LeaseConflict {
                    outpoint: *outpoint,
                    holder: lease.id,
                });
            }

            foreign.insert(*outpoint);
            coins.push(Coin::new(*outpoint, txout));
        }

        Ok((coins, foreign))
    }

    /// Check a signature, `Ok(false)` means it can't be checked and should be skipped
    fn verify_signature(&self, psbt: &Psbt, signature: &InputSignature) -> Result<bool, Error> {
        let index = signature.input_index;
        let input = psbt
            .inputs
            .get(index)
            .ok_or(Error::InvalidSignature(index))?;
        if input.final_script_witness.is_some() {
            return Ok(false);
        }

        let program = match witness_program(input) {
            Ok(program) => program,
            Err(_) => return Ok(false),
        };
        if !key_pays_to(&signature.public_key, &program) {
            return Err(Error::InvalidSignature(index));
        }

        let (message, sighash_type) = p2wpkh_sighash(psbt, index)?;
        if signature.signature.sighash_type != sighash_type {
            return Err(Error::InvalidSignature(index));
        }
        self.secp
            .verify_ecdsa(
                &message,
                &signature.signature.signature,
                &signature.public_key.inner,
            )
            .map_err(|_| Error::InvalidSignature(index))?;

        Ok(true)
    }
}

fn template_input<'a>(
    psbt: Option<&'a Psbt>,
    outpoint: &OutPoint,
) -> Option<(&'a TxIn, &'a bitcoin::psbt::Input)> {
    let psbt = psbt?;
    let index = psbt
        .unsigned_tx
        .input
        .iter()
        .position(|txin| txin.previous_output == *outpoint)?;

    Some((&psbt.unsigned_tx.input[index], psbt.inputs.get(index)?))
}

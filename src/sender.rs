//! Builds, signs, and relays outgoing transactions as chained requests.
//!
//! Each factory drafts a transaction, registers it unconfirmed in the cache,
//! and returns a [`Request`] whose execution happens off the façade mutex.
//! A request's callback runs back under the mutex, pushes events, and may
//! return a follow-up request: relaying is step one, confirming the node
//! actually accepted the transaction is step two.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::account::AccountKeys;
use crate::cache::{
    DepositId, TransactionCache, TransactionId, TransactionMessage,
};
use crate::currency::Currency;
use crate::error::WalletError;
use crate::node::{Node, NodeError, SignedTransaction};
use crate::observer::WalletEvent;
use crate::sync::{include, TransactionOutputInformation, TransfersContainer};
use crate::{hash_domain, Hash};

/// One recipient of a send operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferOrder {
    pub address: String,
    pub amount: u64,
}

#[derive(Serialize)]
struct DraftInput {
    amount: u64,
    source_hash: Hash,
    source_index: u32,
}

#[derive(Serialize)]
struct DraftOutput {
    address: String,
    amount: u64,
    /// Deposit lock term in blocks; zero for plain outputs.
    term: u32,
}

/// The unsigned wire shape. Signing covers the serialized draft.
#[derive(Serialize)]
struct TransactionDraft {
    inputs: Vec<DraftInput>,
    outputs: Vec<DraftOutput>,
    extra: Vec<u8>,
    unlock_time: u64,
    ttl: u32,
    mixin: u64,
    fee: u64,
    messages: Vec<TransactionMessage>,
}

#[derive(Debug)]
enum RequestAction {
    Relay(SignedTransaction),
    ConfirmAcceptance(Hash),
}

/// Mutable wallet state a request callback is allowed to touch. Only ever
/// constructed under the façade mutex.
pub struct CallbackContext<'a> {
    pub cache: &'a mut TransactionCache,
    pub events: &'a mut VecDeque<WalletEvent>,
}

/// Invoked under the façade mutex with the remote call's outcome; pushes
/// events and may return the next request in the chain.
pub type RequestCallback =
    Box<dyn FnOnce(&mut CallbackContext<'_>, Result<(), WalletError>) -> Option<Request> + Send>;

/// A future remote call plus the callback that consumes its outcome.
pub struct Request {
    action: RequestAction,
    stop: Arc<AtomicBool>,
    callback: RequestCallback,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("action", &self.action)
            .field("stop", &self.stop)
            .field("callback", &"<callback>")
            .finish()
    }
}

impl Request {
    /// Execute the remote call. May block on network I/O; must not be called
    /// under the façade mutex. Returns the callback to be run under it.
    pub fn perform(self, node: &dyn Node) -> (RequestCallback, Result<(), WalletError>) {
        let outcome = if self.stop.load(Ordering::SeqCst) {
            Err(WalletError::OperationCancelled)
        } else {
            match &self.action {
                RequestAction::Relay(tx) => {
                    node.relay_transaction(tx).map_err(WalletError::from)
                }
                RequestAction::ConfirmAcceptance(hash) => match node.transaction_known(hash) {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(WalletError::Node(NodeError::TxRejected(
                        "transaction not accepted by the network".into(),
                    ))),
                    Err(error) => Err(WalletError::from(error)),
                },
            }
        };
        (self.callback, outcome)
    }
}

fn relay_request(tx: SignedTransaction, id: TransactionId, stop: Arc<AtomicBool>) -> Request {
    let hash = tx.hash;
    let next_stop = Arc::clone(&stop);
    Request {
        action: RequestAction::Relay(tx),
        stop,
        callback: Box::new(move |ctx, outcome| match outcome {
            Ok(()) => Some(confirm_request(hash, id, next_stop)),
            Err(error) => {
                fail_transaction(ctx, id, error);
                None
            }
        }),
    }
}

fn confirm_request(hash: Hash, id: TransactionId, stop: Arc<AtomicBool>) -> Request {
    Request {
        action: RequestAction::ConfirmAcceptance(hash),
        stop,
        callback: Box::new(move |ctx, outcome| {
            match outcome {
                Ok(()) => ctx.events.push_back(WalletEvent::SendTransactionCompleted {
                    id,
                    result: Ok(()),
                }),
                Err(error) => fail_transaction(ctx, id, error),
            }
            None
        }),
    }
}

fn fail_transaction(ctx: &mut CallbackContext<'_>, id: TransactionId, error: WalletError) {
    let released = ctx.cache.mark_transaction_failed(id);
    ctx.events.push_back(WalletEvent::TransactionUpdated(id));
    if !released.is_empty() {
        ctx.events.push_back(WalletEvent::DepositsUpdated(released));
    }
    ctx.events.push_back(WalletEvent::SendTransactionCompleted {
        id,
        result: Err(error),
    });
}

/// Select unlocked outputs covering `needed`.
///
/// Sorted descending; a single covering output is preferred (the smallest
/// one that suffices), otherwise outputs are taken largest-first until the
/// target is reached.
fn select_outputs(
    available: &[TransactionOutputInformation],
    needed: u64,
) -> Result<(Vec<TransactionOutputInformation>, u64), WalletError> {
    let mut candidates: Vec<&TransactionOutputInformation> = available.iter().collect();
    candidates.sort_by(|a, b| b.amount.cmp(&a.amount));

    let total_available = candidates
        .iter()
        .fold(0u64, |acc, o| acc.saturating_add(o.amount));
    if total_available < needed {
        return Err(WalletError::InsufficientFunds {
            available: total_available,
            needed,
        });
    }

    let mut single = None;
    for candidate in &candidates {
        if candidate.amount >= needed {
            single = Some(*candidate);
        }
    }
    if let Some(output) = single {
        return Ok((vec![output.clone()], output.amount));
    }

    let mut selected = Vec::new();
    let mut sum = 0u64;
    for candidate in candidates {
        selected.push(candidate.clone());
        sum = sum.saturating_add(candidate.amount);
        if sum >= needed {
            return Ok((selected, sum));
        }
    }
    Err(WalletError::InsufficientFunds {
        available: total_available,
        needed,
    })
}

/// The request engine bound to one account.
pub struct TransactionSender {
    keys: AccountKeys,
    change_address: String,
    stop: Arc<AtomicBool>,
}

impl TransactionSender {
    pub fn new(keys: AccountKeys, change_address: String) -> Self {
        TransactionSender {
            keys,
            change_address,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel all requests still in flight; they complete with
    /// `OperationCancelled`.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn make_send_request(
        &self,
        events: &mut VecDeque<WalletEvent>,
        cache: &mut TransactionCache,
        container: &dyn TransfersContainer,
        orders: &[TransferOrder],
        fee: u64,
        extra: Vec<u8>,
        mixin: u64,
        unlock_time: u64,
        messages: Vec<TransactionMessage>,
        ttl: u32,
    ) -> Result<(TransactionId, Request), WalletError> {
        if orders.is_empty() || orders.iter().any(|o| o.amount == 0) {
            return Err(WalletError::WrongAmount);
        }
        let total = orders
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
            .ok_or(WalletError::SumOverflow)?;
        let needed = total.checked_add(fee).ok_or(WalletError::SumOverflow)?;

        let available = container.outputs(include::KEY_UNLOCKED);
        let (selected, selected_sum) = select_outputs(&available, needed)?;

        let mut outputs: Vec<DraftOutput> = orders
            .iter()
            .map(|o| DraftOutput {
                address: o.address.clone(),
                amount: o.amount,
                term: 0,
            })
            .collect();
        let change = selected_sum - needed;
        if change > 0 {
            outputs.push(DraftOutput {
                address: self.change_address.clone(),
                amount: change,
                term: 0,
            });
        }

        let tx = self.sign_draft(&TransactionDraft {
            inputs: draft_inputs(&selected),
            outputs,
            extra: extra.clone(),
            unlock_time,
            ttl,
            mixin,
            fee,
            messages: messages.clone(),
        })?;

        let amount = -i64::try_from(needed).map_err(|_| WalletError::SumOverflow)?;
        let id = cache.add_new_transaction(
            tx.hash,
            amount,
            fee,
            extra,
            messages,
            ttl,
            crate::unix_now(),
        );
        for order in orders {
            cache.push_transfer(id, order.address.clone(), order.amount);
        }
        cache.register_unconfirmed_send(id, selected_sum, needed);
        events.push_back(WalletEvent::TransactionCreated(id));
        Ok((id, relay_request(tx, id, Arc::clone(&self.stop))))
    }

    pub fn make_deposit_request(
        &self,
        events: &mut VecDeque<WalletEvent>,
        cache: &mut TransactionCache,
        container: &dyn TransfersContainer,
        currency: &Currency,
        term: u32,
        amount: u64,
        fee: u64,
        mixin: u64,
    ) -> Result<(TransactionId, Request), WalletError> {
        if !currency.is_valid_deposit_term(term) {
            return Err(WalletError::DepositTermInvalid);
        }
        if !currency.is_valid_deposit_amount(amount) {
            return Err(WalletError::DepositAmountTooSmall);
        }
        let needed = amount.checked_add(fee).ok_or(WalletError::SumOverflow)?;

        let available = container.outputs(include::KEY_UNLOCKED);
        let (selected, selected_sum) = select_outputs(&available, needed)?;

        let mut outputs = vec![DraftOutput {
            address: self.change_address.clone(),
            amount,
            term,
        }];
        let change = selected_sum - needed;
        if change > 0 {
            outputs.push(DraftOutput {
                address: self.change_address.clone(),
                amount: change,
                term: 0,
            });
        }

        let tx = self.sign_draft(&TransactionDraft {
            inputs: draft_inputs(&selected),
            outputs,
            extra: Vec::new(),
            unlock_time: 0,
            ttl: 0,
            mixin,
            fee,
            messages: Vec::new(),
        })?;

        let total = -i64::try_from(needed).map_err(|_| WalletError::SumOverflow)?;
        let id = cache.add_new_transaction(
            tx.hash,
            total,
            fee,
            Vec::new(),
            Vec::new(),
            0,
            crate::unix_now(),
        );
        cache.register_unconfirmed_deposit(id, selected_sum, needed, amount);
        events.push_back(WalletEvent::TransactionCreated(id));
        Ok((id, relay_request(tx, id, Arc::clone(&self.stop))))
    }

    /// Spend matured deposits. Validation failures do not error out: the
    /// entry is created, immediately marked failed, and a failure event is
    /// emitted in place of a request.
    pub fn make_withdraw_deposit_request(
        &self,
        events: &mut VecDeque<WalletEvent>,
        cache: &mut TransactionCache,
        deposit_ids: &[DepositId],
        fee: u64,
    ) -> Result<(TransactionId, Option<Request>), WalletError> {
        let placeholder = hash_domain(
            b"obol.pending-withdraw",
            &(cache.transaction_count() as u64).to_le_bytes(),
        );
        let id = cache.add_new_transaction(
            placeholder,
            0,
            fee,
            Vec::new(),
            Vec::new(),
            0,
            crate::unix_now(),
        );

        let validated = validate_withdraw(cache, deposit_ids, fee);
        let (total, profit) = match validated {
            Ok(sums) => sums,
            Err(error) => {
                cache.mark_transaction_failed(id);
                events.push_back(WalletEvent::TransactionUpdated(id));
                events.push_back(WalletEvent::SendTransactionCompleted {
                    id,
                    result: Err(error),
                });
                return Ok((id, None));
            }
        };

        let inputs = deposit_ids
            .iter()
            .filter_map(|deposit_id| {
                let info = cache.deposit(*deposit_id)?;
                let creating = cache.transaction(info.deposit.creating_transaction)?;
                Some(DraftInput {
                    amount: info.deposit.amount.saturating_add(info.deposit.interest),
                    source_hash: creating.hash,
                    source_index: info.output_in_transaction,
                })
            })
            .collect();
        let out_amount = total - fee;
        let tx = self.sign_draft(&TransactionDraft {
            inputs,
            outputs: vec![DraftOutput {
                address: self.change_address.clone(),
                amount: out_amount,
                term: 0,
            }],
            extra: Vec::new(),
            unlock_time: 0,
            ttl: 0,
            mixin: 0,
            fee,
            messages: Vec::new(),
        })?;

        cache.set_transaction_hash(id, tx.hash);
        cache.set_transaction_amount(
            id,
            i64::try_from(out_amount).map_err(|_| WalletError::SumOverflow)?,
        );
        cache.attach_spent_deposits(id, deposit_ids);
        cache.register_unconfirmed_withdraw(id, total, profit);
        events.push_back(WalletEvent::TransactionCreated(id));
        Ok((id, Some(relay_request(tx, id, Arc::clone(&self.stop)))))
    }

    fn sign_draft(&self, draft: &TransactionDraft) -> Result<SignedTransaction, WalletError> {
        let bytes = crate::serialize(draft)
            .map_err(|e| WalletError::Internal(format!("draft serialization failed: {e}")))?;
        let hash = hash_domain(b"obol.transaction", &bytes);
        let signature = self.keys.sign(&hash);
        let mut blob = bytes;
        blob.extend_from_slice(&signature);
        Ok(SignedTransaction { hash, blob })
    }
}

fn draft_inputs(selected: &[TransactionOutputInformation]) -> Vec<DraftInput> {
    selected
        .iter()
        .map(|output| DraftInput {
            amount: output.amount,
            source_hash: output.transaction_hash,
            source_index: output.output_in_transaction,
        })
        .collect()
}

fn validate_withdraw(
    cache: &TransactionCache,
    deposit_ids: &[DepositId],
    fee: u64,
) -> Result<(u64, u64), WalletError> {
    if deposit_ids.is_empty() {
        return Err(WalletError::WrongAmount);
    }
    let mut seen = std::collections::HashSet::new();
    let mut total = 0u64;
    let mut profit = 0u64;
    for deposit_id in deposit_ids {
        if !seen.insert(*deposit_id) {
            return Err(WalletError::DepositLocked(*deposit_id));
        }
        let info = cache
            .deposit(*deposit_id)
            .ok_or(WalletError::UnknownDeposit(*deposit_id))?;
        if info.deposit.is_locked || info.deposit.spending_transaction.is_some() {
            return Err(WalletError::DepositLocked(*deposit_id));
        }
        total = total
            .checked_add(info.deposit.amount)
            .and_then(|t| t.checked_add(info.deposit.interest))
            .ok_or(WalletError::SumOverflow)?;
        profit = profit
            .checked_add(info.deposit.interest)
            .ok_or(WalletError::SumOverflow)?;
    }
    if total <= fee {
        return Err(WalletError::WrongAmount);
    }
    Ok((total, profit))
}

//! The transfer orchestrator: the one place that moves satoshis. Internal
//! transfers, Lightning withdrawals, and settlement credits all go through
//! here, and nothing else writes the stored balance.
//!
//! Every operation either leaves the ledger untouched or applies completely:
//! entries and balance updates share one data transaction, and the balance
//! write is a compare-and-swap retried on conflict.

use crate::{
    auth, cash_limits, concurrency,
    database::{self, Database},
    ledger, linked_wallet, ln, swallow_panic, user, worker, CashLimits,
};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

mod entities;

pub use entities::{Error, Transfer, Withdrawal, WithdrawalRoute, WithdrawalStatus};

use crate::btc;

/// Moves satoshis between two custodial accounts. Writes a withdrawal-kind
/// row for the sender and an internal-kind row for the recipient, both
/// completed, and adjusts both balances - all in one data transaction, so
/// either both sides happen or neither does.
pub async fn internal_transfer(
    grant: &auth::SpendGrant,
    db: &Database,
    to_username: &str,
    amount: btc::Sats,
    memo: Option<String>,
) -> Result<Transfer, Error> {
    if amount <= btc::Sats(0) {
        return Err(Error::InvalidAmount);
    }
    concurrency::retry_loop(|| async {
        let mut data_tx = db.begin().await.unwrap();
        let sender = user::get_tx(&mut data_tx, grant.user_id)
            .await
            .expect("authenticated user exists");
        let recipient = match user::find_by_username(&mut data_tx, to_username).await {
            Some(recipient) if recipient.id != grant.user_id => recipient,
            _ => return Err(Error::RecipientNotFound),
        };
        let mut sender_balance = ledger::balance(&mut data_tx, grant.user_id).await;
        sender_balance.debit(amount)?;
        let mut recipient_balance = ledger::balance(&mut data_tx, recipient.id).await;
        recipient_balance.credit(amount);
        let debit = ledger::LedgerEntry::completed(
            grant.user_id,
            ledger::EntryKind::Withdrawal,
            amount,
            None,
            memo.clone(),
            Some(recipient.username.clone()),
        );
        let credit = ledger::LedgerEntry::completed(
            recipient.id,
            ledger::EntryKind::Internal,
            amount,
            None,
            memo.clone(),
            Some(sender.username.clone()),
        );
        ledger::insert_entry(&mut data_tx, &debit).await;
        ledger::insert_entry(&mut data_tx, &credit).await;
        ledger::update_balance(&mut data_tx, &sender_balance).await?;
        ledger::update_balance(&mut data_tx, &recipient_balance).await?;
        data_tx.commit().await.unwrap();
        log::info!(
            "transferred {:?} sats from {:?} to {:?}",
            amount.0,
            grant.user_id,
            recipient.id
        );
        Ok(Transfer {
            id: debit.id,
            from_user: grant.user_id,
            receiver_name: recipient.username,
            amount,
            memo: memo.clone(),
            created: debit.created,
        })
    })
    .await
}

/// Pays a Lightning invoice. On the custodial route the stored balance is
/// debited and the pending ledger row committed *before* the node is asked
/// to pay; a definitive node failure refunds the debit, an unknown outcome
/// leaves the row pending for the settlement sweep. The linked route hands
/// the invoice to the user's external wallet and never touches the ledger.
pub async fn lightning_withdrawal(
    grant: &auth::SpendGrant,
    db: &Database,
    node: ln::Node,
    invoice: ln::RawInvoice,
    amount: Option<btc::Sats>,
    route: WithdrawalRoute,
    limits: &CashLimits,
) -> Result<Withdrawal, Error> {
    let decoded = invoice.decode()?;
    let amount_msat = entities::resolve_amount(decoded.amount, amount)?;
    let debit = amount_msat.sats_ceil();

    if let WithdrawalRoute::Linked = route {
        let access_url = user::get_by_id(db, grant.user_id)
            .await
            .expect("authenticated user exists")
            .linked_wallet
            .ok_or(Error::NoLinkedWallet)?;
        linked_wallet::pay_invoice(&access_url, &invoice, amount_msat).await?;
        return Ok(Withdrawal {
            payment_hash: decoded.payment_hash,
            amount: debit,
            status: WithdrawalStatus::Delegated,
        });
    }

    let daily_total = ledger::daily_withdrawal_total(db, grant.user_id).await;
    limits.check(cash_limits::Amounts {
        amount: debit,
        daily_total,
    })?;

    let entry = ledger::LedgerEntry::pending(
        grant.user_id,
        ledger::EntryKind::Withdrawal,
        debit,
        Some(decoded.payment_hash.clone()),
        decoded.description.clone(),
    );

    // Lock the funds first: the debit and the pending row commit together,
    // and only then does the irrevocable part start.
    concurrency::retry_loop(|| async {
        let mut data_tx = db.begin().await.unwrap();
        let mut balance = ledger::balance(&mut data_tx, grant.user_id).await;
        balance.debit(entry.amount)?;
        if !ledger::insert_entry_once(&mut data_tx, &entry).await {
            return Err(Error::PaymentFailed(ln::PaymentError::InvoiceAlreadyPaid));
        }
        ledger::update_balance(&mut data_tx, &balance).await?;
        data_tx.commit().await.unwrap();
        Ok(())
    })
    .await?;

    // An amount fixed in the invoice must not be passed to the node again.
    let pay_amount = match decoded.amount {
        ln::InvoiceAmount::Fixed(_) => None,
        ln::InvoiceAmount::Any => Some(amount_msat),
    };
    let mut node = node;
    let mut entry = entry;
    match node
        .pay_invoice(&invoice, pay_amount, entities::fee_limit(amount_msat))
        .await
    {
        Ok(ln::PaymentOutcome::Settled { preimage }) => {
            settle_withdrawal(db, &mut entry).await?;
            Ok(Withdrawal {
                payment_hash: decoded.payment_hash,
                amount: debit,
                status: WithdrawalStatus::Settled { preimage },
            })
        }
        Ok(ln::PaymentOutcome::Failed(reason)) => {
            log::info!("withdrawal {:?} failed: {}", entry.id, reason);
            refund_withdrawal(db, &mut entry).await?;
            Err(Error::PaymentFailed(reason))
        }
        Err(e) => {
            // The node may or may not have sent the payment. Assuming
            // failure here could refund a payment that actually went
            // through, so the row stays pending until the sweep observes a
            // terminal state.
            log::warn!("withdrawal {:?} outcome unknown: {}", entry.id, e);
            Ok(Withdrawal {
                payment_hash: decoded.payment_hash,
                amount: debit,
                status: WithdrawalStatus::Pending,
            })
        }
    }
}

/// Credits a settled inbound invoice to its owner. Exactly once per payment
/// hash: the entry insert is keyed by the hash, so the first observer
/// applies the credit and every later one sees `AlreadyApplied` and no-ops.
pub(crate) async fn apply_settlement(
    data_tx: &mut database::Transaction,
    user_id: user::Id,
    payment_hash: &ln::PaymentHash,
    amount_paid: btc::Sats,
    memo: Option<String>,
) -> Result<ledger::SettleOutcome, concurrency::ConflictError> {
    let entry = ledger::LedgerEntry::completed(
        user_id,
        ledger::EntryKind::Deposit,
        amount_paid,
        Some(payment_hash.clone()),
        memo,
        None,
    );
    if !ledger::insert_entry_once(data_tx, &entry).await {
        return Ok(ledger::SettleOutcome::AlreadyApplied);
    }
    let mut balance = ledger::balance(data_tx, user_id).await;
    balance.credit(amount_paid);
    ledger::update_balance(data_tx, &balance).await?;
    Ok(ledger::SettleOutcome::Applied)
}

async fn settle_withdrawal(db: &Database, entry: &mut ledger::LedgerEntry) -> Result<(), Error> {
    let now = Utc::now();
    let mut data_tx = db.begin().await.unwrap();
    let applied = ledger::complete_entry(&mut data_tx, entry.id, now).await;
    data_tx.commit().await.unwrap();
    if applied {
        let amount = entry.amount;
        entry.complete(amount, now);
    } else {
        log::info!("withdrawal {:?} was already resolved elsewhere", entry.id);
    }
    Ok(())
}

async fn refund_withdrawal(db: &Database, entry: &mut ledger::LedgerEntry) -> Result<(), Error> {
    let now = Utc::now();
    let applied = concurrency::retry_loop(|| async {
        let mut data_tx = db.begin().await.unwrap();
        if !ledger::fail_entry(&mut data_tx, entry.id, now).await {
            data_tx.commit().await.unwrap();
            return Ok::<_, Error>(false);
        }
        let mut balance = ledger::balance(&mut data_tx, entry.user_id).await;
        balance.credit(entry.amount);
        ledger::update_balance(&mut data_tx, &balance).await?;
        data_tx.commit().await.unwrap();
        Ok(true)
    })
    .await?;
    if applied {
        entry.fail(now);
    } else {
        log::info!("withdrawal {:?} was already resolved elsewhere", entry.id);
    }
    Ok(())
}

/// Starts the sweep that reconciles withdrawals left pending by an unknown
/// gateway outcome.
pub async fn start_worker(db: &Database, lightning: &ln::Lightning) {
    worker::start(SettlementSweep {
        db: db.clone(),
        node: lightning.create_node().await,
    });
}

struct SettlementSweep {
    db: Database,
    node: ln::Node,
}

#[async_trait]
impl worker::Worker for SettlementSweep {
    async fn run(&mut self) {
        for mut entry in ledger::list_pending_withdrawals(&self.db).await {
            let hash = match entry.payment_hash.clone() {
                Some(hash) => hash,
                None => continue,
            };
            let db = self.db.clone();
            let node = &mut self.node;
            swallow_panic(async move {
                match node.lookup_payment(&hash).await {
                    Ok(ln::PaymentLookup::Succeeded { .. }) => {
                        log::info!("sweep settling withdrawal {:?}", entry.id);
                        if let Err(e) = settle_withdrawal(&db, &mut entry).await {
                            log::error!("sweep failed to settle {:?}: {}", entry.id, e);
                        }
                    }
                    Ok(ln::PaymentLookup::Failed { reason }) => {
                        log::info!("sweep refunding withdrawal {:?}: {}", entry.id, reason);
                        if let Err(e) = refund_withdrawal(&db, &mut entry).await {
                            log::error!("sweep failed to refund {:?}: {}", entry.id, e);
                        }
                    }
                    Ok(ln::PaymentLookup::InFlight) => {}
                    Ok(ln::PaymentLookup::NotFound) => {
                        // Never refund on absence alone: the listing window
                        // may simply not cover this payment.
                        log::warn!(
                            "pending withdrawal {:?} unknown to the node, leaving for review",
                            entry.id
                        );
                    }
                    Err(e) => {
                        log::warn!("settlement sweep could not query the gateway: {}", e);
                    }
                }
            })
            .await;
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(10)
    }
}

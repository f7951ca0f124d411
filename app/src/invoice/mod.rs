use crate::{
    auth, btc, concurrency,
    database::Database,
    ledger, ln,
    seconds::Seconds,
    swallow_panic, transfer, worker, CashLimits, QueryRange,
};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

mod entities;

pub use entities::{Error, Id, Invoice, Settlement};

pub async fn create(
    grant: &auth::ReceiveGrant,
    db: &Database,
    node: &mut ln::Node,
    amount: Option<btc::MilliSats>,
    memo: Option<String>,
    expiry: Seconds,
    limits: &CashLimits,
) -> Result<Invoice, Error> {
    let daily_total = queries::daily_total(db, grant.user_id).await;
    let invoice = Invoice::create(grant, node, amount, memo, expiry, limits, daily_total).await?;

    let mut data_tx = db.begin().await.unwrap();
    queries::insert(&mut data_tx, &invoice).await;
    data_tx.commit().await.unwrap();
    Ok(invoice)
}

pub async fn get(grant: &auth::ReadGrant, db: &Database, id: Id) -> Option<Invoice> {
    queries::get(db, id, grant.user_id).await
}

pub async fn list(grant: &auth::ReadGrant, db: &Database, range: QueryRange) -> Vec<Invoice> {
    queries::list(db, grant.user_id, range).await
}

/// On-demand status check for a single invoice. May race with the scheduled
/// sweep observing the same settlement; that is safe because the ledger's
/// uniqueness constraint is the synchronization point, so whoever applies
/// second no-ops.
pub async fn check(
    grant: &auth::ReadGrant,
    db: &Database,
    node: &mut ln::Node,
    id: Id,
) -> Option<Invoice> {
    let mut invoice = queries::get(db, id, grant.user_id).await?;
    if invoice.is_settled() {
        return Some(invoice);
    }
    match node.lookup_invoice(&invoice.payment_hash).await {
        Ok(lookup) => {
            let state = ln::PaymentState::observe(&lookup, invoice.expiration, Utc::now());
            if let ln::PaymentState::Settled { amount_paid, .. } = state {
                complete(db, &mut invoice, amount_paid).await;
            }
        }
        // The lookup failing says nothing about the invoice; report the
        // last-observed state and let a later poll advance it.
        Err(e) => log::warn!("invoice status check could not query the gateway: {}", e),
    }
    Some(invoice)
}

/// Starts the settlement poller: sweeps unsettled invoices, observes their
/// state through the gateway, and applies settlements.
pub async fn start_worker(db: Database, lightning: &ln::Lightning) {
    worker::start(SettlePoller {
        db,
        node: lightning.create_node().await,
    });
}

struct SettlePoller {
    db: Database,
    node: ln::Node,
}

#[async_trait]
impl worker::Worker for SettlePoller {
    async fn run(&mut self) {
        // Expired invoices are swept a little past their expiry in case a
        // payment raced the deadline, then dropped from the sweep entirely.
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        for mut invoice in queries::list_unsettled(&self.db, cutoff).await {
            let db = self.db.clone();
            let node = &mut self.node;
            swallow_panic(async move {
                match node.lookup_invoice(&invoice.payment_hash).await {
                    Ok(lookup) => {
                        match ln::PaymentState::observe(&lookup, invoice.expiration, Utc::now()) {
                            ln::PaymentState::Settled { amount_paid, .. } => {
                                complete(&db, &mut invoice, amount_paid).await;
                            }
                            ln::PaymentState::Expired => {
                                log::debug!("invoice {:?} expired unpaid", invoice.id);
                            }
                            ln::PaymentState::Canceled => {
                                log::debug!("invoice {:?} was canceled", invoice.id);
                            }
                            ln::PaymentState::Open | ln::PaymentState::Accepted => {}
                        }
                    }
                    Err(e) => {
                        log::warn!(
                            "settlement poll left invoice {:?} unchanged: {}",
                            invoice.id,
                            e
                        );
                    }
                }
            })
            .await;
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(5)
    }
}

async fn complete(db: &Database, invoice: &mut Invoice, amount_paid: btc::MilliSats) {
    let credited = amount_paid.sats_floor();
    let outcome = concurrency::retry_loop(|| async {
        let now = Utc::now();
        let mut data_tx = db.begin().await.unwrap();
        let outcome = transfer::apply_settlement(
            &mut data_tx,
            invoice.user_id,
            &invoice.payment_hash,
            credited,
            invoice.memo.clone(),
        )
        .await?;
        if let ledger::SettleOutcome::Applied = outcome {
            queries::mark_settled(&mut data_tx, invoice.id, credited, now).await;
        }
        data_tx.commit().await.unwrap();
        Ok::<_, concurrency::ConflictError>(outcome)
    })
    .await
    .unwrap();
    if let ledger::SettleOutcome::Applied = outcome {
        log::info!("settled invoice {:?} for {} sats", invoice.id, credited.0);
    }
    invoice.settle(credited, Utc::now());
}

mod queries {
    use super::{Id, Invoice, Settlement};
    use crate::{
        btc,
        database::{self, Database, SumRow},
        ln, user, QueryRange,
    };
    use chrono::{DateTime, Duration, Utc};
    use const_format::formatcp;
    use uuid::Uuid;

    const COLUMNS: &str = "id, user_id, payment_hash, amount_msats, memo, invoice, created, expiration, settlement_amount_sats, settlement_timestamp";

    pub(super) async fn insert(data_tx: &mut database::Transaction, invoice: &Invoice) {
        sqlx::query(formatcp!(
            "INSERT INTO invoices ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            COLUMNS
        ))
        .bind(invoice.id.0)
        .bind(invoice.user_id.0)
        .bind(invoice.payment_hash.as_str().to_owned())
        .bind(invoice.amount.map(|amount| amount.0))
        .bind(invoice.memo.clone())
        .bind(invoice.raw.0.clone())
        .bind(invoice.created)
        .bind(invoice.expiration)
        .bind(
            invoice
                .settlement
                .as_ref()
                .map(|settlement| settlement.amount.0),
        )
        .bind(
            invoice
                .settlement
                .as_ref()
                .map(|settlement| settlement.timestamp),
        )
        .execute(data_tx)
        .await
        .unwrap();
    }

    pub(super) async fn mark_settled(
        data_tx: &mut database::Transaction,
        id: Id,
        amount: btc::Sats,
        now: DateTime<Utc>,
    ) {
        sqlx::query(
            r#"UPDATE invoices SET settlement_amount_sats = $2, settlement_timestamp = $3
                WHERE id = $1 AND settlement_timestamp IS NULL"#,
        )
        .bind(id.0)
        .bind(amount.0)
        .bind(now)
        .execute(data_tx)
        .await
        .unwrap();
    }

    pub(super) async fn get(db: &Database, id: Id, user_id: user::Id) -> Option<Invoice> {
        sqlx::query_as::<_, InvoiceRow>(formatcp!(
            "SELECT {} FROM invoices WHERE id = $1 AND user_id = $2",
            COLUMNS
        ))
        .bind(id.0)
        .bind(user_id.0)
        .fetch_optional(db)
        .await
        .unwrap()
        .map(|row| row.into_entity())
    }

    pub(super) async fn list(db: &Database, user_id: user::Id, range: QueryRange) -> Vec<Invoice> {
        sqlx::query_as::<_, InvoiceRow>(formatcp!(
            "SELECT {} FROM invoices WHERE user_id = $1 ORDER BY created DESC LIMIT $2 OFFSET $3",
            COLUMNS
        ))
        .bind(user_id.0)
        .bind(range.limit)
        .bind(range.offset)
        .fetch_all(db)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.into_entity())
        .collect()
    }

    /// Unsettled invoices still worth polling: not yet settled and not past
    /// the expiry grace cutoff.
    pub(super) async fn list_unsettled(
        db: &Database,
        cutoff: DateTime<Utc>,
    ) -> Vec<Invoice> {
        sqlx::query_as::<_, InvoiceRow>(formatcp!(
            r#"SELECT {} FROM invoices
                WHERE settlement_timestamp IS NULL AND expiration > $1"#,
            COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(db)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.into_entity())
        .collect()
    }

    pub(super) async fn daily_total(db: &Database, user_id: user::Id) -> btc::Sats {
        sqlx::query_as::<_, SumRow<Option<i64>>>(
            r#"SELECT CAST(COALESCE(SUM(amount_msats), 0) AS BIGINT) AS sum FROM invoices
                WHERE user_id = $1 AND created > $2"#,
        )
        .bind(user_id.0)
        .bind(Utc::now() - Duration::days(1))
        .fetch_one(db)
        .await
        .unwrap()
        .sum
        .map(|msats| btc::MilliSats(msats).sats_ceil())
        .unwrap_or_default()
    }

    #[derive(sqlx::FromRow, Debug)]
    struct InvoiceRow {
        id: Uuid,
        user_id: Uuid,
        payment_hash: String,
        amount_msats: Option<i64>,
        memo: Option<String>,
        invoice: String,
        created: DateTime<Utc>,
        expiration: DateTime<Utc>,
        settlement_amount_sats: Option<i64>,
        settlement_timestamp: Option<DateTime<Utc>>,
    }

    impl InvoiceRow {
        fn into_entity(self) -> Invoice {
            Invoice {
                id: Id(self.id),
                user_id: user::Id(self.user_id),
                payment_hash: ln::PaymentHash::parse(&self.payment_hash).unwrap(),
                amount: self.amount_msats.map(btc::MilliSats),
                memo: self.memo,
                raw: ln::RawInvoice(self.invoice),
                created: self.created,
                expiration: self.expiration,
                settlement: match (self.settlement_amount_sats, self.settlement_timestamp) {
                    (Some(amount), Some(timestamp)) => Some(Settlement {
                        amount: btc::Sats(amount),
                        timestamp,
                    }),
                    _ => None,
                },
            }
        }
    }
}

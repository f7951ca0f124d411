//! The balance audit engine. Recomputes every user's balance from their
//! completed transaction history, compares against the stored balance and
//! the node's aggregate balance, probes the external dependencies, and mails
//! the resulting report. Read-only: the audit never corrects a balance, it
//! reports for a human to adjudicate.

use crate::database::Database;
use crate::{ln, notify, worker};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

mod entities;

pub use entities::{
    ActivityWindow, AuditReport, AuditStatus, DependencyHealth, Discrepancy, HealthStatus,
    KindActivity, NodeBalanceCheck,
};

/// Runs one full audit pass. Tolerates concurrent live traffic: a transaction
/// committing mid-scan may or may not be included, which the nightly cadence
/// absorbs by re-running.
pub async fn run(db: &Database, node: &mut ln::Node, mailer: &notify::Mailer) -> AuditReport {
    let generated_at = Utc::now();
    let rows = queries::balance_rows(db).await;
    let total_users = rows.len() as i64;
    let ledger_total = crate::btc::Sats(rows.iter().map(|row| row.stored.0).sum());
    let discrepancies = rows
        .iter()
        .filter_map(|row| Discrepancy::check(row.user_id, &row.username, row.stored, row.computed))
        .collect();

    let mut health = Vec::new();
    let node_total = match node.get_node_balance().await {
        Ok(balance) => {
            health.push(DependencyHealth {
                name: "lightning gateway",
                status: HealthStatus::Online,
                detail: None,
            });
            Some(balance.total())
        }
        Err(e) => {
            log::warn!("audit could not fetch the node balance: {}", e);
            health.push(DependencyHealth {
                name: "lightning gateway",
                status: match e {
                    ln::GatewayError::Unreachable(_) => HealthStatus::Offline,
                    ln::GatewayError::Malformed(_) => HealthStatus::Error,
                },
                detail: Some(e.to_string()),
            });
            None
        }
    };
    health.push(match mailer.probe().await {
        Ok(()) => DependencyHealth {
            name: "mail relay",
            status: HealthStatus::Online,
            detail: None,
        },
        Err(e) => DependencyHealth {
            name: "mail relay",
            status: HealthStatus::Offline,
            detail: Some(e.to_string()),
        },
    });

    let activity = queries::activity_window(db, generated_at - ChronoDuration::days(1)).await;

    let report = AuditReport::build(
        generated_at,
        total_users,
        discrepancies,
        NodeBalanceCheck {
            node_total,
            ledger_total,
        },
        health,
        activity,
    );
    match report.status {
        AuditStatus::Passed => log::info!("balance audit passed ({} users)", report.total_users),
        AuditStatus::Failed => log::error!(
            "balance audit failed: {} users, {} sats total discrepancy",
            report.users_with_discrepancies(),
            report.total_discrepancy()
        ),
    }
    report
}

/// Runs the audit and mails the report. A delivery failure is logged and
/// surfaced to the caller, but it is a notification failure, not an audit
/// failure - the report itself was produced either way.
pub async fn run_and_send(
    db: &Database,
    node: &mut ln::Node,
    mailer: &notify::Mailer,
    recipient: &str,
) -> Result<notify::MessageId, notify::Error> {
    let report = run(db, node, mailer).await;
    mailer
        .send_report(recipient, &report.subject(), &report.render())
        .await
}

pub async fn start_worker(
    db: &Database,
    lightning: &ln::Lightning,
    mailer: notify::Mailer,
    recipient: String,
) {
    worker::start(NightlyAudit {
        db: db.clone(),
        node: lightning.create_node().await,
        mailer,
        recipient,
    });
}

struct NightlyAudit {
    db: Database,
    node: ln::Node,
    mailer: notify::Mailer,
    recipient: String,
}

#[async_trait]
impl worker::Worker for NightlyAudit {
    async fn run(&mut self) {
        match run_and_send(&self.db, &mut self.node, &self.mailer, &self.recipient).await {
            Ok(message_id) => log::info!("audit report sent as {:?}", message_id.0),
            Err(e) => log::error!("audit report could not be delivered: {}", e),
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }
}

mod queries {
    use super::{ActivityWindow, KindActivity};
    use crate::btc;
    use crate::database::{CountRow, Database};
    use crate::user;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    pub(super) struct BalanceAuditRow {
        pub user_id: user::Id,
        pub username: String,
        pub stored: btc::Sats,
        pub computed: btc::Sats,
    }

    /// Stored balance next to the balance recomputed from completed ledger
    /// rows, for every user. Withdrawals subtract, deposits and internal
    /// credits add; the sender side of an internal transfer is a real
    /// withdrawal row, so treating internal purely as a credit balances.
    pub(super) async fn balance_rows(db: &Database) -> Vec<BalanceAuditRow> {
        sqlx::query_as::<_, AuditRow>(
            r#"SELECT
                users.id,
                users.username,
                users.balance_sats,
                CAST(COALESCE(SUM(CASE
                    WHEN ledger_entries.status = 1 AND ledger_entries.kind = 1
                        THEN -ledger_entries.amount_sats
                    WHEN ledger_entries.status = 1
                        THEN ledger_entries.amount_sats
                    ELSE 0
                END), 0) AS BIGINT) AS computed_sats
            FROM users
            LEFT JOIN ledger_entries ON ledger_entries.user_id = users.id
            GROUP BY users.id, users.username, users.balance_sats
            ORDER BY users.created"#,
        )
        .fetch_all(db)
        .await
        .unwrap()
        .into_iter()
        .map(|row| BalanceAuditRow {
            user_id: user::Id(row.id),
            username: row.username,
            stored: btc::Sats(row.balance_sats),
            computed: btc::Sats(row.computed_sats),
        })
        .collect()
    }

    pub(super) async fn activity_window(db: &Database, since: DateTime<Utc>) -> ActivityWindow {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r#"SELECT kind, COUNT(*) AS count, CAST(COALESCE(SUM(amount_sats), 0) AS BIGINT) AS total_sats
                FROM ledger_entries WHERE status = 1 AND created > $1 GROUP BY kind"#,
        )
        .bind(since)
        .fetch_all(db)
        .await
        .unwrap();
        let active_users = sqlx::query_as::<_, CountRow>(
            "SELECT COUNT(DISTINCT user_id) AS count FROM ledger_entries WHERE created > $1",
        )
        .bind(since)
        .fetch_one(db)
        .await
        .unwrap()
        .count;

        let mut window = ActivityWindow {
            active_users,
            ..Default::default()
        };
        for row in rows {
            let activity = KindActivity {
                count: row.count,
                total: btc::Sats(row.total_sats),
            };
            match row.kind {
                0 => window.deposits = activity,
                1 => window.withdrawals = activity,
                2 => window.internals = activity,
                other => unreachable!("unknown entry kind {:?}", other),
            }
        }
        window
    }

    #[derive(sqlx::FromRow, Debug)]
    struct AuditRow {
        id: Uuid,
        username: String,
        balance_sats: i64,
        computed_sats: i64,
    }

    #[derive(sqlx::FromRow, Debug)]
    struct ActivityRow {
        kind: i32,
        count: i64,
        total_sats: i64,
    }
}

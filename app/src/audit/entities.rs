//! The audit report and the pure arithmetic behind it. Everything here is
//! computation over already-fetched data, so the reconciliation rules are
//! testable without a database or a node.

use crate::btc;
use crate::user;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Passed,
    Failed,
}

/// One user whose stored balance does not equal the balance recomputed from
/// their completed transaction history.
#[derive(Debug, Clone)]
pub struct Discrepancy {
    pub user_id: user::Id,
    pub username: String,
    pub stored: btc::Sats,
    pub computed: btc::Sats,
}

impl Discrepancy {
    pub(crate) fn check(
        user_id: user::Id,
        username: &str,
        stored: btc::Sats,
        computed: btc::Sats,
    ) -> Option<Self> {
        if stored == computed {
            return None;
        }
        Some(Self {
            user_id,
            username: username.to_owned(),
            stored,
            computed,
        })
    }

    /// Stored minus computed: positive means the ledger shows more than the
    /// history justifies.
    pub fn difference(&self) -> i64 {
        self.stored.0 - self.computed.0
    }
}

/// Node balance versus the sum of all stored balances. A nonzero drift is
/// expected in normal operation (routing fees, operator margin) and is
/// tracked, not failed on.
#[derive(Debug, Clone, Copy)]
pub struct NodeBalanceCheck {
    /// `None` when the gateway was unreachable during this run.
    pub node_total: Option<btc::Sats>,
    pub ledger_total: btc::Sats,
}

impl NodeBalanceCheck {
    pub fn drift(&self) -> Option<i64> {
        self.node_total.map(|total| total.0 - self.ledger_total.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Online,
    Offline,
    Error,
}

/// Point-in-time reachability of one external dependency. A probe timing
/// out degrades that dependency's status; it never aborts the audit.
#[derive(Debug, Clone)]
pub struct DependencyHealth {
    pub name: &'static str,
    pub status: HealthStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KindActivity {
    pub count: i64,
    pub total: btc::Sats,
}

/// Completed ledger activity over the trailing 24 hours, for reporting only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityWindow {
    pub deposits: KindActivity,
    pub withdrawals: KindActivity,
    pub internals: KindActivity,
    pub active_users: i64,
}

#[derive(Debug)]
pub struct AuditReport {
    pub status: AuditStatus,
    pub generated_at: DateTime<Utc>,
    pub total_users: i64,
    pub discrepancies: Vec<Discrepancy>,
    pub node_check: NodeBalanceCheck,
    pub health: Vec<DependencyHealth>,
    pub activity: ActivityWindow,
}

impl AuditReport {
    /// The audit fails if and only if at least one per-user discrepancy was
    /// found. Node drift and degraded dependencies are reported alongside
    /// but never flip the status on their own.
    pub(crate) fn build(
        generated_at: DateTime<Utc>,
        total_users: i64,
        discrepancies: Vec<Discrepancy>,
        node_check: NodeBalanceCheck,
        health: Vec<DependencyHealth>,
        activity: ActivityWindow,
    ) -> Self {
        let status = if discrepancies.is_empty() {
            AuditStatus::Passed
        } else {
            AuditStatus::Failed
        };
        Self {
            status,
            generated_at,
            total_users,
            discrepancies,
            node_check,
            health,
            activity,
        }
    }

    pub fn users_with_discrepancies(&self) -> usize {
        self.discrepancies.len()
    }

    /// Total absolute discrepancy in satoshis.
    pub fn total_discrepancy(&self) -> i64 {
        self.discrepancies
            .iter()
            .map(|discrepancy| discrepancy.difference().abs())
            .sum()
    }

    pub fn subject(&self) -> String {
        match self.status {
            AuditStatus::Passed => "Daily balance audit: PASSED".to_owned(),
            AuditStatus::Failed => format!(
                "Daily balance audit: FAILED ({} users, {} sats)",
                self.users_with_discrepancies(),
                self.total_discrepancy()
            ),
        }
    }

    /// Plain-text body for the report mail.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut line = |s: String| {
            out.push_str(&s);
            out.push('\n');
        };
        line(format!("Balance audit {}", self.generated_at.to_rfc3339()));
        line(format!(
            "Status: {}",
            match self.status {
                AuditStatus::Passed => "PASSED",
                AuditStatus::Failed => "FAILED",
            }
        ));
        line(format!("Users audited: {}", self.total_users));
        line(format!(
            "Users with discrepancies: {}",
            self.users_with_discrepancies()
        ));
        line(format!(
            "Total discrepancy: {} sats",
            self.total_discrepancy()
        ));
        for discrepancy in &self.discrepancies {
            line(format!(
                "  {} ({:?}): stored {} sats, computed {} sats, difference {} sats",
                discrepancy.username,
                discrepancy.user_id.0,
                discrepancy.stored.0,
                discrepancy.computed.0,
                discrepancy.difference()
            ));
        }
        line(String::new());
        match (self.node_check.node_total, self.node_check.drift()) {
            (Some(total), Some(drift)) => {
                line(format!(
                    "Node balance: {} sats, stored balances: {} sats, margin: {} sats",
                    total.0, self.node_check.ledger_total.0, drift
                ));
            }
            _ => line(format!(
                "Node balance: unavailable, stored balances: {} sats",
                self.node_check.ledger_total.0
            )),
        }
        line(String::new());
        line("Dependencies:".to_owned());
        for dependency in &self.health {
            line(format!(
                "  {}: {}{}",
                dependency.name,
                match dependency.status {
                    HealthStatus::Online => "online",
                    HealthStatus::Offline => "offline",
                    HealthStatus::Error => "error",
                },
                dependency
                    .detail
                    .as_deref()
                    .map(|detail| format!(" ({})", detail))
                    .unwrap_or_default()
            ));
        }
        line(String::new());
        line("Last 24 hours:".to_owned());
        line(format!(
            "  deposits: {} for {} sats",
            self.activity.deposits.count, self.activity.deposits.total.0
        ));
        line(format!(
            "  withdrawals: {} for {} sats",
            self.activity.withdrawals.count, self.activity.withdrawals.total.0
        ));
        line(format!(
            "  internal transfers: {} for {} sats",
            self.activity.internals.count, self.activity.internals.total.0
        ));
        line(format!("  active users: {}", self.activity.active_users));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn node_check(node_total: Option<i64>, ledger_total: i64) -> NodeBalanceCheck {
        NodeBalanceCheck {
            node_total: node_total.map(btc::Sats),
            ledger_total: btc::Sats(ledger_total),
        }
    }

    fn build(discrepancies: Vec<Discrepancy>, check: NodeBalanceCheck) -> AuditReport {
        AuditReport::build(
            Utc::now(),
            2,
            discrepancies,
            check,
            vec![DependencyHealth {
                name: "lightning gateway",
                status: HealthStatus::Online,
                detail: None,
            }],
            ActivityWindow::default(),
        )
    }

    #[test]
    fn mismatch_is_reported_with_its_difference() {
        // Stored balance 1000 against a history of deposit 500 + deposit 400.
        let discrepancy = Discrepancy::check(
            user::Id(Uuid::from_u128(1)),
            "alice",
            btc::Sats(1000),
            btc::Sats(900),
        )
        .unwrap();
        assert_eq!(discrepancy.difference(), 100);

        let report = build(vec![discrepancy], node_check(Some(2000), 1000));
        assert_eq!(report.status, AuditStatus::Failed);
        assert_eq!(report.users_with_discrepancies(), 1);
        assert_eq!(report.total_discrepancy(), 100);
    }

    #[test]
    fn exact_sums_pass() {
        assert!(Discrepancy::check(
            user::Id(Uuid::from_u128(1)),
            "alice",
            btc::Sats(900),
            btc::Sats(900),
        )
        .is_none());

        let report = build(Vec::new(), node_check(Some(2000), 1000));
        assert_eq!(report.status, AuditStatus::Passed);
        assert_eq!(report.users_with_discrepancies(), 0);
        assert_eq!(report.total_discrepancy(), 0);
    }

    #[test]
    fn node_drift_alone_never_fails_the_audit() {
        let report = build(Vec::new(), node_check(Some(5000), 1000));
        assert_eq!(report.node_check.drift(), Some(4000));
        assert_eq!(report.status, AuditStatus::Passed);

        // Gateway down: drift unknown, audit still computes.
        let report = build(Vec::new(), node_check(None, 1000));
        assert_eq!(report.node_check.drift(), None);
        assert_eq!(report.status, AuditStatus::Passed);
    }

    #[test]
    fn negative_differences_count_into_the_total() {
        let shortfall = Discrepancy::check(
            user::Id(Uuid::from_u128(1)),
            "alice",
            btc::Sats(900),
            btc::Sats(1000),
        )
        .unwrap();
        let surplus = Discrepancy::check(
            user::Id(Uuid::from_u128(2)),
            "bob",
            btc::Sats(550),
            btc::Sats(500),
        )
        .unwrap();
        assert_eq!(shortfall.difference(), -100);
        let report = build(vec![shortfall, surplus], node_check(Some(0), 0));
        // Absolute values: opposite signs must not cancel out.
        assert_eq!(report.total_discrepancy(), 150);
    }

    #[test]
    fn report_renders_the_numbers_it_is_built_from() {
        let discrepancy = Discrepancy::check(
            user::Id(Uuid::from_u128(1)),
            "alice",
            btc::Sats(1000),
            btc::Sats(900),
        )
        .unwrap();
        let report = build(vec![discrepancy], node_check(Some(2000), 1000));
        let body = report.render();
        assert!(body.contains("Status: FAILED"));
        assert!(body.contains("difference 100 sats"));
        assert!(body.contains("margin: 1000 sats"));
        assert!(report.subject().contains("FAILED"));
    }
}

use app::{database::Database, ln::Lightning, notify::Mailer};

use crate::rate_limit::RateLimit;

pub struct CashLimits {
    pub withdrawal_limits: app::CashLimits,
    pub invoice_limits: app::CashLimits,
}

pub struct AuditConfig {
    /// Where the daily summary report is mailed.
    pub recipient: String,
    /// Shared secret for the admin trigger endpoint.
    pub admin_secret: String,
}

pub struct RocketState {
    pub db: Database,
    pub lightning: Lightning,
    pub mailer: Mailer,
    pub cash_limits: CashLimits,
    pub rate_limit: RateLimit,
    pub audit: AuditConfig,
}

//! This library contains definitions for the API layer.

use app::{database::Database, ln::Lightning, notify::Mailer};
use rocket::{Build, Rocket};
use state::RocketState;

mod access;
mod error;
mod rate_limit;
mod routes;
mod state;

pub use rate_limit::RateLimit;
pub use state::{AuditConfig, CashLimits};

pub fn register(
    rocket: Rocket<Build>,
    db: Database,
    lightning: Lightning,
    mailer: Mailer,
    cash_limits: CashLimits,
    rate_limit: RateLimit,
    audit: AuditConfig,
) -> Rocket<Build> {
    routes::register(
        rocket,
        RocketState {
            db,
            lightning,
            mailer,
            cash_limits,
            rate_limit,
            audit,
        },
    )
}

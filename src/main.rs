use std::time::Duration;

use app::btc;
use app::database::{self, run_migrations, seed_development_data};
use app::ln::{self, Lightning};
use app::notify::{self, Mailer};
use rocket::{launch, Build, Rocket};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Deserialize)]
struct Config {
    database_url: Url,
    lnd: LndConfig,
    limits: LimitsConfig,
    rate_limit: RateLimitConfig,
    mail: MailConfig,
    audit: AuditConfig,
}

#[derive(Debug, Deserialize)]
struct LndConfig {
    url: Url,
    macaroon_path: String,
    cert_path: String,
}

#[derive(Debug, Deserialize)]
struct LimitsConfig {
    withdrawal_min_sats: i64,
    withdrawal_max_sats: i64,
    withdrawal_daily_sats: i64,
    invoice_min_sats: i64,
    invoice_max_sats: i64,
    invoice_daily_sats: i64,
}

impl LimitsConfig {
    fn into_api_limits(self) -> api::CashLimits {
        api::CashLimits {
            withdrawal_limits: app::CashLimits {
                min: btc::Sats(self.withdrawal_min_sats),
                max: btc::Sats(self.withdrawal_max_sats),
                daily: btc::Sats(self.withdrawal_daily_sats),
            },
            invoice_limits: app::CashLimits {
                min: btc::Sats(self.invoice_min_sats),
                max: btc::Sats(self.invoice_max_sats),
                daily: btc::Sats(self.invoice_daily_sats),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RateLimitConfig {
    limit: usize,
    span: Duration,
}

impl RateLimitConfig {
    fn into_rate_limit(self) -> api::RateLimit {
        api::RateLimit::new(self.limit, self.span)
    }
}

#[derive(Debug, Deserialize)]
struct MailConfig {
    endpoint: Url,
    api_key: String,
    sender: String,
}

#[derive(Debug, Deserialize)]
struct AuditConfig {
    recipient: String,
    admin_secret: String,
}

#[launch]
async fn rocket() -> _ {
    start_server().await
}

async fn start_server() -> Rocket<Build> {
    env_logger::init();

    let rocket = Rocket::build();
    let config: Config = rocket.figment().extract().unwrap();

    let db = database::connect(&config.database_url).await;
    let lightning = Lightning::new(ln::Config {
        endpoint: config.lnd.url,
        macaroon_path: config.lnd.macaroon_path,
        cert_path: config.lnd.cert_path,
    })
    .await;
    let mailer = Mailer::new(notify::Config {
        endpoint: config.mail.endpoint,
        api_key: config.mail.api_key,
        sender: config.mail.sender,
    });

    run_migrations(&db).await;
    #[cfg(debug_assertions)]
    seed_development_data(&db).await;

    app::invoice::start_worker(db.clone(), &lightning).await;
    app::transfer::start_worker(&db, &lightning).await;
    app::audit::start_worker(&db, &lightning, mailer.clone(), config.audit.recipient.clone())
        .await;

    api::register(
        rocket,
        db,
        lightning,
        mailer,
        config.limits.into_api_limits(),
        config.rate_limit.into_rate_limit(),
        api::AuditConfig {
            recipient: config.audit.recipient,
            admin_secret: config.audit.admin_secret,
        },
    )
}

use futures::FutureExt;
use std::{future::Future, panic::AssertUnwindSafe};

pub mod audit;
pub mod auth;
pub mod btc;
pub mod cash_limits;
pub mod concurrency;
pub mod database;
mod hex;
pub mod invoice;
pub mod ledger;
pub mod linked_wallet;
pub mod ln;
pub mod notify;
pub mod seconds;
pub mod transfer;
pub mod user;
mod worker;

pub use cash_limits::CashLimits;

#[derive(Debug, Clone, Copy)]
pub struct QueryRange {
    pub limit: i64,
    pub offset: i64,
}

async fn swallow_panic(f: impl Future<Output = ()>) {
    let _ = AssertUnwindSafe(f).catch_unwind().await;
}

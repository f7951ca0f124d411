use chrono::{DateTime, Utc};
use url::Url;
use uuid::Uuid;

use crate::btc;

#[derive(Debug, Clone)]
pub struct Email(pub String);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(pub Uuid);

/// A wallet user. Users are never hard-deleted; `disabled` is the soft
/// marker, and a disabled user cannot be resolved as a transfer recipient.
#[derive(Debug)]
pub struct User {
    pub id: Id,
    pub email: Option<Email>,
    pub username: String,
    pub balance: btc::Sats,
    /// An externally linked non-custodial wallet, if the user connected one.
    /// Withdrawals routed there never touch the custodial balance.
    pub linked_wallet: Option<Url>,
    pub created: DateTime<Utc>,
    pub disabled: Option<DateTime<Utc>>,
}

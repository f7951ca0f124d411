//! Authentication and authorization. Identity is proven by possession of a
//! bearer token; authorization by possession of a grant, one type per
//! capability, so a handler that takes a [`SpendGrant`] cannot be reached
//! with a read-only token.

use crate::{hex::Hex, user};
use chrono::{DateTime, Utc};
use sha2::Digest;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("access denied")]
pub struct AccessDenied;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TokenId(pub Uuid);

/// Proof that the presented token may move funds out of the account.
#[derive(Debug)]
pub struct SpendGrant {
    pub user_id: user::Id,
}

/// Proof that the presented token may create invoices for the account.
#[derive(Debug)]
pub struct ReceiveGrant {
    pub user_id: user::Id,
}

/// Proof that the presented token may read account data.
#[derive(Debug)]
pub struct ReadGrant {
    pub user_id: user::Id,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Permissions {
    pub can_spend: bool,
    pub can_receive: bool,
    pub can_read: bool,
}

/// SHA-256 of a token. Tokens are generated with high entropy, which is why a
/// fast unsalted hash is sufficient here.
pub struct TokenHash(Hex);

impl TokenHash {
    pub(crate) fn generate(token: &str) -> Self {
        let mut hasher = sha2::Sha256::new();
        hasher.update(token);
        Self(Hex::encode(&hasher.finalize()))
    }

    pub(crate) fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

#[derive(Debug)]
pub struct Token {
    pub(crate) user_id: user::Id,
    pub(crate) permissions: Permissions,
    pub(crate) disabled: Option<DateTime<Utc>>,
}

impl Token {
    pub(crate) fn spend_grant(&self) -> Result<SpendGrant, AccessDenied> {
        if self.is_enabled() && self.permissions.can_spend {
            Ok(SpendGrant {
                user_id: self.user_id,
            })
        } else {
            Err(AccessDenied)
        }
    }

    pub(crate) fn receive_grant(&self) -> Result<ReceiveGrant, AccessDenied> {
        if self.is_enabled() && self.permissions.can_receive {
            Ok(ReceiveGrant {
                user_id: self.user_id,
            })
        } else {
            Err(AccessDenied)
        }
    }

    pub(crate) fn read_grant(&self) -> Result<ReadGrant, AccessDenied> {
        if self.is_enabled() && self.permissions.can_read {
            Ok(ReadGrant {
                user_id: self.user_id,
            })
        } else {
            Err(AccessDenied)
        }
    }

    fn is_enabled(&self) -> bool {
        self.disabled.is_none()
    }
}

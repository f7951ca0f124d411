use crate::{auth, database::Database};

mod entities;

pub use entities::{Email, Id, User};

pub async fn get(grant: &auth::ReadGrant, db: &Database) -> Option<User> {
    queries::get(db, grant.user_id).await
}

pub(crate) use queries::{find_by_username, get_by_id, get_tx};

mod queries {
    use super::{Email, Id, User};
    use crate::btc;
    use crate::database::{self, Database};
    use chrono::{DateTime, Utc};
    use std::str::FromStr;
    use url::Url;
    use uuid::Uuid;

    const COLUMNS: &str =
        "id, email, username, balance_sats, linked_wallet_url, created, disabled";

    pub(super) async fn get(db: &Database, id: Id) -> Option<User> {
        get_by_id(db, id).await
    }

    pub(crate) async fn get_by_id(db: &Database, id: Id) -> Option<User> {
        sqlx::query_as::<_, UserRow>(const_format::formatcp!(
            "SELECT {} FROM users WHERE id = $1",
            COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(db)
        .await
        .unwrap()
        .map(|row| row.into_entity())
    }

    pub(crate) async fn get_tx(data_tx: &mut database::Transaction, id: Id) -> Option<User> {
        sqlx::query_as::<_, UserRow>(const_format::formatcp!(
            "SELECT {} FROM users WHERE id = $1",
            COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(data_tx)
        .await
        .unwrap()
        .map(|row| row.into_entity())
    }

    /// Resolves a transfer recipient. Disabled users are not resolvable.
    pub(crate) async fn find_by_username(
        data_tx: &mut database::Transaction,
        username: &str,
    ) -> Option<User> {
        sqlx::query_as::<_, UserRow>(const_format::formatcp!(
            "SELECT {} FROM users WHERE username = $1 AND disabled IS NULL",
            COLUMNS
        ))
        .bind(username)
        .fetch_optional(data_tx)
        .await
        .unwrap()
        .map(|row| row.into_entity())
    }

    #[derive(sqlx::FromRow, Debug)]
    struct UserRow {
        id: Uuid,
        email: Option<String>,
        username: String,
        balance_sats: i64,
        linked_wallet_url: Option<String>,
        created: DateTime<Utc>,
        disabled: Option<DateTime<Utc>>,
    }

    impl UserRow {
        fn into_entity(self) -> User {
            User {
                id: Id(self.id),
                email: self.email.map(Email),
                username: self.username,
                balance: btc::Sats(self.balance_sats),
                linked_wallet: self
                    .linked_wallet_url
                    .as_deref()
                    .map(|url| Url::from_str(url).unwrap()),
                created: self.created,
                disabled: self.disabled,
            }
        }
    }
}

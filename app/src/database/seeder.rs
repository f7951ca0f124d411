use super::{Database, Transaction};
use crate::auth;
use chrono::Utc;
use uuid::Uuid;

/// Seeds two funded wallet users for local development. Idempotent: a user
/// that already exists is left alone.
pub async fn seed_development_data(db: &Database) {
    let mut data_tx = db.begin().await.unwrap();
    seed_test_user(&mut data_tx, 1, "alice").await;
    seed_test_user(&mut data_tx, 2, "bob").await;
    data_tx.commit().await.unwrap();
}

async fn seed_test_user(data_tx: &mut Transaction, index: u128, username: &str) {
    let row = sqlx::query(r#"SELECT id FROM users WHERE id = $1"#)
        .bind(Uuid::from_u128(index))
        .fetch_optional(&mut *data_tx)
        .await
        .unwrap();
    if row.is_some() {
        return;
    }
    sqlx::query(
        r#"INSERT INTO users (id, email, username, password, balance_sats, linked_wallet_url, created, disabled)
            VALUES ($1, $2, $3, $4, $5, NULL, $6, NULL)"#,
    )
    .bind(Uuid::from_u128(index))
    .bind(format!("{}@dev.invalid", username))
    .bind(username)
    .bind(format!("dev-{}", username))
    .bind(1_000_000_i64)
    .bind(Utc::now())
    .execute(&mut *data_tx)
    .await
    .unwrap();
    seed_token(data_tx, index * 100 + 1, index, &format!("all_{}", username), true, true, true).await;
    seed_token(data_tx, index * 100 + 2, index, &format!("read_only_{}", username), false, false, true).await;
}

async fn seed_token(
    data_tx: &mut Transaction,
    token_index: u128,
    user_index: u128,
    name: &str,
    can_spend: bool,
    can_receive: bool,
    can_read: bool,
) {
    sqlx::query(
        r#"INSERT INTO auth_tokens (id, user_id, name, token_hash, can_spend, can_receive, can_read, created, disabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL)"#,
    )
    .bind(Uuid::from_u128(token_index))
    .bind(Uuid::from_u128(user_index))
    .bind(name)
    .bind(auth::TokenHash::generate(name).as_str())
    .bind(can_spend)
    .bind(can_receive)
    .bind(can_read)
    .bind(Utc::now())
    .execute(&mut *data_tx)
    .await
    .unwrap();
}

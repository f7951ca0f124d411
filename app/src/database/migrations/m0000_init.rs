use super::{Migration, SimpleSqlMigration};

pub fn migration() -> impl Migration {
    SimpleSqlMigration {
        serial_number: 0,
        sql: vec![
            r#"
            CREATE TABLE users (
                id UUID PRIMARY KEY,
                email TEXT UNIQUE,
                username TEXT UNIQUE NOT NULL,
                password TEXT NOT NULL,
                balance_sats BIGINT NOT NULL CHECK (balance_sats >= 0),
                linked_wallet_url TEXT,
                created TIMESTAMP WITH TIME ZONE NOT NULL,
                disabled TIMESTAMP WITH TIME ZONE
            )"#,
            r#"CREATE INDEX user_username ON users (username)"#,
            r#"
            CREATE TABLE auth_tokens (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES users,
                name TEXT UNIQUE NOT NULL,
                token_hash TEXT UNIQUE NOT NULL,
                can_spend BOOLEAN NOT NULL,
                can_receive BOOLEAN NOT NULL,
                can_read BOOLEAN NOT NULL,
                created TIMESTAMP WITH TIME ZONE NOT NULL,
                disabled TIMESTAMP WITH TIME ZONE
            )"#,
            // The append-only transaction log. Completed rows are immutable;
            // the only permitted updates are the pending -> completed and
            // pending -> failed transitions.
            r#"
            CREATE TABLE ledger_entries (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES users,
                kind INT NOT NULL,
                amount_sats BIGINT NOT NULL CHECK (amount_sats > 0),
                status INT NOT NULL,
                payment_hash TEXT,
                memo TEXT,
                peer_username TEXT,
                created TIMESTAMP WITH TIME ZONE NOT NULL,
                settled TIMESTAMP WITH TIME ZONE
            )"#,
            // One ledger row per payment hash and direction. Settlement
            // application races on this index: whoever inserts or transitions
            // first wins, every later observer no-ops.
            r#"CREATE UNIQUE INDEX ledger_entry_payment_hash ON ledger_entries (kind, payment_hash)
                WHERE payment_hash IS NOT NULL"#,
            r#"CREATE INDEX ledger_entry_user_created ON ledger_entries (user_id, created)"#,
            r#"CREATE INDEX ledger_entry_status ON ledger_entries (status)"#,
            r#"
            CREATE TABLE invoices (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES users,
                payment_hash TEXT UNIQUE NOT NULL,
                amount_msats BIGINT,
                memo TEXT,
                invoice TEXT NOT NULL UNIQUE,
                created TIMESTAMP WITH TIME ZONE NOT NULL,
                expiration TIMESTAMP WITH TIME ZONE NOT NULL,
                settlement_amount_sats BIGINT,
                settlement_timestamp TIMESTAMP WITH TIME ZONE
            )"#,
            r#"CREATE INDEX invoice_expiration ON invoices (expiration)"#,
        ],
    }
}

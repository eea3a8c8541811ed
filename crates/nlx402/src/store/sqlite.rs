use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{
    purge_cutoff, unix_now, IssuanceStore, NonceStore, PaymentRecordStore, StoreStats, TokenStore,
};
use crate::error::Nlx402Error;
use crate::payment::PaymentRecord;
use crate::quote::{Nonce, Quote};
use crate::token::{AccessToken, ConsumeOutcome};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS quotes (
        nonce TEXT PRIMARY KEY,
        wallet TEXT NOT NULL,
        query_count INTEGER NOT NULL,
        price_lamports INTEGER NOT NULL,
        discount_bps INTEGER NOT NULL,
        recipient TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        state TEXT NOT NULL DEFAULT 'pending' CHECK (state IN ('pending', 'consumed')),
        consumed_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_quotes_expires_at ON quotes(expires_at);

    CREATE TABLE IF NOT EXISTS access_tokens (
        token_id TEXT PRIMARY KEY,
        wallet TEXT NOT NULL,
        queries_allowed INTEGER NOT NULL CHECK (queries_allowed >= 0),
        queries_used INTEGER NOT NULL DEFAULT 0
            CHECK (queries_used >= 0 AND queries_used <= queries_allowed),
        issued_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        rate_limit_per_sec INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_tokens_expires_at ON access_tokens(expires_at);

    CREATE TABLE IF NOT EXISTS payment_records (
        tx_signature TEXT PRIMARY KEY,
        nonce TEXT NOT NULL UNIQUE,
        wallet TEXT NOT NULL,
        amount_lamports INTEGER NOT NULL,
        token_id TEXT NOT NULL,
        confirmed_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_payments_token_id ON payment_records(token_id);
";

const QUOTE_COLUMNS: &str =
    "nonce, wallet, query_count, price_lamports, discount_bps, recipient, created_at, expires_at, state";

const TOKEN_COLUMNS: &str =
    "token_id, wallet, queries_allowed, queries_used, issued_at, expires_at, rate_limit_per_sec";

/// Persistent store backed by SQLite. Survives restarts.
///
/// The connection runs in WAL mode with a busy timeout so writers from other
/// processes wait instead of failing. Every state transition is a single
/// conditional statement or a single transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path.
    ///
    /// On Unix systems, the database file permissions are restricted to 0600
    /// (owner read/write only); the file holds live bearer tokens.
    pub fn open(path: &str) -> Result<Self, Nlx402Error> {
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set database file permissions to 0600"
                );
            }
        }

        Ok(store)
    }

    /// Private in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, Nlx402Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, Nlx402Error> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("sqlite store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn to_sql_int(value: u64) -> Result<i64, Nlx402Error> {
    i64::try_from(value).map_err(|_| Nlx402Error::Storage(format!("{value} exceeds i64")))
}

fn from_sql_int(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn text_err(idx: usize, e: Nlx402Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn quote_from_row(row: &Row<'_>) -> rusqlite::Result<Quote> {
    let nonce: String = row.get(0)?;
    let state: String = row.get(8)?;
    let discount: i64 = row.get(4)?;
    Ok(Quote {
        nonce: nonce.parse().map_err(|e| text_err(0, e))?,
        wallet: row.get(1)?,
        query_count: from_sql_int(row, 2)?,
        price_lamports: from_sql_int(row, 3)?,
        discount_bps: u16::try_from(discount)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(4, discount))?,
        recipient: row.get(5)?,
        created_at: row.get(6)?,
        expires_at: row.get(7)?,
        state: state.parse().map_err(|e| text_err(8, e))?,
    })
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<AccessToken> {
    Ok(AccessToken {
        token_id: row.get(0)?,
        wallet: row.get(1)?,
        queries_allowed: from_sql_int(row, 2)?,
        queries_used: from_sql_int(row, 3)?,
        issued_at: row.get(4)?,
        expires_at: row.get(5)?,
        rate_limit_per_sec: row.get(6)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PaymentRecord> {
    let nonce: String = row.get(1)?;
    Ok(PaymentRecord {
        tx_signature: row.get(0)?,
        nonce: nonce.parse().map_err(|e| text_err(1, e))?,
        wallet: row.get(2)?,
        amount_lamports: from_sql_int(row, 3)?,
        token_id: row.get(4)?,
        confirmed_at: row.get(5)?,
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Compare-and-swap pending → consumed. Runs on a plain connection or inside
/// a transaction.
fn consume_nonce(conn: &Connection, nonce: &Nonce, now: i64) -> Result<Quote, Nlx402Error> {
    let key = nonce.to_string();
    let consumed = conn
        .query_row(
            &format!(
                "UPDATE quotes SET state = 'consumed', consumed_at = ?2
                 WHERE nonce = ?1 AND state = 'pending' AND expires_at > ?2
                 RETURNING {QUOTE_COLUMNS}"
            ),
            params![key, now],
            quote_from_row,
        )
        .optional()?;
    if let Some(quote) = consumed {
        return Ok(quote);
    }

    // Lost: find out why.
    let expires_at: Option<i64> = conn
        .query_row(
            "SELECT expires_at FROM quotes WHERE nonce = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    match expires_at {
        Some(expires_at) if expires_at > now => Err(Nlx402Error::NonceAlreadyConsumed),
        _ => Err(Nlx402Error::NonceExpired),
    }
}

fn insert_token(conn: &Connection, token: &AccessToken) -> Result<(), Nlx402Error> {
    conn.execute(
        &format!("INSERT INTO access_tokens ({TOKEN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            token.token_id,
            token.wallet,
            to_sql_int(token.queries_allowed)?,
            to_sql_int(token.queries_used)?,
            token.issued_at,
            token.expires_at,
            token.rate_limit_per_sec,
        ],
    )?;
    Ok(())
}

impl NonceStore for SqliteStore {
    fn put(&self, quote: &Quote) -> Result<(), Nlx402Error> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO quotes ({QUOTE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending')"
            ),
            params![
                quote.nonce.to_string(),
                quote.wallet,
                to_sql_int(quote.query_count)?,
                to_sql_int(quote.price_lamports)?,
                quote.discount_bps,
                quote.recipient,
                quote.created_at,
                quote.expires_at,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                Nlx402Error::Storage("duplicate nonce".to_string())
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    fn get(&self, nonce: &Nonce) -> Result<Option<Quote>, Nlx402Error> {
        let conn = self.conn();
        let quote = conn
            .query_row(
                &format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE nonce = ?1"),
                params![nonce.to_string()],
                quote_from_row,
            )
            .optional()?;
        let now = unix_now();
        Ok(quote.map(|mut q| {
            q.state = q.state_at(now);
            q
        }))
    }

    fn consume(&self, nonce: &Nonce) -> Result<Quote, Nlx402Error> {
        let conn = self.conn();
        consume_nonce(&conn, nonce, unix_now())
    }

    fn purge_expired(&self, retention_secs: u64) -> usize {
        let conn = self.conn();
        match conn.execute(
            "DELETE FROM quotes WHERE expires_at < ?1",
            params![purge_cutoff(retention_secs)],
        ) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "failed to purge expired quotes");
                0
            }
        }
    }
}

impl TokenStore for SqliteStore {
    fn insert_token(&self, token: &AccessToken) -> Result<(), Nlx402Error> {
        let conn = self.conn();
        insert_token(&conn, token)
    }

    fn get_token(&self, token_id: &str) -> Result<Option<AccessToken>, Nlx402Error> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                &format!("SELECT {TOKEN_COLUMNS} FROM access_tokens WHERE token_id = ?1"),
                params![token_id],
                token_from_row,
            )
            .optional()?)
    }

    fn consume_token(&self, token_id: &str, units: u64) -> Result<ConsumeOutcome, Nlx402Error> {
        if units == 0 {
            return Err(Nlx402Error::InvalidRequest(
                "units must be at least 1".to_string(),
            ));
        }
        let units = to_sql_int(units)?;
        let now = unix_now();
        let conn = self.conn();

        let outcome = conn
            .query_row(
                "UPDATE access_tokens SET queries_used = queries_used + ?2
                 WHERE token_id = ?1 AND expires_at > ?3 AND queries_used + ?2 <= queries_allowed
                 RETURNING wallet, queries_used, queries_allowed, rate_limit_per_sec",
                params![token_id, units, now],
                |row| {
                    Ok(ConsumeOutcome {
                        wallet: row.get(0)?,
                        queries_used: from_sql_int(row, 1)?,
                        queries_allowed: from_sql_int(row, 2)?,
                        rate_limit_per_sec: row.get(3)?,
                    })
                },
            )
            .optional()?;
        if let Some(outcome) = outcome {
            return Ok(outcome);
        }

        let expires_at: Option<i64> = conn
            .query_row(
                "SELECT expires_at FROM access_tokens WHERE token_id = ?1",
                params![token_id],
                |row| row.get(0),
            )
            .optional()?;
        match expires_at {
            None => Err(Nlx402Error::InvalidToken),
            Some(expires_at) if expires_at <= now => Err(Nlx402Error::TokenExpired),
            Some(_) => Err(Nlx402Error::QuotaExceeded),
        }
    }

    fn purge_expired_tokens(&self, retention_secs: u64) -> usize {
        let conn = self.conn();
        let purge = || -> rusqlite::Result<usize> {
            let n = conn.execute(
                "DELETE FROM access_tokens WHERE expires_at < ?1",
                params![purge_cutoff(retention_secs)],
            )?;
            conn.execute(
                "DELETE FROM payment_records
                 WHERE token_id NOT IN (SELECT token_id FROM access_tokens)",
                [],
            )?;
            Ok(n)
        };
        match purge() {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "failed to purge expired tokens");
                0
            }
        }
    }
}

impl PaymentRecordStore for SqliteStore {
    fn get_payment(&self, tx_signature: &str) -> Result<Option<PaymentRecord>, Nlx402Error> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT tx_signature, nonce, wallet, amount_lamports, token_id, confirmed_at
                 FROM payment_records WHERE tx_signature = ?1",
                params![tx_signature],
                record_from_row,
            )
            .optional()?)
    }
}

impl IssuanceStore for SqliteStore {
    fn commit_unlock(
        &self,
        record: &PaymentRecord,
        token: &AccessToken,
    ) -> Result<(), Nlx402Error> {
        let mut conn = self.conn();
        // IMMEDIATE takes the write lock up front so the CAS and the inserts
        // are serialized against other processes sharing the file.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        consume_nonce(&tx, &record.nonce, unix_now())?;

        tx.execute(
            "INSERT INTO payment_records
                (tx_signature, nonce, wallet, amount_lamports, token_id, confirmed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.tx_signature,
                record.nonce.to_string(),
                record.wallet,
                to_sql_int(record.amount_lamports)?,
                record.token_id,
                record.confirmed_at,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                Nlx402Error::SignatureAlreadyUsed
            } else {
                e.into()
            }
        })?;

        insert_token(&tx, token)?;
        tx.commit()?;
        Ok(())
    }

    fn stats(&self) -> Result<StoreStats, Nlx402Error> {
        let conn = self.conn();
        let now = unix_now();
        let count = |sql: &str, args: &[&dyn rusqlite::ToSql]| -> Result<u64, Nlx402Error> {
            let n: i64 = conn.query_row(sql, args, |row| row.get(0))?;
            Ok(u64::try_from(n).unwrap_or(0))
        };
        Ok(StoreStats {
            pending_quotes: count(
                "SELECT COUNT(*) FROM quotes WHERE state = 'pending' AND expires_at > ?1",
                &[&now],
            )?,
            consumed_quotes: count("SELECT COUNT(*) FROM quotes WHERE state = 'consumed'", &[])?,
            active_tokens: count(
                "SELECT COUNT(*) FROM access_tokens
                 WHERE expires_at > ?1 AND queries_used < queries_allowed",
                &[&now],
            )?,
            total_queries_used: count(
                "SELECT COALESCE(SUM(queries_used), 0) FROM access_tokens",
                &[],
            )?,
            payments_recorded: count("SELECT COUNT(*) FROM payment_records", &[])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::QuoteState;
    use crate::token::TokenPolicy;

    fn pending_quote(expires_in: i64) -> Quote {
        let now = unix_now();
        Quote {
            nonce: Nonce::random(),
            wallet: "wallet".to_string(),
            query_count: 1_000,
            price_lamports: 95_000_000,
            discount_bps: 500,
            recipient: "recipient".to_string(),
            created_at: now,
            expires_at: now + expires_in,
            state: QuoteState::Pending,
        }
    }

    fn record_for(quote: &Quote, signature: &str, token: &AccessToken) -> PaymentRecord {
        PaymentRecord {
            tx_signature: signature.to_string(),
            nonce: quote.nonce,
            wallet: quote.wallet.clone(),
            amount_lamports: quote.price_lamports,
            token_id: token.token_id.clone(),
            confirmed_at: unix_now(),
        }
    }

    #[test]
    fn quote_round_trips_through_sqlite() {
        let store = SqliteStore::open_in_memory().unwrap();
        let quote = pending_quote(300);
        store.put(&quote).unwrap();
        assert_eq!(store.get(&quote.nonce).unwrap(), Some(quote));
    }

    #[test]
    fn consume_is_single_use_and_classified() {
        let store = SqliteStore::open_in_memory().unwrap();
        let quote = pending_quote(300);
        store.put(&quote).unwrap();

        let consumed = store.consume(&quote.nonce).unwrap();
        assert_eq!(consumed.nonce, quote.nonce);
        assert!(matches!(
            store.consume(&quote.nonce),
            Err(Nlx402Error::NonceAlreadyConsumed)
        ));
        assert!(matches!(
            store.consume(&Nonce::random()),
            Err(Nlx402Error::NonceExpired)
        ));
    }

    #[test]
    fn expired_nonce_fails_regardless_of_state() {
        let store = SqliteStore::open_in_memory().unwrap();
        let quote = pending_quote(-5);
        store.put(&quote).unwrap();
        assert!(matches!(
            store.consume(&quote.nonce),
            Err(Nlx402Error::NonceExpired)
        ));
        assert_eq!(
            store.get(&quote.nonce).unwrap().unwrap().state,
            QuoteState::Expired
        );
    }

    #[test]
    fn consume_token_classifies_failures() {
        let store = SqliteStore::open_in_memory().unwrap();
        let token = store
            .create_token("wallet", 2, &TokenPolicy::default())
            .unwrap();

        let outcome = store.consume_token(&token.token_id, 2).unwrap();
        assert_eq!(outcome.queries_used, 2);
        assert_eq!(outcome.remaining(), 0);
        assert!(matches!(
            store.consume_token(&token.token_id, 1),
            Err(Nlx402Error::QuotaExceeded)
        ));
        assert!(matches!(
            store.consume_token("nope", 1),
            Err(Nlx402Error::InvalidToken)
        ));

        let mut expired = AccessToken::issue("wallet", 10, &TokenPolicy::default());
        expired.expires_at = unix_now() - 1;
        store.insert_token(&expired).unwrap();
        assert!(matches!(
            store.consume_token(&expired.token_id, 1),
            Err(Nlx402Error::TokenExpired)
        ));
    }

    #[test]
    fn commit_unlock_is_all_or_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = pending_quote(300);
        let second = pending_quote(300);
        store.put(&first).unwrap();
        store.put(&second).unwrap();

        let token = AccessToken::issue("wallet", 1_000, &TokenPolicy::default());
        store
            .commit_unlock(&record_for(&first, "sig-a", &token), &token)
            .unwrap();
        assert_eq!(
            store.get_payment("sig-a").unwrap().unwrap().token_id,
            token.token_id
        );

        // Same signature against another nonce: rolled back, nonce stays pending.
        let other = AccessToken::issue("wallet", 1_000, &TokenPolicy::default());
        let err = store
            .commit_unlock(&record_for(&second, "sig-a", &other), &other)
            .unwrap_err();
        assert!(matches!(err, Nlx402Error::SignatureAlreadyUsed));
        assert_eq!(
            store.get(&second.nonce).unwrap().unwrap().state,
            QuoteState::Pending
        );
        assert!(store.get_token(&other.token_id).unwrap().is_none());
    }

    #[test]
    fn stats_count_live_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let quote = pending_quote(300);
        store.put(&quote).unwrap();
        store.put(&pending_quote(300)).unwrap();
        let token = AccessToken::issue("wallet", 10, &TokenPolicy::default());
        store
            .commit_unlock(&record_for(&quote, "sig", &token), &token)
            .unwrap();
        store.consume_token(&token.token_id, 3).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending_quotes, 1);
        assert_eq!(stats.consumed_quotes, 1);
        assert_eq!(stats.active_tokens, 1);
        assert_eq!(stats.total_queries_used, 3);
        assert_eq!(stats.payments_recorded, 1);
    }

    #[test]
    fn purge_removes_tokens_and_their_records() {
        let store = SqliteStore::open_in_memory().unwrap();
        let quote = pending_quote(300);
        store.put(&quote).unwrap();
        let mut token = AccessToken::issue("wallet", 10, &TokenPolicy::default());
        token.expires_at = unix_now() - 10_000;
        store
            .commit_unlock(&record_for(&quote, "sig", &token), &token)
            .unwrap();

        assert_eq!(store.purge_expired_tokens(3_600), 1);
        assert!(store.get_payment("sig").unwrap().is_none());
    }
}

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::{EndpointRecord, Registry, RegistryError};
use crate::ledger::{CallRecord, LedgerStore};

/// SQLite-backed registry and ledger.
///
/// Every query runs on tokio's blocking pool; the connection itself sits
/// behind a mutex like any single-connection SQLite handle.
#[derive(Clone)]
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
}

/// Row shape of the `api_calls` table, for inspection and reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCall {
    pub id: i64,
    pub endpoint_id: i64,
    pub caller_address: String,
    pub transaction_hash: Option<String>,
    pub amount_micro_units: i64,
    pub status_code: Option<i64>,
    pub latency_ms: Option<i64>,
}

impl SqliteRegistry {
    pub fn open(path: &str) -> Result<Self, RegistryError> {
        let conn = Connection::open(path)?;
        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        registry.init_schema()?;
        Ok(registry)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RegistryError> {
        self.conn.lock().map_err(|_| RegistryError::Poisoned)
    }

    fn init_schema(&self) -> Result<(), RegistryError> {
        let conn = self.lock()?;

        // WAL lets the management service write while we read
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                wallet_address TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS apis (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                slug TEXT NOT NULL,
                name TEXT NOT NULL,
                UNIQUE (user_id, slug)
            );

            CREATE TABLE IF NOT EXISTS endpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                api_id INTEGER NOT NULL REFERENCES apis(id),
                path TEXT NOT NULL,
                name TEXT NOT NULL,
                origin_url TEXT NOT NULL,
                price_micro INTEGER NOT NULL CHECK (price_micro >= 0),
                active INTEGER NOT NULL DEFAULT 1,
                monetized_url TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_endpoints_active_path
                ON endpoints(api_id, path) WHERE active = 1;

            CREATE TABLE IF NOT EXISTS api_calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                endpoint_id INTEGER NOT NULL REFERENCES endpoints(id),
                caller_address TEXT NOT NULL,
                transaction_hash TEXT,
                amount_micro INTEGER NOT NULL,
                status_code INTEGER,
                latency_ms INTEGER,
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_api_calls_tx
                ON api_calls(transaction_hash) WHERE transaction_hash IS NOT NULL;

            CREATE INDEX IF NOT EXISTS idx_api_calls_endpoint ON api_calls(endpoint_id);
            "#,
        )?;

        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&Connection) -> Result<T, RegistryError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| RegistryError::Poisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| RegistryError::Join(e.to_string()))?
    }

    // Write helpers below belong to the management service; the gateway
    // only calls them when seeding a local database.

    pub fn create_user(&self, username: &str, wallet_address: &str) -> Result<i64, RegistryError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (username, wallet_address) VALUES (?1, ?2)",
            params![username, wallet_address],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_api(&self, user_id: i64, slug: &str, name: &str) -> Result<i64, RegistryError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO apis (user_id, slug, name) VALUES (?1, ?2, ?3)",
            params![user_id, slug, name],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_endpoint(
        &self,
        api_id: i64,
        path: &str,
        name: &str,
        origin_url: &str,
        price_micro_units: i64,
    ) -> Result<i64, RegistryError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO endpoints (api_id, path, name, origin_url, price_micro, active)
            VALUES (?1, ?2, ?3, ?4, ?5, 1)
            "#,
            params![api_id, path, name, origin_url, price_micro_units],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Soft delete.
    pub fn deactivate_endpoint(&self, endpoint_id: i64) -> Result<bool, RegistryError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE endpoints SET active = 0 WHERE id = ?1 AND active = 1",
            params![endpoint_id],
        )?;
        Ok(rows > 0)
    }

    pub fn monetized_url(&self, endpoint_id: i64) -> Result<Option<String>, RegistryError> {
        let conn = self.lock()?;
        let url = conn
            .query_row(
                "SELECT monetized_url FROM endpoints WHERE id = ?1",
                params![endpoint_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(url)
    }

    /// Ledger rows for one endpoint, oldest first.
    pub fn calls_for_endpoint(&self, endpoint_id: i64) -> Result<Vec<StoredCall>, RegistryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, endpoint_id, caller_address, transaction_hash, amount_micro, status_code, latency_ms
            FROM api_calls
            WHERE endpoint_id = ?1
            ORDER BY id ASC
            "#,
        )?;
        let calls = stmt
            .query_map(params![endpoint_id], |row| {
                Ok(StoredCall {
                    id: row.get(0)?,
                    endpoint_id: row.get(1)?,
                    caller_address: row.get(2)?,
                    transaction_hash: row.get(3)?,
                    amount_micro_units: row.get(4)?,
                    status_code: row.get(5)?,
                    latency_ms: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(calls)
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn find_endpoint(
        &self,
        owner: &str,
        api_slug: &str,
        path: &str,
    ) -> Result<Option<EndpointRecord>, RegistryError> {
        let (owner, api_slug, path) = (owner.to_string(), api_slug.to_string(), path.to_string());
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    r#"
                    SELECT e.id, e.path, e.name, e.origin_url, e.price_micro, e.active, e.monetized_url,
                           a.slug, a.name, u.username, u.wallet_address
                    FROM endpoints e
                    JOIN apis a ON a.id = e.api_id
                    JOIN users u ON u.id = a.user_id
                    WHERE u.username = ?1 AND a.slug = ?2 AND e.path = ?3 AND e.active = 1
                    LIMIT 1
                    "#,
                    params![owner, api_slug, path],
                    |row| {
                        Ok(EndpointRecord {
                            id: row.get(0)?,
                            path: row.get(1)?,
                            name: row.get(2)?,
                            origin_url: row.get(3)?,
                            price_micro_units: row.get(4)?,
                            active: row.get::<_, i32>(5)? == 1,
                            monetized_url: row.get(6)?,
                            api_slug: row.get(7)?,
                            api_name: row.get(8)?,
                            owner_username: row.get(9)?,
                            owner_wallet: row.get(10)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn set_monetized_url(&self, endpoint_id: i64, url: &str) -> Result<(), RegistryError> {
        let url = url.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                UPDATE endpoints SET monetized_url = ?2
                WHERE id = ?1 AND (monetized_url IS NULL OR monetized_url = '' OR monetized_url = ?2)
                "#,
                params![endpoint_id, url],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl LedgerStore for SqliteRegistry {
    async fn insert_call(&self, record: &CallRecord) -> Result<(), RegistryError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let now = chrono::Utc::now().timestamp();
            conn.execute(
                r#"
                INSERT INTO api_calls (endpoint_id, caller_address, transaction_hash, amount_micro,
                                       status_code, latency_ms, created_at)
                VALUES (?1, ?2, ?3, ?4, NULL, NULL, ?5)
                "#,
                params![
                    record.endpoint_id,
                    record.caller_address,
                    record.transaction,
                    record.amount_micro_units as i64,
                    now
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn claim_transaction(&self, record: &CallRecord) -> Result<bool, RegistryError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let now = chrono::Utc::now().timestamp();
            // The unique index on transaction_hash turns a replay into a no-op
            let rows = conn.execute(
                r#"
                INSERT OR IGNORE INTO api_calls (endpoint_id, caller_address, transaction_hash,
                                                 amount_micro, status_code, latency_ms, created_at)
                VALUES (?1, ?2, ?3, ?4, NULL, NULL, ?5)
                "#,
                params![
                    record.endpoint_id,
                    record.caller_address,
                    record.transaction,
                    record.amount_micro_units as i64,
                    now
                ],
            )?;
            Ok(rows == 1)
        })
        .await
    }

    async fn complete_call(
        &self,
        transaction: &str,
        status_code: u16,
        latency_ms: u64,
    ) -> Result<bool, RegistryError> {
        let transaction = transaction.to_string();
        self.with_conn(move |conn| {
            let now = chrono::Utc::now().timestamp();
            // status_code IS NULL keeps this to a single completion per call
            let rows = conn.execute(
                r#"
                UPDATE api_calls SET status_code = ?2, latency_ms = ?3, completed_at = ?4
                WHERE transaction_hash = ?1 AND status_code IS NULL
                "#,
                params![
                    transaction,
                    status_code as i64,
                    latency_ms.min(i64::MAX as u64) as i64,
                    now
                ],
            )?;
            Ok(rows > 0)
        })
        .await
    }
}

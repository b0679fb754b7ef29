//! `SQLite`-backed key store.
//!
//! One connection behind a mutex. Scalar state (current signed prekey id,
//! id allocators, lockout counters) lives in the `prekey_state` key/value
//! table so each counter update is a single statement.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use ember_crypto::{IdentityKeyPair, OneTimePreKeyRecord, SignedPreKeyRecord};

use crate::error::PreKeyError;
use crate::store::{IdentityKeyStore, LockoutStore, PreKeyStore, SignedPreKeyStore};

/// Bump when `SCHEMA` changes. Key material is never dropped on upgrade.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS identity_key (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    secret BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS one_time_prekeys (
    id INTEGER PRIMARY KEY,
    secret BLOB NOT NULL,
    public BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS signed_prekeys (
    id INTEGER PRIMARY KEY,
    secret BLOB NOT NULL,
    public BLOB NOT NULL,
    signature BLOB NOT NULL,
    generated_at INTEGER NOT NULL,
    accepted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS prekey_state (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
";

const CURRENT_SIGNED_PREKEY_ID: &str = "current_signed_prekey_id";
const NEXT_PREKEY_ID: &str = "next_prekey_id";
const NEXT_SIGNED_PREKEY_ID: &str = "next_signed_prekey_id";
const FAILURE_COUNT: &str = "failure_count";
const FIRST_FAILURE_AT: &str = "first_failure_at";

pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, PreKeyError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    /// A private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, PreKeyError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, PreKeyError> {
        let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current > SCHEMA_VERSION {
            return Err(PreKeyError::Storage(format!(
                "database schema version {current} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        if current != SCHEMA_VERSION {
            tracing::info!(old = current, new = SCHEMA_VERSION, "initializing prekey schema");
            conn.execute_batch(SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn get_state(&self, key: &str) -> Result<Option<i64>, PreKeyError> {
        Ok(self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM prekey_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_state(&self, key: &str, value: i64) -> Result<(), PreKeyError> {
        self.conn.lock().execute(
            "INSERT INTO prekey_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn clear_state(&self, key: &str) -> Result<(), PreKeyError> {
        self.conn
            .lock()
            .execute("DELETE FROM prekey_state WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn get_id(&self, key: &str) -> Result<Option<u32>, PreKeyError> {
        self.get_state(key)?
            .map(|v| {
                u32::try_from(v)
                    .map_err(|_| PreKeyError::Storage(format!("{key} out of range: {v}")))
            })
            .transpose()
    }
}

fn key_bytes(blob: &[u8], what: &str) -> Result<[u8; 32], PreKeyError> {
    <[u8; 32]>::try_from(blob)
        .map_err(|_| PreKeyError::Storage(format!("stored {what} has wrong length")))
}

fn to_sql_timestamp(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn from_sql_timestamp(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

type SignedRow = (u32, Vec<u8>, Vec<u8>, Vec<u8>, i64, bool);

fn signed_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignedRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn signed_record(row: SignedRow) -> Result<SignedPreKeyRecord, PreKeyError> {
    let (id, secret, public, signature, generated_at, accepted) = row;
    Ok(SignedPreKeyRecord::from_parts(
        id,
        key_bytes(&secret, "signed prekey secret")?,
        key_bytes(&public, "signed prekey public")?,
        signature,
        from_sql_timestamp(generated_at),
        accepted,
    ))
}

const SIGNED_COLUMNS: &str = "id, secret, public, signature, generated_at, accepted";

impl IdentityKeyStore for SqliteKeyStore {
    fn load_identity_key_pair(&self) -> Result<Option<IdentityKeyPair>, PreKeyError> {
        let secret: Option<Vec<u8>> = self
            .conn
            .lock()
            .query_row("SELECT secret FROM identity_key WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        secret
            .map(|s| IdentityKeyPair::from_secret_slice(&s).map_err(PreKeyError::from))
            .transpose()
    }

    fn store_identity_key_pair(&self, identity: &IdentityKeyPair) -> Result<(), PreKeyError> {
        self.conn.lock().execute(
            "INSERT INTO identity_key (id, secret) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET secret = excluded.secret",
            params![identity.secret_key_bytes().as_slice()],
        )?;
        Ok(())
    }
}

impl PreKeyStore for SqliteKeyStore {
    fn store_one_time_prekeys(&self, records: &[OneTimePreKeyRecord]) -> Result<(), PreKeyError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO one_time_prekeys (id, secret, public) VALUES (?1, ?2, ?3)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.id(),
                    record.secret_key().as_slice(),
                    record.public_key().as_slice()
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_one_time_prekey(&self, id: u32) -> Result<Option<OneTimePreKeyRecord>, PreKeyError> {
        let row: Option<(Vec<u8>, Vec<u8>)> = self
            .conn
            .lock()
            .query_row(
                "SELECT secret, public FROM one_time_prekeys WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(secret, public)| {
            Ok(OneTimePreKeyRecord::from_parts(
                id,
                key_bytes(&secret, "prekey secret")?,
                key_bytes(&public, "prekey public")?,
            ))
        })
        .transpose()
    }

    fn remove_one_time_prekey(&self, id: u32) -> Result<(), PreKeyError> {
        self.conn
            .lock()
            .execute("DELETE FROM one_time_prekeys WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn count_one_time_prekeys(&self) -> Result<usize, PreKeyError> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM one_time_prekeys", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn next_prekey_id(&self) -> Result<Option<u32>, PreKeyError> {
        self.get_id(NEXT_PREKEY_ID)
    }

    fn set_next_prekey_id(&self, id: u32) -> Result<(), PreKeyError> {
        self.set_state(NEXT_PREKEY_ID, i64::from(id))
    }
}

impl SignedPreKeyStore for SqliteKeyStore {
    fn load_signed_prekey(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, PreKeyError> {
        let row = self
            .conn
            .lock()
            .query_row(
                &format!("SELECT {SIGNED_COLUMNS} FROM signed_prekeys WHERE id = ?1"),
                params![id],
                signed_row,
            )
            .optional()?;
        row.map(signed_record).transpose()
    }

    fn load_all_signed_prekeys(&self) -> Result<Vec<SignedPreKeyRecord>, PreKeyError> {
        let rows: Vec<SignedRow> = {
            let conn = self.conn.lock();
            let mut stmt =
                conn.prepare(&format!("SELECT {SIGNED_COLUMNS} FROM signed_prekeys ORDER BY id"))?;
            let rows = stmt
                .query_map([], signed_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(signed_record).collect()
    }

    fn store_signed_prekey(&self, record: &SignedPreKeyRecord) -> Result<(), PreKeyError> {
        self.conn.lock().execute(
            &format!(
                "INSERT OR REPLACE INTO signed_prekeys ({SIGNED_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![
                record.id(),
                record.secret_key().as_slice(),
                record.public_key().as_slice(),
                record.signature(),
                to_sql_timestamp(record.generated_at()),
                record.was_accepted(),
            ],
        )?;
        Ok(())
    }

    fn remove_signed_prekey(&self, id: u32) -> Result<(), PreKeyError> {
        self.conn
            .lock()
            .execute("DELETE FROM signed_prekeys WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn current_signed_prekey_id(&self) -> Result<Option<u32>, PreKeyError> {
        self.get_id(CURRENT_SIGNED_PREKEY_ID)
    }

    fn set_current_signed_prekey_id(&self, id: u32) -> Result<(), PreKeyError> {
        self.set_state(CURRENT_SIGNED_PREKEY_ID, i64::from(id))
    }

    fn next_signed_prekey_id(&self) -> Result<Option<u32>, PreKeyError> {
        self.get_id(NEXT_SIGNED_PREKEY_ID)
    }

    fn set_next_signed_prekey_id(&self, id: u32) -> Result<(), PreKeyError> {
        self.set_state(NEXT_SIGNED_PREKEY_ID, i64::from(id))
    }
}

impl LockoutStore for SqliteKeyStore {
    fn failure_count(&self) -> Result<u32, PreKeyError> {
        Ok(self
            .get_state(FAILURE_COUNT)?
            .map_or(0, |v| u32::try_from(v).unwrap_or(u32::MAX)))
    }

    fn increment_failure_count(&self) -> Result<u32, PreKeyError> {
        let value: i64 = self.conn.lock().query_row(
            "INSERT INTO prekey_state (key, value) VALUES (?1, 1)
             ON CONFLICT(key) DO UPDATE SET value = value + 1
             RETURNING value",
            params![FAILURE_COUNT],
            |row| row.get(0),
        )?;
        Ok(u32::try_from(value).unwrap_or(u32::MAX))
    }

    fn clear_failure_count(&self) -> Result<(), PreKeyError> {
        self.clear_state(FAILURE_COUNT)
    }

    fn first_failure_at(&self) -> Result<Option<u64>, PreKeyError> {
        Ok(self.get_state(FIRST_FAILURE_AT)?.map(from_sql_timestamp))
    }

    fn set_first_failure_at(&self, at_ms: u64) -> Result<(), PreKeyError> {
        self.set_state(FIRST_FAILURE_AT, to_sql_timestamp(at_ms))
    }

    fn clear_first_failure_at(&self) -> Result<(), PreKeyError> {
        self.clear_state(FIRST_FAILURE_AT)
    }
}

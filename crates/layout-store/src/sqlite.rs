//! SQLite layout store.
//!
//! Transactions open with `BEGIN IMMEDIATE`, which takes the database write
//! lock up front: every read inside a transaction is a locked read and
//! competing writers (other connections or processes) wait up to the busy
//! timeout, then fail with `Busy`.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use layout_core::{
    AccessorySignature, ArrayRef, ArraySeq, BatchId, Category, IdentifierRecord, Item, ItemId,
    PublicIdentifier, RowId, Serial, SerialRecord, SerialStatus, SlotPosition, Uuid, WorkStatus,
};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use tracing::{debug, trace, warn};

use crate::error::StoreError;
use crate::store::{LayoutStore, LayoutTx, check_serial_edge};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS counters (
    category TEXT PRIMARY KEY,
    current  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS identifiers (
    formatted  TEXT NOT NULL UNIQUE,
    category   TEXT NOT NULL,
    sequence   INTEGER NOT NULL,
    digits     INTEGER NOT NULL,
    batch_id   TEXT NOT NULL,
    array_seq  INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (category, sequence),
    UNIQUE (batch_id, array_seq)
);

CREATE TABLE IF NOT EXISTS serials (
    value       INTEGER PRIMARY KEY,
    status      TEXT NOT NULL CHECK (status IN ('reserved', 'engraved', 'voided')),
    batch_id    TEXT NOT NULL,
    array_seq   INTEGER NOT NULL,
    reserved_at TEXT NOT NULL,
    engraved_at TEXT,
    voided_at   TEXT
);
CREATE INDEX IF NOT EXISTS serials_array ON serials (batch_id, array_seq);

CREATE TABLE IF NOT EXISTS items (
    item_id     TEXT PRIMARY KEY,
    batch_id    TEXT NOT NULL,
    category    TEXT NOT NULL,
    subtype     TEXT,
    order_ref   TEXT NOT NULL,
    accessories TEXT NOT NULL,
    row_id      TEXT NOT NULL,
    array_seq   INTEGER NOT NULL,
    slot        INTEGER NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('pending', 'in_progress', 'done')),
    UNIQUE (batch_id, array_seq, slot)
);
CREATE INDEX IF NOT EXISTS items_row ON items (row_id);
";

const ITEM_COLUMNS: &str = "item_id, batch_id, category, subtype, order_ref, accessories, \
                            row_id, array_seq, slot, status";

const SERIAL_COLUMNS: &str =
    "value, status, batch_id, array_seq, reserved_at, engraved_at, voided_at";

/// Configuration for the SQLite store.
#[derive(Debug, Clone)]
pub struct SqliteLayoutStoreConfig {
    /// How long a writer waits on a locked database before `Busy`.
    pub busy_timeout: Duration,
}

impl Default for SqliteLayoutStoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite-backed [`LayoutStore`].
///
/// One connection per store value. Open one store per thread or process to
/// get concurrent writers; they serialize on the database lock.
pub struct SqliteLayoutStore {
    conn: Mutex<Connection>,
}

impl SqliteLayoutStore {
    /// Open (and migrate) a database file.
    ///
    /// # Errors
    /// Returns a backend error if the file cannot be opened or migrated.
    pub fn open(
        path: impl AsRef<Path>,
        config: &SqliteLayoutStoreConfig,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening sqlite layout store");
        Self::init(Connection::open(path)?, config)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns a backend error if migration fails.
    pub fn open_in_memory(config: &SqliteLayoutStoreConfig) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, config)
    }

    fn init(conn: Connection, config: &SqliteLayoutStoreConfig) -> Result<Self, StoreError> {
        conn.busy_timeout(config.busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        trace!(journal_mode = %mode, "sqlite journal mode");
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl LayoutStore for SqliteLayoutStore {
    fn begin(&self) -> Result<Box<dyn LayoutTx + '_>, StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTx {
            conn,
            finished: false,
        }))
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl SqliteTx<'_> {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            Err(StoreError::Finished)
        } else {
            Ok(())
        }
    }

    fn query_items(&self, sql: &str, params: impl Params) -> Result<Vec<Item>, StoreError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let raws = stmt
            .query_map(params, RawItem::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawItem::into_item).collect()
    }

    fn query_serials(
        &self,
        sql: &str,
        params: impl Params,
    ) -> Result<Vec<SerialRecord>, StoreError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let raws = stmt
            .query_map(params, RawSerial::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawSerial::into_record).collect()
    }
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.conn.is_autocommit() {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "rollback of abandoned sqlite transaction failed");
            }
        }
    }
}

impl LayoutTx for SqliteTx<'_> {
    fn counter_add(&mut self, key: &str, delta: u64) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let value: i64 = self.conn.query_row(
            "INSERT INTO counters (category, current) VALUES (?1, ?2) \
             ON CONFLICT (category) DO UPDATE SET current = current + excluded.current \
             RETURNING current",
            params![key, to_sql_int(delta)?],
            |row| row.get(0),
        )?;
        from_sql_int(value, "counters.current")
    }

    fn counter_raise(&mut self, key: &str, floor: u64) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let value: i64 = self.conn.query_row(
            "INSERT INTO counters (category, current) VALUES (?1, ?2) \
             ON CONFLICT (category) DO UPDATE SET current = MAX(current, excluded.current) \
             RETURNING current",
            params![key, to_sql_int(floor)?],
            |row| row.get(0),
        )?;
        from_sql_int(value, "counters.current")
    }

    fn counter_set(&mut self, key: &str, value: u64) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.conn.execute(
            "INSERT INTO counters (category, current) VALUES (?1, ?2) \
             ON CONFLICT (category) DO UPDATE SET current = excluded.current",
            params![key, to_sql_int(value)?],
        )?;
        Ok(())
    }

    fn counter_get(&mut self, key: &str) -> Result<Option<u64>, StoreError> {
        self.ensure_open()?;
        let value: Option<i64> = self
            .conn
            .query_row(
                "SELECT current FROM counters WHERE category = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|v| from_sql_int(v, "counters.current"))
            .transpose()
    }

    fn identifier_for(
        &mut self,
        array: &ArrayRef,
    ) -> Result<Option<IdentifierRecord>, StoreError> {
        self.ensure_open()?;
        let raw = self
            .conn
            .query_row(
                "SELECT category, sequence, digits, created_at FROM identifiers \
                 WHERE batch_id = ?1 AND array_seq = ?2",
                params![array.batch.as_str(), i64::from(array.seq.get())],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, DateTime<Utc>>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((category, sequence, digits, created_at)) = raw else {
            return Ok(None);
        };
        let identifier = PublicIdentifier::new(
            parse_field::<Category>(&category, "identifiers.category")?,
            narrow(sequence, "identifiers.sequence")?,
            narrow(digits, "identifiers.digits")?,
        )
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Some(IdentifierRecord {
            identifier,
            array: array.clone(),
            created_at,
        }))
    }

    fn insert_identifier(&mut self, record: &IdentifierRecord) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.conn.execute(
            "INSERT INTO identifiers \
             (formatted, category, sequence, digits, batch_id, array_seq, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.identifier.to_string(),
                record.identifier.category.as_str(),
                i64::from(record.identifier.sequence),
                i64::from(record.identifier.digits),
                record.array.batch.as_str(),
                i64::from(record.array.seq.get()),
                record.created_at,
            ],
        )?;
        Ok(())
    }

    fn max_serial(&mut self) -> Result<Option<Serial>, StoreError> {
        self.ensure_open()?;
        let value: Option<i64> =
            self.conn
                .query_row("SELECT MAX(value) FROM serials", [], |row| row.get(0))?;
        value.map(to_serial).transpose()
    }

    fn insert_serial(&mut self, record: &SerialRecord) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.conn.execute(
            "INSERT INTO serials \
             (value, status, batch_id, array_seq, reserved_at, engraved_at, voided_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                i64::from(record.serial.get()),
                record.status.as_str(),
                record.array.batch.as_str(),
                i64::from(record.array.seq.get()),
                record.reserved_at,
                record.engraved_at,
                record.voided_at,
            ],
        )?;
        Ok(())
    }

    fn serial(&mut self, serial: Serial) -> Result<Option<SerialRecord>, StoreError> {
        self.ensure_open()?;
        let sql = format!("SELECT {SERIAL_COLUMNS} FROM serials WHERE value = ?1");
        Ok(self
            .query_serials(&sql, params![i64::from(serial.get())])?
            .pop())
    }

    fn serials_for_array(&mut self, array: &ArrayRef) -> Result<Vec<SerialRecord>, StoreError> {
        self.ensure_open()?;
        let sql = format!(
            "SELECT {SERIAL_COLUMNS} FROM serials \
             WHERE batch_id = ?1 AND array_seq = ?2 ORDER BY value"
        );
        self.query_serials(
            &sql,
            params![array.batch.as_str(), i64::from(array.seq.get())],
        )
    }

    fn transition_serial(
        &mut self,
        serial: Serial,
        from: SerialStatus,
        to: SerialStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.ensure_open()?;
        check_serial_edge(serial, from, to)?;
        let changed = self.conn.execute(
            "UPDATE serials SET status = ?3, \
             engraved_at = CASE WHEN ?3 = 'engraved' THEN ?4 ELSE engraved_at END, \
             voided_at = CASE WHEN ?3 = 'voided' THEN ?4 ELSE voided_at END \
             WHERE value = ?1 AND status = ?2",
            params![i64::from(serial.get()), from.as_str(), to.as_str(), at],
        )?;
        Ok(changed == 1)
    }

    fn insert_item(&mut self, item: &Item) -> Result<(), StoreError> {
        self.ensure_open()?;
        let accessories = serde_json::to_string(&item.accessories)
            .map_err(|e| StoreError::Backend(format!("encode accessories: {e}")))?;
        self.conn.execute(
            &format!(
                "INSERT INTO items ({ITEM_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                item.id.as_uuid().to_string(),
                item.batch.as_str(),
                item.category.as_str(),
                item.subtype,
                item.order_ref,
                accessories,
                item.row.as_uuid().to_string(),
                i64::from(item.array_seq.get()),
                i64::from(item.slot.get()),
                item.status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn lock_row(&mut self, row: RowId) -> Result<Vec<Item>, StoreError> {
        self.ensure_open()?;
        let sql =
            format!("SELECT {ITEM_COLUMNS} FROM items WHERE row_id = ?1 ORDER BY array_seq, slot");
        self.query_items(&sql, params![row.as_uuid().to_string()])
    }

    fn items_for_array(&mut self, array: &ArrayRef) -> Result<Vec<Item>, StoreError> {
        self.ensure_open()?;
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE batch_id = ?1 AND array_seq = ?2 ORDER BY slot"
        );
        self.query_items(
            &sql,
            params![array.batch.as_str(), i64::from(array.seq.get())],
        )
    }

    fn items_for_batch(&mut self, batch: &BatchId) -> Result<Vec<Item>, StoreError> {
        self.ensure_open()?;
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE batch_id = ?1 ORDER BY array_seq, slot"
        );
        self.query_items(&sql, params![batch.as_str()])
    }

    fn max_array_seq(&mut self, batch: &BatchId) -> Result<Option<ArraySeq>, StoreError> {
        self.ensure_open()?;
        let value: Option<i64> = self.conn.query_row(
            "SELECT MAX(array_seq) FROM items WHERE batch_id = ?1",
            params![batch.as_str()],
            |row| row.get(0),
        )?;
        value
            .map(|v| narrow(v, "items.array_seq").map(ArraySeq::new))
            .transpose()
    }

    fn move_item(
        &mut self,
        item: ItemId,
        array_seq: ArraySeq,
        slot: SlotPosition,
    ) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let changed = self.conn.execute(
            "UPDATE items SET array_seq = ?2, slot = ?3 WHERE item_id = ?1",
            params![
                item.as_uuid().to_string(),
                i64::from(array_seq.get()),
                i64::from(slot.get()),
            ],
        )?;
        Ok(changed == 1)
    }

    fn set_item_status(&mut self, item: ItemId, status: WorkStatus) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let changed = self.conn.execute(
            "UPDATE items SET status = ?2 WHERE item_id = ?1",
            params![item.as_uuid().to_string(), status.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn delete_batch_items(&mut self, batch: &BatchId) -> Result<usize, StoreError> {
        self.ensure_open()?;
        Ok(self
            .conn
            .execute("DELETE FROM items WHERE batch_id = ?1", params![batch.as_str()])?)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        // A failed COMMIT may already have rolled back on its own.
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        self.finished = true;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

struct RawItem {
    id: String,
    batch: String,
    category: String,
    subtype: Option<String>,
    order_ref: String,
    accessories: String,
    row: String,
    array_seq: i64,
    slot: i64,
    status: String,
}

impl RawItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            batch: row.get(1)?,
            category: row.get(2)?,
            subtype: row.get(3)?,
            order_ref: row.get(4)?,
            accessories: row.get(5)?,
            row: row.get(6)?,
            array_seq: row.get(7)?,
            slot: row.get(8)?,
            status: row.get(9)?,
        })
    }

    fn into_item(self) -> Result<Item, StoreError> {
        let accessories: AccessorySignature = serde_json::from_str(&self.accessories)
            .map_err(|e| StoreError::Corrupt(format!("items.accessories: {e}")))?;
        Ok(Item {
            id: ItemId::from_uuid(parse_uuid(&self.id, "items.item_id")?),
            batch: parse_field(&self.batch, "items.batch_id")?,
            category: parse_field(&self.category, "items.category")?,
            subtype: self.subtype,
            order_ref: self.order_ref,
            accessories,
            row: RowId::from_uuid(parse_uuid(&self.row, "items.row_id")?),
            array_seq: ArraySeq::new(narrow(self.array_seq, "items.array_seq")?),
            slot: SlotPosition::new(narrow(self.slot, "items.slot")?)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            status: parse_field(&self.status, "items.status")?,
        })
    }
}

struct RawSerial {
    value: i64,
    status: String,
    batch: String,
    array_seq: i64,
    reserved_at: DateTime<Utc>,
    engraved_at: Option<DateTime<Utc>>,
    voided_at: Option<DateTime<Utc>>,
}

impl RawSerial {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            value: row.get(0)?,
            status: row.get(1)?,
            batch: row.get(2)?,
            array_seq: row.get(3)?,
            reserved_at: row.get(4)?,
            engraved_at: row.get(5)?,
            voided_at: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<SerialRecord, StoreError> {
        Ok(SerialRecord {
            serial: to_serial(self.value)?,
            status: parse_field(&self.status, "serials.status")?,
            array: ArrayRef::new(
                parse_field(&self.batch, "serials.batch_id")?,
                ArraySeq::new(narrow(self.array_seq, "serials.array_seq")?),
            ),
            reserved_at: self.reserved_at,
            engraved_at: self.engraved_at,
            voided_at: self.voided_at,
        })
    }
}

fn parse_field<T>(value: &str, column: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn parse_uuid(value: &str, column: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn narrow<T: TryFrom<i64>>(value: i64, column: &str) -> Result<T, StoreError> {
    T::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column}: {value} out of range")))
}

fn to_serial(value: i64) -> Result<Serial, StoreError> {
    Serial::new(narrow(value, "serials.value")?).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn to_sql_int(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend(format!("{value} exceeds i64")))
}

fn from_sql_int(value: i64, column: &str) -> Result<u64, StoreError> {
    narrow(value, column)
}

//! storewatch-store — the shop's SQLite database.
//!
//! Holds registered customers with their face fingerprints, their visits
//! (entry/exit timestamps), purchases made on exit and the inventory those
//! purchases draw from. Timestamps are UTC text in SQLite's
//! `datetime('now')` layout.

pub mod customers;
pub mod inventory;
pub mod records;

pub use customers::{CheckOut, CustomerEdit, CustomerSummary, Purchase, Registration, Visit, VisitStatus};
pub use inventory::{NewProduct, Product, ProductUpdate, SAMPLE_JEWELS};
pub use records::{format_duration, PastRecord, PurchaseLine};

use chrono::{NaiveDateTime, Timelike, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use std::path::Path;
use thiserror::Error;

/// Text layout of every stored timestamp.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS customers (
    customer_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL UNIQUE,
    face_encoding BLOB,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS visits (
    visit_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id  INTEGER NOT NULL REFERENCES customers(customer_id) ON DELETE CASCADE,
    visit_number INTEGER NOT NULL,
    entry_time   TEXT NOT NULL,
    exit_time    TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_visits_one_open
    ON visits(customer_id) WHERE exit_time IS NULL;
CREATE INDEX IF NOT EXISTS idx_visits_customer
    ON visits(customer_id, entry_time);

CREATE TABLE IF NOT EXISTS purchases (
    purchase_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    visit_id      INTEGER NOT NULL REFERENCES visits(visit_id) ON DELETE CASCADE,
    customer_id   INTEGER NOT NULL REFERENCES customers(customer_id) ON DELETE CASCADE,
    product_id    TEXT NOT NULL,
    product_name  TEXT NOT NULL,
    product_price REAL NOT NULL,
    product_image BLOB,
    purchase_time TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_purchases_visit ON purchases(visit_id);

CREATE TABLE IF NOT EXISTS inventory (
    product_id    TEXT PRIMARY KEY,
    product_name  TEXT NOT NULL,
    product_image BLOB,
    price         REAL NOT NULL,
    quantity      INTEGER NOT NULL CHECK (quantity >= 0)
);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    CreateDir(std::io::Error),
    #[error("customer name must not be empty")]
    EmptyName,
    #[error("customer {0} not found")]
    CustomerNotFound(i64),
    #[error("a customer named {0:?} already exists")]
    NameTaken(String),
    #[error("{name} is already checked in")]
    AlreadyCheckedIn { customer_id: i64, name: String },
    #[error("{name} is not checked in")]
    NotCheckedIn { customer_id: i64, name: String },
    #[error("customer {0} has no visits to edit")]
    NoVisits(i64),
    #[error("product {0} not found")]
    ProductNotFound(String),
    #[error("product {0} is out of stock")]
    OutOfStock(String),
    #[error("product {0} already exists")]
    DuplicateProduct(String),
    #[error("invalid product: {0}")]
    InvalidProduct(String),
    #[error("purchase {0} not found")]
    PurchaseNotFound(i64),
    #[error("invalid timestamp {0:?}: expected YYYY-MM-DD HH:MM:SS")]
    InvalidTime(String),
    #[error("invalid edit: {0}")]
    InvalidEdit(String),
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send>;

/// Handle to the shop database.
///
/// Not `Sync`; callers that share it across threads wrap it in a mutex.
pub struct Store {
    conn: Connection,
    clock: Clock,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        tracing::debug!(path = %path.display(), "opened store");
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            clock: Box::new(|| Utc::now().naive_utc()),
        })
    }

    /// Replace the wall clock used for entry, exit and purchase times.
    pub fn set_clock(&mut self, clock: impl Fn() -> NaiveDateTime + Send + 'static) {
        self.clock = Box::new(clock);
    }

    /// Current time truncated to whole seconds.
    fn now(&self) -> NaiveDateTime {
        let t = (self.clock)();
        t.with_nanosecond(0).unwrap_or(t)
    }
}

pub fn format_time(t: &NaiveDateTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

pub fn parse_time(s: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(s.trim(), TIME_FORMAT)
        .map_err(|_| StoreError::InvalidTime(s.to_string()))
}

fn time_col(row: &Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, TIME_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_time_col(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        NaiveDateTime::parse_from_str(&s, TIME_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

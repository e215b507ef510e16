//! Visit history with purchases.

use crate::{opt_time_col, time_col, Store, StoreError};
use chrono::{Duration, NaiveDateTime};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

/// One row of a customer's history: a visit and the purchase made on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PastRecord {
    pub visit_id: i64,
    pub visit_number: i64,
    pub entry_time: NaiveDateTime,
    pub exit_time: Option<NaiveDateTime>,
    /// `None` while the visit is still in progress.
    #[serde(skip)]
    pub duration: Option<Duration>,
    pub purchase: Option<PurchaseLine>,
}

impl PastRecord {
    /// Human-readable duration, or "In Progress" for an open visit.
    pub fn duration_label(&self) -> String {
        match self.duration {
            Some(d) => format_duration(d),
            None => "In Progress".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseLine {
    pub purchase_id: i64,
    pub product_id: String,
    pub product_name: String,
    pub product_price: f64,
    pub has_image: bool,
}

/// Format a visit length: whole minutes under an hour, otherwise
/// `H:MM:SS` prefixed with a day count for spans of a day or more.
pub fn format_duration(d: Duration) -> String {
    let total = d.num_seconds();
    if total < 3600 {
        return format!("{} minutes", total / 60);
    }

    let days = total / 86_400;
    let rest = total % 86_400;
    let clock = format!("{}:{:02}:{:02}", rest / 3600, (rest % 3600) / 60, rest % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

impl Store {
    /// Every visit of a customer with its purchase, newest entry first.
    pub fn past_records(&self, customer_id: i64) -> Result<Vec<PastRecord>, StoreError> {
        self.customer_name(customer_id)?;

        let mut stmt = self.conn.prepare(
            "SELECT v.visit_id, v.visit_number, v.entry_time, v.exit_time,
                    p.purchase_id, p.product_id, p.product_name, p.product_price,
                    p.product_image IS NOT NULL
             FROM visits v
             LEFT JOIN purchases p ON p.visit_id = v.visit_id
             WHERE v.customer_id = ?1
             ORDER BY v.entry_time DESC, v.visit_id DESC, p.purchase_id",
        )?;

        let rows = stmt.query_map(params![customer_id], |row| {
            let entry_time = time_col(row, 2)?;
            let exit_time = opt_time_col(row, 3)?;
            let purchase_id: Option<i64> = row.get(4)?;
            let purchase = match purchase_id {
                Some(purchase_id) => Some(PurchaseLine {
                    purchase_id,
                    product_id: row.get(5)?,
                    product_name: row.get(6)?,
                    product_price: row.get(7)?,
                    has_image: row.get(8)?,
                }),
                None => None,
            };
            Ok(PastRecord {
                visit_id: row.get(0)?,
                visit_number: row.get(1)?,
                entry_time,
                exit_time,
                duration: exit_time.map(|exit| exit - entry_time),
                purchase,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Image snapshot stored with a purchase.
    pub fn purchase_image(&self, purchase_id: i64) -> Result<Option<Vec<u8>>, StoreError> {
        self.conn
            .query_row(
                "SELECT product_image FROM purchases WHERE purchase_id = ?1",
                params![purchase_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::PurchaseNotFound(purchase_id))
    }
}

//! Customers, visits and check-out purchases.

use crate::{format_time, opt_time_col, time_col, Store, StoreError};
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use storewatch_core::{Fingerprint, GalleryEntry};

/// One stay in the shop, from entry to exit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Visit {
    pub visit_id: i64,
    pub customer_id: i64,
    pub visit_number: i64,
    pub entry_time: NaiveDateTime,
    pub exit_time: Option<NaiveDateTime>,
}

impl Visit {
    pub fn is_open(&self) -> bool {
        self.exit_time.is_none()
    }

    fn from_row(row: &Row, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            visit_id: row.get(offset)?,
            customer_id: row.get(offset + 1)?,
            visit_number: row.get(offset + 2)?,
            entry_time: time_col(row, offset + 3)?,
            exit_time: opt_time_col(row, offset + 4)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    InStore,
    Left,
}

impl std::fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VisitStatus::InStore => f.write_str("In Store"),
            VisitStatus::Left => f.write_str("Left"),
        }
    }
}

/// A customer with their most recent visit, as shown in the customer list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerSummary {
    pub customer_id: i64,
    pub name: String,
    pub latest_visit: Option<Visit>,
    pub status: VisitStatus,
    pub total_visits: i64,
}

/// Outcome of registering a face under a name.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// First time this name is seen: customer created with visit #1.
    New { customer_id: i64, visit: Visit },
    /// Known name whose last visit had ended: fingerprint refreshed, new visit opened.
    Returning { customer_id: i64, visit: Visit },
    /// Known name that is still inside; nothing was written.
    AlreadyInStore { customer_id: i64 },
}

/// A purchase recorded at check-out, with the product snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Purchase {
    pub purchase_id: i64,
    pub visit_id: i64,
    pub customer_id: i64,
    pub product_id: String,
    pub product_name: String,
    pub product_price: f64,
    pub purchase_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOut {
    pub visit: Visit,
    pub purchase: Option<Purchase>,
}

/// Changes to a customer and their latest visit. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerEdit {
    pub name: Option<String>,
    pub entry_time: Option<NaiveDateTime>,
    /// `Some(None)` reopens the latest visit.
    pub exit_time: Option<Option<NaiveDateTime>>,
    pub visit_number: Option<i64>,
}

const VISIT_COLUMNS: &str = "visit_id, customer_id, visit_number, entry_time, exit_time";

impl Store {
    /// Register a face under `name`, opening a visit unless one is already open.
    pub fn register(&self, name: &str, fingerprint: &Fingerprint) -> Result<Registration, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }

        let now = self.now();
        let tx = self.conn.unchecked_transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT customer_id FROM customers WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        let registration = match existing {
            Some(customer_id) => {
                if self.open_visit(customer_id)?.is_some() {
                    tracing::info!(customer_id, %name, "already in store; registration skipped");
                    return Ok(Registration::AlreadyInStore { customer_id });
                }
                tx.execute(
                    "UPDATE customers SET face_encoding = ?1 WHERE customer_id = ?2",
                    params![fingerprint.to_bytes(), customer_id],
                )?;
                let visit = self.insert_visit(customer_id, now)?;
                Registration::Returning { customer_id, visit }
            }
            None => {
                tx.execute(
                    "INSERT INTO customers (name, face_encoding, created_at) VALUES (?1, ?2, ?3)",
                    params![name, fingerprint.to_bytes(), format_time(&now)],
                )?;
                let customer_id = tx.last_insert_rowid();
                let visit = self.insert_visit(customer_id, now)?;
                Registration::New { customer_id, visit }
            }
        };

        tx.commit()?;
        tracing::info!(%name, outcome = ?registration, "registered customer");
        Ok(registration)
    }

    /// Open a new visit for a known customer.
    pub fn check_in(&self, customer_id: i64) -> Result<Visit, StoreError> {
        let name = self.customer_name(customer_id)?;
        if self.open_visit(customer_id)?.is_some() {
            return Err(StoreError::AlreadyCheckedIn { customer_id, name });
        }
        let visit = self.insert_visit(customer_id, self.now())?;
        tracing::info!(customer_id, %name, visit = visit.visit_number, "checked in");
        Ok(visit)
    }

    /// Close the customer's open visit, optionally recording one purchase.
    ///
    /// Runs in a single transaction: if the product is unknown or out of
    /// stock, the visit stays open and nothing is written.
    pub fn check_out(&self, customer_id: i64, product_id: Option<&str>) -> Result<CheckOut, StoreError> {
        let name = self.customer_name(customer_id)?;
        let now = self.now();
        let tx = self.conn.unchecked_transaction()?;

        let open = self
            .open_visit(customer_id)?
            .ok_or(StoreError::NotCheckedIn { customer_id, name: name.clone() })?;

        let purchase = match product_id {
            Some(pid) => {
                let pid = pid.trim();
                let product: Option<(String, f64, i64)> = tx
                    .query_row(
                        "SELECT product_name, price, quantity FROM inventory WHERE product_id = ?1",
                        params![pid],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;
                let (product_name, price, quantity) =
                    product.ok_or_else(|| StoreError::ProductNotFound(pid.to_string()))?;
                if quantity <= 0 {
                    return Err(StoreError::OutOfStock(pid.to_string()));
                }

                tx.execute(
                    "INSERT INTO purchases
                        (visit_id, customer_id, product_id, product_name, product_price,
                         product_image, purchase_time)
                     SELECT ?1, ?2, product_id, product_name, price, product_image, ?3
                     FROM inventory WHERE product_id = ?4",
                    params![open.visit_id, customer_id, format_time(&now), pid],
                )?;
                let purchase_id = tx.last_insert_rowid();
                tx.execute(
                    "UPDATE inventory SET quantity = quantity - 1 WHERE product_id = ?1",
                    params![pid],
                )?;

                Some(Purchase {
                    purchase_id,
                    visit_id: open.visit_id,
                    customer_id,
                    product_id: pid.to_string(),
                    product_name,
                    product_price: price,
                    purchase_time: now,
                })
            }
            None => None,
        };

        tx.execute(
            "UPDATE visits SET exit_time = ?1 WHERE visit_id = ?2 AND exit_time IS NULL",
            params![format_time(&now), open.visit_id],
        )?;
        tx.commit()?;

        tracing::info!(
            customer_id,
            %name,
            visit = open.visit_number,
            product = ?purchase.as_ref().map(|p| p.product_id.as_str()),
            "checked out"
        );

        Ok(CheckOut {
            visit: Visit {
                exit_time: Some(now),
                ..open
            },
            purchase,
        })
    }

    /// Every customer with their latest visit: those inside first, then by
    /// most recent entry.
    pub fn customers(&self) -> Result<Vec<CustomerSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.customer_id, c.name,
                    v.visit_id, v.customer_id, v.visit_number, v.entry_time, v.exit_time,
                    (SELECT COUNT(*) FROM visits WHERE customer_id = c.customer_id)
             FROM customers c
             LEFT JOIN visits v ON v.visit_id =
                 (SELECT MAX(visit_id) FROM visits WHERE customer_id = c.customer_id)
             ORDER BY CASE WHEN v.visit_id IS NOT NULL AND v.exit_time IS NULL THEN 0 ELSE 1 END,
                      v.entry_time DESC,
                      c.customer_id DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let visit_id: Option<i64> = row.get(2)?;
            let latest_visit = match visit_id {
                Some(_) => Some(Visit::from_row(row, 2)?),
                None => None,
            };
            let status = match &latest_visit {
                Some(v) if v.is_open() => VisitStatus::InStore,
                _ => VisitStatus::Left,
            };
            Ok(CustomerSummary {
                customer_id: row.get(0)?,
                name: row.get(1)?,
                latest_visit,
                status,
                total_visits: row.get(7)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Look up one customer's summary.
    pub fn customer(&self, customer_id: i64) -> Result<CustomerSummary, StoreError> {
        self.customers()?
            .into_iter()
            .find(|c| c.customer_id == customer_id)
            .ok_or(StoreError::CustomerNotFound(customer_id))
    }

    pub fn customer_by_name(&self, name: &str) -> Result<Option<CustomerSummary>, StoreError> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT customer_id FROM customers WHERE name = ?1",
                params![name.trim()],
                |row| row.get(0),
            )
            .optional()?;
        id.map(|id| self.customer(id)).transpose()
    }

    /// Registered fingerprints for matching. Undecodable encodings are
    /// skipped with a warning.
    pub fn gallery(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.customer_id, c.name, c.face_encoding,
                    EXISTS(SELECT 1 FROM visits v
                           WHERE v.customer_id = c.customer_id AND v.exit_time IS NULL)
             FROM customers c
             WHERE c.face_encoding IS NOT NULL
             ORDER BY c.customer_id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;

        let mut gallery = Vec::new();
        for row in rows {
            let (customer_id, name, blob, in_store) = row?;
            match Fingerprint::from_bytes(&blob) {
                Ok(fingerprint) => gallery.push(GalleryEntry {
                    customer_id,
                    name,
                    fingerprint,
                    in_store,
                }),
                Err(e) => tracing::warn!(customer_id, %name, error = %e, "skipping bad face encoding"),
            }
        }
        Ok(gallery)
    }

    /// Rename a customer and/or correct their latest visit.
    pub fn edit_customer(&self, customer_id: i64, edit: &CustomerEdit) -> Result<(), StoreError> {
        self.customer_name(customer_id)?;
        let tx = self.conn.unchecked_transaction()?;

        if let Some(new_name) = &edit.name {
            let new_name = new_name.trim();
            if new_name.is_empty() {
                return Err(StoreError::EmptyName);
            }
            let taken: Option<i64> = tx
                .query_row(
                    "SELECT customer_id FROM customers WHERE name = ?1 AND customer_id != ?2",
                    params![new_name, customer_id],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Err(StoreError::NameTaken(new_name.to_string()));
            }
            tx.execute(
                "UPDATE customers SET name = ?1 WHERE customer_id = ?2",
                params![new_name, customer_id],
            )?;
        }

        let touches_visit =
            edit.entry_time.is_some() || edit.exit_time.is_some() || edit.visit_number.is_some();
        if touches_visit {
            let latest = self
                .latest_visit(customer_id)?
                .ok_or(StoreError::NoVisits(customer_id))?;
            let entry = edit.entry_time.unwrap_or(latest.entry_time);
            let exit = edit.exit_time.unwrap_or(latest.exit_time);
            let number = edit.visit_number.unwrap_or(latest.visit_number);

            if let Some(exit) = exit {
                if exit < entry {
                    return Err(StoreError::InvalidEdit("exit time is before entry time".into()));
                }
            }
            if number < 1 {
                return Err(StoreError::InvalidEdit("visit number must be at least 1".into()));
            }

            tx.execute(
                "UPDATE visits SET entry_time = ?1, exit_time = ?2, visit_number = ?3
                 WHERE visit_id = ?4",
                params![
                    format_time(&entry),
                    exit.as_ref().map(format_time),
                    number,
                    latest.visit_id
                ],
            )?;
        }

        tx.commit()?;
        tracing::info!(customer_id, ?edit, "edited customer");
        Ok(())
    }

    /// Remove a customer with all their visits and purchases.
    pub fn delete_customer(&self, customer_id: i64) -> Result<(), StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM customers WHERE customer_id = ?1", params![customer_id])?;
        if deleted == 0 {
            return Err(StoreError::CustomerNotFound(customer_id));
        }
        tracing::info!(customer_id, "deleted customer");
        Ok(())
    }

    pub(crate) fn customer_name(&self, customer_id: i64) -> Result<String, StoreError> {
        self.conn
            .query_row(
                "SELECT name FROM customers WHERE customer_id = ?1",
                params![customer_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::CustomerNotFound(customer_id))
    }

    fn open_visit(&self, customer_id: i64) -> Result<Option<Visit>, StoreError> {
        let sql = format!(
            "SELECT {VISIT_COLUMNS} FROM visits WHERE customer_id = ?1 AND exit_time IS NULL"
        );
        Ok(self
            .conn
            .query_row(&sql, params![customer_id], |row| Visit::from_row(row, 0))
            .optional()?)
    }

    fn latest_visit(&self, customer_id: i64) -> Result<Option<Visit>, StoreError> {
        let sql = format!(
            "SELECT {VISIT_COLUMNS} FROM visits WHERE customer_id = ?1
             ORDER BY visit_id DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![customer_id], |row| Visit::from_row(row, 0))
            .optional()?)
    }

    fn insert_visit(&self, customer_id: i64, entry: NaiveDateTime) -> Result<Visit, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM visits WHERE customer_id = ?1",
            params![customer_id],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO visits (customer_id, visit_number, entry_time) VALUES (?1, ?2, ?3)",
            params![customer_id, count + 1, format_time(&entry)],
        )?;
        Ok(Visit {
            visit_id: self.conn.last_insert_rowid(),
            customer_id,
            visit_number: count + 1,
            entry_time: entry,
            exit_time: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestStore;
    use crate::{parse_time, NewProduct, ProductUpdate};

    fn fp(seed: f64) -> Fingerprint {
        let v = vec![seed, 1.0 - seed, 0.5];
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        Fingerprint::from_values(v.into_iter().map(|x| x / norm).collect())
    }

    fn stock(store: &Store, id: &str, quantity: i64) {
        store
            .add_product(&NewProduct {
                product_id: id.into(),
                product_name: format!("Item {id}"),
                price: 100.0,
                quantity,
                image: Some(vec![1, 2, 3]),
            })
            .unwrap();
    }

    #[test]
    fn test_register_new_customer() {
        let t = TestStore::new();
        let reg = t.store.register("  Ana  ", &fp(0.2)).unwrap();
        let Registration::New { customer_id, visit } = reg else {
            panic!("expected new registration, got {reg:?}");
        };
        assert_eq!(visit.visit_number, 1);
        assert!(visit.is_open());

        let summary = t.store.customer(customer_id).unwrap();
        assert_eq!(summary.name, "Ana");
        assert_eq!(summary.status, VisitStatus::InStore);
        assert_eq!(summary.total_visits, 1);
    }

    #[test]
    fn test_register_while_in_store_is_noop() {
        let t = TestStore::new();
        t.store.register("Ana", &fp(0.2)).unwrap();
        let again = t.store.register("Ana", &fp(0.9)).unwrap();
        assert!(matches!(again, Registration::AlreadyInStore { .. }));
        assert_eq!(t.store.customers().unwrap()[0].total_visits, 1);
        // Fingerprint is left untouched.
        assert_eq!(t.store.gallery().unwrap()[0].fingerprint, fp(0.2));
    }

    #[test]
    fn test_register_returning_refreshes_fingerprint() {
        let t = TestStore::new();
        let Registration::New { customer_id, .. } = t.store.register("Ana", &fp(0.2)).unwrap() else {
            panic!("expected new registration");
        };
        t.store.check_out(customer_id, None).unwrap();

        let reg = t.store.register("Ana", &fp(0.7)).unwrap();
        let Registration::Returning { visit, .. } = reg else {
            panic!("expected returning registration, got {reg:?}");
        };
        assert_eq!(visit.visit_number, 2);
        assert_eq!(t.store.gallery().unwrap()[0].fingerprint, fp(0.7));
    }

    #[test]
    fn test_register_rejects_blank_name() {
        let t = TestStore::new();
        assert!(matches!(t.store.register("   ", &fp(0.1)), Err(StoreError::EmptyName)));
    }

    #[test]
    fn test_check_in_twice_fails() {
        let t = TestStore::new();
        let Registration::New { customer_id, .. } = t.store.register("Ben", &fp(0.3)).unwrap() else {
            panic!("expected new registration");
        };
        let err = t.store.check_in(customer_id).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyCheckedIn { .. }));

        t.store.check_out(customer_id, None).unwrap();
        let visit = t.store.check_in(customer_id).unwrap();
        assert_eq!(visit.visit_number, 2);
        assert!(matches!(t.store.check_in(999), Err(StoreError::CustomerNotFound(999))));
    }

    #[test]
    fn test_check_out_with_purchase_decrements_stock() {
        let t = TestStore::new();
        stock(&t.store, "J001", 2);
        let Registration::New { customer_id, .. } = t.store.register("Cy", &fp(0.4)).unwrap() else {
            panic!("expected new registration");
        };
        t.advance_minutes(25);

        let out = t.store.check_out(customer_id, Some("J001")).unwrap();
        assert_eq!(out.visit.exit_time, Some(parse_time("2024-03-01 10:25:00").unwrap()));
        let purchase = out.purchase.unwrap();
        assert_eq!(purchase.product_name, "Item J001");
        assert_eq!(purchase.product_price, 100.0);
        assert_eq!(t.store.product("J001").unwrap().quantity, 1);
        assert_eq!(t.store.purchase_image(purchase.purchase_id).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_purchase_snapshot_survives_product_change() {
        let t = TestStore::new();
        stock(&t.store, "J003", 1);
        let Registration::New { customer_id, .. } = t.store.register("Eli", &fp(0.6)).unwrap() else {
            panic!("expected new registration");
        };
        let purchase_id = t
            .store
            .check_out(customer_id, Some("J003"))
            .unwrap()
            .purchase
            .unwrap()
            .purchase_id;

        t.store
            .update_product(
                "J003",
                &ProductUpdate {
                    product_name: Some("Renamed".into()),
                    price: Some(999.0),
                    image: Some(vec![9, 9]),
                    ..Default::default()
                },
            )
            .unwrap();
        t.store.remove_product("J003").unwrap();

        let records = t.store.past_records(customer_id).unwrap();
        let line = records[0].purchase.as_ref().unwrap();
        assert_eq!(line.product_id, "J003");
        assert_eq!(line.product_name, "Item J003");
        assert_eq!(line.product_price, 100.0);
        assert!(line.has_image);
        assert_eq!(t.store.purchase_image(purchase_id).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_check_out_out_of_stock_changes_nothing() {
        let t = TestStore::new();
        stock(&t.store, "J002", 0);
        let Registration::New { customer_id, .. } = t.store.register("Dee", &fp(0.5)).unwrap() else {
            panic!("expected new registration");
        };

        let err = t.store.check_out(customer_id, Some("J002")).unwrap_err();
        assert!(matches!(err, StoreError::OutOfStock(_)));
        let err = t.store.check_out(customer_id, Some("NOPE")).unwrap_err();
        assert!(matches!(err, StoreError::ProductNotFound(_)));

        // Visit is still open and no purchase was written.
        assert_eq!(t.store.customer(customer_id).unwrap().status, VisitStatus::InStore);
        assert!(t.store.past_records(customer_id).unwrap()[0].purchase.is_none());
    }

    #[test]
    fn test_check_out_when_not_in_store() {
        let t = TestStore::new();
        let Registration::New { customer_id, .. } = t.store.register("Eve", &fp(0.6)).unwrap() else {
            panic!("expected new registration");
        };
        t.store.check_out(customer_id, None).unwrap();
        let err = t.store.check_out(customer_id, None).unwrap_err();
        assert!(matches!(err, StoreError::NotCheckedIn { .. }));
    }

    #[test]
    fn test_customer_list_order() {
        let t = TestStore::new();
        let Registration::New { customer_id: a, .. } = t.store.register("A", &fp(0.1)).unwrap() else {
            panic!()
        };
        t.advance_minutes(5);
        let Registration::New { customer_id: b, .. } = t.store.register("B", &fp(0.2)).unwrap() else {
            panic!()
        };
        t.advance_minutes(5);
        let Registration::New { customer_id: c, .. } = t.store.register("C", &fp(0.3)).unwrap() else {
            panic!()
        };
        t.store.check_out(c, None).unwrap();

        let names: Vec<_> = t.store.customers().unwrap().into_iter().map(|s| s.customer_id).collect();
        // In store (newest entry first), then those who left.
        assert_eq!(names, vec![b, a, c]);
    }

    #[test]
    fn test_gallery_flags_presence_and_skips_bad_blobs() {
        let t = TestStore::new();
        let Registration::New { customer_id, .. } = t.store.register("Fay", &fp(0.8)).unwrap() else {
            panic!()
        };
        t.store.register("Gus", &fp(0.1)).unwrap();
        t.store.check_out(customer_id, None).unwrap();
        t.store
            .conn
            .execute("UPDATE customers SET face_encoding = x'0102' WHERE name = 'Gus'", [])
            .unwrap();

        let gallery = t.store.gallery().unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].name, "Fay");
        assert!(!gallery[0].in_store);
    }

    #[test]
    fn test_edit_rename_and_times() {
        let t = TestStore::new();
        let Registration::New { customer_id, .. } = t.store.register("Hal", &fp(0.3)).unwrap() else {
            panic!()
        };
        t.store.register("Ivy", &fp(0.4)).unwrap();

        let taken = t.store.edit_customer(
            customer_id,
            &CustomerEdit { name: Some("Ivy".into()), ..Default::default() },
        );
        assert!(matches!(taken, Err(StoreError::NameTaken(_))));

        let entry = parse_time("2024-03-01 09:00:00").unwrap();
        let exit = parse_time("2024-03-01 09:30:00").unwrap();
        t.store
            .edit_customer(
                customer_id,
                &CustomerEdit {
                    name: Some("Hal Jr".into()),
                    entry_time: Some(entry),
                    exit_time: Some(Some(exit)),
                    visit_number: Some(3),
                },
            )
            .unwrap();

        let summary = t.store.customer(customer_id).unwrap();
        assert_eq!(summary.name, "Hal Jr");
        assert_eq!(summary.status, VisitStatus::Left);
        let visit = summary.latest_visit.unwrap();
        assert_eq!(visit.entry_time, entry);
        assert_eq!(visit.exit_time, Some(exit));
        assert_eq!(visit.visit_number, 3);

        let backwards = t.store.edit_customer(
            customer_id,
            &CustomerEdit { exit_time: Some(Some(parse_time("2024-03-01 08:00:00").unwrap())), ..Default::default() },
        );
        assert!(matches!(backwards, Err(StoreError::InvalidEdit(_))));
    }

    #[test]
    fn test_delete_cascades() {
        let t = TestStore::new();
        stock(&t.store, "J003", 5);
        let Registration::New { customer_id, .. } = t.store.register("Jo", &fp(0.5)).unwrap() else {
            panic!()
        };
        t.store.check_out(customer_id, Some("J003")).unwrap();

        t.store.delete_customer(customer_id).unwrap();
        assert!(t.store.customers().unwrap().is_empty());
        let purchases: i64 = t
            .store
            .conn
            .query_row("SELECT COUNT(*) FROM purchases", [], |r| r.get(0))
            .unwrap();
        assert_eq!(purchases, 0);
        assert!(matches!(
            t.store.delete_customer(customer_id),
            Err(StoreError::CustomerNotFound(_))
        ));
    }

    #[test]
    fn test_customer_by_name() {
        let t = TestStore::new();
        t.store.register("Kim", &fp(0.5)).unwrap();
        assert_eq!(t.store.customer_by_name("Kim").unwrap().unwrap().name, "Kim");
        assert!(t.store.customer_by_name("Lou").unwrap().is_none());
    }
}

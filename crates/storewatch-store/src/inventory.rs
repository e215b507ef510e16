//! Jewellery inventory that check-out purchases draw from.

use crate::{Store, StoreError};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;

/// Starter catalogue: id, name, price, quantity. Image `N` is `jewelN.jpg`.
pub const SAMPLE_JEWELS: [(&str, &str, f64, i64); 10] = [
    ("J001", "Gold Necklace", 599.99, 5),
    ("J002", "Diamond Ring", 1299.99, 3),
    ("J003", "Silver Bracelet", 199.99, 8),
    ("J004", "Pearl Earrings", 149.99, 6),
    ("J005", "Emerald Pendant", 799.99, 4),
    ("J006", "Ruby Ring", 999.99, 2),
    ("J007", "Sapphire Bracelet", 399.99, 7),
    ("J008", "Gold Chain", 349.99, 5),
    ("J009", "Diamond Studs", 699.99, 3),
    ("J010", "Silver Anklet", 99.99, 10),
];

/// An inventory row without the image bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub product_id: String,
    pub product_name: String,
    pub price: f64,
    pub quantity: i64,
    /// Size of the stored image in bytes, if any.
    pub image_size: Option<i64>,
}

impl Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            product_id: row.get(0)?,
            product_name: row.get(1)?,
            price: row.get(2)?,
            quantity: row.get(3)?,
            image_size: row.get(4)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub product_id: String,
    pub product_name: String,
    pub price: f64,
    pub quantity: i64,
    pub image: Option<Vec<u8>>,
}

/// Partial update; `None` fields are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductUpdate {
    pub product_name: Option<String>,
    pub price: Option<f64>,
    pub quantity: Option<i64>,
    pub image: Option<Vec<u8>>,
}

const PRODUCT_COLUMNS: &str =
    "product_id, product_name, price, quantity, length(product_image)";

fn validate(name: &str, price: f64, quantity: i64) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidProduct("name must not be empty".into()));
    }
    if !price.is_finite() || price < 0.0 {
        return Err(StoreError::InvalidProduct(format!("bad price {price}")));
    }
    if quantity < 0 {
        return Err(StoreError::InvalidProduct(format!("bad quantity {quantity}")));
    }
    Ok(())
}

impl Store {
    pub fn inventory(&self) -> Result<Vec<Product>, StoreError> {
        self.query_products(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM inventory ORDER BY product_id"
        ))
    }

    /// Products that can still be sold (quantity > 0).
    pub fn available_products(&self) -> Result<Vec<Product>, StoreError> {
        self.query_products(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM inventory WHERE quantity > 0 ORDER BY product_id"
        ))
    }

    pub fn product(&self, product_id: &str) -> Result<Product, StoreError> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM inventory WHERE product_id = ?1");
        self.conn
            .query_row(&sql, params![product_id], Product::from_row)
            .optional()?
            .ok_or_else(|| StoreError::ProductNotFound(product_id.to_string()))
    }

    pub fn product_image(&self, product_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.conn
            .query_row(
                "SELECT product_image FROM inventory WHERE product_id = ?1",
                params![product_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::ProductNotFound(product_id.to_string()))
    }

    pub fn add_product(&self, product: &NewProduct) -> Result<Product, StoreError> {
        let id = product.product_id.trim();
        if id.is_empty() {
            return Err(StoreError::InvalidProduct("product id must not be empty".into()));
        }
        validate(&product.product_name, product.price, product.quantity)?;

        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM inventory WHERE product_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::DuplicateProduct(id.to_string()));
        }

        self.conn.execute(
            "INSERT INTO inventory (product_id, product_name, product_image, price, quantity)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                product.product_name.trim(),
                product.image,
                product.price,
                product.quantity
            ],
        )?;
        tracing::info!(product_id = id, "added product");
        self.product(id)
    }

    pub fn update_product(&self, product_id: &str, update: &ProductUpdate) -> Result<Product, StoreError> {
        let current = self.product(product_id)?;
        let name = update
            .product_name
            .as_deref()
            .map(str::trim)
            .unwrap_or(&current.product_name)
            .to_string();
        let price = update.price.unwrap_or(current.price);
        let quantity = update.quantity.unwrap_or(current.quantity);
        validate(&name, price, quantity)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE inventory SET product_name = ?1, price = ?2, quantity = ?3 WHERE product_id = ?4",
            params![name, price, quantity, product_id],
        )?;
        if let Some(image) = &update.image {
            tx.execute(
                "UPDATE inventory SET product_image = ?1 WHERE product_id = ?2",
                params![image, product_id],
            )?;
        }
        tx.commit()?;
        tracing::info!(product_id, "updated product");
        self.product(product_id)
    }

    /// Remove a product. Past purchases keep their snapshot.
    pub fn remove_product(&self, product_id: &str) -> Result<(), StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM inventory WHERE product_id = ?1", params![product_id])?;
        if deleted == 0 {
            return Err(StoreError::ProductNotFound(product_id.to_string()));
        }
        tracing::info!(product_id, "removed product");
        Ok(())
    }

    /// Insert [`SAMPLE_JEWELS`] if the inventory is empty. Images are read
    /// from `jewel1.jpg` .. `jewel10.jpg` in `image_dir` when present.
    ///
    /// Returns the number of products inserted.
    pub fn seed_inventory(&self, image_dir: Option<&Path>) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM inventory", [], |row| row.get(0))?;
        if count > 0 {
            tracing::debug!(count, "inventory already populated; not seeding");
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        for (i, (id, name, price, quantity)) in SAMPLE_JEWELS.iter().enumerate() {
            let image = image_dir.and_then(|dir| {
                let path = dir.join(format!("jewel{}.jpg", i + 1));
                match std::fs::read(&path) {
                    Ok(bytes) => {
                        tracing::debug!(path = %path.display(), size = bytes.len(), "loaded image");
                        Some(bytes)
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "image not loaded");
                        None
                    }
                }
            });
            tx.execute(
                "INSERT INTO inventory (product_id, product_name, product_image, price, quantity)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, name, image, price, quantity],
            )?;
        }
        tx.commit()?;

        tracing::info!(count = SAMPLE_JEWELS.len(), "seeded inventory");
        Ok(SAMPLE_JEWELS.len())
    }

    fn query_products(&self, sql: &str) -> Result<Vec<Product>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], Product::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring() -> NewProduct {
        NewProduct {
            product_id: "R1".into(),
            product_name: "Opal Ring".into(),
            price: 250.0,
            quantity: 2,
            image: None,
        }
    }

    #[test]
    fn test_seed_only_when_empty() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.seed_inventory(None).unwrap(), 10);
        assert_eq!(store.seed_inventory(None).unwrap(), 0);

        let items = store.inventory().unwrap();
        assert_eq!(items.len(), 10);
        assert_eq!(items[1].product_name, "Diamond Ring");
        assert_eq!(items[1].price, 1299.99);
        assert_eq!(items[1].quantity, 3);
        assert!(items.iter().all(|p| p.image_size.is_none()));
    }

    #[test]
    fn test_seed_loads_images_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("jewel1.jpg"), [0xFF, 0xD8, 0xFF]).unwrap();
        std::fs::write(dir.path().join("jewel10.jpg"), [1, 2]).unwrap();

        let store = Store::open_in_memory().unwrap();
        store.seed_inventory(Some(dir.path())).unwrap();
        assert_eq!(store.product("J001").unwrap().image_size, Some(3));
        assert_eq!(store.product("J010").unwrap().image_size, Some(2));
        assert_eq!(store.product("J002").unwrap().image_size, None);
        assert_eq!(store.product_image("J001").unwrap(), Some(vec![0xFF, 0xD8, 0xFF]));
    }

    #[test]
    fn test_add_and_duplicate() {
        let store = Store::open_in_memory().unwrap();
        let added = store.add_product(&ring()).unwrap();
        assert_eq!(added.quantity, 2);
        assert!(matches!(store.add_product(&ring()), Err(StoreError::DuplicateProduct(_))));
    }

    #[test]
    fn test_add_rejects_invalid() {
        let store = Store::open_in_memory().unwrap();
        let bad = NewProduct { quantity: -1, ..ring() };
        assert!(matches!(store.add_product(&bad), Err(StoreError::InvalidProduct(_))));
        let bad = NewProduct { price: f64::NAN, ..ring() };
        assert!(matches!(store.add_product(&bad), Err(StoreError::InvalidProduct(_))));
        let bad = NewProduct { product_id: " ".into(), ..ring() };
        assert!(matches!(store.add_product(&bad), Err(StoreError::InvalidProduct(_))));
    }

    #[test]
    fn test_partial_update() {
        let store = Store::open_in_memory().unwrap();
        store.add_product(&ring()).unwrap();
        let updated = store
            .update_product(
                "R1",
                &ProductUpdate {
                    price: Some(199.5),
                    image: Some(vec![9; 4]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.product_name, "Opal Ring");
        assert_eq!(updated.price, 199.5);
        assert_eq!(updated.quantity, 2);
        assert_eq!(updated.image_size, Some(4));

        let missing = store.update_product("nope", &ProductUpdate::default());
        assert!(matches!(missing, Err(StoreError::ProductNotFound(_))));
    }

    #[test]
    fn test_rejected_update_writes_nothing() {
        let store = Store::open_in_memory().unwrap();
        store
            .add_product(&NewProduct { image: Some(vec![7; 3]), ..ring() })
            .unwrap();
        let bad = ProductUpdate {
            product_name: Some("Fire Opal".into()),
            quantity: Some(-5),
            image: Some(vec![1; 8]),
            ..Default::default()
        };
        assert!(matches!(store.update_product("R1", &bad), Err(StoreError::InvalidProduct(_))));

        let kept = store.product("R1").unwrap();
        assert_eq!(kept.product_name, "Opal Ring");
        assert_eq!(kept.quantity, 2);
        assert_eq!(store.product_image("R1").unwrap(), Some(vec![7; 3]));
    }

    #[test]
    fn test_available_excludes_sold_out() {
        let store = Store::open_in_memory().unwrap();
        store.add_product(&ring()).unwrap();
        store
            .add_product(&NewProduct { product_id: "R2".into(), quantity: 0, ..ring() })
            .unwrap();
        let ids: Vec<_> = store
            .available_products()
            .unwrap()
            .into_iter()
            .map(|p| p.product_id)
            .collect();
        assert_eq!(ids, vec!["R1"]);
    }

    #[test]
    fn test_remove() {
        let store = Store::open_in_memory().unwrap();
        store.add_product(&ring()).unwrap();
        store.remove_product("R1").unwrap();
        assert!(matches!(store.remove_product("R1"), Err(StoreError::ProductNotFound(_))));
        assert!(store.inventory().unwrap().is_empty());
    }
}

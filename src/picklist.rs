//! Picklist store: the catalog of known products.
//!
//! Loaded once from a JSON array of `{"fruit", "PLU", "Price"}` records and
//! read-only afterwards. Loading never fails: a missing file, unreadable file,
//! or malformed document yields an empty catalog plus a warning, and the rest
//! of the pipeline treats an empty catalog as "nothing matches".

use serde_json::Value;
use std::path::Path;

use crate::models::Product;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Picklist {
    products: Vec<Product>,
}

impl Picklist {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    /// Load the catalog from `path`. See the module docs for failure handling.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "picklist could not be read");
                return Self::default();
            }
        };

        match Self::from_json(&content) {
            Ok(picklist) => {
                tracing::debug!(path = %path.display(), products = picklist.len(), "picklist loaded");
                picklist
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "picklist is not valid JSON");
                Self::default()
            }
        }
    }

    /// Parse a picklist document. Individual records are never rejected;
    /// see [`Product::from_value`] for per-field defaults.
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let document: Value = serde_json::from_str(content)?;
        let Value::Array(records) = document else {
            anyhow::bail!("picklist must be a JSON array of records");
        };
        Ok(Self::new(records.iter().map(Product::from_value).collect()))
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Product> {
        self.products.iter()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

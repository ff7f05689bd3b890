//! Core data models shared by the picklist, matcher, and resolver.
//!
//! Catalog records keep the field names of the picklist JSON (`fruit`, `PLU`,
//! `Price`) on the wire; in Rust they are `name`, `code`, and `price`.

use anyhow::{bail, Result};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};

/// A known product from the picklist. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Product {
    pub name: String,
    pub code: i64,
    pub price: f64,
    /// The record wrote `Price` as an integer; kept so it serializes back the same way.
    integral_price: bool,
}

impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.code == other.code && self.price == other.price
    }
}

impl Serialize for Product {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("Product", 3)?;
        record.serialize_field("fruit", &self.name)?;
        record.serialize_field("PLU", &self.code)?;
        record.serialize_field("Price", &self.price_value())?;
        record.end()
    }
}

/// Products matched for one classification answer, in picklist order.
pub type CandidateSet = Vec<Product>;

impl Product {
    pub fn new(name: impl Into<String>, code: i64, price: f64) -> Self {
        Self {
            name: name.into(),
            code,
            price,
            integral_price: false,
        }
    }

    /// Build a product from one picklist record.
    ///
    /// Missing or unusable fields fall back to `"Unknown"`, `0`, and `0.0`.
    /// `PLU` and `Price` accept numbers or numeric strings.
    pub fn from_value(record: &Value) -> Self {
        let name = match record.get("fruit") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "Unknown".to_string(),
            Some(other) => other.to_string(),
        };

        let price_field = record.get("Price");
        let integral_price = matches!(price_field, Some(Value::Number(n)) if !n.is_f64());

        Self {
            name,
            code: record.get("PLU").and_then(coerce_i64).unwrap_or(0),
            price: price_field.and_then(coerce_f64).unwrap_or(0.0),
            integral_price,
        }
    }

    /// The picklist record form: `{"fruit": .., "PLU": .., "Price": ..}`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "fruit": self.name,
            "PLU": self.code,
            "Price": self.price_value(),
        })
    }

    fn price_value(&self) -> Value {
        if self.integral_price && self.price.fract() == 0.0 && self.price.abs() < i64::MAX as f64 {
            Value::from(self.price as i64)
        } else {
            Value::from(self.price)
        }
    }
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// A parsed model answer.
///
/// Only the primary label is interpreted; the rest of the object is kept in
/// `fields` for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationAnswer {
    pub label: String,
    /// `PLU` echoed back by the model, if any. Refinement answers carry one.
    pub code: Option<i64>,
    pub fields: Map<String, Value>,
}

impl ClassificationAnswer {
    /// Parse JSON-shaped answer text.
    ///
    /// Fails when the text is not valid JSON or is not a JSON object. A
    /// missing label is not an error; it parses to an empty `label`.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text.trim())?;
        let Value::Object(fields) = value else {
            bail!("answer is not a JSON object");
        };

        let label_value = fields.get("fruit").or_else(|| {
            fields
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case("fruit"))
                .map(|(_, v)| v)
        });
        let label = match label_value {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let code = fields
            .get("PLU")
            .or_else(|| fields.get("plu"))
            .and_then(coerce_i64);

        Ok(Self {
            label,
            code,
            fields,
        })
    }
}

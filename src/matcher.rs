//! Picklist matching.
//!
//! A product matches a classification answer when the answer's lower-cased
//! `fruit` label is a substring of the product's lower-cased name: `"apple"`
//! matches `"Red Apple"`, `"granny smith apple"` does not match `"Apple"`.
//! Candidates keep picklist order.
//!
//! This is also where JSON-shaped answer text is parsed. Unparsable answers
//! and empty labels produce no candidates, never an error.

use std::sync::Arc;

use crate::models::{CandidateSet, ClassificationAnswer, Product};
use crate::picklist::Picklist;

pub struct Matcher {
    picklist: Arc<Picklist>,
}

impl Matcher {
    pub fn new(picklist: Arc<Picklist>) -> Self {
        Self { picklist }
    }

    pub fn picklist(&self) -> &Picklist {
        &self.picklist
    }

    pub fn find_matches(&self, answer: &str) -> CandidateSet {
        let parsed = match ClassificationAnswer::parse(answer) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, answer = %answer, "could not parse model answer");
                return Vec::new();
            }
        };

        matches_for_label(&parsed.label, self.picklist.products())
    }
}

/// Substring match of `label` against product names, case-insensitive.
pub fn matches_for_label(label: &str, products: &[Product]) -> CandidateSet {
    let needle = label.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    products
        .iter()
        .filter(|product| product.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Prompt asking the model to pick exactly one of `candidates` for the same image.
pub fn build_refinement_prompt(candidates: &[Product], confidence_threshold: f64) -> String {
    let list: Vec<serde_json::Value> = candidates.iter().map(Product::to_value).collect();
    let list = serde_json::Value::Array(list);

    format!(
        "Re-examine the image. Select the best matching JSON from the \
         provided list (confidence threshold: {}). \
         Return ONLY the JSON object.\n\n\
         List: {}",
        confidence_threshold, list
    )
}

/// Find the candidate a refinement answer names.
///
/// The label must equal a candidate name (case-insensitive, trimmed). If the
/// answer also carries a `PLU`, it must equal that candidate's code.
pub fn select_refined<'a>(
    answer: &ClassificationAnswer,
    candidates: &'a [Product],
) -> Option<&'a Product> {
    let label = answer.label.trim().to_lowercase();
    if label.is_empty() {
        return None;
    }

    candidates.iter().find(|product| {
        product.name.trim().to_lowercase() == label
            && answer.code.map_or(true, |code| code == product.code)
    })
}

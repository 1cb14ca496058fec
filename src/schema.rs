//! The partial invoice schema returned by the inference service.
//!
//! The service is asked for a single JSON object but is free to omit any
//! field it cannot ground in the document, and amounts arrive as numbers or
//! as display strings ("$1,234.56") depending on the model's mood. Rather
//! than scattering `get(..).and_then(..)` chains across callers,
//! [`InvoiceRecord`] owns the object and exposes presence-checked accessors
//! with a single definition of "absent" (missing key or JSON null) and a
//! single amount-coercion rule.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Terms that mark a line item (or the whole invoice) as LLM usage.
///
/// Matched case-insensitively against descriptions and the provider/model
/// fields. "llama" also catches "Meta Llama" and model ids like
/// "Llama3-70B".
const LLM_USAGE_TERMS: &[&str] = &["llama", "llm", "inference"];

/// Record-level fields consulted when deciding whether line items belong to
/// LLM usage even though their own descriptions don't say so.
const LLM_CONTEXT_FIELDS: &[&str] = &["provider", "model_provider", "model", "llm_model", "model_version_range"];

/// One structured record extracted from a batch of invoice pages.
///
/// A thin wrapper over the raw JSON object: every field is optional, and all
/// access goes through the methods below so absence is never confused with
/// null or with an unexpected type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceRecord {
    fields: Map<String, Value>,
}

impl InvoiceRecord {
    /// Wrap an already-parsed JSON object.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// The raw field map, for callers that serialise the record onward.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// True when the field is present and not JSON null.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Fetch a field. JSON null counts as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// Fetch a field as a string slice, if it is a JSON string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Fetch a monetary field, coercing both JSON numbers and display
    /// strings like "$1,234.56". Returns None for absent fields and for
    /// strings that don't parse as an amount.
    pub fn get_amount(&self, key: &str) -> Option<f64> {
        coerce_amount(self.get(key)?)
    }

    /// The `line_items` array, if the record carries one. Non-object entries
    /// are skipped.
    pub fn line_items(&self) -> Vec<&Map<String, Value>> {
        self.get("line_items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default()
    }

    /// Line items attributable to LLM usage.
    ///
    /// An item qualifies when its own description mentions an LLM term, or
    /// when the record's provider/model fields do (a Together AI invoice
    /// billing only Llama tokens qualifies wholesale).
    pub fn llm_line_items(&self) -> Vec<&Map<String, Value>> {
        let record_is_llm = LLM_CONTEXT_FIELDS
            .iter()
            .filter_map(|f| self.get_str(f))
            .any(contains_llm_term);

        self.line_items()
            .into_iter()
            .filter(|item| {
                record_is_llm
                    || item
                        .get("description")
                        .and_then(Value::as_str)
                        .is_some_and(contains_llm_term)
            })
            .collect()
    }

    /// Sum of the `amount` fields of [`llm_line_items`](Self::llm_line_items).
    ///
    /// Items whose amount cannot be coerced are skipped rather than failing
    /// the total.
    pub fn llm_total(&self) -> f64 {
        self.llm_line_items()
            .iter()
            .filter_map(|item| item.get("amount").and_then(coerce_amount))
            .sum()
    }
}

fn contains_llm_term(text: &str) -> bool {
    let lower = text.to_lowercase();
    LLM_USAGE_TERMS.iter().any(|term| lower.contains(term))
}

/// Coerce a JSON value into a monetary amount.
///
/// Numbers pass through; strings are stripped of currency symbols, thousands
/// separators, and whitespace before parsing.
fn coerce_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> InvoiceRecord {
        serde_json::from_value(value).expect("valid record")
    }

    #[test]
    fn deserialises_from_object_only() {
        assert!(serde_json::from_str::<InvoiceRecord>(r#"{"total": 10}"#).is_ok());
        assert!(serde_json::from_str::<InvoiceRecord>("[1, 2]").is_err());
        assert!(serde_json::from_str::<InvoiceRecord>("\"total\"").is_err());
    }

    #[test]
    fn null_counts_as_absent() {
        let r = record(json!({"invoice_number": null, "currency": "USD"}));
        assert!(!r.contains("invoice_number"));
        assert_eq!(r.get_str("currency"), Some("USD"));
        assert_eq!(r.get_str("due_date"), None);
    }

    #[test]
    fn amount_coercion_handles_strings_and_numbers() {
        let r = record(json!({
            "total": 42.5,
            "amount_due": "$1,234.56",
            "subtotal": "not a number",
        }));
        assert_eq!(r.get_amount("total"), Some(42.5));
        assert_eq!(r.get_amount("amount_due"), Some(1234.56));
        assert_eq!(r.get_amount("subtotal"), None);
    }

    #[test]
    fn llm_items_filtered_by_description() {
        let r = record(json!({
            "line_items": [
                {"description": "Meta Llama 3 70B tokens", "amount": "$12.00"},
                {"description": "Object storage", "amount": "$3.00"},
                {"description": "LLM inference hours", "amount": 5.5},
            ]
        }));
        assert_eq!(r.llm_line_items().len(), 2);
        assert!((r.llm_total() - 17.5).abs() < 1e-9);
    }

    #[test]
    fn provider_field_marks_whole_invoice_as_llm() {
        let r = record(json!({
            "provider": "Together AI (Llama serving)",
            "line_items": [
                {"description": "Compute", "amount": "$7.00"},
                {"description": "Support", "amount": "$1.00"},
            ]
        }));
        assert_eq!(r.llm_line_items().len(), 2);
        assert!((r.llm_total() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn unparsable_item_amounts_are_skipped() {
        let r = record(json!({
            "line_items": [
                {"description": "Llama tokens", "amount": "free"},
                {"description": "Llama tokens", "amount": "$2.00"},
            ]
        }));
        assert!((r.llm_total() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn round_trips_unknown_fields() {
        let original = json!({"invoice_number": "INV-9", "totally_new_field": {"a": 1}});
        let r = record(original.clone());
        assert_eq!(serde_json::to_value(&r).unwrap(), original);
    }
}

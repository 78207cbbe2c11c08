use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One scraped item as emitted by a source. Keys vary per site.
pub type RawItem = Map<String, Value>;

pub const DEFAULT_CURRENCY: &str = "INR";
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Fixed column order of a [`ResultSet`].
pub const COLUMNS: [&str; 7] = [
    "title",
    "description",
    "price",
    "currency",
    "link",
    "image",
    "source",
];

/// Normalized listing. Field order matches [`COLUMNS`] and is the order
/// rows are serialized in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub title: String,
    pub description: String,
    pub price: Option<f64>,
    pub currency: String,
    pub link: String,
    pub image: Option<String>,
    pub source: String,
}

/// Map a raw item onto the canonical schema. Never fails: absent or falsy
/// fields degrade to their defaults.
pub fn normalize(raw: &RawItem) -> CanonicalRecord {
    CanonicalRecord {
        title: first_text(raw, &["title", "name"]).unwrap_or_default(),
        description: first_text(raw, &["description", "title"]).unwrap_or_default(),
        price: raw.get("price").and_then(numeric),
        currency: first_text(raw, &["currency"]).unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        link: first_text(raw, &["link", "url"]).unwrap_or_default(),
        image: first_text(raw, &["image", "img"]),
        source: first_text(raw, &["source"]).unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
    }
}

fn first_text(raw: &RawItem, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| raw.get(*k).and_then(text))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn text(value: &Value) -> Option<String> {
    if !truthy(value) {
        return None;
    }
    match value {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// Prices are expected to arrive numeric; plain numeric strings are accepted,
// anything needing glyph/separator stripping is the extractor's job.
fn numeric(value: &Value) -> Option<f64> {
    if !truthy(value) {
        return None;
    }
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|p| p.is_finite()),
        _ => None,
    }
}

/// Ordered, deduplicated result of one aggregation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet {
    rows: Vec<CanonicalRecord>,
}

impl ResultSet {
    pub fn new(rows: Vec<CanonicalRecord>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &'static [&'static str] {
        &COLUMNS
    }

    pub fn rows(&self) -> &[CanonicalRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CanonicalRecord> {
        self.rows.iter()
    }

    /// Row-oriented JSON: an array of objects keyed by column name.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.rows)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json).map(Self::new)
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a CanonicalRecord;
    type IntoIter = std::slice::Iter<'a, CanonicalRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

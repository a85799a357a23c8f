//! Typed catalog records and the normalized rows written to the store.
//!
//! Storefront payloads are loosely typed: prices arrive as strings or
//! numbers, tags as a list or a comma-joined string, timestamps in whatever
//! offset the shop uses. Every optional field is therefore parsed leniently
//! and a malformed value becomes `None` instead of rejecting the record.
//! Only the integer `id` is mandatory. The untouched payload is kept in
//! `raw` on every record so nothing is lost for later replay.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::AppError;

// =============================================================================
// Lenient field parsing
// =============================================================================

/// Deserializes any JSON value, keeping it only if it fits `T`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Accepts `"19.99"`, `19.99` or `19`.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Accepts RFC 3339 timestamps with any offset and normalizes them to UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    })
}

/// Accepts `["a", "b"]` or `"a, b"`.
fn lenient_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(joined) => joined
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    })
}

/// Like [`lenient_tags`] but keeps every element, so a value's index is its
/// 1-based position. Scalars are stringified and `null` becomes `""`.
fn positional_values<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect(),
        Value::String(joined) => joined.split(',').map(|s| s.trim().to_string()).collect(),
        _ => Vec::new(),
    })
}

/// Parses each element of a nested array, dropping elements without a usable id.
fn parse_children<T>(parent: &Value, key: &str, parse: fn(Value) -> Result<T, AppError>) -> Vec<T> {
    parent
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match parse(item.clone()) {
                    Ok(child) => Some(child),
                    Err(e) => {
                        tracing::debug!(key, error = %e, "Dropping nested record");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Catalog records
// =============================================================================

/// One catalog item as served by a storefront.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductRecord {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient")]
    pub handle: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub vendor: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub product_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_tags")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub admin_graphql_api_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub template_suffix: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub published_scope: Option<String>,
    #[serde(skip)]
    pub variants: Vec<VariantRecord>,
    #[serde(skip)]
    pub images: Vec<ImageRecord>,
    #[serde(skip)]
    pub options: Vec<OptionRecord>,
    /// The payload exactly as received.
    #[serde(skip)]
    pub raw: Value,
}

impl ProductRecord {
    /// Validates one raw catalog item.
    ///
    /// Fails only when the item has no integer `id`; nested variants and
    /// images without an id are dropped individually.
    pub fn from_value(value: Value) -> Result<Self, AppError> {
        let mut record: ProductRecord = serde_json::from_value(value.clone())?;
        record.variants = parse_children(&value, "variants", VariantRecord::from_value);
        record.images = parse_children(&value, "images", ImageRecord::from_value);
        record.options = parse_children(&value, "options", OptionRecord::from_value);
        record.raw = value;
        Ok(record)
    }

    /// Variant prices that parsed as numbers.
    pub fn prices(&self) -> impl Iterator<Item = f64> + '_ {
        self.variants.iter().filter_map(|v| v.price)
    }
}

/// Identifier of a product on its page, if the item carries an integer one.
///
/// Used for duplicate-page detection before any validation takes place.
pub fn leading_id(item: &Value) -> Option<i64> {
    item.get("id").and_then(Value::as_i64)
}

/// A purchasable variant of a product.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantRecord {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient")]
    pub product_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub sku: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub compare_at_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub position: Option<i32>,
    #[serde(default, deserialize_with = "lenient")]
    pub inventory_policy: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub inventory_management: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub inventory_quantity: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub barcode: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub weight: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub weight_unit: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub requires_shipping: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub taxable: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub option1: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub option2: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub option3: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub image_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub raw: Value,
}

impl VariantRecord {
    pub fn from_value(value: Value) -> Result<Self, AppError> {
        let mut record: VariantRecord = serde_json::from_value(value.clone())?;
        // Public endpoints expose the linked image as `featured_image`.
        if record.image_id.is_none() {
            record.image_id = value
                .get("featured_image")
                .and_then(|img| img.get("id"))
                .and_then(Value::as_i64);
        }
        record.raw = value;
        Ok(record)
    }
}

/// A product image.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient")]
    pub position: Option<i32>,
    #[serde(default, deserialize_with = "lenient")]
    pub src: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub width: Option<i32>,
    #[serde(default, deserialize_with = "lenient")]
    pub height: Option<i32>,
    #[serde(default, deserialize_with = "lenient")]
    pub alt: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub raw: Value,
}

impl ImageRecord {
    pub fn from_value(value: Value) -> Result<Self, AppError> {
        let mut record: ImageRecord = serde_json::from_value(value.clone())?;
        record.raw = value;
        Ok(record)
    }
}

/// A selectable axis such as size or color, with its ordered values.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionRecord {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub position: Option<i32>,
    #[serde(default, deserialize_with = "positional_values")]
    pub values: Vec<String>,
    #[serde(skip)]
    pub raw: Value,
}

impl OptionRecord {
    /// Options are kept even without an id: their values are keyed by name.
    pub fn from_value(value: Value) -> Result<Self, AppError> {
        let mut record: OptionRecord = serde_json::from_value(value.clone())?;
        record.raw = value;
        Ok(record)
    }
}

// =============================================================================
// Normalized rows
// =============================================================================

/// Row of the `products` table, keyed by (domain, product_id).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRow {
    pub domain: String,
    pub product_id: i64,
    pub handle: Option<String>,
    pub title: Option<String>,
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub tags: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub admin_graphql_api_id: Option<String>,
    pub template_suffix: Option<String>,
    pub published_scope: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub raw_json: Value,
}

/// Append-only copy of a product payload, keyed by (domain, product_id, fetched_at).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRow {
    pub domain: String,
    pub product_id: i64,
    pub fetched_at: DateTime<Utc>,
    pub raw_json: Value,
}

/// Row of the `variants` table, keyed by (domain, variant_id).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantRow {
    pub domain: String,
    pub variant_id: i64,
    pub product_id: i64,
    pub title: Option<String>,
    pub sku: Option<String>,
    pub price: Option<f64>,
    pub compare_at_price: Option<f64>,
    pub position: Option<i32>,
    pub inventory_policy: Option<String>,
    pub inventory_management: Option<String>,
    pub inventory_quantity: Option<i64>,
    pub barcode: Option<String>,
    pub weight: Option<f64>,
    pub weight_unit: Option<String>,
    pub requires_shipping: Option<bool>,
    pub taxable: Option<bool>,
    pub option1: Option<String>,
    pub option2: Option<String>,
    pub option3: Option<String>,
    pub image_id: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub raw_json: Value,
}

/// Row of the `images` table, keyed by (domain, image_id).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRow {
    pub domain: String,
    pub image_id: i64,
    pub product_id: i64,
    pub position: Option<i32>,
    pub src: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub alt: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub raw_json: Value,
}

/// Row of the `product_options` table, keyed by (domain, product_id, name).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionRow {
    pub domain: String,
    pub product_id: i64,
    pub option_id: Option<i64>,
    pub name: String,
    pub position: Option<i32>,
    pub fetched_at: DateTime<Utc>,
    pub raw_json: Value,
}

/// Row of the `option_values` table, keyed by (domain, product_id, option_name, position).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionValueRow {
    pub domain: String,
    pub product_id: i64,
    pub option_name: String,
    /// 1-based index of the value within its option.
    pub position: i32,
    pub value: String,
    pub fetched_at: DateTime<Utc>,
}

/// Per-domain aggregate kept in the `domains` table, keyed by domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainSummary {
    pub domain: String,
    pub product_count: i64,
    pub vendor_count: i64,
    pub product_types: Vec<String>,
    pub price_range_min: Option<f64>,
    pub price_range_max: Option<f64>,
    pub scraping_status: ScrapingStatus,
    pub last_fetched_at: DateTime<Utc>,
}

/// Whether a domain has yielded products yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapingStatus {
    Active,
    Pending,
}

impl ScrapingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapingStatus::Active => "active",
            ScrapingStatus::Pending => "pending",
        }
    }
}

/// A product title waiting for an embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEmbedding {
    pub domain: String,
    pub product_id: i64,
    pub text: String,
}

/// Row counts per table, for the `stats` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub products: i64,
    pub variants: i64,
    pub images: i64,
    pub option_values: i64,
    pub snapshots: i64,
    pub domains: i64,
    pub products_with_embeddings: i64,
}

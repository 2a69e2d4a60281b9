//! Product record and normalization rules for raw API responses.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::Value;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("static regex");
}

/// One normalized product, as persisted in WAL lines and batch files.
///
/// Defaulting rules for missing/invalid source fields: strings default to
/// empty, `price` defaults to 0. The id is always carried as a string even
/// when the API returns a number, so resume comparisons are consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    pub url_key: String,
    pub price: u64,
    pub description: String,
    pub images_url: String,
}

impl ProductRecord {
    /// Normalize a raw API response body into a record.
    ///
    /// Returns `None` when the body is not a JSON object; callers treat that
    /// as a fetch failure for the id, never as a process-level fault.
    pub fn from_response(requested_id: &str, body: &Value) -> Option<Self> {
        let obj = body.as_object()?;

        let id = obj
            .get("id")
            .and_then(coerce_id)
            .unwrap_or_else(|| requested_id.to_string());

        Some(Self {
            id,
            name: string_field(obj.get("name")),
            url_key: string_field(obj.get("url_key")),
            price: price_field(obj.get("price")),
            description: clean_description(&string_field(obj.get("description"))),
            images_url: image_url(obj),
        })
    }
}

/// Coerce a JSON id (number or string) into its canonical string form.
pub fn coerce_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Strip HTML markup to plain text and collapse runs of whitespace into
/// single spaces.
pub fn clean_description(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(html);
    let text: String = fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn string_field(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

fn price_field(value: Option<&Value>) -> u64 {
    value.and_then(Value::as_u64).unwrap_or(0)
}

/// Thumbnail first, then the first alternative image entry, else empty.
fn image_url(obj: &serde_json::Map<String, Value>) -> String {
    let thumbnail = obj
        .get("thumbnail_url")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !thumbnail.is_empty() {
        return thumbnail.to_string();
    }

    obj.get("images")
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(|image| image.get("base_url"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

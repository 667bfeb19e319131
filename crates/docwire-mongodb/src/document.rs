//! Dynamically-shaped documents
//!
//! `Document` is the one value type used for filters, updates, options and
//! results. Objects keep their keys in insertion order, which matters on the
//! wire: `{"a": 1, "b": 2}` and `{"b": 2, "a": 1}` are different BSON
//! documents and compare unequal here too.
//!
//! # Example
//!
//! ```ignore
//! use docwire_mongodb::{document, Document};
//!
//! let filter = document!({ "status": "active", "age": { "$gte": 18 } });
//! let parsed = Document::parse(r#"{"status": "active"}"#)?;
//! assert_eq!(filter["status"], parsed["status"]);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::ops::Index;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use docwire_common::{DocWireError, Result};
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;

static NULL: Document = Document::Null;

/// Node kind of a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Array,
    Object,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentKind::Null => "null",
            DocumentKind::Bool => "bool",
            DocumentKind::Int => "int",
            DocumentKind::Float => "float",
            DocumentKind::String => "string",
            DocumentKind::Array => "array",
            DocumentKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// A recursively-typed JSON-like value
///
/// Cloning deep-copies the whole tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Document {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Document>),
    /// Ordered key/value pairs
    Object(Vec<(String, Document)>),
}

impl Document {
    /// An empty object, `{}`
    pub fn object() -> Self {
        Document::Object(Vec::new())
    }

    /// An empty array, `[]`
    pub fn array() -> Self {
        Document::Array(Vec::new())
    }

    /// Parse a document from its textual form
    ///
    /// # Errors
    /// Returns `DocWireError::Parse` carrying the input when the text is not
    /// well-formed, repeats a key inside one object, or holds an integer
    /// outside the signed 64-bit range.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| DocWireError::parse(text, e.to_string()))
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Null => DocumentKind::Null,
            Document::Bool(_) => DocumentKind::Bool,
            Document::Int(_) => DocumentKind::Int,
            Document::Float(_) => DocumentKind::Float,
            Document::String(_) => DocumentKind::String,
            Document::Array(_) => DocumentKind::Array,
            Document::Object(_) => DocumentKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Document::Null)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Document::Object(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Document::Array(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Document::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Document::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as a float; integers widen
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Document::Int(i) => Some(*i as f64),
            Document::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Document::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Document>> {
        match self {
            Document::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Vec<(String, Document)>> {
        match self {
            Document::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Interpret an extended-JSON `$date` value
    ///
    /// Accepts both the relaxed form (`{"$date": "<RFC 3339>"}`) and the
    /// canonical form (`{"$date": {"$numberLong": "<millis>"}}`).
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        let fields = self.as_object()?;
        if fields.len() != 1 || fields[0].0 != "$date" {
            return None;
        }
        let millis = match &fields[0].1 {
            Document::String(text) => {
                return DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
            Document::Int(millis) => *millis,
            long => long.get("$numberLong")?.as_str()?.parse::<i64>().ok()?,
        };
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Look up an object member
    pub fn get(&self, key: &str) -> Option<&Document> {
        self.as_object()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Document> {
        match self {
            Document::Object(fields) => fields.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Look up an array element
    pub fn get_index(&self, index: usize) -> Option<&Document> {
        self.as_array()?.get(index)
    }

    /// Follow a dotted path such as `"address.lines.0"`
    ///
    /// Numeric segments index into arrays.
    pub fn get_path(&self, path: &str) -> Option<&Document> {
        path.split('.').try_fold(self, |node, segment| match node {
            Document::Object(_) => node.get(segment),
            Document::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Set an object member, keeping its position when the key exists
    ///
    /// A non-object document is replaced by an empty object first.
    /// Returns the previous value of the member, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Document>) -> Option<Document> {
        if !self.is_object() {
            *self = Document::object();
        }
        let key = key.into();
        let value = value.into();
        let Document::Object(fields) = self else {
            return None;
        };
        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                fields.push((key, value));
                None
            }
        }
    }

    /// Remove an object member, preserving the order of the rest
    pub fn remove(&mut self, key: &str) -> Option<Document> {
        match self {
            Document::Object(fields) => {
                let position = fields.iter().position(|(k, _)| k == key)?;
                Some(fields.remove(position).1)
            }
            _ => None,
        }
    }

    /// Append an array element
    ///
    /// A non-array document is replaced by an empty array first.
    pub fn push(&mut self, value: impl Into<Document>) {
        match self {
            Document::Array(items) => items.push(value.into()),
            _ => *self = Document::Array(vec![value.into()]),
        }
    }

    /// Object member names, in order
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.as_object()
            .into_iter()
            .flatten()
            .map(|(k, _)| k.as_str())
    }

    /// Number of members or elements; zero for scalars
    pub fn len(&self) -> usize {
        match self {
            Document::Object(fields) => fields.len(),
            Document::Array(items) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to a `serde_json::Value`
    ///
    /// Non-finite floats have no JSON form and become `null`.
    pub fn to_json_value(&self) -> Value {
        match self {
            Document::Null => Value::Null,
            Document::Bool(b) => Value::Bool(*b),
            Document::Int(i) => Value::from(*i),
            Document::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Document::String(s) => Value::String(s.clone()),
            Document::Array(items) => Value::Array(items.iter().map(Document::to_json_value).collect()),
            Document::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_value()))
                    .collect(),
            ),
        }
    }

    /// Multi-line textual form
    pub fn to_pretty_string(&self) -> String {
        format!("{:#}", self)
    }
}

/// Canonical compact text; `{:#}` renders the indented form.
impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = if f.alternate() {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
        .map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl FromStr for Document {
    type Err = DocWireError;

    fn from_str(s: &str) -> Result<Self> {
        Document::parse(s)
    }
}

impl Index<&str> for Document {
    type Output = Document;

    /// Missing members (and indexing a non-object) yield `Null`.
    fn index(&self, key: &str) -> &Document {
        self.get(key).unwrap_or(&NULL)
    }
}

impl Index<usize> for Document {
    type Output = Document;

    fn index(&self, index: usize) -> &Document {
        self.get_index(index).unwrap_or(&NULL)
    }
}

// =====================
// Conversions
// =====================

impl From<bool> for Document {
    fn from(value: bool) -> Self {
        Document::Bool(value)
    }
}

impl From<i32> for Document {
    fn from(value: i32) -> Self {
        Document::Int(value.into())
    }
}

impl From<i64> for Document {
    fn from(value: i64) -> Self {
        Document::Int(value)
    }
}

impl From<f64> for Document {
    fn from(value: f64) -> Self {
        Document::Float(value)
    }
}

impl From<&str> for Document {
    fn from(value: &str) -> Self {
        Document::String(value.to_string())
    }
}

impl From<String> for Document {
    fn from(value: String) -> Self {
        Document::String(value)
    }
}

impl<T: Into<Document>> From<Vec<T>> for Document {
    fn from(items: Vec<T>) -> Self {
        Document::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Document>> From<Option<T>> for Document {
    fn from(value: Option<T>) -> Self {
        value.map_or(Document::Null, Into::into)
    }
}

/// Dates become canonical extended JSON so the codec maps them to BSON dates.
impl From<DateTime<Utc>> for Document {
    fn from(value: DateTime<Utc>) -> Self {
        let mut millis = Document::object();
        millis.insert("$numberLong", value.timestamp_millis().to_string());
        let mut date = Document::object();
        date.insert("$date", millis);
        date
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Document::Null,
            Value::Bool(b) => Document::Bool(b),
            // Unsigned values beyond i64 have no integer slot and widen to float
            Value::Number(n) => match n.as_i64() {
                Some(i) => Document::Int(i),
                None => Document::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Document::String(s),
            Value::Array(items) => Document::Array(items.into_iter().map(Document::from).collect()),
            Value::Object(map) => {
                Document::Object(map.into_iter().map(|(k, v)| (k, Document::from(v))).collect())
            }
        }
    }
}

impl From<Document> for Value {
    fn from(document: Document) -> Self {
        document.to_json_value()
    }
}

impl From<&Document> for Value {
    fn from(document: &Document) -> Self {
        document.to_json_value()
    }
}

/// Collects into an object; a repeated key overwrites the earlier value in place.
impl<K: Into<String>, V: Into<Document>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut document = Document::object();
        for (key, value) in iter {
            document.insert(key, value);
        }
        document
    }
}

// =====================
// Serde
// =====================

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Document::Null => serializer.serialize_unit(),
            Document::Bool(b) => serializer.serialize_bool(*b),
            Document::Int(i) => serializer.serialize_i64(*i),
            Document::Float(f) => serializer.serialize_f64(*f),
            Document::String(s) => serializer.serialize_str(s),
            Document::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Document::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = Document;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Document, E> {
        Ok(Document::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Document, E> {
        Ok(Document::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<Document, D::Error> {
        Document::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Document, E> {
        Ok(Document::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Document, E> {
        Ok(Document::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Document, E> {
        i64::try_from(v)
            .map(Document::Int)
            .map_err(|_| E::custom(format!("integer {} is out of range", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Document, E> {
        Ok(Document::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Document, E> {
        Ok(Document::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Document, E> {
        Ok(Document::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Document, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Document>()? {
            items.push(item);
        }
        Ok(Document::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Document, A::Error> {
        let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
        let mut seen = HashSet::new();
        while let Some(key) = map.next_key::<String>()? {
            if !seen.insert(key.clone()) {
                return Err(de::Error::custom(format!("duplicate key `{}`", key)));
            }
            let value = map.next_value::<Document>()?;
            fields.push((key, value));
        }
        Ok(Document::Object(fields))
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(DocumentVisitor)
    }
}

/// Build a [`Document`] from JSON literal syntax
///
/// ```ignore
/// let update = document!({ "$set": { "name": "b" } });
/// ```
#[macro_export]
macro_rules! document {
    ($($json:tt)+) => {
        $crate::Document::from($crate::__private::serde_json::json!($($json)+))
    };
}

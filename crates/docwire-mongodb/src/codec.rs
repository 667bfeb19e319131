//! Document <-> BSON wire codec
//!
//! Every conversion passes through the extended-JSON value form: a
//! `Document` becomes a `serde_json::Value`, which the BSON library parses as
//! extended JSON (`{"$oid": ...}`, `{"$date": ...}`, `{"$numberLong": ...}`
//! become their BSON types). Decoding renders relaxed extended JSON, so
//! 32- and 64-bit integers both come back as `Document::Int`, doubles as
//! `Document::Float`, and non-JSON BSON types as their `$`-prefixed objects.

use bson::{Bson, Document as BsonDocument, RawDocument, RawDocumentBuf};
use docwire_common::{DocWireError, Result};
use std::collections::HashSet;

use crate::document::Document;

/// One document in BSON wire form
///
/// Deliberately not `Clone`: a wire document is moved into exactly one
/// transport call or decoded, never held by two owners.
#[derive(Debug, PartialEq)]
pub struct WireDocument {
    raw: RawDocumentBuf,
}

impl WireDocument {
    /// The empty wire document, `{}`
    pub fn empty() -> Self {
        Self {
            raw: RawDocumentBuf::new(),
        }
    }

    pub fn from_raw(raw: RawDocumentBuf) -> Self {
        Self { raw }
    }

    /// Serialize an already-built BSON document
    pub fn from_bson(document: &BsonDocument) -> Result<Self> {
        let raw = RawDocumentBuf::from_document(document)
            .map_err(|e| DocWireError::Encode(format!("cannot serialize BSON: {}", e)))?;
        Ok(Self { raw })
    }

    pub fn as_raw(&self) -> &RawDocument {
        &self.raw
    }

    pub fn into_raw(self) -> RawDocumentBuf {
        self.raw
    }

    /// Parse the bytes into an owned BSON document tree
    pub fn to_bson(&self) -> Result<BsonDocument> {
        BsonDocument::try_from(self.as_raw())
            .map_err(|e| DocWireError::Decode(format!("malformed BSON: {}", e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }
}

/// Convert a document to wire form
///
/// # Errors
/// Returns `DocWireError::Encode` when the root is not an object, when an
/// object repeats a key, when a float is NaN or infinite, or when an
/// extended-JSON object such as `{"$oid": "zz"}` is malformed.
pub fn encode(document: &Document) -> Result<WireDocument> {
    if !document.is_object() {
        return Err(DocWireError::Encode(format!(
            "wire documents must be objects at the root, got {}",
            document.kind()
        )));
    }
    if let Some(path) = duplicate_key_path(document, String::new()) {
        return Err(DocWireError::Encode(format!("duplicate key at '{}'", path)));
    }
    if let Some(path) = non_finite_path(document, String::new()) {
        return Err(DocWireError::Encode(format!(
            "non-finite number at '{}' has no wire representation",
            path
        )));
    }

    match Bson::try_from(document.to_json_value())? {
        Bson::Document(bson) => {
            let wire = WireDocument::from_bson(&bson)?;
            tracing::trace!(bytes = wire.as_bytes().len(), "encoded document");
            Ok(wire)
        }
        other => Err(DocWireError::Encode(format!(
            "root object was read as extended JSON {:?}, not a document",
            other.element_type()
        ))),
    }
}

/// Encode a batch, failing before anything is produced if one member fails
pub fn encode_all(documents: &[Document]) -> Result<Vec<WireDocument>> {
    documents.iter().map(encode).collect()
}

/// Convert a wire document back to a `Document`
pub fn decode(wire: WireDocument) -> Result<Document> {
    decode_raw(wire.as_raw())
}

/// Decode borrowed BSON bytes
pub fn decode_raw(raw: &RawDocument) -> Result<Document> {
    let bson = BsonDocument::try_from(raw)
        .map_err(|e| DocWireError::Decode(format!("malformed BSON: {}", e)))?;
    let document = Document::from(Bson::Document(bson).into_relaxed_extjson());
    tracing::trace!(fields = document.len(), "decoded document");
    Ok(document)
}

fn non_finite_path(document: &Document, path: String) -> Option<String> {
    match document {
        Document::Float(f) if !f.is_finite() => Some(path),
        Document::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| non_finite_path(item, join_path(&path, &i.to_string()))),
        Document::Object(fields) => fields
            .iter()
            .find_map(|(key, value)| non_finite_path(value, join_path(&path, key))),
        _ => None,
    }
}

fn duplicate_key_path(document: &Document, path: String) -> Option<String> {
    match document {
        Document::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| duplicate_key_path(item, join_path(&path, &i.to_string()))),
        Document::Object(fields) => {
            let mut seen = HashSet::with_capacity(fields.len());
            if let Some((key, _)) = fields.iter().find(|(key, _)| !seen.insert(key.as_str())) {
                return Some(join_path(&path, key));
            }
            fields
                .iter()
                .find_map(|(key, value)| duplicate_key_path(value, join_path(&path, key)))
        }
        _ => None,
    }
}

fn join_path(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", parent, segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;
    use bson::{doc, oid::ObjectId};

    fn roundtrip(document: &Document) -> Document {
        decode(encode(document).unwrap()).unwrap()
    }

    #[test]
    fn test_roundtrip_scalars_and_nesting() {
        let original = document!({
            "_id": 1,
            "name": "a",
            "score": 2.5,
            "active": true,
            "missing": null,
            "tags": ["x", 2, [false]],
            "address": { "city": "Taipei", "zip": { "code": 100 } }
        });
        assert_eq!(roundtrip(&original), original);
    }

    #[test]
    fn test_roundtrip_preserves_key_order() {
        let original = document!({ "z": 1, "a": 2, "m": { "y": 1, "b": 2 } });
        let decoded = roundtrip(&original);
        assert_eq!(decoded.keys().collect::<Vec<_>>(), vec!["z", "a", "m"]);
        assert_eq!(decoded["m"].keys().collect::<Vec<_>>(), vec!["y", "b"]);
    }

    #[test]
    fn test_integers_keep_their_kind() {
        let original = document!({ "small": 7, "big": 9_000_000_000i64, "whole_float": 3.0 });
        let decoded = roundtrip(&original);
        assert_eq!(decoded["small"], Document::Int(7));
        assert_eq!(decoded["big"], Document::Int(9_000_000_000));
        assert_eq!(decoded["whole_float"], Document::Float(3.0));
    }

    #[test]
    fn test_integer_width_on_the_wire() {
        let wire = encode(&document!({ "small": 7, "big": 9_000_000_000i64 })).unwrap();
        let bson = wire.to_bson().unwrap();
        assert_eq!(bson.get("small"), Some(&Bson::Int32(7)));
        assert_eq!(bson.get("big"), Some(&Bson::Int64(9_000_000_000)));
    }

    #[test]
    fn test_extended_json_object_id() {
        let oid = ObjectId::new();
        let original = document!({ "_id": { "$oid": oid.to_hex() } });

        let wire = encode(&original).unwrap();
        assert_eq!(wire.to_bson().unwrap().get_object_id("_id").unwrap(), oid);
        assert_eq!(decode(wire).unwrap(), original);
    }

    #[test]
    fn test_extended_json_number_long_decodes_as_int() {
        let wire = encode(&document!({ "n": { "$numberLong": "42" } })).unwrap();
        assert_eq!(wire.to_bson().unwrap().get("n"), Some(&Bson::Int64(42)));
        assert_eq!(decode(wire).unwrap(), document!({ "n": 42 }));
    }

    #[test]
    fn test_datetime_roundtrip() {
        let when = chrono::DateTime::parse_from_rfc3339("2024-03-01T12:00:00.250Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let mut original = Document::object();
        original.insert("at", when);

        let wire = encode(&original).unwrap();
        assert!(matches!(wire.to_bson().unwrap().get("at"), Some(Bson::DateTime(_))));
        let decoded = decode(wire).unwrap();
        assert_eq!(decoded["at"].as_datetime(), Some(when));
    }

    #[test]
    fn test_decode_foreign_bson() {
        let oid = ObjectId::new();
        let bson = doc! { "_id": oid, "n": 5_i32, "l": 6_i64, "f": 0.5, "s": "x", "arr": [1, "two"] };
        let decoded = decode(WireDocument::from_bson(&bson).unwrap()).unwrap();

        assert_eq!(decoded["_id"]["$oid"].as_str(), Some(oid.to_hex().as_str()));
        assert_eq!(decoded["n"], Document::Int(5));
        assert_eq!(decoded["l"], Document::Int(6));
        assert_eq!(decoded["f"], Document::Float(0.5));
        assert_eq!(decoded["arr"], document!([1, "two"]));
    }

    #[test]
    fn test_root_must_be_object() {
        for root in [document!([1, 2]), Document::Int(1), Document::Null, document!("s")] {
            let err = encode(&root).unwrap_err();
            assert!(matches!(err, DocWireError::Encode(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_root_extended_json_scalar_is_rejected() {
        let err = encode(&document!({ "$numberLong": "1" })).unwrap_err();
        assert!(matches!(err, DocWireError::Encode(_)));
    }

    #[test]
    fn test_non_finite_numbers_are_rejected() {
        let mut nested = document!({ "a": { "b": [1.0] } });
        if let Some(Document::Array(items)) = nested.get_mut("a").and_then(|a| a.get_mut("b")) {
            items.push(Document::Float(f64::INFINITY));
        }
        let err = encode(&nested).unwrap_err();
        assert_eq!(
            err,
            DocWireError::Encode("non-finite number at 'a.b.1' has no wire representation".to_string())
        );
    }

    #[test]
    fn test_repeated_keys_are_rejected_not_collapsed() {
        let flat = Document::Object(vec![
            ("a".to_string(), Document::Int(1)),
            ("a".to_string(), Document::Int(2)),
        ]);
        assert_eq!(
            encode(&flat).unwrap_err(),
            DocWireError::Encode("duplicate key at 'a'".to_string())
        );

        let mut nested = document!({ "outer": [{ "k": 1 }] });
        if let Some(Document::Array(items)) = nested.get_mut("outer") {
            if let Document::Object(fields) = &mut items[0] {
                fields.push(("k".to_string(), Document::Int(2)));
            }
        }
        assert_eq!(
            encode(&nested).unwrap_err(),
            DocWireError::Encode("duplicate key at 'outer.0.k'".to_string())
        );
    }

    #[test]
    fn test_malformed_extended_json_is_rejected() {
        let err = encode(&document!({ "_id": { "$oid": "not-hex" } })).unwrap_err();
        assert!(matches!(err, DocWireError::Encode(_)));
    }

    #[test]
    fn test_operators_pass_through_untouched() {
        let update = document!({ "$set": { "name": "b" }, "$inc": { "n": 1 } });
        let bson = encode(&update).unwrap().to_bson().unwrap();
        assert_eq!(bson, doc! { "$set": { "name": "b" }, "$inc": { "n": 1 } });
    }

    #[test]
    fn test_encode_all_stops_on_first_failure() {
        let batch = vec![document!({ "a": 1 }), document!([1]), document!({ "b": 2 })];
        assert!(encode_all(&batch).is_err());
        assert_eq!(encode_all(&batch[..1]).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_document() {
        let wire = encode(&Document::object()).unwrap();
        assert_eq!(wire, WireDocument::empty());
        assert_eq!(decode(wire).unwrap(), Document::object());
    }
}

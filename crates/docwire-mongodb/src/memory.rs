//! In-process transport
//!
//! Keeps every collection in memory behind one lock and interprets the
//! subset of the query language the document layer is exercised with:
//!
//! - filters: equality on dotted paths (matching array members too),
//!   `$eq $ne $gt $gte $lt $lte $in $nin $exists`, top-level `$and`/`$or`
//! - updates: `$set $unset $inc`
//! - find options: `sort`, `skip`, `limit`, top-level `projection`
//!
//! Anything else is rejected with the same error kind a server would use.

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use docwire_common::{DocWireError, Result};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::codec::WireDocument;
use crate::transport::{CollectionRef, Namespace, Transport, WireCursor};

type Store = HashMap<Namespace, Vec<BsonDocument>>;

/// Shared in-memory store; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryTransport {
    store: Arc<Mutex<Store>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn collection(&self, namespace: &Namespace) -> Box<dyn CollectionRef> {
        Box::new(MemoryCollection {
            namespace: namespace.clone(),
            store: Arc::clone(&self.store),
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>> {
        let store = self.store.lock();
        let mut names: Vec<String> = store
            .keys()
            .filter(|ns| ns.database == database)
            .map(|ns| ns.collection.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn shutdown(&self) {
        tracing::debug!("in-memory transport shut down");
    }
}

struct MemoryCollection {
    namespace: Namespace,
    store: Arc<Mutex<Store>>,
}

impl MemoryCollection {
    fn insert_into(&self, documents: &mut Vec<BsonDocument>, wire: WireDocument) -> Result<()> {
        let document = with_id(wire.to_bson()?);
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        if documents
            .iter()
            .any(|d| d.get("_id").is_some_and(|existing| values_equal(existing, &id)))
        {
            return Err(DocWireError::write_failed(format!(
                "E11000 duplicate key error collection: {} index: _id_ dup key: {{ _id: {} }}",
                self.namespace, id
            )));
        }
        documents.push(document);
        Ok(())
    }

    fn update(&self, filter: WireDocument, update: WireDocument, multi: bool) -> Result<()> {
        let filter = filter.to_bson()?;
        let update = update.to_bson()?;
        validate_update(&update)?;

        let mut store = self.store.lock();
        let Some(documents) = store.get_mut(&self.namespace) else {
            return Ok(());
        };
        for document in documents.iter_mut() {
            if !matches(document, &filter)? {
                continue;
            }
            let mut updated = document.clone();
            apply_update(&mut updated, &update)?;
            *document = updated;
            if !multi {
                break;
            }
        }
        Ok(())
    }

    fn delete(&self, filter: WireDocument, multi: bool) -> Result<()> {
        let filter = filter.to_bson()?;
        let mut store = self.store.lock();
        let Some(documents) = store.get_mut(&self.namespace) else {
            return Ok(());
        };

        // Match everything first so a bad filter deletes nothing
        let mut hits = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            if matches(document, &filter)? {
                hits.push(index);
                if !multi {
                    break;
                }
            }
        }

        let mut index = 0;
        documents.retain(|_| {
            let keep = hits.binary_search(&index).is_err();
            index += 1;
            keep
        });
        tracing::trace!(deleted = hits.len(), "deleted from {}", self.namespace);
        Ok(())
    }
}

#[async_trait]
impl CollectionRef for MemoryCollection {
    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    async fn insert_one(&self, document: WireDocument) -> Result<()> {
        let mut store = self.store.lock();
        let documents = store.entry(self.namespace.clone()).or_default();
        self.insert_into(documents, document)
    }

    async fn insert_many(&self, documents: Vec<WireDocument>) -> Result<()> {
        let mut store = self.store.lock();
        let stored = store.entry(self.namespace.clone()).or_default();
        for document in documents {
            self.insert_into(stored, document)?;
        }
        Ok(())
    }

    async fn find(&self, filter: WireDocument, options: WireDocument) -> Result<Box<dyn WireCursor>> {
        let filter = filter.to_bson()?;
        let options = FindOptions::parse(&options.to_bson()?)?;

        let mut selected = Vec::new();
        {
            let store = self.store.lock();
            for document in store.get(&self.namespace).into_iter().flatten() {
                if matches(document, &filter)? {
                    selected.push(document.clone());
                }
            }
        }

        let pending = options
            .apply(selected)?
            .iter()
            .map(WireDocument::from_bson)
            .collect::<Result<VecDeque<_>>>()?;
        Ok(Box::new(MemoryCursor { pending }))
    }

    async fn count_documents(&self, filter: WireDocument) -> Result<u64> {
        let filter = filter.to_bson()?;
        let store = self.store.lock();
        let mut count = 0u64;
        for document in store.get(&self.namespace).into_iter().flatten() {
            if matches(document, &filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn estimated_document_count(&self) -> Result<u64> {
        let store = self.store.lock();
        Ok(store.get(&self.namespace).map_or(0, |d| d.len() as u64))
    }

    async fn update_one(&self, filter: WireDocument, update: WireDocument) -> Result<()> {
        self.update(filter, update, false)
    }

    async fn update_many(&self, filter: WireDocument, update: WireDocument) -> Result<()> {
        self.update(filter, update, true)
    }

    async fn replace_one(&self, filter: WireDocument, replacement: WireDocument) -> Result<()> {
        let filter = filter.to_bson()?;
        let replacement = replacement.to_bson()?;
        if let Some(key) = replacement.keys().find(|k| k.starts_with('$')) {
            return Err(DocWireError::write_failed(format!(
                "replacement document must not contain update operators, found '{}'",
                key
            )));
        }

        let mut store = self.store.lock();
        let Some(documents) = store.get_mut(&self.namespace) else {
            return Ok(());
        };
        for document in documents.iter_mut() {
            if matches(document, &filter)? {
                *document = replaced(document, &replacement)?;
                break;
            }
        }
        Ok(())
    }

    async fn delete_one(&self, filter: WireDocument) -> Result<()> {
        self.delete(filter, false)
    }

    async fn delete_many(&self, filter: WireDocument) -> Result<()> {
        self.delete(filter, true)
    }

    async fn drop_collection(&self) -> Result<()> {
        self.store.lock().remove(&self.namespace);
        Ok(())
    }

    async fn rename(&self, target: &Namespace, drop_target: bool) -> Result<()> {
        if *target == self.namespace {
            return Err(DocWireError::server("Can't rename a collection to itself"));
        }

        let mut store = self.store.lock();
        if !store.contains_key(&self.namespace) {
            return Err(DocWireError::server(format!(
                "source namespace {} does not exist",
                self.namespace
            )));
        }
        if store.contains_key(target) && !drop_target {
            return Err(DocWireError::server(format!("target namespace {} exists", target)));
        }

        let documents = store.remove(&self.namespace).unwrap_or_default();
        store.insert(target.clone(), documents);
        Ok(())
    }
}

struct MemoryCursor {
    pending: VecDeque<WireDocument>,
}

#[async_trait]
impl WireCursor for MemoryCursor {
    async fn advance(&mut self) -> Result<Option<WireDocument>> {
        Ok(self.pending.pop_front())
    }
}

/// Put a generated `_id` first when the document has none
fn with_id(document: BsonDocument) -> BsonDocument {
    if document.contains_key("_id") {
        return document;
    }
    let mut stored = BsonDocument::new();
    stored.insert("_id", ObjectId::new());
    for (key, value) in document {
        stored.insert(key, value);
    }
    stored
}

fn replaced(current: &BsonDocument, replacement: &BsonDocument) -> Result<BsonDocument> {
    let id = current.get("_id").cloned().unwrap_or(Bson::Null);
    if let Some(new_id) = replacement.get("_id") {
        if !values_equal(new_id, &id) {
            return Err(immutable_id());
        }
    }

    let mut document = BsonDocument::new();
    document.insert("_id", id);
    for (key, value) in replacement {
        if key != "_id" {
            document.insert(key.clone(), value.clone());
        }
    }
    Ok(document)
}

fn immutable_id() -> DocWireError {
    DocWireError::write_failed("Performing an update on the path '_id' would modify the immutable field '_id'")
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

fn matches(document: &BsonDocument, filter: &BsonDocument) -> Result<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(DocWireError::query_failed(format!("unknown top level operator: {}", op)))
            }
            path => field_matches(lookup(document, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(op: &str, condition: &'a Bson) -> Result<Vec<&'a BsonDocument>> {
    let invalid = || DocWireError::query_failed(format!("{} argument must be a non-empty array of documents", op));
    let items = condition.as_array().filter(|a| !a.is_empty()).ok_or_else(invalid)?;
    items.iter().map(|item| item.as_document().ok_or_else(invalid)).collect()
}

fn is_operator_document(condition: &Bson) -> Option<&BsonDocument> {
    condition
        .as_document()
        .filter(|d| d.keys().next().is_some_and(|k| k.starts_with('$')))
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> Result<bool> {
    let Some(operators) = is_operator_document(condition) else {
        return Ok(equals_or_contains(value, condition));
    };

    for (op, argument) in operators {
        let matched = match op.as_str() {
            "$eq" => equals_or_contains(value, argument),
            "$ne" => !equals_or_contains(value, argument),
            "$gt" => any_compares(value, argument, |o| o == Ordering::Greater),
            "$gte" => any_compares(value, argument, |o| o != Ordering::Less),
            "$lt" => any_compares(value, argument, |o| o == Ordering::Less),
            "$lte" => any_compares(value, argument, |o| o != Ordering::Greater),
            "$in" => in_list(op, value, argument)?,
            "$nin" => !in_list(op, value, argument)?,
            "$exists" => value.is_some() == truthy(argument),
            other => return Err(DocWireError::query_failed(format!("unknown operator: {}", other))),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_list(op: &str, value: Option<&Bson>, argument: &Bson) -> Result<bool> {
    let candidates = argument
        .as_array()
        .ok_or_else(|| DocWireError::query_failed(format!("{} needs an array", op)))?;
    Ok(candidates.iter().any(|c| equals_or_contains(value, c)))
}

/// Resolve a dotted path; numeric segments index into arrays
fn lookup<'a>(document: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Missing fields equal `null`; arrays match when any member does
fn equals_or_contains(value: Option<&Bson>, target: &Bson) -> bool {
    match value {
        None => matches!(target, Bson::Null),
        Some(value) => {
            values_equal(value, target)
                || matches!(value, Bson::Array(items) if items.iter().any(|i| values_equal(i, target)))
        }
    }
}

fn any_compares(value: Option<&Bson>, target: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(value) = value else {
        return false;
    };
    let hit = |v: &Bson| compare_same_type(v, target).is_some_and(&accept);
    match value {
        Bson::Array(items) => items.iter().any(hit),
        other => hit(other),
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => number(other).map_or(true, |n| n != 0.0),
    }
}

// ---------------------------------------------------------------------------
// Value comparison
// ---------------------------------------------------------------------------

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    compare_same_type(a, b).map_or(a == b, |o| o == Ordering::Equal)
}

/// Ordering within one type bracket; numbers compare across widths
fn compare_same_type(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (integer(a), integer(b)) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (number(a), number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 1,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) => 2,
        Some(Bson::String(_) | Bson::Symbol(_)) => 3,
        Some(Bson::Document(_)) => 4,
        Some(Bson::Array(_)) => 5,
        Some(Bson::Binary(_)) => 6,
        Some(Bson::ObjectId(_)) => 7,
        Some(Bson::Boolean(_)) => 8,
        Some(Bson::DateTime(_)) => 9,
        Some(Bson::Timestamp(_)) => 10,
        Some(Bson::RegularExpression(_)) => 11,
        Some(_) => 12,
    }
}

/// Total order used by `sort`: by type bracket, then by value
fn sort_order(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(a), Some(b)) => compare_same_type(a, b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

fn validate_update(update: &BsonDocument) -> Result<()> {
    if update.is_empty() || update.keys().any(|k| !k.starts_with('$')) {
        return Err(DocWireError::write_failed("update document requires atomic operators"));
    }
    Ok(())
}

fn apply_update(document: &mut BsonDocument, update: &BsonDocument) -> Result<()> {
    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| DocWireError::write_failed(format!("modifier {} expects a document", op)))?;

        for (path, argument) in fields {
            if path == "_id" || path.starts_with("_id.") {
                let unchanged = op == "$set" && lookup(document, path).is_some_and(|v| values_equal(v, argument));
                if !unchanged {
                    return Err(immutable_id());
                }
            }

            match op.as_str() {
                "$set" => set_path(document, path, argument.clone())?,
                "$unset" => unset_path(document, path),
                "$inc" => {
                    let current = lookup(document, path);
                    let sum = increment(path, current, argument)?;
                    set_path(document, path, sum)?;
                }
                other => {
                    return Err(DocWireError::write_failed(format!("unknown update operator: {}", other)))
                }
            }
        }
    }
    Ok(())
}

fn set_path(document: &mut BsonDocument, path: &str, value: Bson) -> Result<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, BsonDocument::new());
            }
            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                other => Err(DocWireError::write_failed(format!(
                    "cannot create field '{}' in element {{{}: {}}}",
                    rest,
                    head,
                    other.map_or_else(String::new, |v| v.to_string())
                ))),
            }
        }
    }
}

fn unset_path(document: &mut BsonDocument, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

fn increment(path: &str, current: Option<&Bson>, by: &Bson) -> Result<Bson> {
    if number(by).is_none() {
        return Err(DocWireError::write_failed(format!(
            "cannot increment '{}' with non-numeric argument {}",
            path, by
        )));
    }
    let current = current.cloned().unwrap_or(Bson::Int32(0));
    let sum = match (&current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => a.checked_add(*b).map_or_else(|| Bson::Int64(i64::from(*a) + i64::from(*b)), Bson::Int32),
        _ => match (integer(&current), integer(by)) {
            (Some(a), Some(b)) => Bson::Int64(a.checked_add(b).ok_or_else(|| {
                DocWireError::write_failed(format!("integer overflow incrementing '{}'", path))
            })?),
            _ => match number(&current) {
                Some(a) => Bson::Double(a + number(by).unwrap_or_default()),
                None => {
                    return Err(DocWireError::write_failed(format!(
                        "cannot apply $inc to '{}' of non-numeric type {:?}",
                        path,
                        current.element_type()
                    )))
                }
            },
        },
    };
    Ok(sum)
}

// ---------------------------------------------------------------------------
// Find options
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FindOptions {
    sort: Vec<(String, bool)>,
    skip: usize,
    limit: Option<usize>,
    projection: Option<Projection>,
}

struct Projection {
    include: bool,
    fields: Vec<String>,
    with_id: bool,
}

impl FindOptions {
    fn parse(options: &BsonDocument) -> Result<Self> {
        let mut parsed = Self::default();

        if let Some(sort) = options.get("sort") {
            let sort = sort
                .as_document()
                .ok_or_else(|| DocWireError::query_failed("sort must be a document"))?;
            for (field, direction) in sort {
                let ascending = match number(direction) {
                    Some(n) if n == 1.0 => true,
                    Some(n) if n == -1.0 => false,
                    _ => {
                        return Err(DocWireError::query_failed(format!(
                            "sort direction for '{}' must be 1 or -1",
                            field
                        )))
                    }
                };
                parsed.sort.push((field.clone(), ascending));
            }
        }

        if let Some(skip) = options.get("skip") {
            parsed.skip = integer(skip)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| DocWireError::query_failed("skip must be a non-negative integer"))?;
        }

        if let Some(limit) = options.get("limit") {
            let limit = integer(limit).ok_or_else(|| DocWireError::query_failed("limit must be an integer"))?;
            parsed.limit = match limit.unsigned_abs() {
                0 => None,
                n => Some(usize::try_from(n).unwrap_or(usize::MAX)),
            };
        }

        if let Some(projection) = options.get("projection") {
            let projection = projection
                .as_document()
                .ok_or_else(|| DocWireError::query_failed("projection must be a document"))?;
            parsed.projection = Projection::parse(projection)?;
        }

        Ok(parsed)
    }

    fn apply(&self, mut documents: Vec<BsonDocument>) -> Result<Vec<BsonDocument>> {
        if !self.sort.is_empty() {
            documents.sort_by(|a, b| {
                self.sort
                    .iter()
                    .map(|(field, ascending)| {
                        let order = sort_order(lookup(a, field), lookup(b, field));
                        if *ascending {
                            order
                        } else {
                            order.reverse()
                        }
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let window = documents
            .into_iter()
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX));
        Ok(match &self.projection {
            Some(projection) => window.map(|d| projection.apply(d)).collect(),
            None => window.collect(),
        })
    }
}

impl Projection {
    fn parse(spec: &BsonDocument) -> Result<Option<Self>> {
        let mut with_id = None;
        let mut include = None;
        let mut fields = Vec::new();

        for (field, flag) in spec {
            let on = truthy(flag);
            if field == "_id" {
                with_id = Some(on);
                continue;
            }
            match include {
                Some(mode) if mode != on => {
                    return Err(DocWireError::query_failed(
                        "cannot mix inclusion and exclusion in a projection",
                    ))
                }
                _ => include = Some(on),
            }
            fields.push(field.clone());
        }

        // `{"_id": 1}` alone is an inclusion of nothing else; `{"_id": 0}` alone excludes only `_id`
        Ok(match (include, with_id) {
            (Some(include), with_id) => Some(Self {
                include,
                fields,
                with_id: with_id.unwrap_or(true),
            }),
            (None, Some(with_id)) => Some(Self {
                include: with_id,
                fields,
                with_id,
            }),
            (None, None) => None,
        })
    }

    fn apply(&self, document: BsonDocument) -> BsonDocument {
        let mut projected = BsonDocument::new();
        for (key, value) in document {
            let keep = if key == "_id" {
                self.with_id
            } else {
                self.fields.contains(&key) == self.include
            };
            if keep {
                projected.insert(key, value);
            }
        }
        projected
    }
}

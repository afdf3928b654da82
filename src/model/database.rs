//! Record storage.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::trace;

use crate::core::Result;
use crate::routing::wildcard_match;
use crate::values::to_plain_string;

/// A stored row. The `uid` field is owned by the database.
pub type Record = Map<String, Value>;

pub const UID: &str = "uid";

/// Selection criteria for [`Database::select`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// `(field, value)` pairs, all of which must match. `*` in a value is a wildcard.
    pub conditions: Vec<(String, String)>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// `(field, descending)`
    pub order: Option<(String, bool)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn order(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order = Some((field.into(), descending));
        self
    }
}

/// Storage backend for models.
pub trait Database: Send + Sync {
    /// Store a new record and return its uid.
    fn insert(&self, table: &str, record: Record) -> Result<u64>;

    /// Merge `record` into the stored row. False when the row does not exist.
    fn update(&self, table: &str, uid: u64, record: Record) -> Result<bool>;

    fn delete(&self, table: &str, uid: u64) -> Result<bool>;

    fn find(&self, table: &str, uid: u64) -> Result<Option<Record>>;

    fn select(&self, table: &str, query: &Query) -> Result<Vec<Record>>;

    fn count(&self, table: &str, conditions: &[(String, String)]) -> Result<usize>;
}

/// Whether `record` satisfies every condition (string-wise comparison).
pub fn matches(record: &Record, conditions: &[(String, String)]) -> bool {
    conditions.iter().all(|(field, expected)| {
        let actual = record.get(field).map(to_plain_string).unwrap_or_default();
        if expected.contains('*') {
            wildcard_match(expected, &actual).is_some()
        } else {
            actual == *expected
        }
    })
}

/// Numbers compare numerically, everything else by its plain string.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => to_plain_string(x).cmp(&to_plain_string(y)),
    }
}

#[derive(Default)]
struct Table {
    next_uid: u64,
    rows: BTreeMap<u64, Record>,
}

/// Schemaless in-memory tables with auto-increment uids.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemoryDatabase {
    fn insert(&self, table: &str, mut record: Record) -> Result<u64> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let table_rows = tables.entry(table.to_string()).or_default();
        table_rows.next_uid += 1;
        let uid = table_rows.next_uid;
        record.insert(UID.to_string(), Value::from(uid));
        table_rows.rows.insert(uid, record);
        trace!(table = table, uid = uid, "insert");
        Ok(uid)
    }

    fn update(&self, table: &str, uid: u64, record: Record) -> Result<bool> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let Some(row) = tables.get_mut(table).and_then(|t| t.rows.get_mut(&uid)) else {
            return Ok(false);
        };
        for (field, value) in record {
            if field != UID {
                row.insert(field, value);
            }
        }
        trace!(table = table, uid = uid, "update");
        Ok(true)
    }

    fn delete(&self, table: &str, uid: u64) -> Result<bool> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .get_mut(table)
            .is_some_and(|t| t.rows.remove(&uid).is_some()))
    }

    fn find(&self, table: &str, uid: u64) -> Result<Option<Record>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.get(table).and_then(|t| t.rows.get(&uid)).cloned())
    }

    fn select(&self, table: &str, query: &Query) -> Result<Vec<Record>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let Some(rows) = tables.get(table).map(|t| &t.rows) else {
            return Ok(Vec::new());
        };

        let mut selected: Vec<&Record> = rows
            .values()
            .filter(|row| matches(row, &query.conditions))
            .collect();

        if let Some((field, descending)) = &query.order {
            // Stable sort; ties stay in uid order.
            selected.sort_by(|a, b| {
                let ordering = compare_values(a.get(field), b.get(field));
                if *descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        Ok(selected
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn count(&self, table: &str, conditions: &[(String, String)]) -> Result<usize> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.get(table).map_or(0, |t| {
            t.rows.values().filter(|row| matches(row, conditions)).count()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn seeded() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        for (name, age) in [("ann", 31), ("bob", 25), ("anton", 40)] {
            db.insert("user", record(json!({"name": name, "age": age})))
                .unwrap();
        }
        db
    }

    #[test]
    fn test_insert_assigns_increasing_uids() {
        let db = MemoryDatabase::new();
        assert_eq!(db.insert("t", Record::new()).unwrap(), 1);
        assert_eq!(db.insert("t", Record::new()).unwrap(), 2);
        assert_eq!(db.insert("other", Record::new()).unwrap(), 1);
        assert_eq!(db.find("t", 2).unwrap().unwrap()["uid"], json!(2));
    }

    #[test]
    fn test_update_merges_and_keeps_uid() {
        let db = seeded();
        assert!(db
            .update("user", 1, record(json!({"age": 32, "uid": 99})))
            .unwrap());
        let row = db.find("user", 1).unwrap().unwrap();
        assert_eq!(row["age"], json!(32));
        assert_eq!(row["name"], json!("ann"));
        assert_eq!(row["uid"], json!(1));
        assert!(!db.update("user", 42, Record::new()).unwrap());
    }

    #[test]
    fn test_delete() {
        let db = seeded();
        assert!(db.delete("user", 2).unwrap());
        assert!(!db.delete("user", 2).unwrap());
        assert!(!db.delete("nope", 1).unwrap());
        assert_eq!(db.count("user", &[]).unwrap(), 2);
    }

    #[test]
    fn test_select_conditions_and_wildcards() {
        let db = seeded();
        let rows = db
            .select("user", &Query::new().condition("name", "an*"))
            .unwrap();
        assert_eq!(rows.len(), 2);
        let rows = db
            .select("user", &Query::new().condition("age", "25"))
            .unwrap();
        assert_eq!(rows[0]["name"], json!("bob"));
        assert_eq!(db.count("user", &[("name".into(), "*o*".into())]).unwrap(), 2);
        assert!(db.select("missing", &Query::new()).unwrap().is_empty());
    }

    #[test]
    fn test_select_order_limit_offset() {
        let db = seeded();
        let rows = db
            .select("user", &Query::new().order("age", true).limit(2))
            .unwrap();
        let names: Vec<&Value> = rows.iter().map(|r| &r["name"]).collect();
        assert_eq!(names, vec![&json!("anton"), &json!("ann")]);

        let rows = db
            .select("user", &Query::new().order("name", false).offset(1))
            .unwrap();
        let names: Vec<&Value> = rows.iter().map(|r| &r["name"]).collect();
        assert_eq!(names, vec![&json!("anton"), &json!("bob")]);
    }
}

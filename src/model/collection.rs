//! Query results.

use std::sync::Arc;

use serde_json::Value;

use super::{Database, Query, Record, Rules};
use crate::core::Result;
use crate::export;

/// Decoded records of one table, in query order.
#[derive(Debug, Clone)]
pub struct Collection {
    table: String,
    records: Vec<Record>,
}

impl Collection {
    pub fn load(db: Arc<dyn Database>, rules: Arc<Rules>, query: &Query) -> Result<Self> {
        let records = db
            .select(rules.table(), query)?
            .iter()
            .map(|stored| rules.decode(stored))
            .collect();
        Ok(Self {
            table: rules.table().to_string(),
            records,
        })
    }

    #[inline]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Records as a JSON array.
    pub fn to_value(&self) -> Value {
        Value::Array(self.records.iter().cloned().map(Value::Object).collect())
    }

    /// Encode with one of the [`export::ENCODERS`].
    pub fn export(&self, format: &str) -> Result<String> {
        export::encode(format, &self.to_value())
    }
}

impl IntoIterator for Collection {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemoryDatabase, Model};
    use serde_json::json;

    fn seeded() -> (Arc<dyn Database>, Arc<Rules>) {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let rules = Arc::new(
            Rules::from_value("book", &json!({"tags": {"type": "csv"}})).unwrap(),
        );
        for (title, tags) in [("Dune", json!(["sf"])), ("Emma", json!(["classic", "uk"]))] {
            let mut book = Model::new(Arc::clone(&db), Arc::clone(&rules));
            book.set("title", json!(title));
            book.set("tags", tags);
            book.save().unwrap();
        }
        (db, rules)
    }

    #[test]
    fn test_load_decodes_records() {
        let (db, rules) = seeded();
        let books = Collection::load(db, rules, &Query::new().order("title", true)).unwrap();
        assert_eq!(books.count(), 2);
        assert_eq!(books.table(), "book");
        let first = books.iter().next().unwrap();
        assert_eq!(first["title"], json!("Emma"));
        assert_eq!(first["tags"], json!(["classic", "uk"]));
    }

    #[test]
    fn test_export_formats() {
        let (db, rules) = seeded();
        let books = Collection::load(db, rules, &Query::new()).unwrap();
        let csv = books.export("csv").unwrap();
        assert!(csv.starts_with("title,tags.0,uid,tags.1\r\n"));
        assert!(books.export("json").unwrap().starts_with("[{"));
        assert!(books.export("xml").unwrap().contains("<field name=\"title\">Dune</field>"));
    }

    #[test]
    fn test_empty_collection() {
        let (db, rules) = seeded();
        let none = Collection::load(db, rules, &Query::new().condition("title", "Zorro")).unwrap();
        assert!(none.is_empty());
        assert_eq!(none.to_value(), json!([]));
    }
}

//! Active-record models over a [`Database`].
//!
//! A [`Model`] holds one record in its API form. Saving applies the table's
//! [`Rules`] (defaults, validation, transcoding) and writes the stored form;
//! loading decodes it back.

mod collection;
mod database;
mod rules;

pub use collection::Collection;
pub use database::{compare_values, matches, Database, MemoryDatabase, Query, Record, UID};
pub use rules::{FieldRule, Rules, Transcoder};

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::core::{Error, Result};

pub struct Model {
    db: Arc<dyn Database>,
    rules: Arc<Rules>,
    uid: Option<u64>,
    record: Record,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("table", &self.rules.table())
            .field("uid", &self.uid)
            .field("record", &self.record)
            .finish()
    }
}

impl Model {
    /// Unsaved model for the rules' table.
    pub fn new(db: Arc<dyn Database>, rules: Arc<Rules>) -> Self {
        Self {
            db,
            rules,
            uid: None,
            record: Record::new(),
        }
    }

    /// Load by uid.
    pub fn load(db: Arc<dyn Database>, rules: Arc<Rules>, uid: u64) -> Result<Option<Self>> {
        let Some(stored) = db.find(rules.table(), uid)? else {
            return Ok(None);
        };
        let record = rules.decode(&stored);
        Ok(Some(Self {
            db,
            rules,
            uid: Some(uid),
            record,
        }))
    }

    pub fn load_all(db: Arc<dyn Database>, rules: Arc<Rules>, query: &Query) -> Result<Collection> {
        Collection::load(db, rules, query)
    }

    pub fn count_all(
        db: &dyn Database,
        rules: &Rules,
        conditions: &[(String, String)],
    ) -> Result<usize> {
        db.count(rules.table(), conditions)
    }

    #[inline]
    pub fn table(&self) -> &str {
        self.rules.table()
    }

    #[inline]
    pub fn uid(&self) -> Option<u64> {
        self.uid
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.record.get(field)
    }

    /// Set a field. `uid` cannot be set.
    pub fn set(&mut self, field: &str, value: Value) {
        if field != UID {
            self.record.insert(field.to_string(), value);
        }
    }

    /// Set every field of `record` except `uid`.
    pub fn fill(&mut self, record: &Record) {
        for (field, value) in record {
            self.set(field, value.clone());
        }
    }

    /// Validate and write. Returns the uid.
    pub fn save(&mut self) -> Result<u64> {
        self.rules.apply_defaults(&mut self.record);
        let stored = self.rules.encode(&self.record)?;
        let decoded = self.rules.decode(&stored);

        let uid = match self.uid {
            Some(uid) => {
                if !self.db.update(self.rules.table(), uid, stored)? {
                    return Err(Error::NotFound);
                }
                uid
            }
            None => self.db.insert(self.rules.table(), stored)?,
        };
        debug!(table = self.rules.table(), uid = uid, "model saved");

        self.uid = Some(uid);
        self.record = decoded;
        self.record.insert(UID.to_string(), Value::from(uid));
        Ok(uid)
    }

    /// Delete the stored record. An unsaved model deletes nothing.
    pub fn delete(&mut self) -> Result<bool> {
        let Some(uid) = self.uid.take() else {
            return Ok(false);
        };
        self.record.remove(UID);
        self.db.delete(self.rules.table(), uid)
    }

    /// The record in API form. After `save` this is the decoded stored
    /// record, so transcoded fields come back normalised.
    pub fn export(&self) -> Value {
        Value::Object(self.record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (Arc<dyn Database>, Arc<Rules>) {
        let rules = Rules::from_value(
            "user",
            &json!({
                "name": {"type": "string", "required": true},
                "tags": {"type": "csv", "default": []}
            }),
        )
        .unwrap();
        (Arc::new(MemoryDatabase::new()), Arc::new(rules))
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (db, rules) = setup();
        let mut user = Model::new(Arc::clone(&db), Arc::clone(&rules));
        user.set("name", json!("ann"));
        user.set("tags", json!(["a", "b"]));
        user.set("uid", json!(77));
        let uid = user.save().unwrap();
        assert_eq!(uid, 1);
        assert_eq!(user.get("uid"), Some(&json!(1)));

        // Stored form is transcoded
        assert_eq!(db.find("user", 1).unwrap().unwrap()["tags"], json!("a,b"));

        let loaded = Model::load(db, rules, uid).unwrap().unwrap();
        assert_eq!(
            loaded.export(),
            json!({"name": "ann", "tags": ["a", "b"], "uid": 1})
        );
    }

    #[test]
    fn test_export_after_save_is_transcoded() {
        let (db, _) = setup();
        let rules = Rules::from_value(
            "item",
            &json!({"count": {"type": "int"}, "tags": {"type": "csv"}}),
        )
        .unwrap();
        let mut item = Model::new(db, Arc::new(rules));
        item.set("count", json!("7"));
        item.set("tags", json!(["x", "y"]));
        item.save().unwrap();
        assert_eq!(
            item.export(),
            json!({"count": 7, "tags": ["x", "y"], "uid": 1})
        );
    }

    #[test]
    fn test_update_existing() {
        let (db, rules) = setup();
        let mut user = Model::new(Arc::clone(&db), Arc::clone(&rules));
        user.set("name", json!("ann"));
        user.save().unwrap();

        let mut loaded = Model::load(Arc::clone(&db), Arc::clone(&rules), 1)
            .unwrap()
            .unwrap();
        loaded.set("name", json!("anne"));
        assert_eq!(loaded.save().unwrap(), 1);
        assert_eq!(Model::count_all(db.as_ref(), &rules, &[]).unwrap(), 1);
        assert_eq!(db.find("user", 1).unwrap().unwrap()["name"], json!("anne"));
    }

    #[test]
    fn test_validation_blocks_save() {
        let (db, rules) = setup();
        let mut user = Model::new(Arc::clone(&db), rules);
        assert!(matches!(user.save(), Err(Error::Validation { .. })));
        assert_eq!(db.count("user", &[]).unwrap(), 0);
    }

    #[test]
    fn test_delete() {
        let (db, rules) = setup();
        let mut user = Model::new(Arc::clone(&db), Arc::clone(&rules));
        assert!(!user.delete().unwrap());
        user.set("name", json!("ann"));
        user.save().unwrap();
        assert!(user.delete().unwrap());
        assert!(user.uid().is_none());
        assert!(Model::load(db, rules, 1).unwrap().is_none());
    }
}

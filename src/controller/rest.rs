//! REST access to models.
//!
//! Paths are `<mount>/<type>[/<uid>][.<ext>]`, e.g. `api/user/5.json`. The
//! type must have rules at `model.<type>` in the data tree.
//!
//! | method     | without uid                          | with uid        |
//! |------------|--------------------------------------|-----------------|
//! | POST       | create one object or a list          | 403             |
//! | GET, HEAD  | list (`?count`, conditions, paging)  | read one        |
//! | PUT        | update a list of objects with `uid`  | update one      |
//! | DELETE     | delete a list of `{uid}`             | delete one      |
//!
//! Every record is published on `authorize` before it is touched; a failing
//! handler aborts the request.

use std::sync::Arc;

use serde_json::{json, Value};

use super::{split_extension, Controller, Site};
use crate::broker::{topics, Event};
use crate::cache::NEVER;
use crate::core::{Error, Request, Response, Result};
use crate::model::{Model, Query, Record, Rules, UID};

pub struct RestController {
    site: Site,
    method: String,
    kind: String,
    uid: Option<u64>,
    extension: Option<String>,
}

impl RestController {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            method: String::new(),
            kind: String::new(),
            uid: None,
            extension: None,
        }
    }

    fn authorize(&self, action: &str, record: &Value) -> Result<()> {
        self.site.broker.publish(
            topics::AUTHORIZE,
            &mut Event::Authorize {
                controller: "rest",
                action,
                record,
            },
        )
    }

    fn rules(&self) -> Result<Arc<Rules>> {
        let valid = !self.kind.is_empty()
            && self
                .kind
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::NotFound);
        }
        Rules::load(&self.site.data, &self.kind)?
            .map(Arc::new)
            .ok_or(Error::NotFound)
    }

    fn model(&self, rules: &Arc<Rules>) -> Model {
        Model::new(Arc::clone(&self.site.database), Arc::clone(rules))
    }

    fn load(&self, rules: &Arc<Rules>, uid: u64) -> Result<Model> {
        Model::load(Arc::clone(&self.site.database), Arc::clone(rules), uid)?
            .ok_or(Error::NotFound)
    }

    fn create(&self, rules: &Arc<Rules>, input: Value) -> Result<Value> {
        if self.uid.is_some() {
            return Err(Error::Forbidden("cannot create with a uid".into()));
        }
        let (items, single) = match input {
            Value::Array(items) => (items, false),
            item => (vec![item], true),
        };
        let records = items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) if !record.get(UID).is_some_and(has_uid) => Ok(record),
                _ => Err(Error::Forbidden("items must be objects without uid".into())),
            })
            .collect::<Result<Vec<Record>>>()?;

        let mut created = Vec::with_capacity(records.len());
        for record in records {
            let mut model = self.model(rules);
            model.fill(&record);
            self.authorize("create", &model.export())?;
            model.save()?;
            created.push(model.export());
        }
        Ok(if single {
            created.pop().unwrap_or(Value::Null)
        } else {
            Value::Array(created)
        })
    }

    fn read(&self, rules: &Arc<Rules>, request: &Request) -> Result<Value> {
        if let Some(uid) = self.uid {
            let record = self.load(rules, uid)?.export();
            self.authorize("read", &record)?;
            return Ok(record);
        }

        let query = query_from(request);
        if request.has_param("count") {
            let count = Model::count_all(self.site.database.as_ref(), rules, &query.conditions)?;
            let data = json!({ "count": count });
            self.authorize("read", &data)?;
            return Ok(data);
        }

        let collection = Model::load_all(Arc::clone(&self.site.database), Arc::clone(rules), &query)?;
        if collection.is_empty() {
            return Err(Error::NotFound);
        }
        let data = collection.to_value();
        if let Value::Array(records) = &data {
            for record in records {
                self.authorize("read", record)?;
            }
        }
        Ok(data)
    }

    fn update(&self, rules: &Arc<Rules>, input: Value) -> Result<Value> {
        let items: Vec<(u64, Record)> = match (self.uid, input) {
            (Some(uid), Value::Object(record)) => vec![(uid, record)],
            (Some(uid), Value::Null) => vec![(uid, Record::new())],
            (Some(_), _) => return Err(Error::Forbidden("item must be an object".into())),
            (None, Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => match record.get(UID).and_then(uid_of) {
                        Some(uid) => Ok((uid, record)),
                        None => Err(Error::Forbidden("items must carry a uid".into())),
                    },
                    _ => Err(Error::Forbidden("items must be objects".into())),
                })
                .collect::<Result<_>>()?,
            (None, _) => return Err(Error::Forbidden("expected a list of objects".into())),
        };

        let mut updated = Vec::with_capacity(items.len());
        for (uid, record) in items {
            let mut model = self.load(rules, uid)?;
            model.fill(&record);
            self.authorize("update", &model.export())?;
            model.save()?;
            updated.push(model.export());
        }
        Ok(if self.uid.is_some() {
            updated.pop().unwrap_or(Value::Null)
        } else {
            Value::Array(updated)
        })
    }

    fn delete(&self, rules: &Arc<Rules>, input: Value) -> Result<Value> {
        let uids: Vec<u64> = match self.uid {
            Some(uid) => vec![uid],
            None => match input {
                Value::Array(items) => items
                    .iter()
                    .map(|item| item.get(UID).and_then(uid_of))
                    .collect::<Option<_>>()
                    .ok_or_else(|| Error::Forbidden("items must carry a uid".into()))?,
                _ => return Err(Error::Forbidden("expected a list of {uid}".into())),
            },
        };

        for uid in uids {
            let mut model = self.load(rules, uid)?;
            self.authorize("delete", &model.export())?;
            model.delete()?;
        }
        Ok(Value::Bool(true))
    }
}

fn uid_of(value: &Value) -> Option<u64> {
    let uid = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    uid.filter(|uid| *uid > 0)
}

fn has_uid(value: &Value) -> bool {
    uid_of(value).is_some()
}

/// `conditions[]=field::value`, `limit`, `offset`, `order`, `sort=desc`.
fn query_from(request: &Request) -> Query {
    let mut query = Query::new();
    for condition in request.param_list("conditions") {
        if let Some((field, value)) = condition.split_once("::") {
            if !field.is_empty() {
                query = query.condition(field, value);
            }
        }
    }
    if let Some(limit) = request.param_as::<usize>("limit").filter(|l| *l > 0) {
        query = query.limit(limit);
    }
    if let Some(offset) = request.param_as::<usize>("offset") {
        query = query.offset(offset);
    }
    if let Some(order) = request.param("order").filter(|o| !o.is_empty()) {
        let descending = request
            .param("sort")
            .is_some_and(|s| s.eq_ignore_ascii_case("d") || s.eq_ignore_ascii_case("desc"));
        query = query.order(order, descending);
    }
    query
}

impl Controller for RestController {
    fn bootstrap(&mut self, method: &str, path: &str) -> Result<()> {
        let (path, extension) = split_extension(path);
        // The first segment is the mount point.
        let mut segments = path.split('/').filter(|s| !s.is_empty()).skip(1);
        self.method = method.to_ascii_uppercase();
        self.kind = segments.next().unwrap_or_default().to_string();
        self.uid = match segments.next() {
            Some(raw) => Some(
                raw.parse::<u64>()
                    .ok()
                    .filter(|uid| *uid > 0)
                    .ok_or(Error::NotFound)?,
            ),
            None => None,
        };
        if segments.next().is_some() {
            return Err(Error::NotFound);
        }
        self.extension = extension.map(str::to_string);
        Ok(())
    }

    fn respond(&mut self, request: &Request) -> Result<Response> {
        let rules = self.rules()?;
        let data = match self.method.as_str() {
            "POST" => self.create(&rules, request.data()?)?,
            "GET" | "HEAD" => self.read(&rules, request)?,
            "PUT" => self.update(&rules, request.data()?)?,
            "DELETE" => self.delete(&rules, request.data()?)?,
            _ => return Err(Error::MethodNotAllowed),
        };

        let env = &self.site.env;
        let mut response = Response::new(env);
        response.set_data(&data, self.extension.as_deref(), request, env)?;
        response.set_ttl(NEVER);
        Ok(response)
    }
}

//! Topic-based publish/subscribe.
//!
//! Handlers receive a mutable [`Event`] and may veto by returning an error;
//! publishing stops at the first failing handler. The dispatcher publishes
//! `rewrite`, `preprocess`, `authorize`, `response` and `exception`, the
//! server publishes `shutdown`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::core::{Error, Request, Response, Result};
use crate::environment::Environment;

pub mod topics {
    pub const REWRITE: &str = "rewrite";
    pub const PREPROCESS: &str = "preprocess";
    pub const AUTHORIZE: &str = "authorize";
    pub const RESPONSE: &str = "response";
    pub const EXCEPTION: &str = "exception";
    pub const SHUTDOWN: &str = "shutdown";
}

/// Payload handed to subscribers.
#[derive(Debug)]
pub enum Event<'a> {
    /// Before routing; handlers may rewrite method and path.
    Rewrite {
        method: &'a mut String,
        path: &'a mut String,
    },
    /// After a controller was chosen, before it runs.
    Preprocess {
        controller: &'a str,
        method: &'a str,
        path: &'a str,
    },
    /// A model controller is about to act on a record.
    Authorize {
        controller: &'a str,
        action: &'a str,
        record: &'a Value,
    },
    /// A response is about to be delivered.
    Response {
        request: &'a Request,
        response: &'a Response,
    },
    /// A request failed.
    Exception {
        request: Option<&'a Request>,
        error: &'a Error,
    },
    Shutdown,
    Message(&'a Value),
}

pub type Handler = Arc<dyn Fn(&mut Event<'_>) -> Result<()> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct Broker {
    topics: RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker with the site's `handlers` table applied.
    pub fn from_environment(env: &Environment) -> Result<Self> {
        let broker = Self::new();
        if let Some(Value::Object(table)) = env.get("handlers") {
            for (topic, names) in table {
                let names: Vec<&str> = match names {
                    Value::String(name) => vec![name.as_str()],
                    Value::Array(list) => list.iter().filter_map(Value::as_str).collect(),
                    _ => Vec::new(),
                };
                for name in names {
                    broker.subscribe_named(topic, name)?;
                }
            }
        }
        Ok(broker)
    }

    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&mut Event<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Attach a built-in handler by name.
    pub fn subscribe_named(&self, topic: &str, name: &str) -> Result<SubscriptionId> {
        let id = match name {
            "log_exception" => self.subscribe(topic, log_exception),
            "log_response" => self.subscribe(topic, log_response),
            "log_shutdown" => self.subscribe(topic, log_shutdown),
            other => {
                return Err(Error::Internal(format!("unknown handler: {}", other)));
            }
        };
        Ok(id)
    }

    /// Remove one handler, or every handler of the topic when `id` is None.
    pub fn unsubscribe(&self, topic: &str, id: Option<SubscriptionId>) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        match id {
            Some(id) => {
                if let Some(handlers) = topics.get_mut(topic) {
                    handlers.retain(|(h, _)| *h != id);
                    if handlers.is_empty() {
                        topics.remove(topic);
                    }
                }
            }
            None => {
                topics.remove(topic);
            }
        }
    }

    pub fn has_subscribers(&self, topic: &str) -> bool {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .is_some_and(|h| !h.is_empty())
    }

    /// Call the topic's handlers in subscription order.
    pub fn publish(&self, topic: &str, event: &mut Event<'_>) -> Result<()> {
        let handlers: Vec<Handler> = match self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
        {
            Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return Ok(()),
        };

        for handler in handlers {
            handler(event)?;
        }
        Ok(())
    }
}

fn log_exception(event: &mut Event<'_>) -> Result<()> {
    if let Event::Exception { request, error } = event {
        let rid = request.map(|r| r.rid()).unwrap_or("-");
        let path = request.map(|r| r.path()).unwrap_or("-");
        if error.is_client_error() {
            warn!(rid = rid, path = path, status = error.status().as_u16(), error = %error, "request failed");
        } else {
            error!(rid = rid, path = path, status = error.status().as_u16(), error = %error, "request failed");
        }
    }
    Ok(())
}

fn log_response(event: &mut Event<'_>) -> Result<()> {
    if let Event::Response { request, response } = event {
        info!(
            rid = request.rid(),
            method = %request.method(),
            path = request.path(),
            status = response.status().as_u16(),
            size = response.body_len(),
            "response"
        );
    }
    Ok(())
}

fn log_shutdown(event: &mut Event<'_>) -> Result<()> {
    if let Event::Shutdown = event {
        info!("shutdown published");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_publish_in_subscription_order() {
        let broker = Broker::new();
        broker.subscribe(topics::REWRITE, |event| {
            if let Event::Rewrite { path, .. } = event {
                path.push_str("/a");
            }
            Ok(())
        });
        broker.subscribe(topics::REWRITE, |event| {
            if let Event::Rewrite { method, path } = event {
                path.push_str("/b");
                **method = "POST".to_string();
            }
            Ok(())
        });

        let mut method = "GET".to_string();
        let mut path = "x".to_string();
        broker
            .publish(
                topics::REWRITE,
                &mut Event::Rewrite {
                    method: &mut method,
                    path: &mut path,
                },
            )
            .unwrap();
        assert_eq!(path, "x/a/b");
        assert_eq!(method, "POST");
    }

    #[test]
    fn test_publish_stops_at_first_error() {
        let broker = Broker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        broker.subscribe("t", |_| Err(Error::Forbidden("no".into())));
        broker.subscribe("t", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let result = broker.publish("t", &mut Event::Shutdown);
        assert!(matches!(result, Err(Error::Forbidden(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let broker = Broker::new();
        let first = broker.subscribe("t", |_| Err(Error::NotFound));
        broker.subscribe("t", |_| Ok(()));

        broker.unsubscribe("t", Some(first));
        assert!(broker.has_subscribers("t"));
        assert!(broker.publish("t", &mut Event::Shutdown).is_ok());

        broker.unsubscribe("t", None);
        assert!(!broker.has_subscribers("t"));
        // Publishing to an empty topic is a no-op
        assert!(broker.publish("t", &mut Event::Shutdown).is_ok());
    }

    #[test]
    fn test_named_handlers() {
        let broker = Broker::new();
        assert!(broker.subscribe_named("exception", "log_exception").is_ok());
        assert!(broker.subscribe_named("x", "nope").is_err());
        let error = Error::NotFound;
        assert!(broker
            .publish(
                "exception",
                &mut Event::Exception {
                    request: None,
                    error: &error
                }
            )
            .is_ok());
    }

    #[test]
    fn test_from_environment_applies_handlers() {
        let env = Environment::with_defaults("localhost", ".", Cache::in_memory()).unwrap();
        let broker = Broker::from_environment(&env).unwrap();
        assert!(broker.has_subscribers(topics::EXCEPTION));
        assert!(broker.has_subscribers(topics::SHUTDOWN));
        assert!(!broker.has_subscribers(topics::RESPONSE));
    }
}

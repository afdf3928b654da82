//! Cache-backed sessions.
//!
//! The session id travels in a cookie (`session.cookie_name`); the values and
//! the CSRF token live in the host cache under `session:<id>`.

use std::sync::Arc;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::cache::Cache;
use crate::core::{md5_hex, Request, Result};
use crate::environment::Environment;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Stored {
    values: Map<String, Value>,
    token: Option<String>,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    values: Map<String, Value>,
    token: Option<String>,
    is_new: bool,
    destroyed: bool,
    /// Id to drop from the store on save after `regenerate`.
    previous: Option<String>,
}

impl Session {
    fn fresh() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            values: Map::new(),
            token: None,
            is_new: true,
            destroyed: false,
            previous: None,
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// CSRF token, created on first use.
    pub fn token(&mut self) -> &str {
        self.token.get_or_insert_with(|| {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            md5_hex(bytes)
        })
    }

    /// Stored token without creating one.
    pub fn peek_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Move the session to a new id, keeping its values.
    pub fn regenerate(&mut self) {
        let old = std::mem::replace(&mut self.id, Uuid::new_v4().to_string());
        if !self.is_new {
            self.previous = Some(old);
        }
        self.token = None;
    }

    /// Drop all values; the next save removes the session.
    pub fn destroy(&mut self) {
        self.values.clear();
        self.token = None;
        self.destroyed = true;
    }
}

/// Cookie attributes from the `session` table.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub ttl: i64,
    pub path: String,
    pub domain: String,
    pub secure: bool,
    pub httponly: bool,
}

impl CookieSettings {
    pub fn from_environment(env: &Environment) -> Self {
        Self {
            name: env
                .get_str("session.cookie_name")
                .unwrap_or_else(|| "sid".to_string()),
            ttl: env.get_i64("session.cookie_ttl").unwrap_or(0),
            path: env
                .get_str("session.cookie_path")
                .unwrap_or_else(|| "/".to_string()),
            domain: env.get_str("session.cookie_domain").unwrap_or_default(),
            secure: env.get_bool("session.cookie_secure"),
            httponly: env.get_bool("session.cookie_httponly"),
        }
    }
}

pub struct SessionStore {
    cache: Cache,
}

impl SessionStore {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self {
            cache: (*cache).clone(),
        }
    }

    fn cache_for(&self, env: &Environment) -> Cache {
        self.cache.for_host(env.host())
    }

    /// Session named by the request cookie, or a new one.
    pub fn load(&self, request: &Request, env: &Environment) -> Session {
        let settings = CookieSettings::from_environment(env);
        let Some(id) = request.cookie(&settings.name) else {
            return Session::fresh();
        };

        match self
            .cache_for(env)
            .get_value::<Stored>(&format!("session:{}", id))
        {
            Some(stored) => Session {
                id: id.to_string(),
                values: stored.values,
                token: stored.token,
                is_new: false,
                destroyed: false,
                previous: None,
            },
            None => {
                debug!(rid = request.rid(), "unknown session id, starting new session");
                Session::fresh()
            }
        }
    }

    /// Persist the session for `session.cache_ttl` seconds.
    pub fn save(&self, session: &Session, env: &Environment) -> Result<()> {
        let cache = self.cache_for(env);
        if let Some(previous) = &session.previous {
            cache.remove(&format!("session:{}", previous));
        }
        let key = format!("session:{}", session.id);
        if session.destroyed {
            cache.remove(&key);
            return Ok(());
        }

        let ttl = env.get_i64("session.cache_ttl").unwrap_or(1800);
        let stored = Stored {
            values: session.values.clone(),
            token: session.token.clone(),
        };
        cache.set(&key, &stored, ttl)?;
        Ok(())
    }

    /// `Set-Cookie` value for the session. A destroyed session expires the cookie.
    pub fn set_cookie(&self, session: &Session, env: &Environment) -> String {
        let settings = CookieSettings::from_environment(env);
        let mut cookie = format!("{}={}", settings.name, session.id);
        if !settings.path.is_empty() {
            cookie.push_str(&format!("; Path={}", settings.path));
        }
        if !settings.domain.is_empty() {
            cookie.push_str(&format!("; Domain={}", settings.domain));
        }
        if session.destroyed {
            cookie.push_str("; Max-Age=0");
        } else if settings.ttl > 0 {
            cookie.push_str(&format!("; Max-Age={}", settings.ttl));
        }
        if settings.secure {
            cookie.push_str("; Secure");
        }
        if settings.httponly {
            cookie.push_str("; HttpOnly");
        }
        cookie.push_str("; SameSite=Lax");
        cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue, Method, Uri};
    use serde_json::json;

    fn env() -> Environment {
        Environment::with_defaults("localhost", ".", Cache::in_memory()).unwrap()
    }

    fn request(cookie: Option<&str>) -> Request {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = cookie {
            headers.insert("cookie", HeaderValue::from_str(cookie).unwrap());
        }
        Request::new(Method::GET, Uri::from_static("/"), headers, Bytes::new())
    }

    #[test]
    fn test_new_session_without_cookie() {
        let env = env();
        let store = SessionStore::new(Arc::new(env.cache().clone()));
        let session = store.load(&request(None), &env);
        assert!(session.is_new());
        assert!(Uuid::parse_str(session.id()).is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let env = env();
        let store = SessionStore::new(Arc::new(env.cache().clone()));
        let mut session = store.load(&request(None), &env);
        session.set("user", json!("ann"));
        let token = session.token().to_string();
        assert_eq!(token.len(), 32);
        assert_eq!(session.token(), token);
        store.save(&session, &env).unwrap();

        let cookie = format!("sid={}", session.id());
        let mut loaded = store.load(&request(Some(&cookie)), &env);
        assert!(!loaded.is_new());
        assert_eq!(loaded.get("user"), Some(&json!("ann")));
        assert_eq!(loaded.token(), token);
    }

    #[test]
    fn test_unknown_cookie_starts_fresh() {
        let env = env();
        let store = SessionStore::new(Arc::new(env.cache().clone()));
        let session = store.load(&request(Some("sid=bogus")), &env);
        assert!(session.is_new());
        assert_ne!(session.id(), "bogus");
    }

    #[test]
    fn test_regenerate_and_destroy() {
        let env = env();
        let store = SessionStore::new(Arc::new(env.cache().clone()));
        let mut session = store.load(&request(None), &env);
        session.set("k", json!(1));
        store.save(&session, &env).unwrap();

        let cookie = format!("sid={}", session.id());
        let mut session = store.load(&request(Some(&cookie)), &env);
        let old = session.id().to_string();
        session.regenerate();
        assert_ne!(session.id(), old);
        assert_eq!(session.get("k"), Some(&json!(1)));
        store.save(&session, &env).unwrap();
        assert!(store.load(&request(Some(&cookie)), &env).is_new());

        session.destroy();
        store.save(&session, &env).unwrap();
        assert!(store.set_cookie(&session, &env).contains("Max-Age=0"));
        let cookie = format!("sid={}", session.id());
        assert!(store.load(&request(Some(&cookie)), &env).is_new());
    }

    #[test]
    fn test_set_cookie_attributes() {
        let env = env();
        let store = SessionStore::new(Arc::new(env.cache().clone()));
        let session = store.load(&request(None), &env);
        let cookie = store.set_cookie(&session, &env);
        assert!(cookie.starts_with(&format!("sid={}", session.id())));
        assert!(cookie.contains("; Path=/"));
        assert!(cookie.contains("; HttpOnly"));
        assert!(cookie.ends_with("; SameSite=Lax"));
        assert!(!cookie.contains("Secure;"));
        assert!(!cookie.contains("Domain"));
    }
}

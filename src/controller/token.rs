//! CSRF token endpoint.

use serde_json::json;

use super::{Controller, Site};
use crate::cache::NEVER;
use crate::core::{Request, Response, Result};

pub struct TokenController {
    site: Site,
}

impl TokenController {
    pub fn new(site: Site) -> Self {
        Self { site }
    }
}

impl Controller for TokenController {
    fn bootstrap(&mut self, _method: &str, _path: &str) -> Result<()> {
        Ok(())
    }

    /// `{"token": "..."}` plus the session cookie.
    fn respond(&mut self, request: &Request) -> Result<Response> {
        let env = &self.site.env;
        let sessions = &self.site.sessions;

        let mut session = sessions.load(request, env);
        let token = session.token().to_string();
        sessions.save(&session, env)?;

        let mut response = Response::new(env);
        response.set_data(&json!({ "token": token }), Some("json"), request, env)?;
        response.set_header("set-cookie", &sessions.set_cookie(&session, env));
        response.set_ttl(NEVER);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{request, respond, site};
    use http::Method;
    use serde_json::Value;
    use tempfile::TempDir;

    #[test]
    fn test_token_is_stable_per_session() {
        let root = TempDir::new().unwrap();
        let site = site(root.path());

        let mut controller = TokenController::new(site.clone());
        let res = respond(&mut controller, &request(Method::GET, "/csrf-token", &[], "")).unwrap();
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        let token = body["token"].as_str().unwrap().to_string();
        let cookie = res.header("set-cookie").unwrap().to_string();
        assert!(cookie.starts_with("sid="));
        assert_eq!(res.ttl(), NEVER);

        let sid = cookie.split(';').next().unwrap();
        let mut controller = TokenController::new(site);
        let res = respond(
            &mut controller,
            &request(Method::GET, "/csrf-token", &[("cookie", sid)], ""),
        )
        .unwrap();
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["token"], token.as_str());
    }
}

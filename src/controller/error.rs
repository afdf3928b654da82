//! Error pages.
//!
//! Renders `<tpl>/error.mustache` when the site has one, else a built-in page.
//! Error responses are never cached.

use http::StatusCode;
use serde_json::json;
use tracing::debug;

use super::{Controller, Site};
use crate::cache::NEVER;
use crate::core::{Error, Request, Response, Result};
use crate::view::{Template, View};

const BUILTIN_TEMPLATE: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>{{title}}</title></head>\
<body><h1>{{title}}</h1><p>{{message}}</p>\
{{#debug}}<pre>{{kind}}: {{error}}</pre>{{/debug}}\
<p><small>{{rid}}</small></p></body></html>";

pub struct ErrorController {
    site: Site,
    status: StatusCode,
    failure: Option<(&'static str, String)>,
}

impl ErrorController {
    /// A routed error page (404).
    pub fn new(site: Site) -> Self {
        Self {
            site,
            status: StatusCode::NOT_FOUND,
            failure: None,
        }
    }

    /// Page for a failed request.
    pub fn with_error(mut self, error: &Error) -> Self {
        self.status = error.status();
        self.failure = Some((error.kind(), error.to_string()));
        self
    }

    fn template(&self) -> Result<Template> {
        match View::new(&self.site.env).load("error") {
            Ok(template) => Ok(template),
            Err(e) => {
                if !matches!(e, Error::NotFound) {
                    debug!(error = %e, "site error template unusable");
                }
                Template::compile(BUILTIN_TEMPLATE)
            }
        }
    }
}

impl Controller for ErrorController {
    fn bootstrap(&mut self, _method: &str, _path: &str) -> Result<()> {
        Ok(())
    }

    fn respond(&mut self, request: &Request) -> Result<Response> {
        let env = &self.site.env;
        let code = self.status.as_u16();
        let message = env
            .get_str(&["status", code.to_string().as_str()])
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.status.canonical_reason().unwrap_or("").to_string());

        let (kind, error) = self.failure.clone().unwrap_or(("", String::new()));
        let data = json!({
            "title": format!("Error {}", code),
            "status": code,
            "rid": request.rid(),
            "message": message,
            "debug": env.is_debug() && self.failure.is_some(),
            "kind": kind,
            "error": error,
        });

        let mut response = Response::new(env);
        response.set_body(self.template()?.render(&data), "html", env);
        response.set_status(self.status);
        response.set_ttl(NEVER);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{request, respond, site};
    use http::Method;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_page() {
        let root = TempDir::new().unwrap();
        let req = request(Method::GET, "/missing", &[], "");
        let mut controller = ErrorController::new(site(root.path())).with_error(&Error::NotFound);
        let res = respond(&mut controller, &req).unwrap();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.ttl(), NEVER);
        let body = String::from_utf8(res.body().to_vec()).unwrap();
        assert!(body.contains("<title>Error 404</title>"));
        assert!(body.contains("Not Found"));
        assert!(body.contains(req.rid()));
        assert!(!body.contains("<pre>"));
    }

    #[test]
    fn test_site_template() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("tpl")).unwrap();
        fs::write(
            root.path().join("tpl/error.mustache"),
            "{{status}}|{{message}}",
        )
        .unwrap();

        let req = request(Method::GET, "/", &[], "");
        let mut controller = ErrorController::new(site(root.path()))
            .with_error(&Error::Forbidden("csrf".into()));
        let res = respond(&mut controller, &req).unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(res.body().as_ref(), b"403|Forbidden");
    }

    #[test]
    fn test_routed_error_page_is_404() {
        let root = TempDir::new().unwrap();
        let req = request(Method::GET, "/", &[], "");
        let mut controller = ErrorController::new(site(root.path()));
        let res = respond(&mut controller, &req).unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}

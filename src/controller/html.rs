//! HTML pages from the public directory.
//!
//! `a/b` is looked up as `a/b`, `a/b.html` and `a/b/index.html`. With
//! `view.render_html` set, `.html` files are rendered as templates.

use std::fs;
use std::path::PathBuf;

use serde_json::json;

use super::{resolve_under, Controller, Site};
use crate::core::{Error, Request, Response, Result};
use crate::view::Template;

pub struct HtmlController {
    site: Site,
    method: String,
    path: String,
}

impl HtmlController {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            method: String::new(),
            path: String::new(),
        }
    }

    fn find(&self) -> Result<Option<PathBuf>> {
        let dir = self.site.env.dir("pub");
        let candidates = if self.path.is_empty() {
            vec!["index.html".to_string()]
        } else {
            vec![
                self.path.clone(),
                format!("{}.html", self.path),
                format!("{}/index.html", self.path),
            ]
        };
        for candidate in candidates {
            let path = resolve_under(&dir, &candidate)?;
            if path.is_file() {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

impl Controller for HtmlController {
    fn bootstrap(&mut self, method: &str, path: &str) -> Result<()> {
        self.method = method.to_string();
        self.path = path.to_string();
        Ok(())
    }

    fn respond(&mut self, request: &Request) -> Result<Response> {
        let env = &self.site.env;
        let file = self.find()?.ok_or(Error::NotFound)?;
        let mut response = Response::new(env);

        let is_html = file.extension().and_then(|e| e.to_str()) == Some("html");
        if is_html && env.get_bool("view.render_html") {
            let source = fs::read_to_string(&file)?;
            // Only values shared by every request for this URI; the page is
            // response-cached.
            let data = json!({
                "request": {
                    "path": request.path(),
                    "method": self.method,
                },
                "env": {"host": env.host()},
            });
            response.set_body(Template::compile(&source)?.render(&data), "html", env);
        } else {
            response.set_file(&file, env)?;
        }
        Ok(response)
    }
}

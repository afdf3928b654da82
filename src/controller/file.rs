//! Static files from the public directory.

use super::{resolve_under, Controller, Site};
use crate::core::{Error, Request, Response, Result};

pub struct FileController {
    site: Site,
    path: String,
}

impl FileController {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            path: String::new(),
        }
    }
}

impl Controller for FileController {
    fn bootstrap(&mut self, _method: &str, path: &str) -> Result<()> {
        self.path = path.to_string();
        Ok(())
    }

    fn respond(&mut self, _request: &Request) -> Result<Response> {
        let env = &self.site.env;
        let file = resolve_under(&env.dir("pub"), &self.path)?;
        if self.path.is_empty() || !file.is_file() {
            return Err(Error::NotFound);
        }

        let mut response = Response::new(env);
        response.set_file(&file, env)?;
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

    fn root() -> TempDir {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("pub/css")).unwrap();
        fs::write(root.path().join("pub/css/site.css"), "body{}").unwrap();
        fs::write(root.path().join("secret.txt"), "nope").unwrap();
        root
    }

    #[test]
    fn test_serves_public_file() {
        let root = root();
        let mut controller = FileController::new(site(root.path()));
        let res = respond(&mut controller, &request(Method::GET, "/css/site.css", &[], "")).unwrap();
        assert_eq!(res.body().as_ref(), b"body{}");
        assert_eq!(res.mime(), Some("text/css"));
        assert_eq!(res.kind(), Some("css"));
    }

    #[test]
    fn test_missing_and_directories_are_404() {
        let root = root();
        for uri in ["/css/missing.css", "/css", "/"] {
            let mut controller = FileController::new(site(root.path()));
            let result = respond(&mut controller, &request(Method::GET, uri, &[], ""));
            assert!(matches!(result, Err(Error::NotFound)), "{}", uri);
        }
    }

    #[test]
    fn test_cannot_escape_public_dir() {
        let root = root();
        let mut controller = FileController::new(site(root.path()));
        controller.bootstrap("GET", "../secret.txt").unwrap();
        let result = controller.respond(&request(Method::GET, "/", &[], ""));
        assert!(matches!(result, Err(Error::NotFound)));
    }
}

//! Nodes of the data tree, encoded by extension.

use serde_json::Value;

use super::{split_extension, Controller, Site};
use crate::core::{Error, Request, Response, Result};

pub struct DataController {
    site: Site,
    path: String,
}

impl DataController {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            path: String::new(),
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(list) => list.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

impl Controller for DataController {
    fn bootstrap(&mut self, _method: &str, path: &str) -> Result<()> {
        self.path = path.to_string();
        Ok(())
    }

    fn respond(&mut self, request: &Request) -> Result<Response> {
        let (path, extension) = split_extension(&self.path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(Error::NotFound);
        }

        let value = self
            .site
            .data
            .get(&segments)?
            .filter(|v| !is_empty(v))
            .ok_or(Error::NotFound)?;

        let env = &self.site.env;
        let mut response = Response::new(env);
        response.set_data(&value, extension, request, env)?;
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
        fs::create_dir_all(root.path().join("dat")).unwrap();
        fs::write(
            root.path().join("dat/team.json"),
            r#"{"members": [{"name": "Ann", "role": "dev"}, {"name": "Bob"}], "empty": []}"#,
        )
        .unwrap();
        root
    }

    fn get(root: &TempDir, uri: &str, headers: &[(&str, &str)]) -> Result<Response> {
        let mut controller = DataController::new(site(root.path()));
        respond(&mut controller, &request(Method::GET, uri, headers, ""))
    }

    #[test]
    fn test_json_by_extension() {
        let root = root();
        let res = get(&root, "/team/members.json", &[]).unwrap();
        assert_eq!(res.kind(), Some("json"));
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body[0]["name"], "Ann");
    }

    #[test]
    fn test_csv_by_extension() {
        let root = root();
        let res = get(&root, "/team/members.csv", &[]).unwrap();
        assert_eq!(
            res.body().as_ref(),
            b"name,role\r\nAnn,dev\r\nBob,\r\n".as_slice()
        );
    }

    #[test]
    fn test_negotiated_without_extension() {
        let root = root();
        let res = get(&root, "/team/members", &[("accept", "application/xml")]).unwrap();
        assert_eq!(res.kind(), Some("xml"));
    }

    #[test]
    fn test_missing_or_empty_is_404() {
        let root = root();
        assert!(matches!(get(&root, "/team/nobody.json", &[]), Err(Error::NotFound)));
        assert!(matches!(get(&root, "/team/empty.json", &[]), Err(Error::NotFound)));
    }

    #[test]
    fn test_unknown_extension_is_406() {
        let root = root();
        assert!(matches!(
            get(&root, "/team/members.png", &[]),
            Err(Error::NotAcceptable)
        ));
    }
}

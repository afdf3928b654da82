//! Scripts and stylesheets, optionally bundled and minified.
//!
//! `js/app.js` is served from `pub/js/app.js` when that file exists, or
//! bundled from every `.js` file in `pub/js/app/` in name order. A `.min.`
//! anywhere in the path (`js/app.min.js`) selects the same source and
//! minifies it. Bundles and minified output are written under `paths.cache`
//! and rebuilt when a source is newer.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use super::{resolve_under, split_extension, Controller, Site};
use crate::core::{Error, Request, Response, Result};
use crate::environment::mtime_secs;

/// Strip comments and redundant whitespace from a stylesheet.
pub fn minify_css(source: &str) -> Result<String> {
    let comments = regex(r"(?s)/\*.*?\*/")?;
    let spaces = regex(r"\s+")?;
    let punctuation = regex(r"\s?([,:;{}])\s?")?;

    let out = comments.replace_all(source, "");
    let out = spaces.replace_all(&out, " ");
    let out = punctuation.replace_all(&out, "$1");
    Ok(out.trim().to_string())
}

/// Line-level script minifier.
///
/// Trims each line and drops blank lines, `//` comment lines and block
/// comments that start a line. Line breaks are kept so automatic semicolon
/// insertion still applies.
pub fn minify_js(source: &str) -> String {
    let mut lines = Vec::new();
    let mut in_comment = false;
    for line in source.lines().map(str::trim) {
        if in_comment {
            in_comment = !line.ends_with("*/");
            continue;
        }
        if line.starts_with("/*") {
            in_comment = line.len() < 4 || !line.ends_with("*/");
            continue;
        }
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Internal(format!("regex: {}", e)))
}

/// Where a script's content comes from.
enum Source {
    File(PathBuf),
    Bundle(Vec<PathBuf>),
}

impl Source {
    fn locate(public: &Path, path: &str, extension: &str) -> Result<Self> {
        let file = resolve_under(public, path)?;
        if file.is_file() {
            return Ok(Source::File(file));
        }

        let (base, _) = split_extension(path);
        let dir = resolve_under(public, base)?;
        if !dir.is_dir() {
            return Err(Error::NotFound);
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(extension))
            .collect();
        files.sort();
        Ok(Source::Bundle(files))
    }

    /// Newest modification time across the sources.
    fn mtime(&self) -> Option<u64> {
        match self {
            Source::File(file) => mtime_secs(file),
            Source::Bundle(files) => files.iter().filter_map(|f| mtime_secs(f)).max(),
        }
    }

    fn read(&self) -> Result<String> {
        match self {
            Source::File(file) => Ok(fs::read_to_string(file)?),
            Source::Bundle(files) => {
                let mut out = String::new();
                for file in files {
                    out.push_str(&fs::read_to_string(file)?);
                    if !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                Ok(out)
            }
        }
    }
}

pub struct ScriptController {
    site: Site,
    path: String,
}

impl ScriptController {
    pub fn new(site: Site) -> Self {
        Self {
            site,
            path: String::new(),
        }
    }
}

impl Controller for ScriptController {
    fn bootstrap(&mut self, _method: &str, path: &str) -> Result<()> {
        self.path = path.to_string();
        Ok(())
    }

    fn respond(&mut self, _request: &Request) -> Result<Response> {
        let env = &self.site.env;
        let Some(extension) = split_extension(&self.path).1 else {
            return Err(Error::NotFound);
        };

        let minify = self.path.contains(".min.");
        let source_path = self.path.replace(".min.", ".");
        let source = Source::locate(&env.dir("pub"), &source_path, extension)?;

        let mut response = Response::new(env);
        if let (false, Source::File(file)) = (minify, &source) {
            response.set_file(file, env)?;
            return Ok(response);
        }

        let target = resolve_under(&env.dir("cache"), &self.path)?;
        if !target.is_file() || mtime_secs(&target) < source.mtime() {
            let mut content = source.read()?;
            if minify {
                content = match extension {
                    "css" => minify_css(&content)?,
                    _ => minify_js(&content),
                };
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, content)?;
            debug!(path = %self.path, minify, "script built");
        }

        response.set_file(&target, env)?;
        Ok(response)
    }
}

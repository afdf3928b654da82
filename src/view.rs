//! Mustache-subset templates.
//!
//! Supported tags:
//!
//! - `{{name}}` escaped variable, `{{{name}}}` and `{{&name}}` raw
//! - `{{#name}}...{{/name}}` section, `{{^name}}...{{/name}}` inverted section
//! - `{{!comment}}`
//! - dotted names (`{{user.name}}`) and `{{.}}` for the current item
//!
//! Names are looked up from the innermost context outwards. Partials and
//! delimiter changes are not supported.

use std::fs;
use std::path::PathBuf;

use serde_json::Value;

use crate::core::{Error, Result};
use crate::environment::Environment;
use crate::export::escape;
use crate::values::{get_path, to_plain_string};

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var { name: String, escape: bool },
    Section {
        name: String,
        inverted: bool,
        children: Vec<Node>,
    },
}

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn compile(source: &str) -> Result<Self> {
        Ok(Self {
            nodes: parse(source)?,
        })
    }

    pub fn render(&self, data: &Value) -> String {
        let mut out = String::new();
        let mut stack = vec![data];
        render_nodes(&self.nodes, &mut stack, &mut out);
        out
    }
}

/// Compile and render in one step.
pub fn render(source: &str, data: &Value) -> Result<String> {
    Ok(Template::compile(source)?.render(data))
}

/// Template loader over `<root>/<paths.tpl>`.
pub struct View {
    dir: PathBuf,
}

impl View {
    pub fn new(env: &Environment) -> Self {
        Self { dir: env.dir("tpl") }
    }

    /// Load `<name>.mustache`. Names may contain `/` but not `..`.
    pub fn load(&self, name: &str) -> Result<Template> {
        if name.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(Error::NotFound);
        }
        let path = self.dir.join(format!("{}.mustache", name));
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NotFound),
            Err(e) => return Err(e.into()),
        };
        Template::compile(&source)
    }

    pub fn render(&self, name: &str, data: &Value) -> Result<String> {
        Ok(self.load(name)?.render(data))
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn parse(source: &str) -> Result<Vec<Node>> {
    // (section name, inverted, nodes collected so far)
    let mut stack: Vec<(String, bool, Vec<Node>)> = vec![(String::new(), false, Vec::new())];
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            push(&mut stack, Node::Text(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];

        let (tag, consumed) = if let Some(inner) = after.strip_prefix('{') {
            let end = inner
                .find("}}}")
                .ok_or_else(|| Error::Template("unclosed '{{{' tag".into()))?;
            (format!("&{}", &inner[..end]), end + 4)
        } else {
            let end = after
                .find("}}")
                .ok_or_else(|| Error::Template("unclosed '{{' tag".into()))?;
            (after[..end].to_string(), end + 2)
        };
        rest = &after[consumed..];

        let tag = tag.trim();
        let (sigil, name) = match tag.chars().next() {
            Some(c @ ('!' | '#' | '^' | '/' | '&' | '>' | '=')) => (Some(c), tag[1..].trim()),
            _ => (None, tag),
        };

        match sigil {
            Some('!') => {}
            Some('#') | Some('^') => {
                if name.is_empty() {
                    return Err(Error::Template("section without a name".into()));
                }
                stack.push((name.to_string(), sigil == Some('^'), Vec::new()));
            }
            Some('/') => {
                if stack.len() < 2 {
                    return Err(Error::Template(format!("unopened section '{}'", name)));
                }
                let (open, inverted, children) = stack.pop().unwrap_or_default();
                if open != name {
                    return Err(Error::Template(format!(
                        "section '{}' closed by '{}'",
                        open, name
                    )));
                }
                push(
                    &mut stack,
                    Node::Section {
                        name: open,
                        inverted,
                        children,
                    },
                );
            }
            Some('&') => push(
                &mut stack,
                Node::Var {
                    name: name.to_string(),
                    escape: false,
                },
            ),
            Some(other) => {
                return Err(Error::Template(format!("unsupported tag '{}'", other)));
            }
            None => {
                if name.is_empty() {
                    return Err(Error::Template("empty tag".into()));
                }
                push(
                    &mut stack,
                    Node::Var {
                        name: name.to_string(),
                        escape: true,
                    },
                );
            }
        }
    }
    if !rest.is_empty() {
        push(&mut stack, Node::Text(rest.to_string()));
    }

    if stack.len() > 1 {
        let open: Vec<&str> = stack[1..].iter().map(|(name, _, _)| name.as_str()).collect();
        return Err(Error::Template(format!(
            "unclosed section '{}'",
            open.join("', '")
        )));
    }
    Ok(stack.pop().map(|(_, _, nodes)| nodes).unwrap_or_default())
}

fn push(stack: &mut [(String, bool, Vec<Node>)], node: Node) {
    if let Some((_, _, nodes)) = stack.last_mut() {
        nodes.push(node);
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn lookup<'a>(stack: &[&'a Value], name: &str) -> Option<&'a Value> {
    if name == "." {
        return stack.last().copied();
    }
    let segments: Vec<&str> = name.split('.').collect();
    let (first, rest) = segments.split_first()?;
    stack
        .iter()
        .rev()
        .find_map(|ctx| ctx.get(*first))
        .and_then(|found| get_path(found, rest))
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(list) => list.is_empty(),
        Value::Object(_) => false,
    }
}

fn render_nodes<'a>(nodes: &[Node], stack: &mut Vec<&'a Value>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var { name, escape: esc } => {
                if let Some(value) = lookup(stack, name) {
                    let text = match value {
                        Value::Array(_) | Value::Object(_) => value.to_string(),
                        scalar => to_plain_string(scalar),
                    };
                    if *esc {
                        out.push_str(&escape(&text));
                    } else {
                        out.push_str(&text);
                    }
                }
            }
            Node::Section {
                name,
                inverted,
                children,
            } => {
                let value = lookup(stack, name);
                let falsy = value.map_or(true, is_falsy);
                if *inverted {
                    if falsy {
                        render_nodes(children, stack, out);
                    }
                    continue;
                }
                let Some(value) = value.filter(|_| !falsy) else {
                    continue;
                };
                match value {
                    Value::Array(items) => {
                        for item in items {
                            stack.push(item);
                            render_nodes(children, stack, out);
                            stack.pop();
                        }
                    }
                    other => {
                        stack.push(other);
                        render_nodes(children, stack, out);
                        stack.pop();
                    }
                }
            }
        }
    }
}

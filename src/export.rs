//! Tabular export and response encoders.
//!
//! Rows are JSON objects. [`normalize`] flattens nested objects into dotted
//! keys and aligns all rows on the union of their keys, which is the shape
//! the CSV, XML and HTML writers consume.

use serde_json::{Map, Value};

use crate::core::Result;
use crate::values::to_plain_string;

/// Type keys with a response encoder.
pub const ENCODERS: [&str; 5] = ["json", "xml", "csv", "html", "txt"];

#[inline]
pub fn has_encoder(kind: &str) -> bool {
    ENCODERS.contains(&kind)
}

/// Encode `data` as `kind`.
pub fn encode(kind: &str, data: &Value) -> Result<String> {
    let encoded = match kind {
        "json" => serde_json::to_string(data)?,
        "xml" => to_xml(&normalize(data, true)),
        "csv" => to_csv(&normalize(data, true)),
        "html" => format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"></head><body>{}</body></html>",
            to_html(&normalize(data, true), true)
        ),
        "txt" => match data {
            Value::Array(_) | Value::Object(_) => serde_json::to_string_pretty(data)?,
            scalar => to_plain_string(scalar),
        },
        other => {
            return Err(crate::core::Error::Internal(format!(
                "no encoder for '{}'",
                other
            )))
        }
    };
    Ok(encoded)
}

/// Flatten nested objects and arrays into dotted keys.
pub fn flatten(value: &Value) -> Map<String, Value> {
    let mut flat = Map::new();
    flatten_into(value, "", &mut flat);
    flat
}

fn flatten_into(value: &Value, prefix: &str, out: &mut Map<String, Value>) {
    let key = |k: &str| {
        if prefix.is_empty() {
            k.to_string()
        } else {
            format!("{}.{}", prefix, k)
        }
    };
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_into(v, &key(k), out);
            }
        }
        Value::Array(list) => {
            for (i, v) in list.iter().enumerate() {
                flatten_into(v, &key(&i.to_string()), out);
            }
        }
        scalar if prefix.is_empty() => {
            out.insert("value".to_string(), scalar.clone());
        }
        scalar => {
            out.insert(prefix.to_string(), scalar.clone());
        }
    }
}

/// Align rows on the union of their flattened keys (first-seen order).
///
/// A non-list value is exported as a single row. With `header`, the first
/// returned row holds the column names. No rows yields an empty table.
pub fn normalize(data: &Value, header: bool) -> Vec<Vec<String>> {
    let items: Vec<&Value> = match data {
        Value::Array(list) => list.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    };

    let flattened: Vec<Map<String, Value>> = items.into_iter().map(flatten).collect();
    let mut keys: Vec<String> = Vec::new();
    for row in &flattened {
        for key in row.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
    }
    if keys.is_empty() {
        return Vec::new();
    }

    let mut table = Vec::with_capacity(flattened.len() + 1);
    if header {
        table.push(keys.clone());
    }
    for row in &flattened {
        table.push(
            keys.iter()
                .map(|k| row.get(k).map(to_plain_string).unwrap_or_default())
                .collect(),
        );
    }
    table
}

/// RFC 4180 CSV.
pub fn to_csv(table: &[Vec<String>]) -> String {
    let mut out = String::new();
    for row in table {
        let cells: Vec<String> = row.iter().map(|cell| csv_cell(cell)).collect();
        out.push_str(&cells.join(","));
        out.push_str("\r\n");
    }
    out
}

fn csv_cell(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// `<rows><row><field name="...">` document. Expects a header row.
pub fn to_xml(table: &[Vec<String>]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rows>");
    if let Some((names, rows)) = table.split_first() {
        for row in rows {
            out.push_str("<row>");
            for (name, value) in names.iter().zip(row) {
                out.push_str(&format!(
                    "<field name=\"{}\">{}</field>",
                    escape(name),
                    escape(value)
                ));
            }
            out.push_str("</row>");
        }
    }
    out.push_str("</rows>\n");
    out
}

/// `<table>`; with `header` the first row goes into `<thead>`.
pub fn to_html(table: &[Vec<String>], header: bool) -> String {
    let mut out = String::from("<table>");
    let rows = match table.split_first() {
        Some((names, rows)) if header => {
            out.push_str("<thead><tr>");
            for name in names {
                out.push_str(&format!("<th>{}</th>", escape(name)));
            }
            out.push_str("</tr></thead>");
            rows
        }
        _ => table,
    };
    out.push_str("<tbody>");
    for row in rows {
        out.push_str("<tr>");
        for cell in row {
            out.push_str(&format!("<td>{}</td>", escape(cell)));
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table>");
    out
}

/// Escape text for HTML and XML.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Value {
        json!([
            {"id": 1, "name": "Ann", "address": {"city": "Hamburg"}},
            {"id": 2, "tags": ["a", "b"]}
        ])
    }

    #[test]
    fn test_normalize_unions_keys_in_first_seen_order() {
        let table = normalize(&rows(), true);
        assert_eq!(
            table,
            vec![
                vec!["id", "name", "address.city", "tags.0", "tags.1"],
                vec!["1", "Ann", "Hamburg", "", ""],
                vec!["2", "", "", "a", "b"],
            ]
        );
        assert_eq!(normalize(&rows(), false).len(), 2);
    }

    #[test]
    fn test_normalize_edge_cases() {
        assert!(normalize(&json!([]), true).is_empty());
        assert!(normalize(&Value::Null, true).is_empty());
        assert_eq!(
            normalize(&json!({"a": 1}), true),
            vec![vec!["a"], vec!["1"]]
        );
        assert_eq!(normalize(&json!([5]), true), vec![vec!["value"], vec!["5"]]);
    }

    #[test]
    fn test_csv_quoting() {
        let table = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["x,y".to_string(), "say \"hi\"".to_string()],
        ];
        assert_eq!(to_csv(&table), "a,b\r\n\"x,y\",\"say \"\"hi\"\"\"\r\n");
    }

    #[test]
    fn test_xml_escapes() {
        let xml = to_xml(&normalize(&json!([{"q": "<a & b>"}]), true));
        assert!(xml.contains("<row><field name=\"q\">&lt;a &amp; b&gt;</field></row>"));
        assert!(xml.starts_with("<?xml"));
    }

    #[test]
    fn test_html_table() {
        let html = to_html(&normalize(&json!([{"a": "<b>"}]), true), true);
        assert_eq!(
            html,
            "<table><thead><tr><th>a</th></tr></thead><tbody><tr><td>&lt;b&gt;</td></tr></tbody></table>"
        );
        let html = to_html(&normalize(&json!([{"a": 1}]), false), false);
        assert_eq!(html, "<table><tbody><tr><td>1</td></tr></tbody></table>");
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode("json", &json!({"a": [1]})).unwrap(), r#"{"a":[1]}"#);
        assert_eq!(encode("txt", &json!("plain")).unwrap(), "plain");
        assert!(encode("csv", &rows()).unwrap().starts_with("id,name"));
        assert!(encode("html", &rows()).unwrap().contains("<table>"));
        assert!(encode("png", &rows()).is_err());
        assert!(has_encoder("xml"));
        assert!(!has_encoder("png"));
    }
}

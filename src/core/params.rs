//! Query string, cookie and form parsing.

use std::borrow::Cow;

use serde_json::{Map, Value};

/// Ordered name/value pairs as they appeared on the wire.
pub type ParamList = Vec<(String, String)>;

/// Percent-decode, treating `+` as a space. Borrows when nothing needs decoding.
#[inline]
pub fn fast_percent_decode(s: &str) -> Cow<'_, str> {
    if !s.contains('%') && !s.contains('+') {
        return Cow::Borrowed(s);
    }
    let spaced = s.replace('+', " ");
    Cow::Owned(
        percent_encoding::percent_decode_str(&spaced)
            .decode_utf8_lossy()
            .into_owned(),
    )
}

/// Parse a query string (or urlencoded body) into key-value pairs.
#[inline]
pub fn parse_query_string(query: &str) -> ParamList {
    let pair_count = query.matches('&').count() + 1;
    let mut params = Vec::with_capacity(pair_count.min(16));

    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }

        let (key, value) = match pair.find('=') {
            Some(pos) => (&pair[..pos], &pair[pos + 1..]),
            None => (pair, ""),
        };

        if !key.is_empty() {
            params.push((
                fast_percent_decode(key).into_owned(),
                fast_percent_decode(value).into_owned(),
            ));
        }
    }

    params
}

/// Parse a Cookie header into name-value pairs.
#[inline]
pub fn parse_cookies(cookie_header: &str) -> ParamList {
    let cookie_count = cookie_header.matches(';').count() + 1;
    let mut cookies = Vec::with_capacity(cookie_count.min(16));

    for cookie in cookie_header.split(';') {
        let cookie = cookie.trim();
        if cookie.is_empty() {
            continue;
        }

        let (name, value) = match cookie.find('=') {
            Some(pos) => (cookie[..pos].trim(), cookie[pos + 1..].trim()),
            None => continue,
        };

        if !name.is_empty() {
            let value = percent_encoding::percent_decode_str(value).decode_utf8_lossy();
            cookies.push((name.to_string(), value.into_owned()));
        }
    }

    cookies
}

/// Fold pairs into a JSON object.
///
/// `name[]` keys collect into arrays; a repeated plain key keeps the last value.
pub fn params_to_value(params: &[(String, String)]) -> Value {
    let mut map = Map::new();
    for (key, value) in params {
        match key.strip_suffix("[]") {
            Some(list_key) => {
                let entry = map
                    .entry(list_key.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !entry.is_array() {
                    *entry = Value::Array(vec![entry.take()]);
                }
                if let Value::Array(list) = entry {
                    list.push(Value::String(value.clone()));
                }
            }
            None => {
                map.insert(key.clone(), Value::String(value.clone()));
            }
        }
    }
    Value::Object(map)
}

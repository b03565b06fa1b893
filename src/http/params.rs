//! Query-string and url-encoded form decoding.
//!
//! Keys use bracket nesting: `price[gte]=5` becomes `{"price": {"gte": "5"}}`,
//! `tags[]=a&tags[]=b` becomes `{"tags": ["a", "b"]}`, and a plain key that
//! repeats collects its values into an array in arrival order.

use serde_json::{Map, Value};
use url::form_urlencoded;

/// Bracket groups beyond this depth are kept as a literal key.
pub const MAX_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Push,
}

/// Decode `a=1&b[c]=2` style input into an ordered JSON object.
pub fn parse_params(input: &str) -> Map<String, Value> {
    let mut root = Map::new();
    for (key, value) in form_urlencoded::parse(input.as_bytes()) {
        if key.is_empty() {
            continue;
        }
        let (head, rest) = split_key(&key);
        insert(&mut root, &head, &rest, Value::String(value.into_owned()));
    }
    root
}

/// Encode a (possibly nested) object back into a query string.
pub fn encode_params(params: &Map<String, Value>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        encode_value(&mut serializer, key, value);
    }
    serializer.finish()
}

fn encode_value(
    serializer: &mut form_urlencoded::Serializer<'_, String>,
    key: &str,
    value: &Value,
) {
    match value {
        Value::Object(map) => {
            for (child, v) in map {
                encode_value(serializer, &format!("{}[{}]", key, child), v);
            }
        }
        Value::Array(items) => {
            for item in items {
                encode_value(serializer, key, item);
            }
        }
        Value::String(s) => {
            serializer.append_pair(key, s);
        }
        Value::Null => {
            serializer.append_pair(key, "");
        }
        other => {
            serializer.append_pair(key, &other.to_string());
        }
    }
}

fn split_key(key: &str) -> (String, Vec<Segment>) {
    let Some(open) = key.find('[') else {
        return (key.to_string(), Vec::new());
    };
    if open == 0 {
        return (key.to_string(), Vec::new());
    }

    let head = key[..open].to_string();
    let mut segments = Vec::new();
    let mut rest = &key[open..];

    while rest.starts_with('[') {
        if segments.len() == MAX_DEPTH {
            segments.push(Segment::Key(rest.to_string()));
            return (head, segments);
        }
        let Some(close) = rest.find(']') else {
            // Unbalanced brackets: the whole key is literal.
            return (key.to_string(), Vec::new());
        };
        let inner = &rest[1..close];
        segments.push(if inner.is_empty() {
            Segment::Push
        } else {
            Segment::Key(inner.to_string())
        });
        rest = &rest[close + 1..];
    }

    if !rest.is_empty() {
        return (key.to_string(), Vec::new());
    }
    (head, segments)
}

fn insert(map: &mut Map<String, Value>, key: &str, rest: &[Segment], value: Value) {
    match rest.split_first() {
        None => merge_leaf(map, key, value),
        Some((Segment::Push, tail)) => {
            let slot = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !slot.is_array() {
                let previous = slot.take();
                *slot = Value::Array(vec![previous]);
            }
            if let Value::Array(items) = slot {
                if tail.is_empty() {
                    items.push(value);
                } else {
                    let mut nested = Map::new();
                    insert_path(&mut nested, tail, value);
                    items.push(Value::Object(nested));
                }
            }
        }
        Some((Segment::Key(child), tail)) => {
            let slot = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            // A scalar already sits here; the nested entry loses.
            if let Value::Object(nested) = slot {
                insert(nested, child, tail, value);
            }
        }
    }
}

fn insert_path(map: &mut Map<String, Value>, segments: &[Segment], value: Value) {
    match segments.split_first() {
        Some((Segment::Key(key), tail)) => insert(map, key, tail, value),
        Some((Segment::Push, tail)) => insert(map, "", tail, value),
        None => {}
    }
}

fn merge_leaf(map: &mut Map<String, Value>, key: &str, value: Value) {
    match map.get_mut(key) {
        None => {
            map.insert(key.to_string(), value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, value]);
        }
    }
}

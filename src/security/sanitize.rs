//! Input sanitization stages.
//!
//! Two passes over the query and structured body held in the request
//! context:
//! - operator stripping removes keys a document store would read as query
//!   operators (`$gt`, `$where`) or field paths (`a.b`)
//! - markup cleaning escapes angle brackets in every string value
//!
//! Neither pass rejects a request. Raw webhook bodies are never touched.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use serde_json::{Map, Value};

use crate::http::context::{RequestBody, RequestContext};

pub fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Remove operator-looking keys at any depth. Returns how many were removed.
pub fn strip_operator_keys(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => strip_operator_keys_in(map),
        Value::Array(items) => items.iter_mut().map(strip_operator_keys).sum(),
        _ => 0,
    }
}

pub fn strip_operator_keys_in(map: &mut Map<String, Value>) -> usize {
    let before = map.len();
    map.retain(|key, _| !is_operator_key(key));
    let mut removed = before - map.len();
    for value in map.values_mut() {
        removed += strip_operator_keys(value);
    }
    removed
}

/// Escape markup in every string value at any depth.
pub fn clean_markup(value: &mut Value) {
    match value {
        Value::String(s) => {
            if s.contains(['<', '>']) {
                *s = s.replace('<', "&lt;").replace('>', "&gt;");
            }
        }
        Value::Object(map) => clean_markup_in(map),
        Value::Array(items) => items.iter_mut().for_each(clean_markup),
        _ => {}
    }
}

pub fn clean_markup_in(map: &mut Map<String, Value>) {
    map.values_mut().for_each(clean_markup);
}

/// Full HTML escaping for text interpolated into rendered pages.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

pub async fn strip_operators(mut request: Request<Body>, next: Next) -> Response {
    if let Some(ctx) = request.extensions_mut().get_mut::<RequestContext>() {
        let mut removed = strip_operator_keys_in(&mut ctx.query);
        if let RequestBody::Structured(body) = &mut ctx.body {
            removed += strip_operator_keys(body);
        }
        if removed > 0 {
            tracing::warn!(
                request_id = %ctx.request_id,
                client = %ctx.client_key(),
                removed,
                "Stripped operator keys from input"
            );
        }
    }
    next.run(request).await
}

pub async fn escape_markup(mut request: Request<Body>, next: Next) -> Response {
    if let Some(ctx) = request.extensions_mut().get_mut::<RequestContext>() {
        clean_markup_in(&mut ctx.query);
        if let RequestBody::Structured(body) = &mut ctx.body {
            clean_markup(body);
        }
    }
    next.run(request).await
}

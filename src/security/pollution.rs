//! HTTP parameter pollution guard.
//!
//! A field that is not on the allow-list and arrives with several values
//! keeps only its first value. Allow-listed fields keep the full sequence.
//! Applies to the query and to url-encoded bodies; JSON bodies carry arrays
//! on purpose and are left alone.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use serde_json::{Map, Value};

use crate::http::body::{media_type, FORM_URLENCODED};
use crate::http::context::{RequestBody, RequestContext};

#[derive(Debug, Clone, Default)]
pub struct ParameterPollution {
    whitelist: HashSet<String>,
}

impl ParameterPollution {
    pub fn new<I, S>(whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: whitelist.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows_repeats(&self, field: &str) -> bool {
        self.whitelist.contains(field)
    }

    /// Collapse repeated values in place. Returns the collapsed field names.
    pub fn collapse(&self, params: &mut Map<String, Value>) -> Vec<String> {
        let mut collapsed = Vec::new();
        for (field, value) in params.iter_mut() {
            if self.allows_repeats(field) {
                continue;
            }
            if let Value::Array(items) = value {
                if items.is_empty() {
                    continue;
                }
                let first = items.swap_remove(0);
                *value = first;
                collapsed.push(field.clone());
            }
        }
        collapsed
    }
}

pub async fn prevent_pollution(
    State(guard): State<Arc<ParameterPollution>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let urlencoded = media_type(request.headers()).as_deref() == Some(FORM_URLENCODED);

    if let Some(ctx) = request.extensions_mut().get_mut::<RequestContext>() {
        let mut collapsed = guard.collapse(&mut ctx.query);
        if urlencoded {
            if let RequestBody::Structured(Value::Object(body)) = &mut ctx.body {
                collapsed.extend(guard.collapse(body));
            }
        }
        if !collapsed.is_empty() {
            tracing::debug!(request_id = %ctx.request_id, fields = ?collapsed, "Collapsed repeated parameters");
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::params::parse_params;
    use serde_json::json;

    fn guard() -> ParameterPollution {
        ParameterPollution::new(["duration", "ratingsAverage", "price"])
    }

    #[test]
    fn test_collapses_to_first_value() {
        let mut params = parse_params("difficulty=easy&difficulty=hard&sort=duration&sort=price");
        let collapsed = guard().collapse(&mut params);

        assert_eq!(collapsed, vec!["difficulty".to_string(), "sort".to_string()]);
        assert_eq!(
            Value::Object(params),
            json!({ "difficulty": "easy", "sort": "duration" })
        );
    }

    #[test]
    fn test_allow_listed_fields_keep_sequence() {
        let mut params = parse_params("price=397&price=997&duration=5&duration=9");
        assert!(guard().collapse(&mut params).is_empty());
        assert_eq!(
            Value::Object(params),
            json!({ "price": ["397", "997"], "duration": ["5", "9"] })
        );
    }

    #[test]
    fn test_first_of_three_wins() {
        let mut params = parse_params("sort=a&sort=b&sort=c");
        guard().collapse(&mut params);
        assert_eq!(params["sort"], "a");
    }
}

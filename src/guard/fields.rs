//! Field-level sanitization of the three request surfaces.
//!
//! Every operation rewrites the caller's container in place. That is a
//! side effect on caller-owned data: nothing is cloned out, nothing changes
//! owner. Only top-level string values are touched; numbers, booleans,
//! null, arrays and nested objects are left exactly as they were.

use serde_json::{Map, Value};

use crate::security::TextSanitizer;

/// Sanitized path parameters, in route order.
///
/// Installed into request extensions by the path-parameter guard; handlers
/// read it instead of the raw `Path` extractor.
///
/// The guard cannot rewrite the router's own parameter storage, so axum's
/// `Path` and `RawPathParams` extractors still yield the unsanitized values.
/// A handler that uses them bypasses the guard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(pub Vec<(String, String)>);

impl PathParams {
    /// Look up a parameter by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterate over `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Sanitize the string fields of a request body.
///
/// Only a JSON object counts as a field container; an absent body, a
/// scalar, or a top-level array is left alone. Returns the number of
/// fields whose value changed.
pub fn sanitize_body_fields(body: Option<&mut Value>, sanitizer: &dyn TextSanitizer) -> usize {
    match body {
        Some(Value::Object(map)) => sanitize_object(map, sanitizer),
        _ => 0,
    }
}

/// Sanitize every query parameter value. Returns the number changed.
pub fn sanitize_query_fields(query: &mut [(String, String)], sanitizer: &dyn TextSanitizer) -> usize {
    sanitize_pairs(query, sanitizer)
}

/// Sanitize every path parameter value. Returns the number changed.
pub fn sanitize_param_fields(params: &mut PathParams, sanitizer: &dyn TextSanitizer) -> usize {
    sanitize_pairs(&mut params.0, sanitizer)
}

fn sanitize_object(map: &mut Map<String, Value>, sanitizer: &dyn TextSanitizer) -> usize {
    let mut changed = 0;
    for value in map.values_mut() {
        if let Value::String(s) = value {
            let clean = sanitizer.sanitize(s);
            if clean != *s {
                *s = clean;
                changed += 1;
            }
        }
    }
    changed
}

fn sanitize_pairs(pairs: &mut [(String, String)], sanitizer: &dyn TextSanitizer) -> usize {
    let mut changed = 0;
    for (_, value) in pairs.iter_mut() {
        let clean = sanitizer.sanitize(value);
        if clean != *value {
            *value = clean;
            changed += 1;
        }
    }
    changed
}

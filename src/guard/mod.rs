//! Request field guard.
//!
//! Applies the sanitizer to every string field of the request body, query
//! parameters and path parameters before handler logic runs.

pub mod fields;
pub mod middleware;

pub use fields::{PathParams, sanitize_body_fields, sanitize_param_fields, sanitize_query_fields};
pub use middleware::{FieldGuard, guard_body_and_query, guard_path_params};

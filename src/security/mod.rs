//! Security modules for input-guard.
//!
//! Provides pattern-based input sanitization and SSRF protection.

pub mod sanitize;
pub mod ssrf;

pub use sanitize::{
    DEFAULT_MAX_LENGTH, FILTERED_MARKER, PatternSanitizer, SanitizationPolicy, TextSanitizer,
    sanitize, sanitize_value,
};
pub use ssrf::{
    ApprovedTarget, Denial, Resolver, SsrfGuard, StaticResolver, SystemResolver, Verdict,
    is_non_public,
};

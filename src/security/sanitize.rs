//! Pattern-based input sanitization.
//!
//! Strips script blocks, inline event handlers, tag markup, SQL keywords and
//! `NoSQL` operator tokens from untrusted text. This is a lossy,
//! defense-in-depth filter: it never builds a DOM and does not replace output
//! encoding at render time.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::{Error, Result};

/// Default maximum length, in characters, of a sanitized field.
pub const DEFAULT_MAX_LENGTH: usize = 1000;

/// Marker substituted for SQL keywords and `$`-prefixed operator tokens.
pub const FILTERED_MARKER: &str = "[FILTERED]";

/// Sanitization settings, passed explicitly to every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizationPolicy {
    max_length: usize,
}

impl SanitizationPolicy {
    /// Create a policy with the given maximum length.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `max_length` is zero.
    pub fn new(max_length: usize) -> Result<Self> {
        if max_length == 0 {
            return Err(Error::Config(
                "sanitizer max_length must be greater than zero".to_string(),
            ));
        }
        Ok(Self { max_length })
    }

    /// Maximum number of characters kept before filtering.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for SanitizationPolicy {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

/// A pluggable text sanitization capability.
///
/// Call sites depend on this trait only, so the pattern engine can be swapped
/// for a DOM-based HTML sanitizer without touching them.
pub trait TextSanitizer: Send + Sync + 'static {
    /// Sanitize a single untrusted string.
    fn sanitize(&self, input: &str) -> String;

    /// Sanitize a JSON value: strings are cleaned, every other value
    /// (numbers, booleans, null, arrays, objects) passes through unchanged.
    fn sanitize_value(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize(&s)),
            other => other,
        }
    }
}

/// The regular-expression sanitizer.
#[derive(Debug, Clone, Default)]
pub struct PatternSanitizer {
    policy: SanitizationPolicy,
}

impl PatternSanitizer {
    /// Create a sanitizer bound to a policy.
    #[must_use]
    pub fn new(policy: SanitizationPolicy) -> Self {
        Self { policy }
    }

    /// The policy this sanitizer applies.
    #[must_use]
    pub fn policy(&self) -> SanitizationPolicy {
        self.policy
    }
}

impl TextSanitizer for PatternSanitizer {
    fn sanitize(&self, input: &str) -> String {
        sanitize(input, &self.policy)
    }
}

struct Patterns {
    script_block: Regex,
    script_scheme: Regex,
    event_handler: Regex,
    risky_tag: Regex,
    any_tag: Regex,
    stray_delimiter: Regex,
    sql_keyword: Regex,
    operator_token: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();

    PATTERNS.get_or_init(|| Patterns {
        script_block: Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap(),
        script_scheme: Regex::new(r"(?i)javascript:").unwrap(),
        event_handler: Regex::new(r"(?i)\bon\w+\s*=").unwrap(),
        risky_tag: Regex::new(r"(?i)<[^>]*\b(?:on\w+|style|href|src)\s*=[^>]*>").unwrap(),
        any_tag: Regex::new(r"<[^>]*>").unwrap(),
        stray_delimiter: Regex::new(r"[<>]").unwrap(),
        // The optional `$` lets operator tokens such as `$where` fall through
        // to the operator pass intact.
        sql_keyword: Regex::new(
            r"(?i)(\$)?\b(?:select|insert|update|delete|from|where|join|union)\b",
        )
        .unwrap(),
        operator_token: Regex::new(r"\$\w+").unwrap(),
    })
}

/// Sanitize untrusted text under `policy`.
///
/// Passes run in a fixed order, each on the output of the previous one:
/// trim, truncate, script blocks, `javascript:` literals, `on*=` handlers,
/// tags carrying handler/style/link attributes, remaining markup, SQL
/// keywords, `$` operator tokens.
///
/// The markup passes repeat until the text stops changing, so removing one
/// fragment can never splice a removed pattern back together
/// (`java<b>script:` or `on<i>click=`). Every markup pass only deletes,
/// which bounds the repetition by the input length.
///
/// Keyword replacement can grow the output past `policy.max_length()`: each
/// match adds at most `FILTERED_MARKER.len()` minus the matched length.
#[must_use]
pub fn sanitize(input: &str, policy: &SanitizationPolicy) -> String {
    let p = patterns();

    let mut text = truncate_chars(input.trim(), policy.max_length).to_string();
    loop {
        let before = text.len();
        text = strip_markup(p, text);
        if text.len() == before {
            break;
        }
    }
    let text = filter_keywords(&p.sql_keyword, text);

    if p.operator_token.is_match(&text) {
        p.operator_token
            .replace_all(&text, FILTERED_MARKER)
            .into_owned()
    } else {
        text
    }
}

/// Sanitize a JSON value under `policy`; non-strings pass through.
#[must_use]
pub fn sanitize_value(value: Value, policy: &SanitizationPolicy) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize(&s, policy)),
        other => other,
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// One round of the deleting passes, in order.
fn strip_markup(p: &Patterns, text: String) -> String {
    let text = strip(&p.script_block, text);
    let text = strip(&p.script_scheme, text);
    let text = strip(&p.event_handler, text);
    let text = strip(&p.risky_tag, text);
    let text = strip(&p.any_tag, text);
    strip(&p.stray_delimiter, text)
}

fn strip(re: &Regex, text: String) -> String {
    if re.is_match(&text) {
        re.replace_all(&text, "").into_owned()
    } else {
        text
    }
}

fn filter_keywords(re: &Regex, text: String) -> String {
    if !re.is_match(&text) {
        return text;
    }
    re.replace_all(&text, |caps: &Captures| {
        if caps.get(1).is_some() {
            caps[0].to_string()
        } else {
            FILTERED_MARKER.to_string()
        }
    })
    .into_owned()
}

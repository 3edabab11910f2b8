//! Credential redaction, used before any preview or log line leaves the
//! crate (spec §4.14, §10.1, §10.3). Promoted to its own small utility
//! since it is applied at several independent call sites (trace previews,
//! log lines, error messages) rather than inlined at each one.

use once_cell::sync::Lazy;
use regex::Regex;

const REDACTED: &str = "***REDACTED***";

static BEARER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)bearer\s+[a-z0-9._\-]+").unwrap());
// "sk-" plus at least 5 further characters, i.e. a total sequence length
// of at least 8, matching the spec's "sk- prefixed sequences of length >= 8".
static SK_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"sk-[A-Za-z0-9_\-]{5,}").unwrap());

/// Redact known secret-pattern substrings, `Bearer <token>` sequences, and
/// `sk-`-prefixed sequences of length >= 8 from `text`.
///
/// `known_secrets` is the set of configured API-key-like strings currently
/// in scope (provider credentials); each literal occurrence is also
/// redacted regardless of surrounding context.
pub fn redact_secrets(text: &str, known_secrets: &[&str]) -> String {
    let mut result = text.to_string();
    for secret in known_secrets {
        if secret.is_empty() {
            continue;
        }
        result = result.replace(*secret, REDACTED);
    }
    result = BEARER_RE.replace_all(&result, REDACTED).into_owned();
    result = SK_PREFIX_RE.replace_all(&result, REDACTED).into_owned();
    result
}

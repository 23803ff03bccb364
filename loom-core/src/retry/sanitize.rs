//! Redacts secret-shaped substrings out of exchange error text before it's
//! persisted or logged (spec.md §4.7, §7: "sanitized... then truncated to
//! 500 chars").
//!
//! Pattern set is grounded on the original system's
//! `logging_security.py` sensitivity tiers, narrowed to what actually shows
//! up in an exchange client's error body: API keys, secret keys,
//! passwords, and bearer tokens. `user_id`/`price`-style low-sensitivity
//! fields from the original aren't redacted here — they aren't secrets and
//! the caller already structures those as typed fields, not free text.

use std::sync::OnceLock;

use regex::Regex;

const MAX_LEN: usize = 500;

struct Patterns {
    api_key: Regex,
    secret_key: Regex,
    password: Regex,
    bearer: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        api_key: Regex::new(r#"(?i)(["']?(?:api_?key|apikey|access_?key)["']?\s*[:=]\s*["']?)([a-zA-Z0-9]{16,})"#)
            .expect("valid regex"),
        secret_key: Regex::new(
            r#"(?i)(["']?(?:secret_?key|secretkey|private_?key)["']?\s*[:=]\s*["']?)([a-zA-Z0-9+/]{16,})"#,
        )
        .expect("valid regex"),
        password: Regex::new(r#"(?i)(["']?password["']?\s*[:=]\s*["']?)([^"'\s]{4,})"#).expect("valid regex"),
        bearer: Regex::new(r#"(?i)(Bearer\s+)([a-zA-Z0-9._-]{16,})"#).expect("valid regex"),
    })
}

/// Masks API keys, secret keys, passwords and bearer tokens, then truncates
/// to 500 chars on a char boundary. Applied at every write site that
/// persists exchange-supplied text (`FailedOrder.exchange_error`,
/// `CancelQueueEntry.error_message`).
pub fn sanitize_exchange_error(raw: &str) -> String {
    let p = patterns();
    let mut text = raw.to_string();
    text = p.api_key.replace_all(&text, "${1}****").into_owned();
    text = p.secret_key.replace_all(&text, "${1}****").into_owned();
    text = p.password.replace_all(&text, "${1}****").into_owned();
    text = p.bearer.replace_all(&text, "${1}****").into_owned();

    if text.chars().count() <= MAX_LEN {
        text
    } else {
        text.chars().take(MAX_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_api_key() {
        let input = r#"request failed: {"api_key": "AKIA1234567890ABCDEF"}"#;
        let out = sanitize_exchange_error(input);
        assert!(!out.contains("AKIA1234567890ABCDEF"));
        assert!(out.contains("****"));
    }

    #[test]
    fn redacts_bearer_token() {
        let input = "auth header: Bearer eyJhbGciOiJIUzI1NiJ9.abcdef";
        let out = sanitize_exchange_error(input);
        assert!(!out.contains("eyJhbGciOiJIUzI1NiJ9"));
    }

    #[test]
    fn redacts_secret_key_and_password() {
        let input = "secret_key=abcdEFGH12345678ijkl password=hunter22222";
        let out = sanitize_exchange_error(input);
        assert!(!out.contains("abcdEFGH12345678ijkl"));
        assert!(!out.contains("hunter22222"));
    }

    #[test]
    fn leaves_ordinary_messages_untouched() {
        let input = "insufficient balance for BTC/USDT";
        assert_eq!(sanitize_exchange_error(input), input);
    }

    #[test]
    fn truncates_to_500_chars_on_boundary() {
        let long = "x".repeat(900);
        let out = sanitize_exchange_error(&long);
        assert_eq!(out.chars().count(), MAX_LEN);
    }
}

//! PII redaction service (`spec.md` §7).
//!
//! Detects email addresses, phone numbers, Luhn-valid credit card numbers,
//! IPv4 addresses, and SSNs in free text and replaces each occurrence with
//! a stable per-request token (`[EMAIL_1]`, `[PHONE_1]`, ...). The reverse
//! mapping lives only in memory, scoped to one request, and is dropped when
//! the request completes — mirroring the teacher's `SecretScrubbingLayer`
//! (`infrastructure/logging/secret_scrubbing.rs`) generalized from
//! secret-credential patterns to personal-data patterns, and from a
//! stateless replace-with-fixed-marker scheme to a stable reversible one.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]\d{3}[-. ]\d{4}\b").unwrap())
}

fn credit_card_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap())
}

fn ipv4_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap())
}

fn ssn_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap())
}

/// A named category of detected PII, in the order categories are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Category {
    Email,
    Phone,
    CreditCard,
    Ssn,
    Ip,
}

impl Category {
    fn token_prefix(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Phone => "PHONE",
            Self::CreditCard => "CC",
            Self::Ssn => "SSN",
            Self::Ip => "IP",
        }
    }
}

/// Validates a digit string against the Luhn checksum, to avoid flagging
/// ordinary 13-19 digit numbers (order IDs, phone numbers already matched
/// elsewhere) as credit cards.
fn luhn_valid(digits: &str) -> bool {
    let digits: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Per-request redaction state: a forward pass replaces PII with stable
/// tokens, recording the reverse mapping for the lifetime of one request.
#[derive(Debug, Default)]
pub struct RedactionContext {
    reverse: HashMap<String, String>,
    counters: HashMap<&'static str, u32>,
}

impl RedactionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_token(&mut self, category: Category) -> String {
        let counter = self.counters.entry(category.token_prefix()).or_insert(0);
        *counter += 1;
        format!("[{}_{}]", category.token_prefix(), counter)
    }

    /// Scans `text` and replaces every detected PII occurrence with a
    /// stable token, recording the reverse mapping.
    pub fn redact(&mut self, text: &str) -> String {
        let mut result = text.to_string();
        result = self.redact_with_pattern(&result, email_pattern(), Category::Email, |_| true);
        result = self.redact_with_pattern(&result, ssn_pattern(), Category::Ssn, |_| true);
        result = self.redact_with_pattern(&result, phone_pattern(), Category::Phone, |_| true);
        result = self.redact_with_pattern(&result, credit_card_pattern(), Category::CreditCard, luhn_valid);
        result = self.redact_with_pattern(&result, ipv4_pattern(), Category::Ip, |_| true);
        result
    }

    fn redact_with_pattern(
        &mut self,
        text: &str,
        pattern: &Regex,
        category: Category,
        accept: impl Fn(&str) -> bool,
    ) -> String {
        let mut result = String::with_capacity(text.len());
        let mut last_end = 0;
        for m in pattern.find_iter(text) {
            if !accept(m.as_str()) {
                continue;
            }
            let token = self
                .reverse
                .iter()
                .find(|(_, original)| original.as_str() == m.as_str())
                .map(|(token, _)| token.clone())
                .unwrap_or_else(|| {
                    let token = self.next_token(category);
                    self.reverse.insert(token.clone(), m.as_str().to_string());
                    token
                });
            result.push_str(&text[last_end..m.start()]);
            result.push_str(&token);
            last_end = m.end();
        }
        result.push_str(&text[last_end..]);
        result
    }

    /// Restores every token in `text` back to its original value. Used
    /// only on the return path into the sandbox/tool that needs the real
    /// value; never crosses the gateway boundary outward.
    #[must_use]
    pub fn unredact(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (token, original) in &self.reverse {
            result = result.replace(token.as_str(), original);
        }
        result
    }

    /// Recursively redacts every string leaf of a JSON value, for scanning
    /// a sandbox worker's returned result or logged lines (`spec.md` §4.5:
    /// "PII detection runs on all returned values and recorded logs").
    pub fn redact_value(&mut self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::Object(map) => {
                Value::Object(map.iter().map(|(k, v)| (k.clone(), self.redact_value(v))).collect())
            }
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_replaced_with_stable_token() {
        let mut ctx = RedactionContext::new();
        let redacted = ctx.redact("contact me at jane@example.com please");
        assert!(redacted.contains("[EMAIL_1]"));
        assert!(!redacted.contains("jane@example.com"));
    }

    #[test]
    fn repeated_occurrence_reuses_same_token() {
        let mut ctx = RedactionContext::new();
        let redacted = ctx.redact("jane@example.com and again jane@example.com");
        let occurrences = redacted.matches("[EMAIL_1]").count();
        assert_eq!(occurrences, 2);
        assert!(!redacted.contains("[EMAIL_2]"));
    }

    #[test]
    fn ssn_is_redacted() {
        let mut ctx = RedactionContext::new();
        let redacted = ctx.redact("ssn is 123-45-6789 on file");
        assert!(redacted.contains("[SSN_1]"));
        assert!(!redacted.contains("123-45-6789"));
    }

    #[test]
    fn non_luhn_digit_string_is_left_alone() {
        let mut ctx = RedactionContext::new();
        let redacted = ctx.redact("order number 1234567890123");
        assert!(!redacted.contains("[CC_1]"));
    }

    #[test]
    fn unredact_restores_original_values() {
        let mut ctx = RedactionContext::new();
        let redacted = ctx.redact("email jane@example.com");
        let restored = ctx.unredact(&redacted);
        assert_eq!(restored, "email jane@example.com");
    }

    #[test]
    fn redact_value_walks_nested_json() {
        let mut ctx = RedactionContext::new();
        let redacted = ctx.redact_value(&serde_json::json!({
            "contact": "jane@example.com",
            "notes": ["call 555-123-4567", "fine"],
        }));
        assert_eq!(redacted["contact"], "[EMAIL_1]");
        assert!(redacted["notes"][0].as_str().unwrap().contains("[PHONE_1]"));
        assert_eq!(redacted["notes"][1], "fine");
    }

    #[test]
    fn clean_text_is_unchanged() {
        let mut ctx = RedactionContext::new();
        let text = "no personal data here at all";
        assert_eq!(ctx.redact(text), text);
    }
}

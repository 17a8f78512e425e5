//! Widget instance properties.
//!
//! Instances store their configuration as `key=value` lines (`#` and `!` start
//! comments, `:` is accepted as a separator, a trailing backslash continues the
//! value on the next line). Once resolved against the widget's parameter
//! descriptors, an unset optional property maps to `None`.

use std::collections::BTreeMap;

/// Resolved property values keyed by property name.
pub type PropertyMap = BTreeMap<String, Option<String>>;

/// Replacement written in place of secret values.
pub const REDACTED: &str = "****";

/// Parse raw `key=value` lines into a property map.
pub fn parse_properties(raw: &str) -> PropertyMap {
  let mut properties = PropertyMap::new();
  let mut lines = raw.lines();

  while let Some(line) = lines.next() {
    let mut logical = line.trim_start().to_string();
    if logical.is_empty() || logical.starts_with('#') || logical.starts_with('!') {
      continue;
    }

    while ends_with_continuation(&logical) {
      logical.pop();
      match lines.next() {
        Some(next) => logical.push_str(next.trim_start()),
        None => break,
      }
    }

    let (key, value) = split_entry(&logical);
    if key.is_empty() {
      continue;
    }
    properties.insert(unescape(key), Some(unescape(value)));
  }

  properties
}

/// Encode a property map back into `key=value` lines. `None` values are skipped.
pub fn encode_properties(properties: &PropertyMap) -> String {
  properties
    .iter()
    .filter_map(|(key, value)| {
      value
        .as_ref()
        .map(|value| format!("{}={}", escape(key, true), escape(value, false)))
    })
    .collect::<Vec<_>>()
    .join("\n")
}

/// Replace every occurrence of the given secret values in `text`.
pub fn redact<S: AsRef<str>>(text: &str, secrets: &[S]) -> String {
  let mut secrets: Vec<&str> = secrets
    .iter()
    .map(|s| s.as_ref())
    .filter(|s| !s.is_empty())
    .collect();
  // Longest first so a secret containing another one is fully masked.
  secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

  let mut redacted = text.to_string();
  for secret in secrets {
    redacted = redacted.replace(secret, REDACTED);
  }
  redacted
}

fn ends_with_continuation(line: &str) -> bool {
  let trailing = line.chars().rev().take_while(|c| *c == '\\').count();
  trailing % 2 == 1
}

fn split_entry(line: &str) -> (&str, &str) {
  let mut escaped = false;
  for (index, c) in line.char_indices() {
    if escaped {
      escaped = false;
      continue;
    }
    match c {
      '\\' => escaped = true,
      '=' | ':' => {
        let key = line[..index].trim_end();
        let value = line[index + c.len_utf8()..].trim_start();
        return (key, value);
      }
      _ => {}
    }
  }
  (line.trim_end(), "")
}

fn unescape(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut chars = text.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('t') => out.push('\t'),
      Some('r') => out.push('\r'),
      Some(other) => out.push(other),
      None => {}
    }
  }
  out
}

fn escape(text: &str, is_key: bool) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\t' => out.push_str("\\t"),
      '\r' => out.push_str("\\r"),
      '=' | ':' | ' ' if is_key => {
        out.push('\\');
        out.push(c);
      }
      _ => out.push(c),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_simple_properties() {
    let properties = parse_properties("SURI_URL=https://example.com\nSURI_COUNT = 3\n");
    assert_eq!(
      properties.get("SURI_URL"),
      Some(&Some("https://example.com".to_string()))
    );
    assert_eq!(properties.get("SURI_COUNT"), Some(&Some("3".to_string())));
  }

  #[test]
  fn test_parse_skips_comments_and_blank_lines() {
    let properties = parse_properties("# comment\n! other\n\nA=1");
    assert_eq!(properties.len(), 1);
    assert_eq!(properties.get("A"), Some(&Some("1".to_string())));
  }

  #[test]
  fn test_parse_value_keeps_separators_after_first() {
    let properties = parse_properties("QUERY=a=b:c");
    assert_eq!(properties.get("QUERY"), Some(&Some("a=b:c".to_string())));
  }

  #[test]
  fn test_parse_colon_separator_and_empty_value() {
    let properties = parse_properties("TOKEN: abc\nEMPTY=");
    assert_eq!(properties.get("TOKEN"), Some(&Some("abc".to_string())));
    assert_eq!(properties.get("EMPTY"), Some(&Some(String::new())));
  }

  #[test]
  fn test_parse_line_continuation_and_escapes() {
    let properties = parse_properties("TEXT=first \\\n    second\nLINES=a\\nb");
    assert_eq!(properties.get("TEXT"), Some(&Some("first second".to_string())));
    assert_eq!(properties.get("LINES"), Some(&Some("a\nb".to_string())));
  }

  #[test]
  fn test_encode_then_parse_preserves_special_characters() {
    let mut properties = PropertyMap::new();
    properties.insert("MULTI".to_string(), Some("one\ntwo".to_string()));
    properties.insert("UNSET".to_string(), None);

    let encoded = encode_properties(&properties);
    assert!(!encoded.contains("UNSET"));

    let parsed = parse_properties(&encoded);
    assert_eq!(parsed.get("MULTI"), Some(&Some("one\ntwo".to_string())));
  }

  #[test]
  fn test_redact_masks_every_occurrence() {
    let redacted = redact("token=s3cret; again s3cret", &["s3cret"]);
    assert_eq!(redacted, "token=****; again ****");
  }

  #[test]
  fn test_redact_prefers_longest_secret_and_ignores_empty() {
    let redacted = redact("key abcdef", &["abc", "abcdef", ""]);
    assert_eq!(redacted, "key ****");
  }
}

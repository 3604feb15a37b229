use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ExtractError;
use crate::record::{record_from_json, ExtractedRecord, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    Direct,
    BraceScan,
    FieldRegex,
}

/// Turn model output into a record: strict JSON, then the first balanced
/// object found by scanning, then per-field regex extraction.
pub fn parse_model_output(
    text: &str,
    fields: &[&str],
) -> Result<(ExtractedRecord, ParseStrategy), ExtractError> {
    let body = strip_code_fence(text);

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        return Ok((record_from_json(Value::Object(map)), ParseStrategy::Direct));
    }

    for candidate in ObjectScanner::new(text) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            debug!(len = candidate.len(), "Recovered JSON object by brace scan");
            return Ok((record_from_json(Value::Object(map)), ParseStrategy::BraceScan));
        }
    }

    let record = extract_fields_by_regex(text, fields);
    if !record.is_empty() {
        debug!(fields = record.len(), "Recovered fields by regex");
        return Ok((record, ParseStrategy::FieldRegex));
    }

    let preview: String = text.chars().take(80).collect();
    Err(ExtractError::Parse(format!(
        "no JSON object or known field in model output: {:?}",
        preview
    )))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json)
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Outside,
    InString,
    Escaped,
}

/// Yields `{...}` substrings whose braces balance, ignoring braces inside
/// string literals. When the first opening brace never closes, the earliest
/// inner brace that does close is yielded instead. One pass per candidate.
struct ObjectScanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> ObjectScanner<'a> {
    fn new(text: &'a str) -> Self {
        ObjectScanner { text, pos: 0 }
    }
}

impl<'a> Iterator for ObjectScanner<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let rest = self.text.get(self.pos..)?;
        let start = self.pos + rest.find('{')?;

        let mut state = ScanState::Outside;
        let mut open: Vec<usize> = Vec::new();
        // Earliest opener closed so far while an outer one is still open.
        let mut inner: Option<(usize, usize)> = None;

        for (offset, c) in self.text[start..].char_indices() {
            let at = start + offset;
            state = match (state, c) {
                (ScanState::Outside, '"') => ScanState::InString,
                (ScanState::Outside, '{') => {
                    open.push(at);
                    ScanState::Outside
                }
                (ScanState::Outside, '}') => {
                    if let Some(opener) = open.pop() {
                        let end = at + 1;
                        if open.is_empty() {
                            self.pos = end;
                            return Some(&self.text[opener..end]);
                        }
                        if inner.map_or(true, |(o, _)| opener < o) {
                            inner = Some((opener, end));
                        }
                    }
                    ScanState::Outside
                }
                (ScanState::InString, '\\') => ScanState::Escaped,
                (ScanState::InString, '"') => ScanState::Outside,
                (ScanState::Escaped, _) => ScanState::InString,
                (s, _) => s,
            };
        }

        match inner {
            Some((opener, end)) => {
                self.pos = end;
                Some(&self.text[opener..end])
            }
            None => {
                self.pos = self.text.len();
                None
            }
        }
    }
}

fn extract_fields_by_regex(text: &str, fields: &[&str]) -> ExtractedRecord {
    let mut record = ExtractedRecord::new();
    let item_re = string_literal_re();

    for field in fields {
        let key = regex::escape(field);
        let scalar = Regex::new(&format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, key));
        let array = Regex::new(&format!(r#""{}"\s*:\s*\[([^\]]*)\]"#, key));
        let null = Regex::new(&format!(r#""{}"\s*:\s*null\b"#, key));

        if let Some(caps) = scalar.ok().and_then(|re| re.captures(text)) {
            record.insert(field.to_string(), FieldValue::Text(unescape(&caps[1])));
        } else if let Some(caps) = array.ok().and_then(|re| re.captures(text)) {
            let items = item_re
                .captures_iter(&caps[1])
                .map(|c| unescape(&c[1]))
                .collect();
            record.insert(field.to_string(), FieldValue::List(items));
        } else if null.map(|re| re.is_match(text)).unwrap_or(false) {
            record.insert(field.to_string(), FieldValue::Null);
        }
    }
    record
}

fn string_literal_re() -> &'static Regex {
    use std::sync::LazyLock;
    static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).unwrap());
    &RE
}

fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::debug;

use super::rules::{RuleBook, SanityCheck, SanityRule, Severity};
use super::{Penalty, PenaltyReason};
use crate::record::{is_field_populated, is_text_populated, ExtractedRecord, FieldValue};

pub struct GuardrailOutcome {
    pub working: ExtractedRecord,
    pub penalties: Vec<Penalty>,
    pub failed: BTreeSet<String>,
}

/// Scan the original record and blank every populated field that fails a
/// sanity rule. Each field is reported at most once.
pub fn apply(record: &ExtractedRecord, book: &RuleBook) -> GuardrailOutcome {
    let mut working = record.clone();
    let mut penalties = Vec::new();
    let mut failed = BTreeSet::new();

    for (field, value) in record {
        if !is_field_populated(value) {
            continue;
        }
        let violation = book
            .guardrails()
            .iter()
            .filter(|g| g.applies_to(field))
            .find_map(|g| check(g, value, book).map(|reason| (g, reason)));

        if let Some((guard, reason)) = violation {
            debug!(field = %field, rule = %guard.describe(), "Guardrail failed");
            penalties.push(Penalty {
                field: field.clone(),
                reason,
                original_value: value.clone(),
                rule: guard.describe(),
                weight: 1.0,
                severity: Severity::Medium,
                timestamp: Utc::now(),
            });
            working.insert(field.clone(), value.blanked());
            failed.insert(field.clone());
        }
    }

    GuardrailOutcome {
        working,
        penalties,
        failed,
    }
}

fn check(guard: &SanityRule, value: &FieldValue, book: &RuleBook) -> Option<PenaltyReason> {
    let texts: Vec<&str> = match value {
        FieldValue::Text(s) => vec![s.as_str()],
        FieldValue::List(items) => items
            .iter()
            .map(String::as_str)
            .filter(|s| is_text_populated(s))
            .collect(),
        _ => return None,
    };

    match &guard.check {
        SanityCheck::MaxLength { max } => texts
            .iter()
            .any(|t| t.trim().chars().count() > *max)
            .then_some(PenaltyReason::SanityLength),
        SanityCheck::MinLength { min } => texts
            .iter()
            .any(|t| t.trim().chars().count() < *min)
            .then_some(PenaltyReason::SanityLength),
        SanityCheck::MaxItems { max } => match value {
            FieldValue::List(items) if items.len() > *max => Some(PenaltyReason::SanityItems),
            _ => None,
        },
        // An uncompiled guardrail pattern never blanks data.
        SanityCheck::Pattern { regex } => {
            let re = book.pattern(regex).ok()?;
            texts
                .iter()
                .any(|t| !re.is_match(t.trim()))
                .then_some(PenaltyReason::SanityFormat)
        }
        SanityCheck::ForbiddenPattern { regex } => {
            let re = book.pattern(regex).ok()?;
            texts
                .iter()
                .any(|t| re.is_match(t.trim()))
                .then_some(PenaltyReason::SanityFormat)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, FieldValue)]) -> ExtractedRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn markup_is_blanked() {
        let book = RuleBook::default();
        let r = record(&[
            ("description", FieldValue::text("Nice <script>alert(1)</script>")),
            ("title", FieldValue::text("A perfectly normal title")),
        ]);
        let out = apply(&r, &book);
        assert_eq!(out.penalties.len(), 1);
        assert_eq!(out.penalties[0].reason, PenaltyReason::SanityFormat);
        assert_eq!(out.working["description"], FieldValue::Null);
        assert_eq!(out.working["title"], r["title"]);
        assert!(out.failed.contains("description"));
    }

    #[test]
    fn url_as_title_and_price_without_digits() {
        let book = RuleBook::default();
        let r = record(&[
            ("title", FieldValue::text("https://example.com/item/42")),
            ("price", FieldValue::text("call for price")),
        ]);
        let out = apply(&r, &book);
        let fields: Vec<&str> = out.penalties.iter().map(|p| p.field.as_str()).collect();
        assert_eq!(fields, vec!["price", "title"]);
    }

    #[test]
    fn oversized_lists_are_emptied() {
        let book = RuleBook::default();
        let items: Vec<String> = (0..501).map(|i| format!("item {}", i)).collect();
        let r = record(&[("features", FieldValue::List(items))]);
        let out = apply(&r, &book);
        assert_eq!(out.penalties[0].reason, PenaltyReason::SanityItems);
        assert_eq!(out.working["features"], FieldValue::List(vec![]));
    }

    #[test]
    fn blank_fields_are_ignored() {
        let book = RuleBook::default();
        let r = record(&[("price", FieldValue::text("n/a")), ("title", FieldValue::Null)]);
        let out = apply(&r, &book);
        assert!(out.penalties.is_empty());
        assert_eq!(out.working, r);
    }
}

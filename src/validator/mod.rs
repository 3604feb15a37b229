pub mod guardrails;
pub mod metrics;
pub mod rules;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::record::{
    accuracy, is_field_populated, is_text_populated, round_percent, ExtractedRecord, FieldValue,
};
use crate::site::SiteType;
use rules::{FieldRule, RuleBook, Severity};

pub use metrics::{business_weighted_accuracy, SiteScore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PenaltyReason {
    RequiredFieldMissing,
    InsufficientLength,
    ExcessiveLength,
    InvalidFormat,
    InsufficientItems,
    ValidationRuleError,
    SanityLength,
    SanityFormat,
    SanityItems,
}

impl PenaltyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PenaltyReason::RequiredFieldMissing => "REQUIRED_FIELD_MISSING",
            PenaltyReason::InsufficientLength => "INSUFFICIENT_LENGTH",
            PenaltyReason::ExcessiveLength => "EXCESSIVE_LENGTH",
            PenaltyReason::InvalidFormat => "INVALID_FORMAT",
            PenaltyReason::InsufficientItems => "INSUFFICIENT_ITEMS",
            PenaltyReason::ValidationRuleError => "VALIDATION_RULE_ERROR",
            PenaltyReason::SanityLength => "SANITY_LENGTH",
            PenaltyReason::SanityFormat => "SANITY_FORMAT",
            PenaltyReason::SanityItems => "SANITY_ITEMS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Penalty {
    pub field: String,
    pub reason: PenaltyReason,
    pub original_value: FieldValue,
    pub rule: String,
    pub weight: f64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationMetrics {
    pub raw_accuracy: u32,
    pub weighted_raw_accuracy: u32,
    pub guardrail_accuracy: u32,
    pub validated_accuracy: u32,
    pub weighted_validated_accuracy: u32,
    pub penalty_impact: f64,
    pub required_fields_passed: usize,
    pub required_fields_total: usize,
    pub fields_validated: usize,
    pub total_penalty_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub success: bool,
    pub site_type: SiteType,
    pub validated_data: ExtractedRecord,
    pub penalties: Vec<Penalty>,
    pub guardrail_penalties: Vec<Penalty>,
    pub metrics: ValidationMetrics,
}

/// Why a rule could not be evaluated.
#[derive(Debug)]
struct RuleError(String);

/// Validate `record` against the rules for `site`. Failing fields are blanked
/// in `validated_data`; every problem is reported as a penalty, never as an error.
pub fn apply_validation_penalties(
    record: &ExtractedRecord,
    site: SiteType,
    book: &RuleBook,
) -> ValidationResult {
    let rules = book.rules_for(site);

    let raw = accuracy(record);
    let weighted_raw = metrics::weighted_accuracy(record, rules);

    let guard = guardrails::apply(record, book);
    let guardrail_accuracy = accuracy(&guard.working);
    let mut validated = guard.working;

    let mut penalties = Vec::new();
    let mut fields_validated = 0usize;
    let mut required_passed = BTreeSet::new();

    for (field, rule) in rules {
        let Some(value) = record.get(field) else {
            continue;
        };
        if guard.failed.contains(field) {
            continue;
        }

        let failure = match resolve(field, rule, rules) {
            Err(RuleError(msg)) => Some((
                PenaltyReason::ValidationRuleError,
                msg,
                rule.penalty_weight,
                Severity::High,
            )),
            Ok((canonical, target)) => match evaluate(value, target, book) {
                Ok(None) => {
                    if is_field_populated(value) {
                        fields_validated += 1;
                        if target.required {
                            required_passed.insert(canonical);
                        }
                    }
                    None
                }
                Ok(Some((reason, detail))) => {
                    Some((reason, detail, target.penalty_weight, target.severity))
                }
                Err(RuleError(msg)) => Some((
                    PenaltyReason::ValidationRuleError,
                    msg,
                    target.penalty_weight,
                    Severity::High,
                )),
            },
        };

        if let Some((reason, detail, weight, severity)) = failure {
            debug!(field = %field, reason = reason.as_str(), rule = %detail, "Penalty");
            penalties.push(Penalty {
                field: field.clone(),
                reason,
                original_value: value.clone(),
                rule: detail,
                weight,
                severity,
                timestamp: Utc::now(),
            });
            validated.insert(field.clone(), value.blanked());
        }
    }

    let validated_accuracy = accuracy(&validated);
    let weighted_validated = metrics::weighted_accuracy(&validated, rules);
    // Required fields by canonical name; an alias can satisfy its target.
    let required_total = rules
        .iter()
        .filter_map(|(field, rule)| resolve(field, rule, rules).ok())
        .filter(|(_, rule)| rule.required)
        .map(|(canonical, _)| canonical)
        .collect::<BTreeSet<&str>>()
        .len();
    let required_passed = required_passed.len();
    let total_penalty_weight = penalties.iter().map(|p| p.weight).sum();

    let metrics = ValidationMetrics {
        raw_accuracy: round_percent(raw),
        weighted_raw_accuracy: round_percent(weighted_raw),
        guardrail_accuracy: round_percent(guardrail_accuracy),
        validated_accuracy: round_percent(validated_accuracy),
        weighted_validated_accuracy: round_percent(weighted_validated),
        penalty_impact: metrics::penalty_impact(weighted_raw, weighted_validated),
        required_fields_passed: required_passed,
        required_fields_total: required_total,
        fields_validated,
        total_penalty_weight,
    };
    let success = required_passed == required_total && fields_validated > 0;

    info!(
        site = %site,
        success,
        penalties = penalties.len(),
        guardrail_penalties = guard.penalties.len(),
        raw_accuracy = metrics.raw_accuracy,
        validated_accuracy = metrics.validated_accuracy,
        penalty_impact = metrics.penalty_impact,
        "Validated record"
    );

    ValidationResult {
        success,
        site_type: site,
        validated_data: validated,
        penalties,
        guardrail_penalties: guard.penalties,
        metrics,
    }
}

/// Follow `aliasOf` one level, returning the canonical field name and its rule.
fn resolve<'a>(
    field: &'a str,
    rule: &'a FieldRule,
    rules: &'a BTreeMap<String, FieldRule>,
) -> Result<(&'a str, &'a FieldRule), RuleError> {
    let Some(target) = &rule.alias_of else {
        return Ok((field, rule));
    };
    match rules.get_key_value(target) {
        Some((name, t)) if t.alias_of.is_none() => Ok((name.as_str(), t)),
        Some(_) => Err(RuleError(format!("aliasOf {} points to another alias", target))),
        None => Err(RuleError(format!("aliasOf {} has no rule", target))),
    }
}

fn evaluate(
    value: &FieldValue,
    rule: &FieldRule,
    book: &RuleBook,
) -> Result<Option<(PenaltyReason, String)>, RuleError> {

    if !is_field_populated(value) {
        if rule.required {
            return Ok(Some((PenaltyReason::RequiredFieldMissing, "required".into())));
        }
        return Ok(None);
    }

    match value {
        FieldValue::Text(s) => {
            let text = s.trim();
            let len = text.chars().count();
            if let Some(min) = rule.min_length {
                if len < min {
                    return Ok(Some((
                        PenaltyReason::InsufficientLength,
                        format!("minLength {} (got {})", min, len),
                    )));
                }
            }
            if let Some(max) = rule.max_length {
                if len > max {
                    return Ok(Some((
                        PenaltyReason::ExcessiveLength,
                        format!("maxLength {} (got {})", max, len),
                    )));
                }
            }
            if let Some(pattern) = &rule.regex {
                let re = book.pattern(pattern).map_err(RuleError)?;
                if !re.is_match(text) {
                    return Ok(Some((PenaltyReason::InvalidFormat, format!("regex {}", pattern))));
                }
            }
            Ok(None)
        }
        FieldValue::List(items) => {
            if let Some(min) = rule.min_items {
                let count = items.iter().filter(|s| is_text_populated(s)).count();
                if count < min {
                    return Ok(Some((
                        PenaltyReason::InsufficientItems,
                        format!("minItems {} (got {})", min, count),
                    )));
                }
            }
            Ok(None)
        }
        other => Err(RuleError(format!(
            "cannot apply rule to {} value",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rules::RuleConfig;
    use serde_json::json;

    use crate::record::record_from_json;

    fn validate(value: serde_json::Value, site: SiteType) -> ValidationResult {
        apply_validation_penalties(&record_from_json(value), site, &RuleBook::default())
    }

    fn reasons(result: &ValidationResult) -> Vec<(&str, PenaltyReason)> {
        result
            .penalties
            .iter()
            .map(|p| (p.field.as_str(), p.reason))
            .collect()
    }

    #[test]
    fn short_title_and_few_ingredients() {
        let r = validate(
            json!({"title": "Short", "price": "42.50", "ingredients": ["a", "b"]}),
            SiteType::Generic,
        );
        assert_eq!(
            reasons(&r),
            vec![
                ("ingredients", PenaltyReason::InsufficientItems),
                ("title", PenaltyReason::InsufficientLength),
            ]
        );
        assert_eq!(
            serde_json::to_value(&r.validated_data).unwrap(),
            json!({"title": null, "price": "42.50", "ingredients": []})
        );
        assert_eq!(r.metrics.raw_accuracy, 100);
        assert_eq!(r.metrics.weighted_raw_accuracy, 100);
        assert_eq!(r.metrics.validated_accuracy, 33);
        assert_eq!(r.metrics.weighted_validated_accuracy, 25);
        assert_eq!(r.metrics.penalty_impact, 75.0);
        assert_eq!(r.metrics.required_fields_passed, 0);
        assert_eq!(r.metrics.required_fields_total, 1);
        assert_eq!(r.metrics.fields_validated, 1);
        assert!(!r.success);
        assert!(r.guardrail_penalties.is_empty());
    }

    #[test]
    fn empty_record() {
        let r = validate(json!({}), SiteType::Generic);
        assert!(!r.success);
        assert!(r.penalties.is_empty());
        assert_eq!(r.metrics.raw_accuracy, 0);
        assert_eq!(r.metrics.penalty_impact, 0.0);
    }

    #[test]
    fn complete_record_succeeds() {
        let r = validate(
            json!({
                "title": "KitchenPro 5-Quart Stand Mixer",
                "price": "$279.99",
                "rating": "4.6",
                "features": ["325-watt motor", "ten speeds"],
            }),
            SiteType::Amazon,
        );
        assert!(r.penalties.is_empty(), "{:?}", r.penalties);
        assert!(r.success);
        assert_eq!(r.metrics.required_fields_passed, 2);
        assert_eq!(r.metrics.penalty_impact, 0.0);
    }

    #[test]
    fn missing_required_field_is_penalized() {
        let r = validate(
            json!({"title": "n/a", "price": "19.99"}),
            SiteType::Amazon,
        );
        assert_eq!(reasons(&r), vec![("title", PenaltyReason::RequiredFieldMissing)]);
        assert_eq!(r.penalties[0].severity, Severity::High);
        assert_eq!(r.penalties[0].weight, 2.0);
    }

    #[test]
    fn absent_required_field_blocks_success() {
        let r = validate(json!({"title": "A long enough product title"}), SiteType::Amazon);
        assert!(r.penalties.is_empty());
        assert_eq!(r.metrics.required_fields_passed, 1);
        assert_eq!(r.metrics.required_fields_total, 2);
        assert!(!r.success);
    }

    #[test]
    fn empty_optional_field_is_skipped() {
        let r = validate(
            json!({"title": "A long enough article title", "description": ""}),
            SiteType::Generic,
        );
        assert!(r.penalties.is_empty());
        assert!(r.success);
    }

    #[test]
    fn price_format() {
        let r = validate(
            json!({"title": "A long enough product title", "price": "about twelve 12 dollars"}),
            SiteType::Generic,
        );
        assert_eq!(reasons(&r), vec![("price", PenaltyReason::InvalidFormat)]);
        assert_eq!(r.validated_data["price"], FieldValue::Null);
    }

    #[test]
    fn alias_rule_applies_target_checks() {
        let r = validate(json!({"headline": "Too short"}), SiteType::Bloomberg);
        assert_eq!(reasons(&r), vec![("headline", PenaltyReason::InsufficientLength)]);
    }

    #[test]
    fn alias_satisfies_its_required_target() {
        let r = validate(
            json!({"headline": "Markets rally as rates fall", "author": "Jane Doe"}),
            SiteType::Bloomberg,
        );
        assert!(r.penalties.is_empty(), "{:?}", r.penalties);
        assert_eq!(r.metrics.required_fields_passed, 2);
        assert_eq!(r.metrics.required_fields_total, 2);
        assert!(r.success);

        // Both names present still count title once
        let r = validate(
            json!({
                "title": "Markets rally as rates fall",
                "headline": "Markets rally as rates fall",
                "author": "Jane Doe"
            }),
            SiteType::Bloomberg,
        );
        assert_eq!(r.metrics.required_fields_passed, 2);
        assert_eq!(r.metrics.required_fields_total, 2);
    }

    #[test]
    fn alias_penalty_carries_target_weight_and_severity() {
        let r = validate(json!({"headline": null}), SiteType::Bloomberg);
        assert_eq!(reasons(&r), vec![("headline", PenaltyReason::RequiredFieldMissing)]);
        assert_eq!(r.penalties[0].weight, 2.0);
        assert_eq!(r.penalties[0].severity, Severity::High);
    }

    #[test]
    fn chained_alias_is_a_rule_error() {
        let mut config = RuleConfig::default();
        config.defaults.insert("subtitle".into(), FieldRule::alias("headline"));
        let book = RuleBook::new(config);
        let record = record_from_json(json!({"subtitle": "Anything at all"}));
        let r = apply_validation_penalties(&record, SiteType::Generic, &book);
        assert_eq!(reasons(&r), vec![("subtitle", PenaltyReason::ValidationRuleError)]);
        assert_eq!(r.penalties[0].severity, Severity::High);
    }

    #[test]
    fn invalid_regex_is_a_rule_error() {
        let mut config = RuleConfig::default();
        config
            .defaults
            .insert("sku".into(), FieldRule::optional().regex("(["));
        let book = RuleBook::new(config);
        let record = record_from_json(json!({"sku": "B00123"}));
        let r = apply_validation_penalties(&record, SiteType::Generic, &book);
        assert_eq!(reasons(&r), vec![("sku", PenaltyReason::ValidationRuleError)]);
        assert_eq!(r.validated_data["sku"], FieldValue::Null);
    }

    #[test]
    fn object_values_are_rule_errors() {
        let r = validate(
            json!({"title": {"text": "Nested title object"}, "price": 42.5}),
            SiteType::Generic,
        );
        assert_eq!(reasons(&r), vec![("title", PenaltyReason::ValidationRuleError)]);
        assert_eq!(r.validated_data["price"], FieldValue::text("42.5"));
        assert_eq!(r.validated_data["title"], FieldValue::Null);
    }

    #[test]
    fn guardrail_failures_are_not_penalized_twice() {
        let r = validate(
            json!({"title": "https://example.com/products/42", "price": "free"}),
            SiteType::Generic,
        );
        assert!(r.penalties.is_empty(), "{:?}", r.penalties);
        assert_eq!(r.guardrail_penalties.len(), 2);
        assert_eq!(r.metrics.guardrail_accuracy, 0);
        assert_eq!(r.metrics.raw_accuracy, 100);
        assert_eq!(r.validated_data["title"], FieldValue::Null);
        assert!(!r.success);
    }

    #[test]
    fn unruled_fields_pass_through() {
        let r = validate(
            json!({"title": "A long enough article title", "color": "red"}),
            SiteType::Generic,
        );
        assert_eq!(r.validated_data["color"], FieldValue::text("red"));
        assert_eq!(r.metrics.fields_validated, 1);
    }

    #[test]
    fn result_serializes_camel_case() {
        let r = validate(json!({"title": "Short"}), SiteType::Generic);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["siteType"], "generic");
        assert_eq!(json["penalties"][0]["reason"], "INSUFFICIENT_LENGTH");
        assert_eq!(json["penalties"][0]["originalValue"], "Short");
        assert_eq!(json["metrics"]["requiredFieldsTotal"], 1);
    }

    fn arb_json() -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            ".{0,40}".prop_map(serde_json::Value::from),
            Just(serde_json::Value::from("n/a")),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..5).prop_map(serde_json::Value::from),
                proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn arb_record() -> impl Strategy<Value = serde_json::Value> {
        let field = prop_oneof![
            Just("title".to_string()),
            Just("price".to_string()),
            Just("ingredients".to_string()),
            Just("headline".to_string()),
            Just("author".to_string()),
            "[a-z]{1,8}",
        ];
        proptest::collection::btree_map(field, arb_json(), 0..8)
            .prop_map(|m| serde_json::Value::Object(m.into_iter().collect()))
    }

    fn arb_site() -> impl Strategy<Value = SiteType> {
        proptest::sample::select(SiteType::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn never_panics_and_stays_in_range(value in arb_record(), site in arb_site()) {
            let r = validate(value, site);
            let m = &r.metrics;
            for pct in [m.raw_accuracy, m.weighted_raw_accuracy, m.guardrail_accuracy,
                        m.validated_accuracy, m.weighted_validated_accuracy] {
                prop_assert!(pct <= 100);
            }
            prop_assert!(m.penalty_impact >= 0.0 && m.penalty_impact <= 100.0);
            prop_assert!(!m.penalty_impact.is_nan());
        }

        #[test]
        fn revalidation_only_repeats_required_penalties(value in arb_record(), site in arb_site()) {
            let book = RuleBook::default();
            let first = apply_validation_penalties(&record_from_json(value), site, &book);
            let second = apply_validation_penalties(&first.validated_data, site, &book);

            prop_assert_eq!(&second.validated_data, &first.validated_data);
            prop_assert!(second.guardrail_penalties.is_empty());
            let failed: Vec<&str> = first
                .penalties
                .iter()
                .chain(&first.guardrail_penalties)
                .map(|p| p.field.as_str())
                .collect();
            for p in &second.penalties {
                prop_assert!(failed.contains(&p.field.as_str()), "new penalty on {}", p.field);
                prop_assert_eq!(p.reason, PenaltyReason::RequiredFieldMissing);
            }
        }
    }
}

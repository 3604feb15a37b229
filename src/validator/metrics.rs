use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rules::FieldRule;
use crate::record::{is_field_populated, percent, ExtractedRecord};
use crate::site::SiteType;

/// Weighted share of populated fields, over fields present in both the rule
/// set and the record. Unrounded.
pub fn weighted_accuracy(
    record: &ExtractedRecord,
    rules: &BTreeMap<String, FieldRule>,
) -> f64 {
    let mut total = 0.0;
    let mut populated = 0.0;
    for (field, value) in record {
        let Some(rule) = rules.get(field) else {
            continue;
        };
        let weight = effective_weight(rule, rules);
        total += weight;
        if is_field_populated(value) {
            populated += weight;
        }
    }
    percent(populated, total)
}

/// Accuracy weight of a rule, following `aliasOf` one level.
fn effective_weight(rule: &FieldRule, rules: &BTreeMap<String, FieldRule>) -> f64 {
    let weight = match &rule.alias_of {
        Some(target) => rules
            .get(target)
            .map(|t| t.accuracy_weight)
            .unwrap_or(rule.accuracy_weight),
        None => rule.accuracy_weight,
    };
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// Percentage drop from weighted raw to weighted validated accuracy, one decimal.
pub fn penalty_impact(weighted_raw: f64, weighted_validated: f64) -> f64 {
    if weighted_raw <= 0.0 {
        return 0.0;
    }
    let impact = (weighted_raw - weighted_validated) / weighted_raw * 100.0;
    (impact * 10.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteScore {
    pub site: String,
    pub weighted_accuracy: f64,
}

/// Combine per-site accuracies with business weights. Unknown site labels
/// take the generic weight.
pub fn business_weighted_accuracy(scores: &[SiteScore]) -> f64 {
    let mut weight_sum = 0.0;
    let mut weighted = 0.0;
    for score in scores {
        let site = SiteType::from_label_or_generic(&score.site);
        let weight = site.business_weight();
        debug!(site = %score.site, resolved = %site, weight, "Business weight");
        weight_sum += weight;
        weighted += weight * score.weighted_accuracy;
    }
    if weight_sum <= 0.0 {
        0.0
    } else {
        weighted / weight_sum
    }
}

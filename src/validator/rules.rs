use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::site::SiteType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Validation policy for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldRule {
    pub required: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub regex: Option<String>,
    pub min_items: Option<usize>,
    pub penalty_weight: f64,
    pub accuracy_weight: f64,
    pub severity: Severity,
    /// Apply another field's rule instead. Resolved one level only.
    pub alias_of: Option<String>,
    pub description: Option<String>,
}

impl Default for FieldRule {
    fn default() -> Self {
        FieldRule {
            required: false,
            min_length: None,
            max_length: None,
            regex: None,
            min_items: None,
            penalty_weight: 1.0,
            accuracy_weight: 1.0,
            severity: Severity::Medium,
            alias_of: None,
            description: None,
        }
    }
}

impl FieldRule {
    pub fn required() -> Self {
        FieldRule {
            required: true,
            penalty_weight: 2.0,
            accuracy_weight: 2.0,
            severity: Severity::High,
            ..Default::default()
        }
    }

    pub fn optional() -> Self {
        FieldRule::default()
    }

    pub fn alias(target: &str) -> Self {
        FieldRule {
            alias_of: Some(target.to_string()),
            ..Default::default()
        }
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn regex(mut self, pattern: &str) -> Self {
        self.regex = Some(pattern.to_string());
        self
    }

    pub fn min_items(mut self, n: usize) -> Self {
        self.min_items = Some(n);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Short human-readable summary, e.g. `required, minLength 10`.
    pub fn describe(&self) -> String {
        if let Some(d) = &self.description {
            return d.clone();
        }
        let mut parts = Vec::new();
        if self.required {
            parts.push("required".to_string());
        }
        if let Some(n) = self.min_length {
            parts.push(format!("minLength {}", n));
        }
        if let Some(n) = self.max_length {
            parts.push(format!("maxLength {}", n));
        }
        if let Some(r) = &self.regex {
            parts.push(format!("regex {}", r));
        }
        if let Some(n) = self.min_items {
            parts.push(format!("minItems {}", n));
        }
        if let Some(a) = &self.alias_of {
            parts.push(format!("aliasOf {}", a));
        }
        if parts.is_empty() {
            "no constraints".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Structural pre-filter applied before the main rule pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanityRule {
    /// Field name, or `*` for every field.
    pub field: String,
    pub check: SanityCheck,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SanityCheck {
    MaxLength { max: usize },
    MinLength { min: usize },
    Pattern { regex: String },
    ForbiddenPattern { regex: String },
    MaxItems { max: usize },
}

impl SanityRule {
    pub fn new(field: &str, check: SanityCheck) -> Self {
        SanityRule {
            field: field.to_string(),
            check,
            description: None,
        }
    }

    pub fn applies_to(&self, field: &str) -> bool {
        self.field == "*" || self.field == field
    }

    pub fn describe(&self) -> String {
        if let Some(d) = &self.description {
            return d.clone();
        }
        match &self.check {
            SanityCheck::MaxLength { max } => format!("maxLength {}", max),
            SanityCheck::MinLength { min } => format!("minLength {}", min),
            SanityCheck::Pattern { regex } => format!("must match {}", regex),
            SanityCheck::ForbiddenPattern { regex } => format!("must not match {}", regex),
            SanityCheck::MaxItems { max } => format!("maxItems {}", max),
        }
    }
}

/// Serializable rule configuration: defaults, per-site overrides, guardrails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleConfig {
    pub defaults: BTreeMap<String, FieldRule>,
    pub sites: BTreeMap<SiteType, BTreeMap<String, FieldRule>>,
    pub guardrails: Vec<SanityRule>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        let mut defaults = BTreeMap::new();
        let mut add = |name: &str, rule: FieldRule| {
            defaults.insert(name.to_string(), rule);
        };
        add("title", FieldRule::required().min_length(10).max_length(300));
        add("headline", FieldRule::alias("title"));
        add("price", FieldRule::optional().regex(PRICE_PATTERN));
        add("ingredients", FieldRule::optional().min_items(3));
        add("instructions", FieldRule::optional().min_items(2));
        add("description", FieldRule::optional().min_length(20));
        add("summary", FieldRule::optional().min_length(20));
        add("content", FieldRule::optional().min_length(50));
        add(
            "author",
            FieldRule::optional()
                .min_length(2)
                .max_length(120)
                .severity(Severity::Low),
        );
        add("published_date", FieldRule::optional().regex(r"(19|20)\d{2}"));
        add("rating", FieldRule::optional().regex(r"^[0-5](\.\d+)?"));
        add("review_count", FieldRule::optional().regex(r"^\d[\d,]*$"));
        add("features", FieldRule::optional().min_items(1).severity(Severity::Low));
        add("tags", FieldRule::optional().min_items(1).severity(Severity::Low));
        add("key_points", FieldRule::optional().min_items(1).severity(Severity::Low));

        let mut sites = BTreeMap::new();
        sites.insert(
            SiteType::Amazon,
            BTreeMap::from([(
                "price".to_string(),
                FieldRule::required().regex(PRICE_PATTERN),
            )]),
        );
        sites.insert(
            SiteType::Bloomberg,
            BTreeMap::from([(
                "author".to_string(),
                FieldRule::required().min_length(2).max_length(120),
            )]),
        );
        sites.insert(
            SiteType::Allrecipes,
            BTreeMap::from([
                (
                    "ingredients".to_string(),
                    FieldRule::required().min_items(3),
                ),
                (
                    "instructions".to_string(),
                    FieldRule::required().min_items(2),
                ),
            ]),
        );

        let guardrails = vec![
            SanityRule::new(
                "*",
                SanityCheck::ForbiddenPattern {
                    regex: r"(?i)<\s*(script|style|iframe)\b".to_string(),
                },
            ),
            SanityRule::new("*", SanityCheck::MaxLength { max: 20_000 }),
            SanityRule::new("*", SanityCheck::MaxItems { max: 500 }),
            SanityRule::new("title", SanityCheck::MaxLength { max: 500 }),
            SanityRule::new(
                "title",
                SanityCheck::ForbiddenPattern {
                    regex: r"^https?://\S+$".to_string(),
                },
            ),
            SanityRule::new(
                "price",
                SanityCheck::Pattern {
                    regex: r"\d".to_string(),
                },
            ),
        ];

        RuleConfig {
            defaults,
            sites,
            guardrails,
        }
    }
}

const PRICE_PATTERN: &str = r"^\$?\d+(\.\d{1,2})?$";

impl RuleConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file {:?}", path))?;
        let config: RuleConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse rules file {:?}", path))?;
        info!(
            path = %path.display(),
            defaults = config.defaults.len(),
            guardrails = config.guardrails.len(),
            "Loaded rule config"
        );
        Ok(config)
    }
}

/// Rule config with per-site rule sets merged and every pattern compiled.
/// Built once and shared by reference.
#[derive(Debug)]
pub struct RuleBook {
    sites: HashMap<SiteType, BTreeMap<String, FieldRule>>,
    guardrails: Vec<SanityRule>,
    patterns: HashMap<String, Result<Regex, String>>,
}

impl RuleBook {
    pub fn new(config: RuleConfig) -> Self {
        let mut sites = HashMap::new();
        for site in SiteType::ALL {
            let mut merged = config.defaults.clone();
            if let Some(overrides) = config.sites.get(&site) {
                merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            sites.insert(site, merged);
        }

        let mut patterns = HashMap::new();
        let rule_patterns = sites
            .values()
            .flat_map(|rules| rules.values())
            .filter_map(|r| r.regex.clone());
        let guard_patterns = config.guardrails.iter().filter_map(|g| match &g.check {
            SanityCheck::Pattern { regex } | SanityCheck::ForbiddenPattern { regex } => {
                Some(regex.clone())
            }
            _ => None,
        });
        for pattern in rule_patterns.chain(guard_patterns) {
            if patterns.contains_key(&pattern) {
                continue;
            }
            let compiled = Regex::new(&pattern).map_err(|e| e.to_string());
            if let Err(e) = &compiled {
                warn!(pattern = %pattern, error = %e, "Invalid rule pattern");
            }
            patterns.insert(pattern, compiled);
        }

        RuleBook {
            sites,
            guardrails: config.guardrails,
            patterns,
        }
    }

    pub fn rules_for(&self, site: SiteType) -> &BTreeMap<String, FieldRule> {
        // Every SiteType is inserted in `new`.
        &self.sites[&site]
    }

    pub fn guardrails(&self) -> &[SanityRule] {
        &self.guardrails
    }

    pub fn pattern(&self, pattern: &str) -> Result<&Regex, String> {
        match self.patterns.get(pattern) {
            Some(Ok(re)) => Ok(re),
            Some(Err(e)) => Err(format!("invalid pattern {}: {}", pattern, e)),
            None => Err(format!("pattern {} was not compiled", pattern)),
        }
    }
}

impl Default for RuleBook {
    fn default() -> Self {
        RuleBook::new(RuleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_overrides_replace_defaults() {
        let book = RuleBook::default();
        assert!(!book.rules_for(SiteType::Generic)["price"].required);
        assert!(book.rules_for(SiteType::Amazon)["price"].required);
        assert!(book.rules_for(SiteType::Allrecipes)["ingredients"].required);
        assert_eq!(book.rules_for(SiteType::Amazon)["title"].min_length, Some(10));
    }

    #[test]
    fn required_rules_weigh_double() {
        let rule = FieldRule::required();
        assert_eq!(rule.accuracy_weight, 2.0);
        assert_eq!(FieldRule::optional().accuracy_weight, 1.0);
    }

    #[test]
    fn invalid_patterns_are_kept_as_errors() {
        let mut config = RuleConfig::default();
        config
            .defaults
            .insert("sku".into(), FieldRule::optional().regex("(["));
        let book = RuleBook::new(config);
        assert!(book.pattern("([").is_err());
        assert!(book.pattern(PRICE_PATTERN).is_ok());
    }

    #[test]
    fn config_json_uses_camel_case() {
        let json = r#"{
            "defaults": {
                "title": {"required": true, "minLength": 5, "accuracyWeight": 3.0},
                "headline": {"aliasOf": "title"}
            },
            "sites": {"amazon": {"price": {"regex": "^\\d+$", "severity": "HIGH"}}},
            "guardrails": [{"field": "*", "check": {"kind": "maxLength", "max": 100}}]
        }"#;
        let config: RuleConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.defaults["title"].min_length, Some(5));
        assert_eq!(config.defaults["title"].penalty_weight, 1.0);
        assert_eq!(config.defaults["headline"].alias_of.as_deref(), Some("title"));
        assert_eq!(
            config.sites[&SiteType::Amazon]["price"].severity,
            Severity::High
        );
        assert_eq!(
            config.guardrails[0].check,
            SanityCheck::MaxLength { max: 100 }
        );
    }

    #[test]
    fn describe_lists_constraints() {
        let rule = FieldRule::required().min_length(10);
        assert_eq!(rule.describe(), "required, minLength 10");
        assert_eq!(FieldRule::optional().describe(), "no constraints");
    }
}

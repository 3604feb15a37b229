use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Site categories with their own schema, instructions and rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    Amazon,
    Bloomberg,
    Allrecipes,
    Generic,
}

impl SiteType {
    pub const ALL: [SiteType; 4] = [
        SiteType::Amazon,
        SiteType::Bloomberg,
        SiteType::Allrecipes,
        SiteType::Generic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SiteType::Amazon => "amazon",
            SiteType::Bloomberg => "bloomberg",
            SiteType::Allrecipes => "allrecipes",
            SiteType::Generic => "generic",
        }
    }

    /// Parse a site label or a host name (`www.amazon.com`, `https://bloomberg.com/...`).
    pub fn from_label(label: &str) -> Option<SiteType> {
        let lower = label.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }
        let host = lower
            .split("://")
            .last()
            .unwrap_or_default()
            .split(['/', ':'])
            .next()
            .unwrap_or_default();
        SiteType::ALL.into_iter().find(|site| {
            let name = site.as_str();
            host == name
                || host == format!("{}.com", name)
                || host.ends_with(&format!(".{}.com", name))
                || host.contains(&format!(".{}.", name))
        })
    }

    pub fn from_label_or_generic(label: &str) -> SiteType {
        SiteType::from_label(label).unwrap_or_else(|| {
            debug!(label, "Unrecognized site type, using generic");
            SiteType::Generic
        })
    }

    /// Fields the model is asked to produce for this site.
    pub fn schema_fields(self) -> &'static [&'static str] {
        match self {
            SiteType::Amazon => &[
                "title",
                "price",
                "rating",
                "review_count",
                "availability",
                "brand",
                "description",
                "features",
            ],
            SiteType::Bloomberg => &[
                "title",
                "author",
                "published_date",
                "summary",
                "content",
                "tags",
            ],
            SiteType::Allrecipes => &[
                "title",
                "description",
                "ingredients",
                "instructions",
                "prep_time",
                "cook_time",
                "servings",
                "rating",
            ],
            SiteType::Generic => &[
                "title",
                "description",
                "author",
                "published_date",
                "content",
                "key_points",
            ],
        }
    }

    pub fn instructions(self) -> &'static str {
        match self {
            SiteType::Amazon => {
                "This is an Amazon product page. Report the price exactly as shown, \
                 the star rating as a number, and features as a list of bullet points."
            }
            SiteType::Bloomberg => {
                "This is a Bloomberg news article. Use the headline as the title and \
                 keep the byline names only."
            }
            SiteType::Allrecipes => {
                "This is an Allrecipes recipe. List every ingredient with its quantity \
                 and every instruction step in order."
            }
            SiteType::Generic => {
                "This is a generic web page. Extract the main subject of the page and \
                 ignore navigation, ads and footers."
            }
        }
    }

    /// Model field names that are renamed to the canonical schema name.
    pub fn field_aliases(self) -> &'static [(&'static str, &'static str)] {
        match self {
            SiteType::Amazon => &[
                ("product_title", "title"),
                ("product_name", "title"),
                ("cost", "price"),
                ("reviews", "review_count"),
            ],
            SiteType::Bloomberg => &[
                ("headline", "title"),
                ("byline", "author"),
                ("date", "published_date"),
                ("body", "content"),
            ],
            SiteType::Allrecipes => &[
                ("recipe_name", "title"),
                ("recipe_ingredients", "ingredients"),
                ("steps", "instructions"),
                ("directions", "instructions"),
            ],
            SiteType::Generic => &[("headline", "title"), ("name", "title")],
        }
    }

    /// Relative importance of a site when combining accuracies across sites.
    pub fn business_weight(self) -> f64 {
        match self {
            SiteType::Amazon => 1.5,
            SiteType::Bloomberg => 1.2,
            SiteType::Allrecipes => 1.0,
            SiteType::Generic => 1.0,
        }
    }
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod signals;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use signals::PageSignals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageCategory {
    None,
    SingleItem,
    MultiItem,
    Uncertain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: PageCategory,
    pub confidence: u8,
    pub reason: String,
}

impl Classification {
    fn new(category: PageCategory, confidence: u8, reason: impl Into<String>) -> Self {
        Classification {
            category,
            confidence,
            reason: reason.into(),
        }
    }
}

/// Ordered guards, first match wins.
pub fn classify(s: &PageSignals) -> Classification {
    let result = if s.is_login_page {
        Classification::new(PageCategory::None, 95, "login or sign-in page")
    } else if s.is_home_page {
        Classification::new(PageCategory::None, 90, "site home page")
    } else if s.word_count < 50 && s.article_count == 0 && s.repeating_item_count < 3 {
        Classification::new(
            PageCategory::None,
            85,
            format!("too little content ({} words)", s.word_count),
        )
    } else if s.article_count > 3 {
        Classification::new(
            PageCategory::MultiItem,
            95,
            format!("{} article elements", s.article_count),
        )
    } else if s.repeating_item_count >= 8 {
        Classification::new(
            PageCategory::MultiItem,
            90,
            format!("{} repeating item elements", s.repeating_item_count),
        )
    } else if s.h1_count == 0 && s.h2_count >= 6 {
        Classification::new(
            PageCategory::MultiItem,
            75,
            format!("no h1 and {} h2 headings", s.h2_count),
        )
    } else if s.h1_count == 1 && s.word_count >= 500 {
        Classification::new(
            PageCategory::SingleItem,
            90,
            format!("single h1 with {} words", s.word_count),
        )
    } else if s.h1_count == 1 && s.has_price {
        Classification::new(PageCategory::SingleItem, 85, "single h1 with a price")
    } else if s.article_count == 1 && s.word_count >= 200 {
        Classification::new(PageCategory::SingleItem, 85, "single article element")
    } else if s.h1_count == 1 && s.word_count >= 150 {
        Classification::new(PageCategory::SingleItem, 70, "single h1 with moderate content")
    } else {
        Classification::new(PageCategory::Uncertain, 40, "no decisive structural signal")
    };

    debug!(category = ?result.category, confidence = result.confidence, reason = %result.reason, "Classified page");
    result
}

/// Classify signals given as JSON. Malformed input yields a low-confidence
/// `UNCERTAIN` result carrying the error.
pub fn classify_value(value: &serde_json::Value) -> Classification {
    match PageSignals::deserialize(value) {
        Ok(signals) => classify(&signals),
        Err(e) => Classification::new(
            PageCategory::Uncertain,
            10,
            format!("could not read page signals: {}", e),
        ),
    }
}

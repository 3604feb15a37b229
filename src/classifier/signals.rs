use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());
static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+]|\d{1,3}[.)])\s+(.+)$").unwrap());
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)]+)\)").unwrap());
static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[$€£]\s?\d[\d,]*(?:\.\d{2})?|\d+(?:\.\d{2})?\s?(?:USD|EUR|GBP))").unwrap());
static ARTICLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<article\b").unwrap());

const LOGIN_PHRASES: &[&str] = &["sign in", "log in", "login", "forgot password", "create account"];
const HOME_PHRASES: &[&str] = &["welcome to", "featured", "trending now", "top stories"];

/// Structural counts a page is classified from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSignals {
    pub h1_count: u32,
    pub h2_count: u32,
    pub h3_count: u32,
    pub article_count: u32,
    pub repeating_item_count: u32,
    pub list_item_count: u32,
    pub word_count: u32,
    pub is_login_page: bool,
    pub is_home_page: bool,
    pub has_price: bool,
}

impl PageSignals {
    /// Derive signals from a markdown rendering of a page.
    pub fn from_markdown(markdown: &str) -> PageSignals {
        let mut s = PageSignals::default();
        let mut link_items = 0u32;
        let mut login_hits = 0u32;
        let mut home_hits = 0u32;

        for raw in markdown.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = HEADING_RE.captures(line) {
                match caps[1].len() {
                    1 => s.h1_count += 1,
                    2 => s.h2_count += 1,
                    3 => s.h3_count += 1,
                    _ => {}
                }
            } else if let Some(caps) = LIST_ITEM_RE.captures(line) {
                s.list_item_count += 1;
                // Lists of links are product cards / article teasers
                if LINK_RE.is_match(&caps[1]) {
                    link_items += 1;
                }
            }

            s.article_count += ARTICLE_RE.find_iter(line).count() as u32;
            if !s.has_price && PRICE_RE.is_match(line) {
                s.has_price = true;
            }

            let lower = line.to_lowercase();
            if LOGIN_PHRASES.iter().any(|p| lower.contains(p)) {
                login_hits += 1;
            }
            if HOME_PHRASES.iter().any(|p| lower.contains(p)) {
                home_hits += 1;
            }

            let text = LINK_RE.replace_all(line, "$1");
            s.word_count += text
                .split_whitespace()
                .filter(|w| w.chars().any(char::is_alphanumeric))
                .count() as u32;
        }

        s.repeating_item_count = link_items;
        s.is_login_page = login_hits >= 2 && s.word_count < 200;
        s.is_home_page = home_hits >= 2 && s.h1_count == 0 && link_items >= 3;
        s
    }
}

use anyhow::Result;
use rusqlite::Connection;

use crate::db::{self, ExtractionStats, PenaltyCount, SiteSummary};
use crate::validator::{business_weighted_accuracy, SiteScore};

pub fn print_stats(conn: &Connection) -> Result<()> {
    let sites = db::fetch_site_summaries(conn)?;
    let extractions = db::fetch_extraction_stats(conn)?;
    if sites.is_empty() && extractions.total == 0 {
        println!("No validation or extraction runs recorded yet.");
        return Ok(());
    }
    let penalties = db::fetch_penalty_counts(conn)?;
    println!("{}", render_markdown(&sites, &penalties, &extractions));
    Ok(())
}

pub fn render_markdown(
    sites: &[SiteSummary],
    penalties: &[PenaltyCount],
    extractions: &ExtractionStats,
) -> String {
    let records: usize = sites.iter().map(|s| s.records).sum();
    let successes: usize = sites.iter().map(|s| s.successes).sum();
    let scores: Vec<SiteScore> = sites
        .iter()
        .map(|s| SiteScore {
            site: s.site_type.clone(),
            weighted_accuracy: s.avg_weighted_validated_accuracy,
        })
        .collect();

    let mut out = String::new();
    out.push_str("## Validation Stats\n");
    out.push_str(&format!(
        "- Records validated: {}\n- Passed: {} ({:.1}%)\n- Business-weighted accuracy: {:.1}%\n",
        records,
        successes,
        crate::record::percent(successes as f64, records as f64),
        business_weighted_accuracy(&scores)
    ));

    if !sites.is_empty() {
        out.push_str("\n### By site\n");
        out.push_str("| site | records | passed | raw | validated | weighted | impact |\n");
        out.push_str("|---|---:|---:|---:|---:|---:|---:|\n");
        for s in sites {
            out.push_str(&format!(
                "| {} | {} | {} | {:.1} | {:.1} | {:.1} | {:.1} |\n",
                s.site_type,
                s.records,
                s.successes,
                s.avg_raw_accuracy,
                s.avg_validated_accuracy,
                s.avg_weighted_validated_accuracy,
                s.avg_penalty_impact
            ));
        }
    }

    if !penalties.is_empty() {
        out.push_str("\n### Penalties\n");
        for p in penalties {
            out.push_str(&format!("- {} ({}): {}\n", p.reason, p.stage, p.count));
        }
    }

    if extractions.total > 0 {
        out.push_str("\n### Extraction\n");
        out.push_str(&format!(
            "- Pages: {} ({} ok)\n- Avg attempts: {:.2}\n",
            extractions.total, extractions.ok, extractions.avg_attempts
        ));
        for (kind, count) in &extractions.error_kinds {
            out.push_str(&format!("- {}: {}\n", kind, count));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(name: &str, records: usize, successes: usize, weighted: f64) -> SiteSummary {
        SiteSummary {
            site_type: name.to_string(),
            records,
            successes,
            avg_raw_accuracy: weighted,
            avg_validated_accuracy: weighted,
            avg_weighted_validated_accuracy: weighted,
            avg_penalty_impact: 0.0,
        }
    }

    #[test]
    fn renders_sites_and_business_accuracy() {
        let sites = vec![site("amazon", 2, 1, 80.0), site("generic", 2, 2, 60.0)];
        let penalties = vec![PenaltyCount {
            stage: "rule".into(),
            reason: "INVALID_FORMAT".into(),
            count: 3,
        }];
        let extractions = ExtractionStats {
            total: 0,
            ok: 0,
            avg_attempts: 0.0,
            error_kinds: vec![],
        };
        let md = render_markdown(&sites, &penalties, &extractions);
        assert!(md.contains("- Records validated: 4\n- Passed: 3 (75.0%)"));
        // (1.5 * 80 + 1.0 * 60) / 2.5
        assert!(md.contains("Business-weighted accuracy: 72.0%"));
        assert!(md.contains("| amazon | 2 | 1 |"));
        assert!(md.contains("- INVALID_FORMAT (rule): 3"));
        assert!(!md.contains("### Extraction"));
    }
}

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::extractor::ExtractionResult;
use crate::validator::{Penalty, ValidationResult};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS validation_runs (
            id                          INTEGER PRIMARY KEY,
            run_id                      TEXT NOT NULL,
            source                      TEXT NOT NULL,
            site_type                   TEXT NOT NULL,
            success                     BOOLEAN NOT NULL,
            raw_accuracy                INTEGER NOT NULL,
            weighted_raw_accuracy       INTEGER NOT NULL,
            guardrail_accuracy          INTEGER NOT NULL,
            validated_accuracy          INTEGER NOT NULL,
            weighted_validated_accuracy INTEGER NOT NULL,
            penalty_impact              REAL NOT NULL,
            required_passed             INTEGER NOT NULL,
            required_total              INTEGER NOT NULL,
            fields_validated            INTEGER NOT NULL,
            validated_data              TEXT NOT NULL,
            created_at                  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_runs_run_id ON validation_runs(run_id);
        CREATE INDEX IF NOT EXISTS idx_runs_site ON validation_runs(site_type);

        CREATE TABLE IF NOT EXISTS penalties (
            id             INTEGER PRIMARY KEY,
            validation_id  INTEGER NOT NULL REFERENCES validation_runs(id),
            stage          TEXT NOT NULL CHECK(stage IN ('guardrail','rule')),
            field          TEXT NOT NULL,
            reason         TEXT NOT NULL,
            severity       TEXT NOT NULL,
            weight         REAL NOT NULL,
            rule           TEXT NOT NULL,
            original_value TEXT,
            penalized_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_penalties_validation ON penalties(validation_id);
        CREATE INDEX IF NOT EXISTS idx_penalties_reason ON penalties(reason);

        CREATE TABLE IF NOT EXISTS extractions (
            id                  INTEGER PRIMARY KEY,
            run_id              TEXT NOT NULL,
            source              TEXT NOT NULL,
            site_type           TEXT NOT NULL,
            success             BOOLEAN NOT NULL,
            parse_strategy      TEXT,
            attempt_count       INTEGER NOT NULL,
            elapsed_ms          INTEGER NOT NULL,
            cumulative_retry_ms INTEGER NOT NULL,
            total_tokens        INTEGER,
            error_kind          TEXT,
            error_message       TEXT,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_extractions_run_id ON extractions(run_id);
        ",
    )?;
    Ok(())
}

/// Timestamped id grouping the rows written by one CLI invocation.
pub fn new_run_id() -> String {
    chrono::Utc::now().format("run-%Y%m%dT%H%M%S%.3fZ").to_string()
}

// ── Validation ──

pub fn save_validation(
    conn: &Connection,
    run_id: &str,
    source: &str,
    result: &ValidationResult,
) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    let m = &result.metrics;
    tx.execute(
        "INSERT INTO validation_runs (
            run_id, source, site_type, success, raw_accuracy, weighted_raw_accuracy,
            guardrail_accuracy, validated_accuracy, weighted_validated_accuracy,
            penalty_impact, required_passed, required_total, fields_validated, validated_data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            run_id,
            source,
            result.site_type.as_str(),
            result.success,
            m.raw_accuracy,
            m.weighted_raw_accuracy,
            m.guardrail_accuracy,
            m.validated_accuracy,
            m.weighted_validated_accuracy,
            m.penalty_impact,
            m.required_fields_passed as i64,
            m.required_fields_total as i64,
            m.fields_validated as i64,
            serde_json::to_string(&result.validated_data)?,
        ],
    )?;
    let validation_id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO penalties (validation_id, stage, field, reason, severity, weight, rule,
                                    original_value, penalized_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        let staged = result
            .guardrail_penalties
            .iter()
            .map(|p| ("guardrail", p))
            .chain(result.penalties.iter().map(|p| ("rule", p)));
        for (stage, p) in staged {
            insert_penalty(&mut stmt, validation_id, stage, p)?;
        }
    }
    tx.commit()?;
    Ok(validation_id)
}

fn insert_penalty(
    stmt: &mut rusqlite::Statement,
    validation_id: i64,
    stage: &str,
    p: &Penalty,
) -> Result<()> {
    stmt.execute(params![
        validation_id,
        stage,
        p.field,
        p.reason.as_str(),
        p.severity.as_str(),
        p.weight,
        p.rule,
        serde_json::to_string(&p.original_value)?,
        p.timestamp.to_rfc3339(),
    ])?;
    Ok(())
}

// ── Extraction ──

pub fn save_extraction(
    conn: &Connection,
    run_id: &str,
    source: &str,
    result: &ExtractionResult,
) -> Result<i64> {
    let strategy = result
        .parse_strategy
        .map(|s| serde_json::to_value(s).map(|v| v.as_str().unwrap_or_default().to_string()))
        .transpose()?;
    conn.execute(
        "INSERT INTO extractions (
            run_id, source, site_type, success, parse_strategy, attempt_count, elapsed_ms,
            cumulative_retry_ms, total_tokens, error_kind, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            run_id,
            source,
            result.site_type.as_str(),
            result.success,
            strategy,
            result.attempt_count,
            result.elapsed_ms as i64,
            result.cumulative_retry_ms as i64,
            result.usage.map(|u| u.total_tokens),
            result.error.as_ref().map(|e| e.kind.as_str()),
            result.error.as_ref().map(|e| e.message.as_str()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ── Stats ──

pub struct SiteSummary {
    pub site_type: String,
    pub records: usize,
    pub successes: usize,
    pub avg_raw_accuracy: f64,
    pub avg_validated_accuracy: f64,
    pub avg_weighted_validated_accuracy: f64,
    pub avg_penalty_impact: f64,
}

pub fn fetch_site_summaries(conn: &Connection) -> Result<Vec<SiteSummary>> {
    let mut stmt = conn.prepare(
        "SELECT site_type, COUNT(*), COALESCE(SUM(success), 0),
                AVG(raw_accuracy), AVG(validated_accuracy),
                AVG(weighted_validated_accuracy), AVG(penalty_impact)
         FROM validation_runs
         GROUP BY site_type
         ORDER BY site_type",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SiteSummary {
                site_type: row.get(0)?,
                records: row.get(1)?,
                successes: row.get(2)?,
                avg_raw_accuracy: row.get(3)?,
                avg_validated_accuracy: row.get(4)?,
                avg_weighted_validated_accuracy: row.get(5)?,
                avg_penalty_impact: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct PenaltyCount {
    pub stage: String,
    pub reason: String,
    pub count: usize,
}

pub fn fetch_penalty_counts(conn: &Connection) -> Result<Vec<PenaltyCount>> {
    let mut stmt = conn.prepare(
        "SELECT stage, reason, COUNT(*) AS n
         FROM penalties
         GROUP BY stage, reason
         ORDER BY n DESC, stage, reason",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PenaltyCount {
                stage: row.get(0)?,
                reason: row.get(1)?,
                count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct ExtractionStats {
    pub total: usize,
    pub ok: usize,
    pub avg_attempts: f64,
    pub error_kinds: Vec<(String, usize)>,
}

pub fn fetch_extraction_stats(conn: &Connection) -> Result<ExtractionStats> {
    let (total, ok, avg_attempts): (usize, usize, f64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(success), 0), COALESCE(AVG(attempt_count), 0.0)
         FROM extractions",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    let mut stmt = conn.prepare(
        "SELECT error_kind, COUNT(*) AS n FROM extractions
         WHERE error_kind IS NOT NULL
         GROUP BY error_kind ORDER BY n DESC, error_kind",
    )?;
    let error_kinds = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ExtractionStats {
        total,
        ok,
        avg_attempts,
        error_kinds,
    })
}

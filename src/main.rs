use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::info;

use pagescore::classifier::{self, PageSignals};
use pagescore::config::{self, Settings};
use pagescore::db;
use pagescore::extractor::batch::{self, PageInput};
use pagescore::extractor::prompt::PromptBuilder;
use pagescore::extractor::{ExtractionResult, Extractor};
use pagescore::record::{record_from_json, ExtractedRecord};
use pagescore::site::SiteType;
use pagescore::stats;
use pagescore::validator::rules::{RuleBook, RuleConfig};
use pagescore::validator::{apply_validation_penalties, ValidationResult};

#[derive(Parser)]
#[command(name = "pagescore", about = "Classify pages, extract fields with an LLM, score the result")]
struct Cli {
    /// Config file (default: ./pagescore.{toml,json,yaml} if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a markdown page as none / single item / multi item
    Classify {
        file: PathBuf,
        /// Input is a JSON page-signals object instead of markdown
        #[arg(long)]
        signals: bool,
    },
    /// Validate extracted records (.json object or array, or .jsonl)
    Validate {
        file: PathBuf,
        #[arg(short, long, default_value = "generic")]
        site: String,
        /// Print every result as JSON
        #[arg(long)]
        json: bool,
        /// Don't write results to the database
        #[arg(long)]
        no_save: bool,
    },
    /// Extract fields from one page and validate them
    Extract {
        file: PathBuf,
        #[arg(short, long, default_value = "generic")]
        site: String,
    },
    /// Extract + validate every .md/.txt page in a directory
    Batch {
        dir: PathBuf,
        #[arg(short, long, default_value = "generic")]
        site: String,
        /// Max pages to process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show recorded run statistics
    Stats,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Classify { file, signals } => {
            let text = read(&file)?;
            let classification = if signals {
                let value: serde_json::Value =
                    serde_json::from_str(&text).context("signals file is not JSON")?;
                classifier::classify_value(&value)
            } else {
                classifier::classify(&PageSignals::from_markdown(&text))
            };
            println!("{}", serde_json::to_string_pretty(&classification)?);
            Ok(())
        }
        Commands::Validate {
            file,
            site,
            json,
            no_save,
        } => {
            let settings = config::load(cli.config.as_deref())?;
            let site = SiteType::from_label_or_generic(&site);
            let book = rule_book(&settings)?;
            let records = read_records(&file)?;
            if records.is_empty() {
                println!("No records in {}.", file.display());
                return Ok(());
            }

            eprintln!("Validating {} {} records...", records.len(), site);
            let results = validate_all(&records, site, &book)?;

            if !no_save {
                let conn = open_db(&settings)?;
                let run_id = db::new_run_id();
                let source = file.display().to_string();
                for (i, r) in results.iter().enumerate() {
                    db::save_validation(&conn, &run_id, &format!("{}:{}", source, i + 1), r)?;
                }
                info!(run_id = %run_id, records = results.len(), "Saved validation run");
            }

            if json {
                print!("{}", json_lines(&results)?);
                if let Some(summary) = validation_summary(&results) {
                    eprint!("{}", summary);
                }
            } else if let Some(summary) = validation_summary(&results) {
                print!("{}", summary);
            }
            Ok(())
        }
        Commands::Extract { file, site } => {
            let settings = config::load(cli.config.as_deref())?;
            let site = SiteType::from_label_or_generic(&site);
            let book = rule_book(&settings)?;
            let content = read(&file)?;
            let extractor = build_extractor(&settings).await?;

            let extraction = extractor.extract(&content, site).await;
            let validation = extraction
                .success
                .then(|| apply_validation_penalties(&extraction.fields, site, &book));

            let conn = open_db(&settings)?;
            let run_id = db::new_run_id();
            let source = file.display().to_string();
            save_page(&conn, &run_id, &source, &extraction, validation.as_ref())?;

            let out = serde_json::json!({
                "extraction": extraction,
                "validation": validation,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Commands::Batch { dir, site, limit } => {
            let settings = config::load(cli.config.as_deref())?;
            let site = SiteType::from_label_or_generic(&site);
            let book = rule_book(&settings)?;
            let pages = read_pages(&dir, site, limit)?;
            if pages.is_empty() {
                println!("No .md or .txt pages in {}.", dir.display());
                return Ok(());
            }

            let extractor = build_extractor(&settings).await?;
            println!(
                "Extracting {} pages ({} at a time)...",
                pages.len(),
                settings.batch.throttle
            );

            let pb = ProgressBar::new(pages.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                    .progress_chars("=> "),
            );
            let results =
                batch::extract_parallel(&extractor, &pages, &settings.batch.options(), &pb).await;
            pb.finish_and_clear();

            let conn = open_db(&settings)?;
            let run_id = db::new_run_id();
            let mut validations = Vec::new();
            for (id, extraction) in &results {
                let validation = extraction
                    .success
                    .then(|| apply_validation_penalties(&extraction.fields, site, &book));
                save_page(&conn, &run_id, id, extraction, validation.as_ref())?;
                validations.extend(validation);
            }

            let ok = results.iter().filter(|(_, r)| r.success).count();
            println!("Extracted {} pages ({} ok, {} errors).", results.len(), ok, results.len() - ok);
            if let Some(summary) = validation_summary(&validations) {
                print!("{}", summary);
            }
            Ok(())
        }
        Commands::Stats => {
            let settings = config::load(cli.config.as_deref())?;
            let conn = open_db(&settings)?;
            stats::print_stats(&conn)
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn open_db(settings: &Settings) -> Result<Connection> {
    let conn = db::connect(&settings.database_path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn rule_book(settings: &Settings) -> Result<RuleBook> {
    let config = match &settings.rules_path {
        Some(path) => RuleConfig::from_path(path)?,
        None => RuleConfig::default(),
    };
    Ok(RuleBook::new(config))
}

async fn build_extractor(settings: &Settings) -> Result<Extractor> {
    let cfg = &settings.extractor;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.request_timeout_secs))
        .build()?;
    let prompts =
        PromptBuilder::load(&http, cfg.prompt_config_url.as_deref(), cfg.max_content_chars).await;
    Ok(Extractor::from_config(cfg.clone(), prompts)?)
}

fn save_page(
    conn: &Connection,
    run_id: &str,
    source: &str,
    extraction: &ExtractionResult,
    validation: Option<&ValidationResult>,
) -> Result<()> {
    db::save_extraction(conn, run_id, source, extraction)?;
    if let Some(v) = validation {
        db::save_validation(conn, run_id, source, v)?;
    }
    Ok(())
}

/// Records from a `.jsonl` file (one per line) or a `.json` object / array.
fn read_records(path: &Path) -> Result<Vec<ExtractedRecord>> {
    let text = read(path)?;
    let is_jsonl = path.extension().is_some_and(|e| e == "jsonl");

    let values: Vec<serde_json::Value> = if is_jsonl {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| format!("line {}: invalid JSON", i + 1))
            })
            .collect::<Result<_>>()?
    } else {
        match serde_json::from_str(&text).context("invalid JSON")? {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        }
    };

    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            if !v.is_object() {
                bail!("record {} is not a JSON object", i + 1);
            }
            Ok(record_from_json(v))
        })
        .collect()
}

fn validate_all(
    records: &[ExtractedRecord],
    site: SiteType,
    book: &RuleBook,
) -> Result<Vec<ValidationResult>> {
    let pb = ProgressBar::new(records.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut results = Vec::with_capacity(records.len());
    for chunk in records.chunks(500) {
        let validated: Vec<_> = chunk
            .par_iter()
            .map(|r| apply_validation_penalties(r, site, book))
            .collect();
        results.extend(validated);
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();
    Ok(results)
}

fn read_pages(dir: &Path, site: SiteType, limit: Option<usize>) -> Result<Vec<PageInput>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e == "md" || e == "txt"))
        .collect();
    paths.sort();
    if let Some(n) = limit {
        paths.truncate(n);
    }

    paths
        .into_iter()
        .map(|p| {
            Ok(PageInput {
                id: p.display().to_string(),
                site_type: site,
                content: read(&p)?,
            })
        })
        .collect()
}

/// One compact JSON document per line.
fn json_lines(results: &[ValidationResult]) -> Result<String> {
    let mut out = String::new();
    for r in results {
        out.push_str(&serde_json::to_string(r)?);
        out.push('\n');
    }
    Ok(out)
}

fn validation_summary(results: &[ValidationResult]) -> Option<String> {
    if results.is_empty() {
        return None;
    }
    let n = results.len() as f64;
    let passed = results.iter().filter(|r| r.success).count();
    let penalties: usize = results.iter().map(|r| r.penalties.len()).sum();
    let guardrail: usize = results.iter().map(|r| r.guardrail_penalties.len()).sum();
    let avg = |f: fn(&ValidationResult) -> f64| results.iter().map(f).sum::<f64>() / n;

    Some(format!(
        "Validated {} records: {} passed, {} penalties, {} guardrail penalties.\n\
         Avg accuracy: raw {:.1}% -> validated {:.1}% (weighted {:.1}% -> {:.1}%, impact {:.1}%)\n",
        results.len(),
        passed,
        penalties,
        guardrail,
        avg(|r| r.metrics.raw_accuracy as f64),
        avg(|r| r.metrics.validated_accuracy as f64),
        avg(|r| r.metrics.weighted_raw_accuracy as f64),
        avg(|r| r.metrics.weighted_validated_accuracy as f64),
        avg(|r| r.metrics.penalty_impact),
    ))
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

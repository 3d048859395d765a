use std::io::Read;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

use dropwatch_core::{
    AppConfig, ConnectionPool, ExitCode, MAX_LOCK_TTL_MINUTES, Normalizer, ReleaseCandidate,
    ReleaseRepository, SqliteReleaseRepository, fingerprint, open_database,
};
use dropwatch_dedup::{Cleanup, DuplicateResolver, Ingestor, LockManager, RunOutcome};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "dropwatch",
    about = "Deduplicating ingestion for theme-park merchandise releases",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $DROPWATCH_CONFIG or the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overriding `core.database_path`.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Output in JSON format. Also enabled by setting DROPWATCH_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the comparison key and fingerprint of a title.
    Normalize {
        title: String,
        #[arg(long)]
        url: Option<String>,
    },

    /// Check a candidate against the store without inserting it.
    Check {
        #[arg(long)]
        title: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },

    /// Ingest candidates from a JSON array or NDJSON file (`-` for stdin).
    Ingest {
        input: String,
        /// Lock serializing runs over the same feed.
        #[arg(long)]
        lock: String,
        #[arg(long)]
        holder: Option<String>,
        #[arg(long)]
        ttl_minutes: Option<u64>,
    },

    /// Merge duplicates already in the store into their earliest copy.
    Cleanup {
        #[arg(long)]
        dry_run: bool,
        /// Use the ingest lock name to keep cleanup and ingestion apart.
        #[arg(long, default_value = "catalogue")]
        lock: String,
        #[arg(long)]
        holder: Option<String>,
    },

    /// Inspect or manage ingestion locks.
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },

    /// Show store statistics.
    Stats,
}

// ─── Lock Actions ───────────────────────────────────────────────────────────

#[derive(Subcommand)]
enum LockAction {
    /// Show the live holder of a lock.
    Status { name: String },
    /// Take a lock and print its lease.
    Acquire {
        name: String,
        #[arg(long)]
        holder: Option<String>,
        #[arg(long)]
        ttl_minutes: Option<u64>,
    },
    /// Delete a lock regardless of holder.
    Release { name: String },
    /// List every lock row.
    List,
}

// ─── Main ────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();

    let json_output = cli.json || std::env::var("DROPWATCH_JSON").as_deref() == Ok("1");
    init_tracing(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::load()?,
    };
    if let Some(database) = &cli.database {
        config.core.database_path = database.to_string_lossy().to_string();
    }

    match cli.command {
        Commands::Normalize { title, url } => {
            let key = Normalizer::from_config(&config.dedup).normalize(&title);
            let hash = fingerprint(url.as_deref(), &key);
            if json_output {
                print_ok(
                    start,
                    serde_json::json!({ "title": title, "key": key, "fingerprint": hash }),
                )?;
            } else {
                println!("key:         {key}");
                println!("fingerprint: {hash}");
            }
        }

        Commands::Check { title, url, image } => {
            let pool = open_store(&config)?;
            let normalizer = Normalizer::from_config(&config.dedup);
            let repo = SqliteReleaseRepository::new(pool.get_connection()?, &normalizer);
            let candidate = ReleaseCandidate {
                title,
                source_url: url,
                image_url: image,
            };
            let verdict = DuplicateResolver::from_config(&config.dedup).resolve(&repo, &candidate)?;

            if json_output {
                print_ok(start, serde_json::to_value(&verdict)?)?;
            } else if let (Some(id), Some(reason)) = (verdict.matched_id, verdict.reason) {
                println!("duplicate of {id} ({reason}, score {:.3})", verdict.score);
            } else {
                println!("new release");
            }
        }

        // ── Ingest ─────────────────────────────────────────────────────────

        Commands::Ingest { input, lock, holder, ttl_minutes } => {
            let candidates = parse_candidates(&read_input(&input)?)?;
            let pool = open_store(&config)?;
            let holder = holder.unwrap_or_else(|| config.lock_holder());
            let mut ingestor = Ingestor::new(&pool, &config);
            if let Some(minutes) = ttl_minutes {
                ingestor = ingestor.with_ttl(ttl_from_minutes(minutes)?);
            }

            let outcome = ingestor.run(&lock, &holder, &candidates)?;
            match outcome {
                RunOutcome::Skipped { held_by } => {
                    if json_output {
                        print_json(&serde_json::json!({
                            "status": "skipped",
                            "data": { "lock": lock, "held_by": held_by },
                            "meta": { "duration_ms": start.elapsed().as_millis() }
                        }))?;
                    } else {
                        let who = held_by.map(|l| l.locked_by).unwrap_or_else(|| "unknown".into());
                        eprintln!("Lock {lock} is held by {who}; nothing ingested.");
                    }
                    std::process::exit(ExitCode::LockContended as i32);
                }
                RunOutcome::Completed(report) => {
                    if json_output {
                        print_ok(start, serde_json::to_value(&report)?)?;
                    } else {
                        println!(
                            "{} candidates: {} inserted, {} duplicates",
                            report.decisions.len(),
                            report.inserted,
                            report.duplicates
                        );
                    }
                }
            }
        }

        // ── Cleanup ────────────────────────────────────────────────────────

        Commands::Cleanup { dry_run, lock, holder } => {
            let pool = open_store(&config)?;
            let holder = holder.unwrap_or_else(|| config.lock_holder());
            let outcome = Cleanup::new(&pool, &config).run(&lock, &holder, dry_run)?;

            let Some(report) = outcome.completed() else {
                eprintln!("Lock {lock} is held; cleanup skipped.");
                std::process::exit(ExitCode::LockContended as i32);
            };
            if json_output {
                print_ok(start, serde_json::to_value(&report)?)?;
            } else {
                let verb = if dry_run { "would merge" } else { "merged" };
                for merge in &report.merges {
                    println!(
                        "{verb} {} into {}  {} ({}, {:.3})",
                        merge.duplicate, merge.canonical, merge.title, merge.reason, merge.score
                    );
                }
                println!(
                    "{} examined, {} {verb}, {} chains flattened",
                    report.examined,
                    report.merges.len(),
                    report.chains_flattened
                );
            }
        }

        // ── Locks ──────────────────────────────────────────────────────────

        Commands::Lock { action } => {
            let pool = open_store(&config)?;
            let locks = LockManager::new(&pool);
            match action {
                LockAction::Status { name } => {
                    let held = locks.status(&name)?;
                    if json_output {
                        print_ok(start, serde_json::json!({ "lock": name, "held_by": held }))?;
                    } else if let Some(lease) = held {
                        println!(
                            "{name} held by {} until {}",
                            lease.locked_by,
                            lease.expires_at.to_rfc3339()
                        );
                    } else {
                        println!("{name} is free");
                    }
                }
                LockAction::Acquire { name, holder, ttl_minutes } => {
                    let holder = holder.unwrap_or_else(|| config.lock_holder());
                    let ttl = match ttl_minutes {
                        Some(minutes) => ttl_from_minutes(minutes)?,
                        None => config.lock_ttl(),
                    };
                    let Some(lease) = locks.acquire(&name, &holder, ttl)? else {
                        eprintln!("Lock {name} is already held.");
                        std::process::exit(ExitCode::LockContended as i32);
                    };
                    if json_output {
                        print_ok(start, serde_json::to_value(&lease)?)?;
                    } else {
                        println!("acquired {name} until {}", lease.expires_at.to_rfc3339());
                        println!("token: {}", lease.token);
                    }
                }
                LockAction::Release { name } => {
                    let released = locks.force_release(&name)?;
                    if json_output {
                        print_ok(start, serde_json::json!({ "lock": name, "released": released }))?;
                    } else if released {
                        println!("released {name}");
                    } else {
                        println!("{name} was not held");
                    }
                }
                LockAction::List => {
                    let all = locks.list()?;
                    if json_output {
                        print_ok(start, serde_json::to_value(&all)?)?;
                    } else if all.is_empty() {
                        println!("No locks.");
                    } else {
                        let now = chrono::Utc::now();
                        for lock in &all {
                            let state = if lock.is_live_at(now) { "live" } else { "expired" };
                            println!(
                                "{:<24}  {:<20}  {}  {state}",
                                lock.lock_name,
                                lock.locked_by,
                                lock.expires_at.to_rfc3339()
                            );
                        }
                    }
                }
            }
        }

        // ── Stats ──────────────────────────────────────────────────────────

        Commands::Stats => {
            let pool = open_store(&config)?;
            let normalizer = Normalizer::from_config(&config.dedup);
            let (active, merged) = {
                let repo = SqliteReleaseRepository::new(pool.get_connection()?, &normalizer);
                (repo.count_active()?, repo.count_merged()?)
            };
            let locks = LockManager::new(&pool).list()?.len();

            if json_output {
                print_ok(
                    start,
                    serde_json::json!({ "active": active, "merged": merged, "locks": locks }),
                )?;
            } else {
                println!("Active releases: {active}");
                println!("Merged releases: {merged}");
                println!("Lock rows:       {locks}");
            }
        }
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) -> Result<()> {
    let fallback = if verbose {
        "dropwatch=debug,dropwatch_core=debug,dropwatch_dedup=debug"
    } else {
        "dropwatch=info,dropwatch_core=info,dropwatch_dedup=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn print_ok(start: Instant, data: serde_json::Value) -> Result<()> {
    print_json(&serde_json::json!({
        "status": "ok",
        "data": data,
        "meta": { "duration_ms": start.elapsed().as_millis() }
    }))
}

fn open_store(config: &AppConfig) -> Result<ConnectionPool> {
    let path = config.database_path();
    open_database(&path)
        .with_context(|| format!("opening database {}", path.display()))
}

fn ttl_from_minutes(minutes: u64) -> Result<chrono::Duration> {
    anyhow::ensure!(
        (1..=MAX_LOCK_TTL_MINUTES).contains(&minutes),
        "--ttl-minutes must be within [1, {MAX_LOCK_TTL_MINUTES}], got {minutes}"
    );
    let minutes = i64::try_from(minutes).context("--ttl-minutes is out of range")?;
    chrono::Duration::try_minutes(minutes).context("--ttl-minutes is out of range")
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("reading {input}"))
    }
}

/// Accepts a JSON array of candidates or one candidate object per line.
fn parse_candidates(raw: &str) -> Result<Vec<ReleaseCandidate>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("parsing candidate array");
    }

    let mut candidates = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let candidate = serde_json::from_str(line)
            .with_context(|| format!("parsing candidate on line {}", idx + 1))?;
        candidates.push(candidate);
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let raw = r#"[
            {"title": "Stitch Plush", "source_url": "https://a/1"},
            {"title": "Figment Mug", "image_url": "https://cdn/f.jpg"}
        ]"#;
        let candidates = parse_candidates(raw).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].source_url.as_deref(), Some("https://a/1"));
        assert_eq!(candidates[1].image_url.as_deref(), Some("https://cdn/f.jpg"));
    }

    #[test]
    fn test_parse_ndjson_skips_blank_lines() {
        let raw = "{\"title\": \"Stitch Plush\"}\n\n{\"title\": \"Figment Mug\"}\n";
        let candidates = parse_candidates(raw).unwrap();
        assert_eq!(candidates, vec![
            ReleaseCandidate::new("Stitch Plush"),
            ReleaseCandidate::new("Figment Mug"),
        ]);
    }

    #[test]
    fn test_parse_reports_bad_line() {
        let raw = "{\"title\": \"Stitch Plush\"}\nnot json\n";
        let err = parse_candidates(raw).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_empty_input_has_no_candidates() {
        assert!(parse_candidates("").unwrap().is_empty());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        assert!(ttl_from_minutes(0).is_err());
        assert_eq!(ttl_from_minutes(5).unwrap(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_huge_ttl_rejected_without_panicking() {
        assert!(ttl_from_minutes(u64::MAX >> 1).is_err());
        assert!(ttl_from_minutes(u64::MAX).is_err());
        assert!(ttl_from_minutes(MAX_LOCK_TTL_MINUTES + 1).is_err());
        assert_eq!(
            ttl_from_minutes(MAX_LOCK_TTL_MINUTES).unwrap(),
            chrono::Duration::days(7)
        );
    }

    #[test]
    fn test_cli_parses_ingest() {
        let cli = Cli::try_parse_from([
            "dropwatch", "--json", "ingest", "feed.ndjson", "--lock", "feed:disney",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Ingest { input, lock, holder, ttl_minutes } => {
                assert_eq!(input, "feed.ndjson");
                assert_eq!(lock, "feed:disney");
                assert!(holder.is_none());
                assert!(ttl_minutes.is_none());
            }
            _ => panic!("expected ingest"),
        }
    }
}

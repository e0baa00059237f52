use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use predlog_core::config::Settings;
use predlog_core::domain::prediction::NewPrediction;
use predlog_core::pricing::HttpJsonPriceLookup;
use predlog_core::scoring::ScoringEngine;
use predlog_core::storage::{PredictionStore, PredictionWriter, Rotator};

#[derive(Debug, Parser)]
#[command(name = "predlog_worker")]
struct Args {
    /// Override PREDICTIONS_DIR.
    #[arg(long, global = true)]
    predictions_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Persist one prediction read from a JSON file ("-" for stdin).
    Log {
        #[arg(long, default_value = "-")]
        file: String,
    },
    /// Print stored predictions as JSON.
    List {
        #[arg(long)]
        ticker: Option<String>,
    },
    /// Score due predictions and print the accuracy report.
    Score {
        #[arg(long)]
        ticker: Option<String>,

        /// Scoring date (YYYY-MM-DD). Defaults to today's local date.
        #[arg(long)]
        today: Option<String>,
    },
    /// Move old predictions to the archive.
    Rotate {
        #[arg(long)]
        retention_days: Option<u32>,

        #[arg(long)]
        archive_dir: Option<PathBuf>,

        /// Reference date (YYYY-MM-DD). Defaults to today's local date.
        #[arg(long)]
        today: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let settings = Settings::from_env_with_dir(args.predictions_dir)?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let res = run(args.command, &settings).await;
    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "predlog worker failed");
    }
    res
}

async fn run(command: Command, settings: &Settings) -> anyhow::Result<()> {
    let dir = settings.predictions_dir.clone();

    match command {
        Command::Log { file } => {
            let raw = read_input(&file)?;
            let prediction: NewPrediction = serde_json::from_str(&raw)
                .with_context(|| format!("invalid prediction JSON in {file}"))?;
            let record = prediction.into_record()?;

            let writer = PredictionWriter::new(dir);
            let path = tokio::task::spawn_blocking(move || writer.write(&record))
                .await
                .context("write task panicked")??;
            println!("{}", path.display());
        }
        Command::List { ticker } => {
            let store = PredictionStore::new(dir);
            let records = tokio::task::spawn_blocking(move || store.list(ticker.as_deref()))
                .await
                .context("list task panicked")??;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Score { ticker, today } => {
            let today = resolve_today(today.as_deref())?;
            let prices = HttpJsonPriceLookup::from_settings(settings)?;
            let engine = ScoringEngine::new(
                PredictionStore::new(dir.clone()),
                PredictionWriter::new(dir),
                Arc::new(prices),
            );

            let report = engine.score(ticker.as_deref(), today).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Rotate {
            retention_days,
            archive_dir,
            today,
        } => {
            let today = resolve_today(today.as_deref())?;
            let retention_days = retention_days.unwrap_or(settings.retention_days);
            let archive_dir = archive_dir.unwrap_or_else(|| settings.archive_dir());

            let rotator = Rotator::new(PredictionStore::new(dir));
            let moved = {
                let archive_dir = archive_dir.clone();
                tokio::task::spawn_blocking(move || rotator.rotate(retention_days, &archive_dir, today))
                    .await
                    .context("rotate task panicked")??
            };

            tracing::info!(moved, retention_days, archive_dir = %archive_dir.display(), "rotation finished");
            println!("{}", serde_json::json!({ "moved": moved }));
        }
    }

    Ok(())
}

fn read_input(file: &str) -> anyhow::Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read prediction from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))
}

fn resolve_today(arg: Option<&str>) -> anyhow::Result<chrono::NaiveDate> {
    if let Some(s) = arg {
        return chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid date {s:?}, expected YYYY-MM-DD"));
    }
    Ok(chrono::Local::now().date_naive())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn resolve_today_parses_explicit_date() {
        let d = resolve_today(Some("2026-01-05")).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        assert!(resolve_today(Some("01/05/2026")).is_err());
    }

    #[test]
    fn parses_rotate_subcommand() {
        let args = Args::try_parse_from([
            "predlog_worker",
            "rotate",
            "--retention-days",
            "30",
            "--predictions-dir",
            "/tmp/preds",
        ])
        .unwrap();
        assert_eq!(args.predictions_dir, Some(PathBuf::from("/tmp/preds")));
        assert!(matches!(
            args.command,
            Command::Rotate {
                retention_days: Some(30),
                ..
            }
        ));
    }
}

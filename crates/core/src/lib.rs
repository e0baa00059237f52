pub mod domain;
pub mod pricing;
pub mod scoring;
pub mod storage;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;

    use crate::storage::rotation::{DEFAULT_ARCHIVE_DIR_NAME, DEFAULT_RETENTION_DAYS};

    const APP_DIR: &str = ".predlog";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub predictions_dir: PathBuf,
        pub archive_dir: Option<PathBuf>,
        pub retention_days: u32,
        pub sentry_dsn: Option<String>,
        pub price_provider_base_url: Option<String>,
        pub price_provider_api_key: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Self::from_env_with_dir(None)
        }

        /// Like [`from_env`](Self::from_env), but an explicit `predictions_dir`
        /// wins over the environment and skips its fallbacks entirely.
        pub fn from_env_with_dir(predictions_dir: Option<PathBuf>) -> anyhow::Result<Self> {
            let retention_days = match non_empty_var("PREDICTIONS_RETENTION_DAYS") {
                Some(s) => s
                    .parse::<u32>()
                    .with_context(|| format!("PREDICTIONS_RETENTION_DAYS must be a non-negative integer (got {s:?})"))?,
                None => DEFAULT_RETENTION_DAYS,
            };

            Ok(Self {
                predictions_dir: resolve_predictions_dir(predictions_dir, non_empty_var)?,
                archive_dir: non_empty_var("PREDICTIONS_ARCHIVE_DIR").map(PathBuf::from),
                retention_days,
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                price_provider_base_url: non_empty_var("PRICE_PROVIDER_BASE_URL"),
                price_provider_api_key: non_empty_var("PRICE_PROVIDER_API_KEY"),
            })
        }

        /// Settings rooted at an explicit directory, everything else default.
        pub fn for_dir(predictions_dir: impl Into<PathBuf>) -> Self {
            Self {
                predictions_dir: predictions_dir.into(),
                archive_dir: None,
                retention_days: DEFAULT_RETENTION_DAYS,
                sentry_dsn: None,
                price_provider_base_url: None,
                price_provider_api_key: None,
            }
        }

        pub fn archive_dir(&self) -> PathBuf {
            self.archive_dir
                .clone()
                .unwrap_or_else(|| self.predictions_dir.join(DEFAULT_ARCHIVE_DIR_NAME))
        }

        pub fn require_price_provider_base_url(&self) -> anyhow::Result<&str> {
            self.price_provider_base_url
                .as_deref()
                .context("PRICE_PROVIDER_BASE_URL is required")
        }
    }

    fn resolve_predictions_dir(
        explicit: Option<PathBuf>,
        var: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<PathBuf> {
        if let Some(dir) = explicit {
            return Ok(dir);
        }
        if let Some(dir) = var("PREDICTIONS_DIR") {
            return Ok(PathBuf::from(dir));
        }
        if let Some(cache) = var("CACHE_DIR") {
            return Ok(PathBuf::from(cache).join("predictions"));
        }
        let home = var("HOME")
            .context("PREDICTIONS_DIR is required when neither CACHE_DIR nor HOME is set")?;
        Ok(PathBuf::from(home).join(APP_DIR).join("cache").join("predictions"))
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

}

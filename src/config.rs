use std::env;
use std::str::FromStr;

use crate::error::AnalysisError;

pub const DEFAULT_STORAGE_URL: &str = "memory://";
pub const DEFAULT_PAGE_SIZE: u64 = 100;
pub const DEFAULT_MAX_QUERY_ROWS: u64 = 10_000;
pub const DEFAULT_INGEST_BATCH_SIZE: usize = 8192;
pub const DEFAULT_QUERY_MEMORY_LIMIT: usize = 2 * 1024 * 1024 * 1024;

/// Runtime settings, read from the environment by [`EngineConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Where uploaded source files are kept: `memory://`, `file:///dir`,
    /// `gs://bucket` or `s3://bucket`.
    pub storage_url: String,
    /// PostgreSQL catalog; the in-memory catalog is used when unset.
    pub database_url: Option<String>,
    pub default_page_size: u64,
    pub max_query_rows: u64,
    pub ingest_batch_size: usize,
    pub query_memory_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_url: DEFAULT_STORAGE_URL.to_string(),
            database_url: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_query_rows: DEFAULT_MAX_QUERY_ROWS,
            ingest_batch_size: DEFAULT_INGEST_BATCH_SIZE,
            query_memory_limit: DEFAULT_QUERY_MEMORY_LIMIT,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AnalysisError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse::<T>().map_err(|_| AnalysisError::Config {
                message: format!("{} must be a positive integer, got {:?}", name, raw),
            })
        }
        _ => Ok(default),
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, AnalysisError> {
        let config = Self {
            storage_url: env::var("DATASET_STORAGE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_STORAGE_URL.to_string()),
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            default_page_size: parse_var("QUERY_DEFAULT_LIMIT", DEFAULT_PAGE_SIZE)?,
            max_query_rows: parse_var("QUERY_MAX_ROWS", DEFAULT_MAX_QUERY_ROWS)?,
            ingest_batch_size: parse_var("INGEST_BATCH_SIZE", DEFAULT_INGEST_BATCH_SIZE)?,
            query_memory_limit: parse_var("QUERY_MEMORY_LIMIT_BYTES", DEFAULT_QUERY_MEMORY_LIMIT)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        let zero = [
            ("QUERY_DEFAULT_LIMIT", self.default_page_size == 0),
            ("QUERY_MAX_ROWS", self.max_query_rows == 0),
            ("INGEST_BATCH_SIZE", self.ingest_batch_size == 0),
            ("QUERY_MEMORY_LIMIT_BYTES", self.query_memory_limit == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(AnalysisError::Config {
                message: format!("{} must be greater than zero", name),
            });
        }
        Ok(())
    }
}

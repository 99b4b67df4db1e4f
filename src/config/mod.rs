use std::env;
use std::path::PathBuf;

use crate::engine::{OrphanAction, RestartRequeue};
use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub engine: EngineConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration, one pipe per generation call
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub formulate: String,
    pub breakdown: String,
    pub classify: String,
    pub analysis: String,
    pub source: String,
}

/// Workflow engine policy knobs
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Children created at or beyond this depth are leaves.
    pub max_depth: usize,
    /// Children at or above this depth are queued for breakdown, deeper ones for classify.
    pub breakdown_depth: usize,
    /// Queue an `analyze` item for every node that becomes a leaf.
    pub analyze_leaves: bool,
    /// Action queued for an edited node on restart.
    pub restart_requeue: RestartRequeue,
    /// Action queued for orphans found by the completion pass.
    pub orphan_action: OrphanAction,
    /// Non-empty completion passes allowed before orphans are force-terminated.
    pub max_completion_passes: usize,
    /// Hard step budget for a single run.
    pub max_steps: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/hypotree.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS").unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS").unwrap_or(30000),
            max_retries: parse_env("MAX_RETRIES").unwrap_or(3),
            retry_delay_ms: parse_env("RETRY_DELAY_MS").unwrap_or(1000),
        };

        let pipes = PipeConfig {
            formulate: env::var("PIPE_FORMULATE")
                .unwrap_or_else(|_| "hypothesis-formulate-v1".to_string()),
            breakdown: env::var("PIPE_BREAKDOWN")
                .unwrap_or_else(|_| "hypothesis-breakdown-v1".to_string()),
            classify: env::var("PIPE_CLASSIFY")
                .unwrap_or_else(|_| "hypothesis-classify-v1".to_string()),
            analysis: env::var("PIPE_ANALYSIS")
                .unwrap_or_else(|_| "hypothesis-analysis-v1".to_string()),
            source: env::var("PIPE_SOURCE").unwrap_or_else(|_| "hypothesis-source-v1".to_string()),
        };

        let engine = EngineConfig::from_env()?;

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            engine,
        })
    }
}

impl EngineConfig {
    /// Read the engine knobs alone; unparseable numbers fall back to defaults.
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let restart_requeue = match env::var("ENGINE_RESTART_REQUEUE") {
            Ok(v) => v
                .parse::<RestartRequeue>()
                .map_err(|message| AppError::Config { message })?,
            Err(_) => defaults.restart_requeue,
        };

        let orphan_action = match env::var("ENGINE_ORPHAN_ACTION") {
            Ok(v) => v
                .parse::<OrphanAction>()
                .map_err(|message| AppError::Config { message })?,
            Err(_) => defaults.orphan_action,
        };

        let config = Self {
            max_depth: parse_env("ENGINE_MAX_DEPTH").unwrap_or(defaults.max_depth),
            breakdown_depth: parse_env("ENGINE_BREAKDOWN_DEPTH")
                .unwrap_or(defaults.breakdown_depth),
            analyze_leaves: parse_env("ENGINE_ANALYZE_LEAVES").unwrap_or(defaults.analyze_leaves),
            restart_requeue,
            orphan_action,
            max_completion_passes: parse_env("ENGINE_MAX_COMPLETION_PASSES")
                .unwrap_or(defaults.max_completion_passes),
            max_steps: parse_env("ENGINE_MAX_STEPS").unwrap_or(defaults.max_steps),
        };

        if config.max_depth == 0 {
            return Err(AppError::Config {
                message: "ENGINE_MAX_DEPTH must be at least 1".to_string(),
            });
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            breakdown_depth: 1,
            analyze_leaves: false,
            restart_requeue: RestartRequeue::ByParent,
            orphan_action: OrphanAction::Breakdown,
            max_completion_passes: 3,
            max_steps: 200,
        }
    }
}

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration loaded from .issuesense.toml.
///
/// All fields are optional; the tool works with zero config, falling back
/// to the GITHUB_TOKEN env var and the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// GitHub-specific settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Retry/backoff policy for rate-limited and transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-stage caps on the assembled context
    #[serde(default)]
    pub limits: Limits,

    /// Orchestrator-level settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    /// API endpoint; overridable so tests can point at a mock server.
    pub api_base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base_url: "https://api.github.com".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    pub max_attempts: usize,
    /// Base delay before the first retry; doubles per attempt.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Caps keeping the rendered context bounded for the model adapter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Most recent comments retained.
    pub max_comments: usize,
    /// Changed files kept across all linked pull requests.
    pub max_files: usize,
    /// Commits kept after merging per-path histories.
    pub max_commits: usize,
    /// Diagnostic fragments extracted.
    pub max_diagnostics: usize,
    /// Character budget per diagnostic fragment.
    pub max_diagnostic_len: usize,
    /// Character budget per file's diff fragment.
    pub max_patch_len: usize,
    /// Commit history window, counted back from now.
    pub commit_lookback_days: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_comments: 5,
            max_files: 10,
            max_commits: 5,
            max_diagnostics: 3,
            max_diagnostic_len: 500,
            max_patch_len: 2000,
            commit_lookback_days: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent sub-fetches within a stage.
    pub concurrency: usize,
    /// Default overall deadline when the caller doesn't supply one.
    pub overall_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            overall_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from .issuesense.toml in the current directory.
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(".issuesense.toml");
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            Config::default()
        };

        if config.github.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                config.github.token = Some(token);
            }
        }

        Ok(config)
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Resolve the GitHub token: config file value takes precedence,
    /// falls back to GITHUB_TOKEN env var.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.github.request_timeout_secs)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.overall_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.github.token.is_none());
        assert_eq!(config.github.api_base_url, "https://api.github.com");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.limits.max_comments, 5);
        assert_eq!(config.limits.max_files, 10);
        assert_eq!(config.limits.max_commits, 5);
        assert_eq!(config.limits.max_diagnostics, 3);
        assert_eq!(config.limits.max_diagnostic_len, 500);
        assert_eq!(config.limits.commit_lookback_days, 90);
        assert_eq!(config.pipeline.concurrency, 5);
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[github]
api_base_url = "http://localhost:8080"
request_timeout_secs = 2

[retry]
max_attempts = 1

[limits]
max_files = 3
commit_lookback_days = 30

[pipeline]
concurrency = 2
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.github.api_base_url, "http://localhost:8080");
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.limits.max_files, 3);
        assert_eq!(config.limits.commit_lookback_days, 30);
        assert_eq!(config.pipeline.concurrency, 2);
        // Untouched sections keep their defaults
        assert_eq!(config.limits.max_comments, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
    }

    #[test]
    fn test_timeout_accessors() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.overall_timeout(), Duration::from_secs(60));
    }
}

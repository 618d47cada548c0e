//! Engine configuration.
//!
//! # Example
//!
//! ```yaml
//! max_concurrency: 8
//! retry:
//!   initial_backoff_ms: 50
//!   max_backoff_ms: 2000
//!   multiplier: 2.0
//!   jitter: false
//! audit_dir: .riskgate/audit
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use riskgate_runtime::DEFAULT_MAX_CONCURRENCY;

use crate::workflow::policy::RetryPolicy;
use crate::{EngineError, Result};

/// Settings shared by every workflow an engine runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Global worker pool size
    pub max_concurrency: usize,
    /// Backoff between attempts of a stage
    pub retry: RetryPolicy,
    /// Directory for JSON-lines audit files; in-memory only when unset
    pub audit_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            audit_dir: None,
        }
    }
}

impl EngineConfig {
    /// Parses a YAML configuration; missing keys take their defaults.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(source)
            .map_err(|e| EngineError::Config(format!("invalid engine config: {}", e)))?;
        config.validate()
    }

    /// Reads a YAML configuration file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&content)
    }

    /// Sets the worker pool size.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Mirrors audit records to `dir`.
    pub fn with_audit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audit_dir = Some(dir.into());
        self
    }

    fn validate(self) -> Result<Self> {
        if self.max_concurrency == 0 {
            return Err(EngineError::Config("max_concurrency must be at least 1".into()));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(EngineError::Config("retry.multiplier must be >= 1.0".into()));
        }
        Ok(self)
    }
}

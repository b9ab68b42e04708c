use std::cmp;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvesterConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_delay_secs: f64,

    #[serde(default)]
    pub content_filters: ContentFilters,

    #[serde(default = "default_storage_formats")]
    pub storage_formats: Vec<StorageFormat>,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: f64,

    #[serde(default = "default_retry_backoff_max")]
    pub retry_backoff_max_secs: f64,

    #[serde(default = "default_retry_on_429")]
    pub retry_on_429: bool,

    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,

    #[serde(default = "default_handle_sigint")]
    pub handle_sigint: bool,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            user_agents: default_user_agents(),
            max_workers: default_max_workers(),
            request_timeout_secs: default_request_timeout(),
            rate_limit_delay_secs: default_rate_limit_delay(),
            content_filters: ContentFilters::default(),
            storage_formats: default_storage_formats(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_secs: default_retry_backoff(),
            retry_backoff_max_secs: default_retry_backoff_max(),
            retry_on_429: default_retry_on_429(),
            max_image_bytes: default_max_image_bytes(),
            handle_sigint: default_handle_sigint(),
        }
    }
}

impl HarvesterConfig {
    /// Range checks applied once at load time, before any component is
    /// constructed from the config.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_workers == 0 {
            anyhow::bail!("maxWorkers must be at least 1");
        }
        if self.retry_attempts == 0 {
            anyhow::bail!("retryAttempts must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("requestTimeoutSecs must be at least 1");
        }
        if !self.rate_limit_delay_secs.is_finite() || self.rate_limit_delay_secs < 0.0 {
            anyhow::bail!("rateLimitDelaySecs must be a non-negative number");
        }
        if !self.retry_backoff_secs.is_finite() || self.retry_backoff_secs < 0.0 {
            anyhow::bail!("retryBackoffSecs must be a non-negative number");
        }
        if self.retry_backoff_max_secs < self.retry_backoff_secs {
            anyhow::bail!("retryBackoffMaxSecs must not be below retryBackoffSecs");
        }
        if self.user_agents.is_empty() {
            anyhow::bail!("userAgents must not be empty");
        }
        if self.storage_formats.is_empty() {
            anyhow::bail!("storageFormats must not be empty");
        }
        if self.content_filters.allowed_languages.is_empty() {
            anyhow::bail!("contentFilters.allowedLanguages must not be empty");
        }
        if self.max_image_bytes == 0 {
            anyhow::bail!("maxImageBytes must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFilters {
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,

    #[serde(default = "default_allowed_languages")]
    pub allowed_languages: Vec<String>,

    #[serde(default)]
    pub blocklist_phrases: Vec<String>,
}

impl Default for ContentFilters {
    fn default() -> Self {
        Self {
            min_text_length: default_min_text_length(),
            allowed_languages: default_allowed_languages(),
            blocklist_phrases: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum StorageFormat {
    /// One self-contained JSON object per line.
    Jsonl,
    /// Tabular rows with a fixed header, same schema as jsonl.
    Csv,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("harvested_data")
}

fn default_user_agents() -> Vec<String> {
    vec![String::from("whvbot/0.1")]
}

fn default_max_workers() -> usize {
    cmp::max(1, num_cpus::get().saturating_sub(2))
}

fn default_request_timeout() -> u64 {
    15
}

fn default_rate_limit_delay() -> f64 {
    1.0
}

fn default_storage_formats() -> Vec<StorageFormat> {
    vec![StorageFormat::Jsonl]
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> f64 {
    2.0
}

fn default_retry_backoff_max() -> f64 {
    60.0
}

fn default_retry_on_429() -> bool {
    true
}

fn default_max_image_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_handle_sigint() -> bool {
    true
}

fn default_min_text_length() -> usize {
    500
}

fn default_allowed_languages() -> Vec<String> {
    vec![String::from("en")]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        HarvesterConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_workers() {
        let conf = HarvesterConfig {
            max_workers: 0,
            ..Default::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn rejects_zero_attempts() {
        let conf = HarvesterConfig {
            retry_attempts: 0,
            ..Default::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn rejects_empty_storage_formats() {
        let conf = HarvesterConfig {
            storage_formats: vec![],
            ..Default::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn rejects_backoff_cap_below_base() {
        let conf = HarvesterConfig {
            retry_backoff_secs: 5.0,
            retry_backoff_max_secs: 1.0,
            ..Default::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn deserializes_partial_yaml_with_defaults() {
        let conf: HarvesterConfig = serde_yaml::from_str(
            "outputDir: out\ncontentFilters:\n  minTextLength: 100\nstorageFormats: [jsonl, csv]\n",
        )
        .unwrap();
        assert_eq!(conf.output_dir, PathBuf::from("out"));
        assert_eq!(conf.content_filters.min_text_length, 100);
        assert_eq!(conf.content_filters.allowed_languages, vec!["en"]);
        assert_eq!(
            conf.storage_formats,
            vec![StorageFormat::Jsonl, StorageFormat::Csv]
        );
        assert_eq!(conf.retry_attempts, 3);
        conf.validate().unwrap();
    }
}

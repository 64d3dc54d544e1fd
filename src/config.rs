//! TOML configuration with CLI overrides.
//!
//! Every section and key has a default except the bucket and the watched
//! directory, which may come from either the file or the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::cli::Overrides;
use crate::pipeline::coordinator::CoordinatorConfig;
use crate::pipeline::watcher::WatchOptions;
use crate::retry::RetryConfig;
use crate::types::{LogLevel, WatchMode};

const LOCK_FILE_NAME: &str = ".s3uploader-rs.lock";

/// S3 rejects multipart parts below 5 MiB, except the last.
const MIN_PART_SIZE_MB: u64 = 5;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: String,
    /// S3-compatible endpoint, e.g. a local MinIO.
    pub endpoint_url: Option<String>,
    pub key_prefix: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket_name: String::new(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            key_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalConfig {
    pub video_directory: PathBuf,
    /// Lowercase, without the leading dot, after [`Config::load`].
    pub file_extensions: Vec<String>,
    pub scan_existing: bool,
    pub watch_mode: WatchMode,
    pub poll_interval_ms: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            video_directory: PathBuf::new(),
            file_extensions: vec![".mp4".to_string()],
            scan_existing: true,
            watch_mode: WatchMode::Native,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Total upload attempts per file, verification re-uploads included.
    pub max_retries: u32,
    /// Seconds.
    pub initial_retry_delay: u64,
    /// Seconds.
    pub max_retry_delay: u64,
    pub retry_jitter: bool,
    /// Seconds a file must keep the same size and mtime.
    pub file_age_threshold: f64,
    pub stability_poll_interval_ms: u64,
    pub max_concurrent_uploads: usize,
    /// Seconds.
    pub shutdown_grace_period: u64,
    /// MiB. Larger files are sent as multipart uploads in parts this big.
    pub part_size_mb: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_retry_delay: 5,
            max_retry_delay: 300,
            retry_jitter: true,
            file_age_threshold: 2.0,
            stability_poll_interval_ms: 250,
            max_concurrent_uploads: 2,
            shutdown_grace_period: 30,
            part_size_mb: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    /// MB. Files rotate daily; a non-default value only triggers a startup warning.
    pub max_log_size: u64,
    pub log_backup_count: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_file: None,
            max_log_size: 10,
            log_backup_count: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub notify_systemd: bool,
    /// Defaults to a hidden file inside the watched directory.
    pub lock_file: Option<PathBuf>,
}

/// Expand `~/` to the user's home directory.
pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

fn normalize_extensions(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for ext in raw {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        if !ext.is_empty() && !out.contains(&ext) {
            out.push(ext);
        }
    }
    out
}

impl Config {
    /// Read `overrides.config`, apply the CLI overrides, normalize and
    /// validate. Any error here is fatal at startup.
    pub fn load(overrides: &Overrides) -> anyhow::Result<Self> {
        let path = &overrides.config;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        let parsed = Self::parse(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        parsed.resolve(overrides)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply CLI overrides, expand paths and validate.
    pub fn resolve(mut self, overrides: &Overrides) -> anyhow::Result<Self> {
        if let Some(bucket) = &overrides.bucket {
            self.s3.bucket_name = bucket.clone();
        }
        if let Some(dir) = &overrides.directory {
            self.local.video_directory = PathBuf::from(dir);
        }
        if let Some(level) = overrides.log_level {
            self.logging.log_level = level;
        }
        if overrides.notify_systemd {
            self.service.notify_systemd = true;
        }

        self.s3.bucket_name = self.s3.bucket_name.trim().to_string();
        self.local.video_directory = expand_tilde(&self.local.video_directory);
        self.local.file_extensions = normalize_extensions(&self.local.file_extensions);
        self.logging.log_file = self.logging.log_file.as_deref().map(expand_tilde);
        self.service.lock_file = self.service.lock_file.as_deref().map(expand_tilde);

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.s3.bucket_name.is_empty() {
            anyhow::bail!("[s3] bucket_name is required (or pass --bucket)");
        }
        if self.local.video_directory.as_os_str().is_empty() {
            anyhow::bail!("[local] video_directory is required (or pass --directory)");
        }
        if self.local.file_extensions.is_empty() {
            anyhow::bail!("[local] file_extensions must list at least one extension");
        }
        if self.upload.max_retries == 0 {
            anyhow::bail!("[upload] max_retries must be at least 1");
        }
        if self.upload.max_concurrent_uploads == 0 {
            anyhow::bail!("[upload] max_concurrent_uploads must be at least 1");
        }
        if self.upload.part_size_mb < MIN_PART_SIZE_MB {
            anyhow::bail!("[upload] part_size_mb must be at least {}", MIN_PART_SIZE_MB);
        }
        if !self.upload.file_age_threshold.is_finite() || self.upload.file_age_threshold < 0.0 {
            anyhow::bail!("[upload] file_age_threshold must be a non-negative number of seconds");
        }
        Ok(())
    }

    pub fn lock_path(&self) -> PathBuf {
        self.service
            .lock_file
            .clone()
            .unwrap_or_else(|| self.local.video_directory.join(LOCK_FILE_NAME))
    }

    pub fn part_size_bytes(&self) -> usize {
        usize::try_from(self.upload.part_size_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.upload.max_retries,
            base_delay_secs: self.upload.initial_retry_delay,
            max_delay_secs: self.upload.max_retry_delay,
            jitter: self.upload.retry_jitter,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            key_prefix: self.s3.key_prefix.clone(),
            retry: self.retry_config(),
            file_age_threshold: Duration::from_secs_f64(self.upload.file_age_threshold),
            stability_poll_interval: Duration::from_millis(self.upload.stability_poll_interval_ms),
            max_concurrent_uploads: self.upload.max_concurrent_uploads,
            shutdown_grace_period: Duration::from_secs(self.upload.shutdown_grace_period),
        }
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            directory: self.local.video_directory.clone(),
            extensions: self.local.file_extensions.clone(),
            mode: self.local.watch_mode,
            poll_interval: Duration::from_millis(self.local.poll_interval_ms),
            scan_existing: self.local.scan_existing,
        }
    }
}

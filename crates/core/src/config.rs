//! YAML configuration loading and normalization

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use serde::{Deserialize, Deserializer};

/// How symlinks are replicated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SymlinkPolicy {
    /// Symlinks are neither compared nor uploaded
    #[default]
    Skip,
    /// Upload a companion `<key>.link` object holding the target string
    Addr,
    /// Follow links to regular files; directory targets fall back to `Addr`
    File,
}

impl SymlinkPolicy {
    /// Case-insensitive parse; unknown values fall back to `Skip`
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "addr" => Self::Addr,
            "file" => Self::File,
            _ => Self::Skip,
        }
    }
}

impl fmt::Display for SymlinkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Skip => "skip",
            Self::Addr => "addr",
            Self::File => "file",
        };
        write!(f, "{s}")
    }
}

impl<'de> Deserialize<'de> for SymlinkPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Local directory being mirrored; `./relative` and `~`-rooted paths
    /// are expanded during load
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// S3-compatible endpoint, `host:port`
    pub endpoint: String,
    pub use_ssl: bool,
    pub secret_id: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    /// Key prefix under which mirrored objects live; leading `/` stripped
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RealTimeConfig {
    pub enable: bool,
    /// Coalescing window for hot files, in minutes; clamped to [1, 60]
    pub hot_delay: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckJobConfig {
    pub enable: bool,
    /// Hours between reconciliation walks, minimum 1
    pub interval: u64,
    /// Wall-clock "HH:MM:SS" of the first walk; invalid values fall back
    /// to midnight
    pub start_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub real_time: RealTimeConfig,
    pub check_job: CheckJobConfig,
    pub symlink: SymlinkPolicy,
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    /// File log path, including the file name
    pub log_path: String,
    /// Maximum log size in MB before rotation
    pub max_size: u64,
    /// Maximum retention in days
    pub max_age: u64,
    /// Maximum number of rotated files kept
    pub max_backups: u64,
    pub compress: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    pub time_fmt: String,
    pub time_key: String,
    pub level_key: String,
    pub name_key: String,
    pub caller_key: String,
    pub function_key: String,
    pub message_key: String,
    pub stacktrace_key: String,
}

/// One configured log output
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogOutput {
    /// "console" or "file"
    pub writer: String,
    pub write_config: WriteConfig,
    /// "console" or "json"
    pub formatter: String,
    pub format_config: FormatConfig,
    /// debug | info | warn | error | fatal
    pub level: String,
}

/// Full obsync configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub local: LocalConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub log: Vec<LogOutput>,
}

impl Config {
    /// Load and normalize the configuration at `path`.
    ///
    /// # Errors
    /// Returns an error if the file is missing or not valid YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&raw)
            .wrap_err_with(|| format!("parsing config {}", path.display()))?;
        config.normalize()?;
        Ok(config)
    }

    fn normalize(&mut self) -> Result<()> {
        let local = self.local.path.to_string_lossy().to_string();
        if let Some(rest) = local.strip_prefix('~') {
            let home = std::env::var_os("HOME").unwrap_or_default();
            self.local.path = PathBuf::from(home).join(rest.trim_start_matches('/'));
        } else if local.starts_with("./") {
            self.local.path = std::path::absolute(&self.local.path)?;
        }

        self.remote.path = self.remote.path.trim_start_matches('/').to_string();
        self.sync.real_time.hot_delay = self.sync.real_time.hot_delay.clamp(1, 60);
        if self.sync.check_job.interval < 1 {
            self.sync.check_job.interval = 1;
        }
        Ok(())
    }

    /// The coalescing window as a duration
    #[must_use]
    pub fn hot_delay(&self) -> Duration {
        Duration::from_secs(self.sync.real_time.hot_delay * 60)
    }

    /// Human-readable settings dump with masked credentials, printed at
    /// startup for operator inspection
    #[must_use]
    pub fn summary(&self) -> String {
        let mut s = String::new();
        s.push_str("**************** obsync ******************\n");
        s.push_str("Local: -----------------------------------\n");
        s.push_str(&format!("  Path:\t\t| {}\n", self.local.path.display()));
        s.push_str("Remote: ----------------------------------\n");
        s.push_str(&format!("  Endpoint:\t| {}\n", self.remote.endpoint));
        s.push_str(&format!(
            "  SecretId:\t| {}\n",
            mask_secret(&self.remote.secret_id, 12)
        ));
        s.push_str(&format!(
            "  SecretKey:\t| {}\n",
            mask_secret(&self.remote.secret_key, 12)
        ));
        s.push_str(&format!("  Bucket:\t| {}\n", self.remote.bucket));
        s.push_str(&format!("  Region:\t| {}\n", self.remote.region));
        s.push_str(&format!("  Path:\t\t| {}\n", self.remote.path));
        s.push_str("Sync: ------------------------------------\n");
        s.push_str("  Real-time:\n");
        s.push_str(&format!("    Enable:\t| {}\n", self.sync.real_time.enable));
        s.push_str(&format!(
            "    HotDelay:\t| {} minute\n",
            self.sync.real_time.hot_delay
        ));
        s.push_str("  Check-job:\n");
        s.push_str(&format!("    Enable:\t| {}\n", self.sync.check_job.enable));
        s.push_str(&format!(
            "    Interval:\t| {} hour\n",
            self.sync.check_job.interval
        ));
        s.push_str(&format!(
            "    Start-at:\t| {}\n",
            self.sync.check_job.start_at
        ));
        s.push_str(&format!("  Symlink:\t| {}\n", self.sync.symlink));
        s.push_str(&format!("  Ignore:\t| {:?}\n", self.sync.ignore));
        s.push_str("******************************************");
        s
    }
}

/// Mask the middle of a secret with `count` asterisks
#[must_use]
pub fn mask_secret(secret: &str, count: usize) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let len = chars.len();
    if len == 0 {
        return String::new();
    }
    if len <= count {
        return "*".repeat(len);
    }

    let prefix = (len - count).div_ceil(2);
    let suffix = (len - count) / 2;
    let head: String = chars[..prefix].iter().collect();
    let tail: String = chars[len - suffix..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
local:
  path: /data
remote:
  endpoint: minio.local:9000
  use_ssl: true
  secret_id: AKIDEXAMPLE00001
  secret_key: sk-very-secret-value
  bucket: mirror
  region: us-east-1
  path: /backup
sync:
  real_time:
    enable: true
    hot_delay: 5
  check_job:
    enable: true
    interval: 12
    start_at: "03:30:00"
  symlink: ADDR
  ignore: [".git", "*.log"]
log:
  - writer: console
    formatter: console
    level: debug
"#;

    fn parse(yaml: &str) -> Config {
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        config.normalize().unwrap();
        config
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(FULL);
        assert_eq!(config.local.path, PathBuf::from("/data"));
        assert_eq!(config.remote.endpoint, "minio.local:9000");
        assert!(config.remote.use_ssl);
        assert_eq!(config.remote.path, "backup");
        assert!(config.sync.real_time.enable);
        assert_eq!(config.sync.real_time.hot_delay, 5);
        assert_eq!(config.sync.check_job.interval, 12);
        assert_eq!(config.sync.symlink, SymlinkPolicy::Addr);
        assert_eq!(config.sync.ignore, vec![".git", "*.log"]);
        assert_eq!(config.log.len(), 1);
    }

    #[test]
    fn test_hot_delay_clamped() {
        let config = parse("sync:\n  real_time:\n    hot_delay: 0\n");
        assert_eq!(config.sync.real_time.hot_delay, 1);

        let config = parse("sync:\n  real_time:\n    hot_delay: 999\n");
        assert_eq!(config.sync.real_time.hot_delay, 60);
        assert_eq!(config.hot_delay(), Duration::from_secs(3600));
    }

    #[test]
    fn test_interval_minimum() {
        let config = parse("sync:\n  check_job:\n    interval: 0\n");
        assert_eq!(config.sync.check_job.interval, 1);
    }

    #[test]
    fn test_unknown_symlink_policy_is_skip() {
        let config = parse("sync:\n  symlink: hardlink\n");
        assert_eq!(config.sync.symlink, SymlinkPolicy::Skip);
    }

    #[test]
    fn test_relative_local_path_becomes_absolute() {
        let config = parse("local:\n  path: ./data\n");
        assert!(config.local.path.is_absolute());
        assert!(config.local.path.ends_with("data"));
    }

    #[test]
    fn test_tilde_local_path_expands_to_home() {
        let config = parse("local:\n  path: ~/data\n");
        let home = PathBuf::from(std::env::var_os("HOME").unwrap());
        assert_eq!(config.local.path, home.join("data"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("", 4), "");
        assert_eq!(mask_secret("ab", 4), "**");
        assert_eq!(mask_secret("abcdefghij", 4), "abc****hij");
    }

    #[test]
    fn test_summary_masks_credentials() {
        let config = parse(FULL);
        let summary = config.summary();
        assert!(!summary.contains("sk-very-secret-value"));
        assert!(summary.contains("mirror"));
        assert!(summary.contains('*'));
    }
}

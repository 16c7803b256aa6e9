use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) const CONFIG_FILE: &str = "autojudge.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    /// Per-language overrides, keyed by `Language::config_key`
    #[serde(default)]
    pub languages: BTreeMap<String, LanguageOverride>,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Where submissions, problems, attachments and executions live on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container name prefix; the submission id is appended
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Directory inside the sandbox that receives the code file
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// CPU quota (e.g. 1.0 = one core)
    #[serde(default = "default_cpus")]
    pub cpus: f64,

    /// Maximum number of processes inside the sandbox
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,

    /// Grace period between SIGTERM and SIGKILL once the time limit expires
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Run sandboxes without any network interface
    #[serde(default = "default_true")]
    pub network_disabled: bool,

    /// Combined stdout and stderr a single command may produce
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            workdir: default_workdir(),
            cpus: default_cpus(),
            pids_limit: default_pids_limit(),
            kill_grace_ms: default_kill_grace_ms(),
            network_disabled: true,
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Submissions judged in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

/// Overrides for a single language runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageOverride {
    /// Sandbox image to use instead of the built-in default
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Fired once per created execution: "webhook:<url>", a bare URL, or "none"
    #[serde(default)]
    pub on_execution: Option<String>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_name_prefix() -> String {
    "autojudge".to_string()
}

fn default_workdir() -> String {
    "/app".to_string()
}

fn default_cpus() -> f64 {
    1.0
}

fn default_pids_limit() -> i64 {
    64
}

fn default_kill_grace_ms() -> u64 {
    1000
}

fn default_max_output_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_concurrency() -> usize {
    4
}

impl Config {
    /// Load configuration from `autojudge.toml` in `dir`, using defaults if not found
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_file(&dir.join(CONFIG_FILE))
    }

    /// Load configuration from an explicit path, using defaults if not found
    pub fn load_file(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Image override for a language, if configured
    pub fn image_override(&self, key: &str) -> Option<&str> {
        self.languages.get(key).and_then(|o| o.image.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
        assert_eq!(config.sandbox.workdir, "/app");
        assert_eq!(config.sandbox.pids_limit, 64);
        assert!(config.sandbox.network_disabled);
        assert_eq!(config.judge.concurrency, 4);
        assert!(config.notifications.on_execution.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[storage]
data_dir = "/var/lib/autojudge"

[sandbox]
name_prefix = "contest"
cpus = 2.0
kill_grace_ms = 500
max_output_bytes = 1048576

[judge]
concurrency = 8

[languages.cpp_17]
image = "registry.local/gcc:14"

[notifications]
on_execution = "webhook:http://localhost:9000/executions"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/autojudge"));
        assert_eq!(config.sandbox.name_prefix, "contest");
        assert!((config.sandbox.cpus - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.sandbox.kill_grace_ms, 500);
        assert_eq!(config.sandbox.max_output_bytes, 1024 * 1024);
        assert_eq!(config.sandbox.workdir, "/app");
        assert_eq!(config.judge.concurrency, 8);
        assert_eq!(
            config.image_override("cpp_17"),
            Some("registry.local/gcc:14")
        );
        assert_eq!(config.image_override("java_21"), None);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.sandbox.name_prefix, "autojudge");
    }

    #[test]
    fn test_load_invalid_file_fails() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[sandbox\ncpus = ").unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}

use crate::environment::{Settings, Toolchain};
use crate::error::TestbedError;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub compose: ComposeConfig,
    pub docker: DockerConfig,
    pub timeouts: Timeouts,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ComposeConfig {
    pub program: String,
    pub args: Vec<String>,
    pub files: Vec<String>,
    pub project: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DockerConfig {
    pub program: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    pub up_sec: u64,
    pub command_sec: u64,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            compose: ComposeConfig::default(),
            docker: DockerConfig::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            args: vec!["compose".to_string()],
            files: Vec::new(),
            project: String::new(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            up_sec: 300,
            command_sec: 60,
            poll_interval_ms: 1000,
        }
    }
}

impl Config {
    pub fn up_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.up_sec)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            toolchain: Toolchain {
                compose_program: self.compose.program.clone(),
                compose_args: self.compose.args.clone(),
                docker_program: self.docker.program.clone(),
            },
            lifecycle_timeout: self.up_timeout(),
            command_timeout: Duration::from_secs(self.timeouts.command_sec),
            poll_interval: Duration::from_millis(self.timeouts.poll_interval_ms),
        }
    }
}

pub fn default_config_dir() -> PathBuf {
    if let Ok(path) = env::var("TESTBED_CONFIG_DIR") {
        return PathBuf::from(path);
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".config");
    base.push("testbed");
    base
}

pub fn resolve_config_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("TESTBED_CONFIG") {
        return PathBuf::from(path);
    }
    let mut base = default_config_dir();
    base.push("config.yaml");
    base
}

pub fn read_config_from_str(content: &str) -> Result<Config, TestbedError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    if cfg.version != CONFIG_VERSION {
        return Err(TestbedError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn read_config(path: &Path) -> Result<Config, TestbedError> {
    let content = fs::read_to_string(path)?;
    read_config_from_str(&content)
}

pub fn load_config(path: &Path) -> Result<Config, TestbedError> {
    if path.exists() {
        read_config(path)
    } else {
        Ok(Config::default())
    }
}

pub fn validate_config(cfg: &Config) -> Result<(), TestbedError> {
    if cfg.compose.program.trim().is_empty() {
        return Err(TestbedError::Config(
            "compose.program must be non-empty".to_string(),
        ));
    }
    if cfg.docker.program.trim().is_empty() {
        return Err(TestbedError::Config(
            "docker.program must be non-empty".to_string(),
        ));
    }
    if cfg.timeouts.command_sec == 0 {
        return Err(TestbedError::Config(
            "timeouts.command_sec must be greater than zero".to_string(),
        ));
    }
    if cfg.timeouts.poll_interval_ms == 0 {
        return Err(TestbedError::Config(
            "timeouts.poll_interval_ms must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

pub fn expand_path(input: &str) -> String {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}

pub fn ensure_parent(path: &Path) -> Result<(), TestbedError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

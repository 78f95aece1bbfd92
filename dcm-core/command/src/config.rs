//! 引擎配置
//!
//! 加载优先级: 环境变量 > 配置文件 > 默认值

use anyhow::{Context, Result};
use dcm_tasks::TaskManagerConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// 引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 后台任务
    #[serde(default)]
    pub tasks: TaskManagerConfig,

    /// 镜像传输
    #[serde(default)]
    pub transfer: TransferConfig,

    /// 权限检查
    #[serde(default)]
    pub permissions: PermissionConfig,
}

/// 镜像传输配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// 数据代理地址
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,

    /// 无活动超时（秒）
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
}

/// 权限检查配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionConfig {
    #[serde(default = "default_permissions_enabled")]
    pub enabled: bool,
}

fn default_proxy_url() -> String {
    "https://localhost:54323/images".to_string()
}

fn default_inactivity_timeout() -> u64 {
    60
}

fn default_permissions_enabled() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            proxy_url: default_proxy_url(),
            inactivity_timeout_secs: default_inactivity_timeout(),
        }
    }
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            enabled: default_permissions_enabled(),
        }
    }
}

// ============================================
// 配置加载实现
// ============================================

impl EngineConfig {
    /// 从多个源加载配置
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                tracing::debug!("Loading engine config from: {:?}", path);
                Self::load_from_file(&path)?
            }
            None => {
                tracing::debug!("No engine config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_vars()?;
        Ok(config)
    }

    /// 从指定文件加载，按扩展名选择解析器
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {:?}", path))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {:?}", path))?,
            _ => anyhow::bail!("Unsupported config file format: {:?}", path),
        };

        Ok(config)
    }

    /// 查找配置文件
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("DCM_ENGINE_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let mut candidates = vec![PathBuf::from("./dcm.toml"), PathBuf::from("./dcm.yaml")];

        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".config/dcm/engine.toml"));
            candidates.push(home.join(".config/dcm/engine.yaml"));
        }

        #[cfg(target_os = "linux")]
        candidates.push(PathBuf::from("/etc/dcm/engine.toml"));

        candidates.into_iter().find(|p| p.exists())
    }

    fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// 用 `lookup` 提供的键值覆盖配置
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(max) = lookup("DCM_MAX_CONCURRENT_TASKS") {
            self.tasks.max_concurrent_tasks = max
                .parse()
                .context("Invalid DCM_MAX_CONCURRENT_TASKS value")?;
        }
        if let Some(secs) = lookup("DCM_TASK_RETENTION_SECS") {
            self.tasks.retention_secs = secs
                .parse()
                .context("Invalid DCM_TASK_RETENTION_SECS value")?;
        }
        if let Some(url) = lookup("DCM_TRANSFER_PROXY_URL") {
            self.transfer.proxy_url = url;
        }
        if let Some(enabled) = lookup("DCM_PERMISSIONS_ENABLED") {
            self.permissions.enabled = enabled
                .parse()
                .context("Invalid DCM_PERMISSIONS_ENABLED value")?;
        }
        Ok(())
    }
}

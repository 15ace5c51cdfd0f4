use redact_crypto::KdfParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_STORAGE_DIR: &str = "REDACT_STORAGE_DIR";
pub const ENV_IPFS_API_URL: &str = "REDACT_IPFS_API_URL";
pub const ENV_LOG_LEVEL: &str = "REDACT_LOG_LEVEL";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    // ============ 存储 ============
    /// 加密文件存储根目录
    pub storage_dir: PathBuf,
    /// 脱敏产物所在子目录
    pub redacted_subdir: String,
    /// 临时明文所在子目录
    pub temp_subdir: String,

    // ============ 外部服务 ============
    /// IPFS HTTP API 地址，未配置时不发布
    pub ipfs_api_url: Option<String>,
    pub publish_timeout_secs: u64,
    /// 是否生成模拟锚定凭证
    pub anchor_enabled: bool,

    // ============ 运行参数 ============
    pub log_level: String,
    /// 文档锁分片数
    pub lock_stripes: usize,
    /// 重新加密使用的 KDF 参数
    pub kdf: KdfParams,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("storage"),
            redacted_subdir: "redacted".to_string(),
            temp_subdir: "tmp".to_string(),
            ipfs_api_url: None,
            publish_timeout_secs: 30,
            anchor_enabled: true,
            log_level: "info".to_string(),
            lock_stripes: 64,
            kdf: KdfParams::default(),
        }
    }
}

impl ServiceConfig {
    /// 用环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_STORAGE_DIR).filter(|v| !v.trim().is_empty()) {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup(ENV_IPFS_API_URL) {
            let url = url.trim().to_string();
            self.ipfs_api_url = if url.is_empty() { None } else { Some(url) };
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.log_level = level;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 读取配置文件，文件不存在时使用默认值；随后应用环境变量覆盖
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let mut config = if path.exists() {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw)?
    } else {
        ServiceConfig::default()
    };
    config.apply_env_overrides();
    Ok(config)
}

pub fn save_config(path: &Path, config: &ServiceConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let raw = serde_json::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

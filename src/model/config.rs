use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 自动备份间隔下限（秒）
pub const MIN_BACKUP_INTERVAL_SECS: u64 = 10;
/// 自动备份间隔上限（秒）
pub const MAX_BACKUP_INTERVAL_SECS: u64 = 3600;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// 是否启用自动备份
    #[serde(default = "default_auto_backup_enabled")]
    pub auto_backup_enabled: bool,

    /// 自动备份间隔（秒），有效范围 10..=3600
    #[serde(default = "default_backup_interval_secs")]
    pub backup_interval_secs: u64,

    /// 备份目录
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// 配置文件路径（运行时元数据，不写入 JSON）
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_auto_backup_enabled() -> bool {
    true
}

fn default_backup_interval_secs() -> u64 {
    60
}

fn default_backup_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("Desktop"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_backup_enabled: default_auto_backup_enabled(),
            backup_interval_secs: default_backup_interval_secs(),
            backup_dir: default_backup_dir(),
            config_path: None,
        }
    }
}

impl Config {
    /// 获取默认配置文件路径
    pub fn default_config_path() -> &'static str {
        "config.json"
    }

    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            // 配置文件不存在，返回默认配置
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        let mut config = config.normalized();
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// 获取配置文件路径（如果有）
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 绑定配置文件路径，之后 `save` 会写回该文件
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// 将越界的备份间隔收敛到有效范围
    pub fn normalized(mut self) -> Self {
        let clamped = self
            .backup_interval_secs
            .clamp(MIN_BACKUP_INTERVAL_SECS, MAX_BACKUP_INTERVAL_SECS);
        if clamped != self.backup_interval_secs {
            tracing::warn!(
                requested = self.backup_interval_secs,
                clamped,
                "备份间隔超出范围，已自动调整"
            );
            self.backup_interval_secs = clamped;
        }
        self
    }

    /// 将当前配置写回原始配置文件
    pub fn save(&self) -> anyhow::Result<()> {
        let path = self
            .config_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("配置文件路径未知，无法保存配置"))?;

        let content = serde_json::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, content)
            .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_clamps_interval() {
        let mut config = Config::default();
        config.backup_interval_secs = 1;
        assert_eq!(config.clone().normalized().backup_interval_secs, 10);

        config.backup_interval_secs = 99_999;
        assert_eq!(config.clone().normalized().backup_interval_secs, 3600);

        config.backup_interval_secs = 120;
        assert_eq!(config.normalized().backup_interval_secs, 120);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load(&path).unwrap();
        assert!(config.auto_backup_enabled);
        assert_eq!(config.backup_interval_secs, 60);
        assert_eq!(config.config_path(), Some(path.as_path()));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::load(&path).unwrap();
        config.auto_backup_enabled = false;
        config.backup_interval_secs = 300;
        config.backup_dir = dir.path().join("backups");
        config.save().unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"backupIntervalSecs\": 300"));

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_clamps_out_of_range_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"backupIntervalSecs": 5}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.backup_interval_secs, MIN_BACKUP_INTERVAL_SECS);
    }

    #[test]
    fn test_save_without_path_fails() {
        assert!(Config::default().save().is_err());
    }
}

//! 快照导出：将记录存储的某一时刻副本写入 CSV 文件

mod csv;
mod exporter;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

pub use csv::{ExportMeta, write_csv};
pub use exporter::SnapshotExporter;

/// 导出文件中的系统名称，也是文件名前缀
pub const SYSTEM_NAME: &str = "TRAFFIC_SAVER";

/// 备份触发方式，各自对应不同的保留策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    /// 手动备份：带时间戳的新文件
    Manual,
    /// 定时备份：固定文件名，每次覆盖
    Auto,
    /// 退出备份：带时间戳的新文件
    Shutdown,
}

impl BackupKind {
    pub fn file_name(&self, now: &DateTime<Local>) -> String {
        let stamp = now.format("%d%m%Y_%H%M%S");
        match self {
            BackupKind::Manual => format!("{}_BACKUP_{}.csv", SYSTEM_NAME, stamp),
            BackupKind::Auto => format!("{}_AUTOSAVE.csv", SYSTEM_NAME),
            BackupKind::Shutdown => format!("{}_AUTOSAVE_{}.csv", SYSTEM_NAME, stamp),
        }
    }

    /// 第 `attempt` 次尝试的文件名，0 为原名，其后追加 `_1`、`_2` 等编号
    pub fn numbered_file_name(&self, now: &DateTime<Local>, attempt: u32) -> String {
        let name = self.file_name(now);
        if attempt == 0 {
            return name;
        }
        match name.strip_suffix(".csv") {
            Some(stem) => format!("{}_{}.csv", stem, attempt),
            None => format!("{}_{}", name, attempt),
        }
    }

    /// 是否允许覆盖已存在的文件
    pub fn overwrite(&self) -> bool {
        matches!(self, BackupKind::Auto)
    }
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupKind::Manual => f.write_str("manual"),
            BackupKind::Auto => f.write_str("auto"),
            BackupKind::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// 手动导出的默认文件名
pub fn default_export_file_name(now: &DateTime<Local>) -> String {
    format!("{}_Export_{}.csv", SYSTEM_NAME, now.format("%Y%m%d_%H%M%S"))
}

/// 用户指定的导出路径缺少 `.csv` 后缀时补上
pub fn normalize_export_path(path: &Path) -> PathBuf {
    let has_csv = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if has_csv {
        path.to_path_buf()
    } else {
        let mut raw = path.as_os_str().to_owned();
        raw.push(".csv");
        PathBuf::from(raw)
    }
}

/// 导出成功后的结果，供控制界面展示
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub records: usize,
}

/// 导出错误
#[derive(Debug)]
pub enum ExportError {
    /// 存储为空，不生成文件
    Empty,
    /// 目标文件已存在且不允许覆盖
    AlreadyExists(PathBuf),
    /// 文件写入失败
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Empty => write!(f, "No records to export"),
            ExportError::AlreadyExists(path) => {
                write!(f, "Export target already exists: {}", path.display())
            }
            ExportError::Io { path, source } => {
                write!(f, "Failed to write {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

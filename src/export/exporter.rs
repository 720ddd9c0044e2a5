use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tempfile::NamedTempFile;

use super::csv::{ExportMeta, write_csv};
use super::{BackupKind, ExportError, ExportReport, normalize_export_path};
use crate::common::RunId;
use crate::model::record::LogRecord;
use crate::pipeline::RecordStore;

/// 带时间戳的备份文件重名时，最多尝试的编号数
const MAX_NAME_ATTEMPTS: u32 = 100;

/// 快照导出器
///
/// 只在取快照时持有存储锁，文件写入期间不阻塞处理任务
pub struct SnapshotExporter {
    store: Arc<RecordStore>,
    run_id: RunId,
    host_version: String,
}

impl SnapshotExporter {
    pub fn new(store: Arc<RecordStore>, run_id: RunId, host_version: impl Into<String>) -> Self {
        Self {
            store,
            run_id,
            host_version: host_version.into(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// 手动导出到用户指定路径，从不覆盖已有文件
    pub fn export_manual(&self, path: &Path) -> Result<ExportReport, ExportError> {
        self.export(&normalize_export_path(path), false)
    }

    /// 按触发方式备份到目录，目录不存在时自动创建
    ///
    /// 不覆盖的备份遇到同名文件时依次尝试 `_1`、`_2` 等后缀，每次调用都生成新文件
    pub fn backup(&self, dir: &Path, kind: BackupKind) -> Result<ExportReport, ExportError> {
        if self.store.is_empty() {
            return Err(ExportError::Empty);
        }
        fs::create_dir_all(dir).map_err(|source| ExportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let now = Local::now();
        let report = if kind.overwrite() {
            self.export(&dir.join(kind.file_name(&now)), true)?
        } else {
            let (mut tmp, records) = self.write_snapshot(dir)?;
            let mut attempt = 0;
            loop {
                let path = dir.join(kind.numbered_file_name(&now, attempt));
                match tmp.persist_noclobber(&path) {
                    Ok(_) => break ExportReport { path, records },
                    Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                        attempt += 1;
                        if attempt >= MAX_NAME_ATTEMPTS {
                            return Err(ExportError::AlreadyExists(path));
                        }
                        tracing::debug!(path = %path.display(), "备份文件已存在，改用编号文件名");
                        tmp = e.file;
                    }
                    Err(e) => {
                        return Err(ExportError::Io {
                            path,
                            source: e.error,
                        });
                    }
                }
            }
        };

        tracing::info!(
            kind = %kind,
            records = report.records,
            path = %report.path.display(),
            "备份完成"
        );
        Ok(report)
    }

    /// 导出当前快照
    ///
    /// 先写入同目录下的临时文件再原子地移动到目标位置，失败时不会留下目标文件。
    /// `overwrite` 为 false 时，目标已存在（包括并发导出抢先创建）则返回 `AlreadyExists`
    pub fn export(&self, path: &Path, overwrite: bool) -> Result<ExportReport, ExportError> {
        let (tmp, records) = self.write_snapshot(parent_dir(path))?;

        let persisted = if overwrite {
            tmp.persist(path)
        } else {
            tmp.persist_noclobber(path)
        };
        if let Err(e) = persisted {
            if e.error.kind() == ErrorKind::AlreadyExists {
                return Err(ExportError::AlreadyExists(path.to_path_buf()));
            }
            let err = ExportError::Io {
                path: path.to_path_buf(),
                source: e.error,
            };
            tracing::error!("导出失败: {}", err);
            return Err(err);
        }

        Ok(ExportReport {
            path: path.to_path_buf(),
            records,
        })
    }

    /// 把快照写入 `dir` 中的临时文件，返回临时文件和记录数
    ///
    /// 临时文件在被持久化之前一旦丢弃就会被删除
    fn write_snapshot(&self, dir: &Path) -> Result<(NamedTempFile, usize), ExportError> {
        let snapshot = self.store.snapshot();
        if snapshot.is_empty() {
            tracing::debug!(dir = %dir.display(), "存储为空，跳过导出");
            return Err(ExportError::Empty);
        }

        let meta = ExportMeta {
            run_id: &self.run_id,
            host_version: &self.host_version,
            exported_at: Local::now(),
        };
        let io_err = |source| ExportError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".traffic-saver-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(io_err)?;
        write_file(tmp.as_file_mut(), &meta, &snapshot).map_err(|source| {
            tracing::error!(dir = %dir.display(), "写入导出文件失败: {}", source);
            io_err(source)
        })?;

        Ok((tmp, snapshot.len()))
    }
}

fn write_file(
    file: &mut fs::File,
    meta: &ExportMeta<'_>,
    records: &[Arc<LogRecord>],
) -> std::io::Result<()> {
    let mut writer = BufWriter::new(&mut *file);
    write_csv(&mut writer, meta, records)?;
    writer.flush()?;
    drop(writer);
    file.sync_all()
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

//! 系统实例：串联队列、处理任务、存储、导出和调度
//!
//! 所有共享状态都挂在同一个实例上，显式启动、显式停止

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::common::RunId;
use crate::export::{BackupKind, ExportError, ExportReport, SnapshotExporter};
use crate::model::config::Config;
use crate::model::event::{Direction, HttpMessage, ToolId, TrafficSource};
use crate::pipeline::{
    CorrelationTable, IngestQueue, IngestWorker, RecordStore, Snapshot, ingest_queue,
};
use crate::scheduler::{BackupScheduler, BackupTask, ScheduleSpec};

/// 退出时等待处理任务停止的上限
pub const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// 定时备份动作：读取当前配置，覆盖写入固定文件
struct AutoBackupJob {
    exporter: Arc<SnapshotExporter>,
    config: Arc<RwLock<Config>>,
}

impl BackupTask for AutoBackupJob {
    fn run_backup(&self) {
        let dir = {
            let config = self.config.read();
            if !config.auto_backup_enabled {
                return;
            }
            config.backup_dir.clone()
        };

        match self.exporter.backup(&dir, BackupKind::Auto) {
            Ok(_) | Err(ExportError::Empty) => {}
            Err(e) => tracing::warn!("自动备份失败: {}", e),
        }
    }
}

/// 流量日志服务
pub struct TrafficLogger {
    queue: IngestQueue,
    store: Arc<RecordStore>,
    pending: Arc<CorrelationTable>,
    exporter: Arc<SnapshotExporter>,
    config: Arc<RwLock<Config>>,
    scheduler: Mutex<BackupScheduler>,
    worker: Mutex<Option<JoinHandle<u64>>>,
    shutdown: CancellationToken,
}

impl TrafficLogger {
    /// 启动处理任务和备份调度（需要在 tokio 运行时内调用）
    ///
    /// 启动后控制方法可以在任意线程调用，定时器始终在启动时的运行时上运行
    pub fn start(config: Config, source: Arc<dyn TrafficSource>) -> Self {
        let runtime = Handle::current();
        let config = config.normalized();
        let run_id = RunId::generate();
        let store = Arc::new(RecordStore::new());
        let pending = Arc::new(CorrelationTable::new());
        let shutdown = CancellationToken::new();

        let (queue, receiver) = ingest_queue();
        let worker = IngestWorker::new(store.clone(), pending.clone(), source.clone())
            .spawn(receiver, shutdown.clone());

        let exporter = Arc::new(SnapshotExporter::new(
            store.clone(),
            run_id.clone(),
            source.host_version(),
        ));

        let interval = Duration::from_secs(config.backup_interval_secs);
        let enabled = config.auto_backup_enabled;
        let config = Arc::new(RwLock::new(config));

        let mut scheduler = BackupScheduler::new(
            runtime,
            Arc::new(AutoBackupJob {
                exporter: exporter.clone(),
                config: config.clone(),
            }),
            interval,
        );
        scheduler.rearm(enabled, ScheduleSpec::every(interval));

        tracing::info!(run_id = %run_id, "流量日志服务已启动");

        Self {
            queue,
            store,
            pending,
            exporter,
            config,
            scheduler: Mutex::new(scheduler),
            worker: Mutex::new(Some(worker)),
            shutdown,
        }
    }

    /// 流量源回调：只入队，立即返回
    pub fn on_traffic_event(&self, tool: ToolId, is_request: bool, message: Arc<dyn HttpMessage>) {
        let direction = if is_request {
            Direction::Request
        } else {
            Direction::Response
        };
        self.queue.enqueue(tool, direction, message);
    }

    /// 入队端句柄，可交给其他生产线程
    pub fn queue(&self) -> IngestQueue {
        self.queue.clone()
    }

    pub fn run_id(&self) -> &RunId {
        self.exporter.run_id()
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// 自动备份定时器是否在运行
    pub fn auto_backup_running(&self) -> bool {
        self.scheduler.lock().is_running()
    }

    /// 手动导出到指定路径
    pub async fn export_to(&self, path: PathBuf) -> Result<ExportReport, ExportError> {
        let exporter = self.exporter.clone();
        run_blocking(path.clone(), move || exporter.export_manual(&path)).await
    }

    /// 立即备份到备份目录（带时间戳的新文件）
    pub async fn backup_now(&self) -> Result<ExportReport, ExportError> {
        let dir = self.config.read().backup_dir.clone();
        let exporter = self.exporter.clone();
        let report = run_blocking(dir.clone(), move || {
            exporter.backup(&dir, BackupKind::Manual)
        })
        .await?;
        self.scheduler.lock().mark_backup();
        Ok(report)
    }

    /// 清空记录和关联表，序号从 1 重新开始（确认由调用方负责）
    pub fn clear(&self) -> usize {
        let cleared = self.store.clear(&self.pending);
        tracing::info!(cleared, "已清空所有日志记录");
        cleared
    }

    /// 保存配置并重新启动调度
    pub fn save_config(&self, config: Config) {
        let mut config = config.normalized();
        if config.config_path().is_none() {
            if let Some(path) = self.config.read().config_path() {
                config = config.with_config_path(path);
            }
        }

        if config.config_path().is_some() {
            if let Err(e) = config.save() {
                tracing::warn!("保存配置失败: {:#}", e);
            }
        }

        let enabled = config.auto_backup_enabled;
        let interval = Duration::from_secs(config.backup_interval_secs);
        tracing::info!(
            enabled,
            interval_secs = config.backup_interval_secs,
            dir = %config.backup_dir.display(),
            "配置已保存"
        );
        *self.config.write() = config;
        self.scheduler
            .lock()
            .rearm(enabled, ScheduleSpec::every(interval));
    }

    /// 退出处理：停止处理任务（有限等待）、停止调度，最后做一次备份
    pub async fn teardown(&self) -> Option<ExportReport> {
        self.teardown_within(SHUTDOWN_WAIT).await
    }

    /// 同 `teardown`，等待处理任务的上限为 `wait`
    pub async fn teardown_within(&self, wait: Duration) -> Option<ExportReport> {
        self.shutdown.cancel();

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            match tokio::time::timeout(wait, handle).await {
                Ok(Ok(processed)) => tracing::debug!(processed, "处理任务已退出"),
                Ok(Err(e)) => tracing::error!("处理任务异常退出: {}", e),
                Err(_) => tracing::warn!(
                    wait_ms = wait.as_millis() as u64,
                    "等待处理任务退出超时，继续执行退出备份"
                ),
            }
        }

        self.scheduler.lock().stop();

        let dir = self.config.read().backup_dir.clone();
        let exporter = self.exporter.clone();
        match run_blocking(dir.clone(), move || {
            exporter.backup(&dir, BackupKind::Shutdown)
        })
        .await
        {
            Ok(report) => {
                tracing::info!(
                    records = report.records,
                    path = %report.path.display(),
                    "退出备份完成"
                );
                Some(report)
            }
            Err(ExportError::Empty) => {
                tracing::info!("无数据，跳过退出备份");
                None
            }
            Err(e) => {
                tracing::error!("退出备份失败: {}", e);
                None
            }
        }
    }
}

/// 在 blocking 线程池中执行导出
async fn run_blocking<F>(path: PathBuf, f: F) -> Result<ExportReport, ExportError>
where
    F: FnOnce() -> Result<ExportReport, ExportError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .unwrap_or_else(|e| {
            Err(ExportError::Io {
                path,
                source: std::io::Error::other(e.to_string()),
            })
        })
}

//! 自动备份调度
//!
//! 可取消的周期任务 + 显式的防抖状态：距上次实际备份不足一个间隔的
//! 触发会被跳过（手动备份同样计入）

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 启动后首次触发前的固定延迟
pub const INITIAL_DELAY: Duration = Duration::from_secs(10);

/// 备份防抖
#[derive(Debug, Clone)]
pub struct BackupGate {
    interval: Duration,
    last_backup: Option<Instant>,
}

impl BackupGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_backup: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// 距上次备份已满一个间隔时放行，并记录本次时间
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let due = match self.last_backup {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_backup = Some(now);
        }
        due
    }

    /// 记录一次在调度之外完成的备份
    pub fn mark(&mut self, now: Instant) {
        self.last_backup = Some(now);
    }
}

/// 定时触发的备份动作（阻塞调用，在 blocking 线程池中执行）
pub trait BackupTask: Send + Sync + 'static {
    fn run_backup(&self);
}

/// 调度参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl ScheduleSpec {
    pub fn every(interval: Duration) -> Self {
        Self {
            initial_delay: INITIAL_DELAY,
            interval,
        }
    }
}

struct RunningTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 备份调度器
///
/// 状态：停止 / 运行。每次保存配置都先停止旧定时器，启用时再按新参数启动。
/// 定时器通过创建时记录的运行时句柄启动，因此 `rearm` 可以在运行时之外的线程调用
pub struct BackupScheduler {
    runtime: Handle,
    task: Arc<dyn BackupTask>,
    gate: Arc<Mutex<BackupGate>>,
    timer: Option<RunningTimer>,
}

impl BackupScheduler {
    pub fn new(runtime: Handle, task: Arc<dyn BackupTask>, interval: Duration) -> Self {
        Self {
            runtime,
            task,
            gate: Arc::new(Mutex::new(BackupGate::new(interval))),
            timer: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// 记录一次手动备份，推迟下一次定时备份
    pub fn mark_backup(&self) {
        self.gate.lock().mark(Instant::now());
    }

    /// 按新参数重新启动；`enabled` 为 false 时只停止
    pub fn rearm(&mut self, enabled: bool, spec: ScheduleSpec) {
        self.stop();
        self.gate.lock().set_interval(spec.interval);

        if !enabled {
            tracing::info!("自动备份已禁用");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = self.runtime.spawn(run_timer(
            self.task.clone(),
            self.gate.clone(),
            spec,
            cancel.clone(),
        ));
        self.timer = Some(RunningTimer { cancel, handle });
        tracing::info!(interval_secs = spec.interval.as_secs(), "自动备份调度已启动");
    }

    /// 停止定时器；正在执行的备份会继续完成
    pub fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel.cancel();
            tracing::debug!("自动备份调度已停止");
        }
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_timer(
    task: Arc<dyn BackupTask>,
    gate: Arc<Mutex<BackupGate>>,
    spec: ScheduleSpec,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + spec.initial_delay, spec.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let scheduled = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            scheduled = ticker.tick() => scheduled,
        };

        // 以计划触发时间计时，避免定时器抖动导致正常触发被跳过
        if !gate.lock().try_acquire(scheduled) {
            tracing::debug!("距上次备份不足一个间隔，跳过本次自动备份");
            continue;
        }

        let task = task.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || task.run_backup()).await {
            tracing::error!("自动备份任务异常退出: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTask {
        runs: AtomicUsize,
    }

    impl BackupTask for CountingTask {
        fn run_backup(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_gate_debounces_close_ticks() {
        let mut gate = BackupGate::new(Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(gate.try_acquire(t0));
        assert!(!gate.try_acquire(t0 + Duration::from_secs(30)));
        assert!(gate.try_acquire(t0 + Duration::from_secs(60)));
        assert!(!gate.try_acquire(t0 + Duration::from_secs(119)));
    }

    #[test]
    fn test_gate_respects_manual_backup() {
        let mut gate = BackupGate::new(Duration::from_secs(60));
        let t0 = Instant::now();

        gate.mark(t0);
        assert!(!gate.try_acquire(t0 + Duration::from_secs(10)));
        assert!(gate.try_acquire(t0 + Duration::from_secs(61)));
    }

    #[tokio::test]
    async fn test_rearm_disabled_does_not_run() {
        let task = Arc::new(CountingTask::default());
        let mut scheduler =
            BackupScheduler::new(Handle::current(), task.clone(), Duration::from_millis(20));

        scheduler.rearm(
            false,
            ScheduleSpec {
                initial_delay: Duration::ZERO,
                interval: Duration::from_millis(20),
            },
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!scheduler.is_running());
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_periodic_backup_and_stop() {
        let task = Arc::new(CountingTask::default());
        let mut scheduler =
            BackupScheduler::new(Handle::current(), task.clone(), Duration::from_millis(100));

        scheduler.rearm(
            true,
            ScheduleSpec {
                initial_delay: Duration::ZERO,
                interval: Duration::from_millis(100),
            },
        );
        assert!(scheduler.is_running());
        tokio::time::sleep(Duration::from_millis(350)).await;

        let runs = task.runs.load(Ordering::SeqCst);
        assert!((2..=5).contains(&runs), "runs = {}", runs);

        scheduler.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_stop = task.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), after_stop);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_initial_delay_defers_first_backup() {
        let task = Arc::new(CountingTask::default());
        let mut scheduler =
            BackupScheduler::new(Handle::current(), task.clone(), Duration::from_millis(50));

        scheduler.rearm(
            true,
            ScheduleSpec {
                initial_delay: Duration::from_secs(30),
                interval: Duration::from_millis(50),
            },
        );
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rearm_from_plain_thread() {
        let task = Arc::new(CountingTask::default());
        let mut scheduler = BackupScheduler::new(Handle::current(), task, Duration::from_secs(60));

        let scheduler = std::thread::spawn(move || {
            scheduler.rearm(true, ScheduleSpec::every(Duration::from_secs(60)));
            scheduler
        })
        .join()
        .unwrap();

        assert!(scheduler.is_running());
    }
}
